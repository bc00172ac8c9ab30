// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! URL resolution, percent-encoding and host decomposition, carried over
//! from the crawler's `parse_url`/`parse_url2`/`validate_url`/`add_url`
//! behavior rather than reimplemented against RFC 3986 from scratch.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::suffix::PublicSuffixList;

/// Characters preserved as-is by percent-encoding, on top of the usual
/// unreserved set.
const RESERVED: &[u8] = b"%/:=&?~#+!$,;'@()*[]";

/// The allowed path-extension allowlist. Note `"actionpl"`: this is a
/// verbatim artifact of the original source, where the literal string
/// `"action"` sat immediately next to `"pl"` in a list with no separator
/// between them, producing this single concatenated token. Preserved
/// byte-for-byte for bit-compatibility rather than split into `"action"`
/// and `"pl"`.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "asp", "aspx", "axd", "asx", "asmx", "ashx", "cfm", "yaws", "html", "htm", "xhtml", "jhtml",
    "jsp", "jspx", "wss", "do", "actionpl", "php", "php4", "php3", "phtml", "py", "rb", "rhtml",
    "xml", "rss", "cgi",
];

/// Loose URL-validation regex, preserved verbatim from the original source:
/// a character class was used where an alternation was clearly intended
/// (`[http|https]+` matches any run of the characters h, t, t, p, |, s
/// rather than the literal scheme "http" or "https"). We keep the loose
/// semantics for bit-compatibility rather than tightening it.
static VALIDATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[http|https]+://[^.]+\.[A-Za-z]+").unwrap());

fn percent_encode_preserving_reserved(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let is_unreserved =
            byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~');
        if is_unreserved || RESERVED.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

fn scheme_of(url: &str) -> Option<String> {
    url::Url::parse(url).ok().map(|u| u.scheme().to_string())
}

fn scheme_and_host_of(url: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Some((parsed.scheme().to_string(), host))
}

/// Resolve `raw` against `current_page`, percent-encoding, stripping the
/// fragment and trailing slashes. Returns `None` when `raw` is a
/// `javascript:` pseudo-url or cannot be resolved at all.
pub fn canonicalize(raw: &str, current_page: &str) -> Option<String> {
    if raw.starts_with("javascript:") {
        return None;
    }

    let raw = percent_encode_preserving_reserved(raw);
    let current_page = percent_encode_preserving_reserved(current_page);

    let mut resolved = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw
    } else if let Some(rest) = raw.strip_prefix("//") {
        let scheme = scheme_of(&current_page)?;
        format!("{scheme}://{rest}")
    } else if raw.starts_with('/') {
        let (scheme, host) = scheme_and_host_of(&current_page)?;
        format!("{scheme}://{host}{raw}")
    } else {
        format!("{current_page}/{raw}")
    };

    if let Some(idx) = resolved.find('#') {
        resolved.truncate(idx);
    }

    while resolved.ends_with('/') {
        resolved.pop();
    }

    Some(resolved)
}

/// Requires scheme in {http, https} and a host containing a dot followed by
/// alphabetic characters — using the loose, bit-compatible regex above
/// rather than a strict scheme alternation.
pub fn validate(url: &str) -> bool {
    VALIDATE_RE.is_match(url)
}

/// `true` when the last path segment has no extension, or one drawn from
/// the closed allowlist above. A path with no dot in its final segment
/// (e.g. a bare directory or article slug) is not rejected outright — only
/// a *recognized-but-disallowed* extension (`.jpg`, `.css`, ...) is.
pub fn allowed_extension(path: &str) -> bool {
    let last_segment = path.rsplit('/').next().unwrap_or("");

    match last_segment.rfind('.') {
        Some(idx) => {
            let ext = last_segment[idx + 1..].to_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => true,
    }
}

/// Decomposes an already-canonicalized absolute url into the frontier
/// identity tuple: `(id, is_https, host, path)`, where `id` is `host + path`
/// with no scheme and no trailing slash.
pub fn identity(url: &str) -> Option<(String, bool, String, String)> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let path = parsed.path().trim_end_matches('/').to_string();
    let is_https = parsed.scheme() == "https";
    let id = format!("{host}{path}");
    Some((id, is_https, host, path))
}

/// Split a hostname into `(subdomain, domain, tld)` by finding the longest
/// suffix of its label sequence that is a member of `suffix_list`.
pub fn split_host(host: &str, suffix_list: &PublicSuffixList) -> (String, String, String) {
    let labels: Vec<&str> = host.split('.').collect();

    for i in 0..labels.len() {
        let candidate = labels[i..].join(".");
        if suffix_list.contains(&candidate) {
            if i == 0 {
                return (String::new(), String::new(), candidate);
            }

            let domain = labels[i - 1].to_string();
            let subdomain = labels[..i - 1].join(".");
            return (subdomain, domain, candidate);
        }
    }

    // no known suffix: fall back to treating the last label as the tld.
    match labels.len() {
        0 => (String::new(), String::new(), String::new()),
        1 => (String::new(), String::new(), labels[0].to_string()),
        2 => (String::new(), labels[0].to_string(), labels[1].to_string()),
        n => (
            labels[..n - 2].join("."),
            labels[n - 2].to_string(),
            labels[n - 1].to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suffix::PublicSuffixList;

    fn suffixes(entries: &[&str]) -> PublicSuffixList {
        PublicSuffixList::from_entries(entries.iter().map(|s| s.to_string()))
    }

    #[test]
    fn relative_resolution() {
        assert_eq!(
            canonicalize("/x", "http://h.com/a/b").unwrap(),
            "http://h.com/x"
        );
        assert_eq!(
            canonicalize("//x.com/y", "https://h.com/").unwrap(),
            "https://x.com/y"
        );
        assert_eq!(
            canonicalize("x", "http://h.com/a").unwrap(),
            "http://h.com/a/x"
        );
        assert_eq!(canonicalize("javascript:alert(1)", "http://h.com/"), None);
    }

    #[test]
    fn fragment_stripping() {
        assert_eq!(
            canonicalize("http://h.com/a#frag", "http://h.com/").unwrap(),
            "http://h.com/a"
        );
    }

    #[test]
    fn idempotence() {
        let u = "http://h.com/a/b";
        let once = canonicalize(u, u).unwrap();
        let twice = canonicalize(&once, &once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn extension_allowlist() {
        assert!(!allowed_extension("/images/cat.jpg"));
        assert!(allowed_extension("/page.php"));
        assert!(allowed_extension("/about"));
    }

    #[test]
    fn host_split() {
        let list = suffixes(&["co.uk", "com"]);
        assert_eq!(
            split_host("a.b.example.co.uk", &list),
            ("a.b".to_string(), "example".to_string(), "co.uk".to_string())
        );
        assert_eq!(
            split_host("www.example.com", &list),
            ("www".to_string(), "example".to_string(), "com".to_string())
        );
    }

    #[test]
    fn identity_splits_host_and_path() {
        let (id, is_https, host, path) = identity("https://h.com/a/b").unwrap();
        assert_eq!(id, "h.com/a/b");
        assert!(is_https);
        assert_eq!(host, "h.com");
        assert_eq!(path, "/a/b");

        let (id, _, _, path) = identity("http://h.com").unwrap();
        assert_eq!(id, "h.com");
        assert_eq!(path, "");
    }

    #[test]
    fn validate_accepts_loose_scheme() {
        assert!(validate("http://h.com/a"));
        assert!(validate("https://h.com/a"));
        assert!(!validate("ftp://nohost"));
    }
}
