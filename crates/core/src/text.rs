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

//! Shared between `CrawlerWorker` and `IndexerWorker`: both publish the
//! same `content` field shape.

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").unwrap());

/// Normalizes free text into the space-joined lowercase token sequence
/// stored in the `content` field: every `\w+` run that begins with an
/// ASCII letter, lowercased. `None` if nothing qualifies.
pub fn tokenize_content(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str())
        .filter(|tok| tok.chars().next().is_some_and(|c| c.is_ascii_alphabetic()))
        .collect();

    if tokens.is_empty() {
        None
    } else {
        Some(tokens.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_per_testable_property_12() {
        assert_eq!(tokenize_content("Hello, 42 World!").unwrap(), "hello world");
    }

    #[test]
    fn empty_content_is_not_published() {
        assert_eq!(tokenize_content("123 456"), None);
        assert_eq!(tokenize_content(""), None);
    }
}
