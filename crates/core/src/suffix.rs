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

//! A runtime-fetched public suffix list. Unlike the teacher's own
//! `UrlExt`/`publicsuffix` crate, which bundles a compiled-in `.dat` file,
//! the source system downloads its suffix list at startup from
//! publicsuffix.org and this keeps that behavior rather than vendoring a
//! snapshot.

use std::collections::HashSet;

pub const SOURCE_URL: &str = "https://publicsuffix.org/list/effective_tld_names.dat";

#[derive(Debug, Clone, Default)]
pub struct PublicSuffixList {
    suffixes: HashSet<String>,
}

impl PublicSuffixList {
    pub fn from_entries(entries: impl Iterator<Item = String>) -> Self {
        Self {
            suffixes: entries.collect(),
        }
    }

    /// Parse the `effective_tld_names.dat` format: one suffix per line,
    /// ignoring lines that start with `//`, `*`, or are empty.
    pub fn parse(raw: &str) -> Self {
        Self::from_entries(raw.lines().filter_map(|line| {
            let line = line.trim();

            if line.is_empty() || line.starts_with("//") || line.starts_with('*') {
                None
            } else {
                Some(line.to_string())
            }
        }))
    }

    /// Fetch and parse the list from its well-known HTTPS source. Loaded
    /// once per worker at startup and cached for the worker's lifetime.
    pub async fn fetch(client: &reqwest::Client) -> crate::Result<Self> {
        let body = client.get(SOURCE_URL).send().await?.text().await?;
        Ok(Self::parse(&body))
    }

    pub fn contains(&self, suffix: &str) -> bool {
        self.suffixes.contains(suffix)
    }

    pub fn len(&self) -> usize {
        self.suffixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suffixes.is_empty()
    }
}
