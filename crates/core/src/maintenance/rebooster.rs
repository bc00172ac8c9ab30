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

//! Rewrites index-time field boosts on every domain-root document in
//! `main`. Runs once per invocation, committing a single time at the end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::index_client::{AddOptions, Collection, Document, IndexClient, Query, SearchOptions};

/// Computes the boost map for a document, or `None` if it is ineligible.
/// Only domain-root documents (empty `path`) are boosted — a non-empty
/// `path` means the document was returned by a stale or widened query and
/// is skipped rather than re-added.
pub fn boost_for(doc: &Document) -> Option<HashMap<String, u32>> {
    if doc.path.as_deref().is_some_and(|p| !p.is_empty()) {
        return None;
    }

    let subdomain = doc.subdomain.as_deref().unwrap_or("");
    let mut boost = HashMap::new();

    if subdomain.is_empty() || subdomain == "www" {
        boost.insert("domain".to_string(), 5000);
        boost.insert("meta_keywords".to_string(), 800);
        boost.insert("title".to_string(), 350);
    } else {
        boost.insert("domain".to_string(), 1000);
        boost.insert("meta_keywords".to_string(), 400);
        boost.insert("subdomain".to_string(), 600);
    }

    Some(boost)
}

pub struct Rebooster {
    index: Arc<IndexClient>,
    page_size: usize,
}

impl Rebooster {
    pub fn new(index: Arc<IndexClient>, page_size: usize) -> Self {
        Self { index, page_size }
    }

    pub async fn run_once(&self) -> crate::Result<()> {
        let mut start = 0;

        loop {
            let page = self
                .index
                .search(
                    Collection::Main,
                    Query::raw("domain:* AND -path:*"),
                    SearchOptions {
                        filter: None,
                        rows: self.page_size,
                        start,
                        timeout: Some(Duration::from_secs(30)),
                    },
                )
                .await?;

            if page.docs.is_empty() {
                break;
            }

            start += page.docs.len();

            for doc in page.docs {
                let Some(boost) = boost_for(&doc) else {
                    continue;
                };

                self.index
                    .add(
                        Collection::Main,
                        std::slice::from_ref(&doc),
                        AddOptions {
                            overwrite: true,
                            commit: false,
                            boost: Some(boost),
                        },
                    )
                    .await?;
            }
        }

        self.index.commit(Collection::Main).await?;

        Ok(())
    }
}
