// Stract is an open source web search engine.
// Copyright (C) 2024 Stract ApS
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

//! The frontier is the `working` collection viewed as a queue of urls due
//! for a (re)crawl. A url becomes eligible once `cooldown_seconds` have
//! passed since its last crawl; claiming one is lock-serialized so at
//! most one worker ever fetches a given url at a time.

use std::sync::Arc;

use crate::index_client::{AddOptions, Collection, Document, IndexClient, Query, SearchOptions};
use crate::lock::LockClient;

const PAGE_SIZE: usize = 200;

pub struct Frontier {
    index: Arc<IndexClient>,
    lock: LockClient,
    cooldown_seconds: i64,
}

impl Frontier {
    pub fn new(index: Arc<IndexClient>, lock: LockClient, cooldown_seconds: u64) -> Self {
        Self {
            index,
            lock,
            cooldown_seconds: cooldown_seconds as i64,
        }
    }

    /// Claims up to `n` stale urls, returning the documents backing them.
    /// A url is only returned if this call won its lock; the caller must
    /// eventually call [`Frontier::commit_claims`] or [`Frontier::release`]
    /// for every url it receives.
    pub async fn claim_batch(&self, n: usize, now: i64) -> crate::Result<Vec<Document>> {
        let cutoff = now - self.cooldown_seconds;
        let query = Query::range("last_update_time", 0, cutoff);

        let mut claimed = Vec::with_capacity(n);
        let mut start = 0;

        loop {
            if claimed.len() >= n {
                break;
            }

            let page = self
                .index
                .search(
                    Collection::Working,
                    query.clone(),
                    SearchOptions {
                        filter: None,
                        rows: PAGE_SIZE,
                        start,
                        timeout: None,
                    },
                )
                .await?;

            if page.docs.is_empty() {
                break;
            }

            start += page.docs.len();

            for doc in page.docs {
                if claimed.len() >= n {
                    break;
                }

                if self.lock.acquire(&doc.id).await? {
                    claimed.push(doc);
                }
            }
        }

        Ok(claimed)
    }

    /// Stamps every claimed url with `now` and releases its lock.
    pub async fn commit_claims(&self, ids: &[String], now: i64) -> crate::Result<()> {
        for id in ids {
            let doc = Document {
                id: id.clone(),
                last_update_time: Some(now),
                ..Default::default()
            };

            self.index
                .add(
                    Collection::Working,
                    std::slice::from_ref(&doc),
                    AddOptions {
                        overwrite: true,
                        commit: false,
                        boost: None,
                    },
                )
                .await?;

            self.lock.release(id).await?;
        }

        self.index.commit(Collection::Working).await?;

        Ok(())
    }

    /// Releases a claim without advancing its cooldown, e.g. after a
    /// failed fetch, so another worker can retry it sooner.
    pub async fn release(&self, id: &str) -> crate::Result<()> {
        self.lock.release(id).await
    }
}
