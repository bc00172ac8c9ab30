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

//! Spawns and supervises the crawler worker pool. The pool owns the
//! workers; workers consult a [`crate::frontier::Frontier`] and an
//! [`crate::index_client::IndexClient`] but never call back into the pool.

mod worker;

pub use worker::CrawlerWorker;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::CrawlerConfig;
use crate::frontier::Frontier;
use crate::index_client::IndexClient;
use crate::lock::LockClient;
use crate::suffix::PublicSuffixList;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("fetch failed with status {0}")]
    FetchFailed(reqwest::StatusCode),

    #[error("response body was not valid utf-8")]
    InvalidEncoding,

    #[error("url could not be canonicalized: {0}")]
    InvalidUrl(String),
}

pub struct CrawlerPool {
    config: CrawlerConfig,
}

impl CrawlerPool {
    pub fn new(config: CrawlerConfig) -> Self {
        Self { config }
    }

    /// Loads the public-suffix list once, shared read-only by every worker,
    /// then spawns `num_workers` independent workers and waits for all of
    /// them to exit (in practice: never, short of a process signal).
    pub async fn run(self) -> crate::Result<()> {
        let suffixes = Arc::new(PublicSuffixList::fetch(&reqwest::Client::new()).await?);
        let in_process_locks = Arc::new(Mutex::new(HashSet::new()));
        let config = Arc::new(self.config);

        let mut handles = Vec::with_capacity(config.num_workers);

        for id in 0..config.num_workers {
            let index = Arc::new(IndexClient::new(
                config.index.clone(),
                id,
                Duration::from_secs(config.timeout_seconds),
            )?);
            let lock = LockClient::from_config(&config.lock, in_process_locks.clone());
            let frontier = Frontier::new(index.clone(), lock, config.cooldown_seconds);
            let worker = CrawlerWorker::new(id, config.clone(), frontier, index, suffixes.clone())?;

            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "crawler worker task panicked");
            }
        }

        Ok(())
    }
}
