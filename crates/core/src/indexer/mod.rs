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

//! The alternate content-only workload: reads already-fetched page bodies
//! out of an external cache instead of performing its own HTTP GET, then
//! tokenizes and publishes exactly the way `CrawlerWorker` does.

use std::future::Future;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use flate2::read::ZlibDecoder;

use crate::canonicalize;
use crate::config::IndexerConfig;
use crate::html::{Event, HTMLTokenizer, Sink};
use crate::index_client::{AddOptions, Collection, Document, IndexClient};
use crate::text::tokenize_content;

/// A `GET_CACHED_PAGE`-shaped stored procedure: returns the next available
/// `(id, zlib-compressed body)` pair for this worker, or `None` when the
/// cache currently has nothing for it.
pub trait CachedPageSource: Send + Sync + 'static {
    fn next_page(&self, worker_id: usize) -> impl Future<Output = Option<(String, Vec<u8>)>> + Send + '_;
}

#[derive(Default)]
struct Accumulator {
    title: String,
    meta_title: Option<String>,
    meta_description: Option<String>,
    meta_keywords: Option<String>,
    content: Vec<String>,
}

impl Sink for Accumulator {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Url(_) | Event::Image(_) => {}
            Event::MetaPair(name, content) => match name.to_lowercase().as_str() {
                "title" => self.meta_title = Some(content),
                "description" => self.meta_description = Some(content),
                "keywords" => self.meta_keywords = Some(content),
                _ => {}
            },
            Event::Title(text) => self.title.push_str(&text),
            Event::Content(text) => self.content.push(text),
        }
    }
}

fn split_id(id: &str) -> (String, String) {
    match id.find('/') {
        Some(idx) => (id[..idx].to_string(), id[idx..].to_string()),
        None => (id.to_string(), String::new()),
    }
}

pub struct IndexerWorker<C: CachedPageSource> {
    id: usize,
    source: Arc<C>,
    index: Arc<IndexClient>,
    suffixes: Arc<crate::suffix::PublicSuffixList>,
    idle_sleep: Duration,
}

impl<C: CachedPageSource> IndexerWorker<C> {
    pub fn new(
        id: usize,
        source: Arc<C>,
        index: Arc<IndexClient>,
        suffixes: Arc<crate::suffix::PublicSuffixList>,
        idle_sleep: Duration,
    ) -> Self {
        Self {
            id,
            source,
            index,
            suffixes,
            idle_sleep,
        }
    }

    pub async fn run(self) {
        loop {
            match self.source.next_page(self.id).await {
                Some((id, compressed)) => {
                    if let Err(e) = self.process(&id, &compressed).await {
                        tracing::warn!(worker = self.id, %id, error = %e, "failed to index cached page");
                    }
                }
                None => tokio::time::sleep(self.idle_sleep).await,
            }
        }
    }

    async fn process(&self, id: &str, compressed: &[u8]) -> crate::Result<()> {
        let mut decoder = ZlibDecoder::new(compressed);
        let mut body = String::new();
        decoder
            .read_to_string(&mut body)
            .map_err(|_| crate::Error::Parse)?;

        let mut acc = Accumulator::default();
        HTMLTokenizer::run(body.as_bytes(), &mut acc)?;

        let content = tokenize_content(&acc.content.join(" "));

        if acc.title.trim().is_empty() || content.is_none() {
            return Ok(());
        }

        let title = match acc.meta_title.as_deref() {
            Some(meta_title) if !meta_title.trim().is_empty() => meta_title.to_string(),
            _ => acc.title,
        };

        let (host, path) = split_id(id);
        let (subdomain, domain, tld) = canonicalize::split_host(&host, &self.suffixes);

        let doc = Document {
            id: id.to_string(),
            is_https: Some(true),
            subdomain: Some(subdomain),
            domain: Some(domain),
            tld: Some(tld),
            path: Some(path),
            last_update_time: None,
            title: Some(title),
            meta_description: acc.meta_description,
            meta_keywords: acc.meta_keywords,
            content,
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
            .await
    }
}

pub struct IndexerPool<C: CachedPageSource> {
    config: IndexerConfig,
    source: Arc<C>,
}

impl<C: CachedPageSource> IndexerPool<C> {
    pub fn new(config: IndexerConfig, source: Arc<C>) -> Self {
        Self { config, source }
    }

    pub async fn run(self) -> crate::Result<()> {
        let suffixes = Arc::new(
            crate::suffix::PublicSuffixList::fetch(&reqwest::Client::new()).await?,
        );

        let mut handles = Vec::with_capacity(self.config.num_workers);

        for id in 0..self.config.num_workers {
            let index = Arc::new(IndexClient::new(
                self.config.index.clone(),
                id,
                Duration::from_secs(30),
            )?);
            let worker = IndexerWorker::new(
                id,
                self.source.clone(),
                index,
                suffixes.clone(),
                Duration::from_secs(self.config.idle_sleep_seconds),
            );
            handles.push(tokio::spawn(worker.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "indexer worker task panicked");
            }
        }

        Ok(())
    }
}
