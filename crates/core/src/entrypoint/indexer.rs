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

//! Wires the standalone binary's indexer mode to a stub `CachedPageSource`.
//! A real deployment supplies its own `GET_CACHED_PAGE` procedure; this one
//! always reports empty so the worker pool idles rather than erroring.

use std::sync::Arc;

use crate::config::IndexerConfig;
use crate::indexer::{CachedPageSource, IndexerPool};

struct EmptySource;

impl CachedPageSource for EmptySource {
    async fn next_page(&self, _worker_id: usize) -> Option<(String, Vec<u8>)> {
        None
    }
}

pub async fn run(config: IndexerConfig) -> crate::Result<()> {
    IndexerPool::new(config, Arc::new(EmptySource)).run().await
}
