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

pub mod defaults;

/// The two logical collections an `IndexClient` talks to, each replicated
/// across a static list of node urls.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexClientConfig {
    pub working: Vec<String>,
    pub main: Vec<String>,
}

/// Where a worker's `LockService` handle connects. `InProcess` is the
/// single-host deployment; `Network` dials a `webcrawlermanager` endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockClientConfig {
    InProcess,
    Network {
        host: String,
        port: u16,
        authkey: String,
    },
}

impl Default for LockClientConfig {
    fn default() -> Self {
        LockClientConfig::InProcess
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrawlerConfig {
    #[serde(default = "defaults::Crawler::num_workers")]
    pub num_workers: usize,

    #[serde(default = "defaults::Crawler::user_agent")]
    pub user_agent: String,

    #[serde(default = "defaults::Crawler::timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "defaults::Crawler::claim_batch_size")]
    pub claim_batch_size: usize,

    #[serde(default = "defaults::Crawler::cooldown_seconds")]
    pub cooldown_seconds: u64,

    #[serde(default = "defaults::Crawler::idle_sleep_seconds")]
    pub idle_sleep_seconds: u64,

    pub index: IndexClientConfig,

    #[serde(default)]
    pub lock: LockClientConfig,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            num_workers: defaults::Crawler::num_workers(),
            user_agent: defaults::Crawler::user_agent(),
            timeout_seconds: defaults::Crawler::timeout_seconds(),
            claim_batch_size: defaults::Crawler::claim_batch_size(),
            cooldown_seconds: defaults::Crawler::cooldown_seconds(),
            idle_sleep_seconds: defaults::Crawler::idle_sleep_seconds(),
            index: IndexClientConfig {
                working: Vec::new(),
                main: Vec::new(),
            },
            lock: LockClientConfig::InProcess,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexerConfig {
    #[serde(default = "defaults::Indexer::num_workers")]
    pub num_workers: usize,

    #[serde(default = "defaults::Indexer::idle_sleep_seconds")]
    pub idle_sleep_seconds: u64,

    pub index: IndexClientConfig,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            num_workers: defaults::Indexer::num_workers(),
            idle_sleep_seconds: defaults::Indexer::idle_sleep_seconds(),
            index: IndexClientConfig {
                working: Vec::new(),
                main: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LockServiceConfig {
    #[serde(default = "defaults::LockService::host")]
    pub host: String,

    #[serde(default = "defaults::LockService::port")]
    pub port: u16,

    #[serde(default = "defaults::LockService::authkey")]
    pub authkey: String,
}

impl Default for LockServiceConfig {
    fn default() -> Self {
        Self {
            host: defaults::LockService::host(),
            port: defaults::LockService::port(),
            authkey: defaults::LockService::authkey(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "defaults::Optimizer::sleep_seconds")]
    pub sleep_seconds: u64,

    #[serde(default = "defaults::Optimizer::error_sleep_seconds")]
    pub error_sleep_seconds: u64,

    pub index: IndexClientConfig,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            sleep_seconds: defaults::Optimizer::sleep_seconds(),
            error_sleep_seconds: defaults::Optimizer::error_sleep_seconds(),
            index: IndexClientConfig {
                working: Vec::new(),
                main: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ReboosterConfig {
    #[serde(default = "defaults::Rebooster::page_size")]
    pub page_size: usize,

    pub index: IndexClientConfig,
}

impl Default for ReboosterConfig {
    fn default() -> Self {
        Self {
            page_size: defaults::Rebooster::page_size(),
            index: IndexClientConfig {
                working: Vec::new(),
                main: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeltaMergeConfig {
    #[serde(default = "defaults::DeltaMerge::rows_per_iteration")]
    pub rows_per_iteration: usize,

    #[serde(default = "defaults::Rebooster::page_size")]
    pub rebooster_page_size: usize,

    pub index: IndexClientConfig,
}

impl Default for DeltaMergeConfig {
    fn default() -> Self {
        Self {
            rows_per_iteration: defaults::DeltaMerge::rows_per_iteration(),
            rebooster_page_size: defaults::Rebooster::page_size(),
            index: IndexClientConfig {
                working: Vec::new(),
                main: Vec::new(),
            },
        }
    }
}
