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

//! Main library for Stract.

#![doc(html_logo_url = "https://stract.com/images/biglogo.svg")]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]

use thiserror::Error;

pub mod canonicalize;
pub mod config;
pub mod crawler;
mod distributed;
pub mod entrypoint;
pub mod frontier;
pub mod html;
pub mod index_client;
pub mod indexer;
pub mod lock;
pub mod maintenance;
pub mod suffix;
pub mod text;

pub use distributed::sonic;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not fetch url: {0}")]
    Fetch(String),

    #[error("failed to parse html document")]
    Parse,

    #[error("url could not be canonicalized")]
    Canonicalize,

    #[error("lock service error: {0}")]
    Lock(String),

    #[error("index client error: {0}")]
    IndexClient(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;

/// A request or response that is either a single value or a batch. Mirrors
/// the shape the `sonic_service!` macro expects from its callers so that a
/// service can handle single calls and pipelined batches through the same
/// wire type.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn one(self) -> Option<T> {
        match self {
            OneOrMany::One(t) => Some(t),
            OneOrMany::Many(_) => None,
        }
    }

    pub fn many(self) -> Vec<T> {
        match self {
            OneOrMany::One(t) => vec![t],
            OneOrMany::Many(v) => v,
        }
    }
}

/// Current epoch seconds, as used throughout for `last_update_time`
/// comparisons and claim timestamps.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) fn free_socket_addr() -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}
