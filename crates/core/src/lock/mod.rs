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

//! A named-lock service. Crawler and indexer workers use it to serialize
//! claims against the frontier so no two workers race on the same url.
//!
//! Deployment picks one of two backends and the worker code does not care
//! which: `InProcess` shares a `Mutex<HashSet<String>>` between workers
//! living in the same process, `Network` dials a standalone
//! `webcrawlermanager` instance over the sonic rpc framework.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::config::LockClientConfig;
use crate::distributed::sonic;

#[derive(Debug, Clone, thiserror::Error, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub enum LockError {
    #[error("wrong authkey")]
    BadAuthKey,
}

/// Server-side state for the networked backend. Bound once by the
/// `webcrawlermanager` entrypoint.
///
/// `held` maps a key to the id of the connection that acquired it, not just
/// a flat set: a key is released not only by an explicit `Release` but also
/// when its owning connection disconnects, so a worker that crashes between
/// acquiring and releasing never leaks the lock forever.
pub struct LockServer {
    authkey: String,
    held: StdMutex<HashMap<String, u64>>,
}

impl LockServer {
    pub fn new(authkey: String) -> Self {
        Self {
            authkey,
            held: StdMutex::new(HashMap::new()),
        }
    }
}

sonic::service::sonic_service!(LockServer, [Acquire, Release], |server: &LockServer, connection: u64| {
    server
        .held
        .lock()
        .unwrap()
        .retain(|_, owner| *owner != connection);
});

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub struct Acquire {
    pub key: String,
    pub authkey: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, bincode::Encode, bincode::Decode)]
pub struct Release {
    pub key: String,
    pub authkey: String,
}

impl sonic::service::Message<LockServer> for Acquire {
    type Response = Result<bool, LockError>;

    async fn handle(self, server: &LockServer, connection: u64) -> Self::Response {
        if self.authkey != server.authkey {
            return Err(LockError::BadAuthKey);
        }

        let mut held = server.held.lock().unwrap();
        if held.contains_key(&self.key) {
            Ok(false)
        } else {
            held.insert(self.key, connection);
            Ok(true)
        }
    }
}

impl sonic::service::Message<LockServer> for Release {
    type Response = Result<(), LockError>;

    async fn handle(self, server: &LockServer, _connection: u64) -> Self::Response {
        if self.authkey != server.authkey {
            return Err(LockError::BadAuthKey);
        }

        server.held.lock().unwrap().remove(&self.key);
        Ok(())
    }
}

/// Client handle used by `CrawlerWorker`/`IndexerWorker` to serialize
/// frontier claims.
///
/// The `Network` backend holds one TCP connection open for as long as the
/// client lives, instead of dialing fresh for every `acquire`/`release`:
/// that connection is what lets the server notice a crashed worker (the
/// stream drops) and release everything that connection held. A transient
/// send error drops the cached connection so the next call reconnects.
#[derive(Clone)]
pub enum LockClient {
    InProcess(Arc<Mutex<HashSet<String>>>),
    Network {
        host: String,
        port: u16,
        authkey: String,
        connection: Arc<Mutex<Option<sonic::service::Connection<LockServer>>>>,
    },
}

impl LockClient {
    pub fn in_process(shared: Arc<Mutex<HashSet<String>>>) -> Self {
        LockClient::InProcess(shared)
    }

    pub fn from_config(config: &LockClientConfig, shared: Arc<Mutex<HashSet<String>>>) -> Self {
        match config {
            LockClientConfig::InProcess => LockClient::InProcess(shared),
            LockClientConfig::Network {
                host,
                port,
                authkey,
            } => LockClient::Network {
                host: host.clone(),
                port: *port,
                authkey: authkey.clone(),
                connection: Arc::new(Mutex::new(None)),
            },
        }
    }

    async fn send<R: sonic::service::Wrapper<LockServer>>(
        connection: &Mutex<Option<sonic::service::Connection<LockServer>>>,
        host: &str,
        port: u16,
        request: R,
    ) -> crate::Result<R::Response> {
        let mut guard = connection.lock().await;

        if guard.is_none() {
            *guard = Some(
                sonic::service::Connection::<LockServer>::create((host.to_string(), port))
                    .await
                    .map_err(|e| crate::Error::Lock(e.to_string()))?,
            );
        }

        match guard.as_mut().unwrap().send(request).await {
            Ok(res) => Ok(res),
            Err(e) => {
                *guard = None;
                Err(crate::Error::Lock(e.to_string()).into())
            }
        }
    }

    /// Returns `true` if the lock was newly acquired, `false` if another
    /// worker already holds it.
    pub async fn acquire(&self, key: &str) -> crate::Result<bool> {
        match self {
            LockClient::InProcess(held) => Ok(held.lock().await.insert(key.to_string())),
            LockClient::Network {
                host,
                port,
                authkey,
                connection,
            } => {
                let req = Acquire {
                    key: key.to_string(),
                    authkey: authkey.clone(),
                };

                Self::send(connection, host, *port, req)
                    .await?
                    .map_err(|e| crate::Error::Lock(e.to_string()).into())
            }
        }
    }

    pub async fn release(&self, key: &str) -> crate::Result<()> {
        match self {
            LockClient::InProcess(held) => {
                held.lock().await.remove(key);
                Ok(())
            }
            LockClient::Network {
                host,
                port,
                authkey,
                connection,
            } => {
                let req = Release {
                    key: key.to_string(),
                    authkey: authkey.clone(),
                };

                Self::send(connection, host, *port, req)
                    .await?
                    .map_err(|e| crate::Error::Lock(e.to_string()).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_acquire_is_exclusive() {
        let shared = Arc::new(Mutex::new(HashSet::new()));
        let a = LockClient::in_process(shared.clone());
        let b = LockClient::in_process(shared);

        assert!(a.acquire("example.com").await.unwrap());
        assert!(!b.acquire("example.com").await.unwrap());

        a.release("example.com").await.unwrap();
        assert!(b.acquire("example.com").await.unwrap());
    }

    #[tokio::test]
    async fn network_acquire_round_trip() {
        let addr = crate::free_socket_addr();
        let server_task = tokio::spawn({
            let addr = addr;
            async move {
                let server = LockServer::new("secret".to_string())
                    .bind(addr)
                    .await
                    .unwrap();
                loop {
                    server.accept().await.unwrap();
                }
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let client = LockClient::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
            authkey: "secret".to_string(),
            connection: Arc::new(Mutex::new(None)),
        };

        assert!(client.acquire("a").await.unwrap());
        assert!(!client.acquire("a").await.unwrap());
        client.release("a").await.unwrap();
        assert!(client.acquire("a").await.unwrap());

        server_task.abort();
    }

    /// A worker that dies without calling `release` must not leak its
    /// locks forever: dropping its connection should free everything it
    /// held, the same way a crash would.
    #[tokio::test]
    async fn network_lock_is_released_when_connection_drops() {
        let addr = crate::free_socket_addr();
        let server_task = tokio::spawn({
            let addr = addr;
            async move {
                let server = LockServer::new("secret".to_string())
                    .bind(addr)
                    .await
                    .unwrap();
                loop {
                    server.accept().await.unwrap();
                }
            }
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let crashing = LockClient::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
            authkey: "secret".to_string(),
            connection: Arc::new(Mutex::new(None)),
        };

        assert!(crashing.acquire("crashed.example.com").await.unwrap());

        // Simulate the worker dying mid-iteration: the connection is
        // dropped without ever sending a `Release`.
        drop(crashing);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let other = LockClient::Network {
            host: addr.ip().to_string(),
            port: addr.port(),
            authkey: "secret".to_string(),
            connection: Arc::new(Mutex::new(None)),
        };
        assert!(other.acquire("crashed.example.com").await.unwrap());

        server_task.abort();
    }
}
