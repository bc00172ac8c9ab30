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

use std::{sync::Arc, time::Duration};

use tokio::net::ToSocketAddrs;

use crate::OneOrMany;

use super::Result;

pub trait Service: Sized + Send + Sync + 'static {
    type Request: bincode::Decode + bincode::Encode + Send + Sync;
    type Response: bincode::Encode + bincode::Decode + Send + Sync;

    fn handle(
        req: Self::Request,
        server: &Self,
        connection: u64,
    ) -> impl std::future::Future<Output = Self::Response> + Send + '_;

    /// Called once a connection's request loop has ended, whether the peer
    /// disconnected gracefully or the stream errored out from under it
    /// (e.g. the peer crashed). Default is a no-op; services that hand out
    /// connection-scoped resources (locks, leases) override this to release
    /// whatever `connection` still holds.
    fn on_disconnect(&self, _connection: u64) {}
}

pub trait Message<S: Service> {
    type Response;
    fn handle(self, server: &S, connection: u64) -> impl std::future::Future<Output = Self::Response>;
}
pub trait Wrapper<S: Service>: Message<S> {
    fn wrap_request(self) -> S::Request;
    fn unwrap_response(res: S::Response) -> Option<Self::Response>;
}

pub struct Server<S: Service> {
    inner: super::Server<OneOrMany<S::Request>, OneOrMany<S::Response>>,
    service: Arc<S>,
    next_connection_id: std::sync::atomic::AtomicU64,
}

impl<S: Service> Server<S> {
    pub async fn bind(service: S, addr: impl ToSocketAddrs) -> Result<Self> {
        Ok(Server {
            inner: super::Server::bind(addr).await?,
            service: Arc::new(service),
            next_connection_id: std::sync::atomic::AtomicU64::new(0),
        })
    }

    /// Accepts one TCP connection and spawns a task that serves requests off
    /// it until the peer disconnects, then runs `Service::on_disconnect` for
    /// that connection's id. A connection therefore serves many sequential
    /// requests, not just one.
    pub async fn accept(&self) -> Result<()> {
        let mut conn = self.inner.accept().await?;

        let service = Arc::clone(&self.service);
        let connection_id = self
            .next_connection_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        tokio::spawn(async move {
            loop {
                let mut req = match conn.request().await {
                    Ok(req) => req,
                    Err(_) => break,
                };

                let res = match req.take_body() {
                    OneOrMany::One(body) => {
                        OneOrMany::One(S::handle(body, &service, connection_id).await)
                    }
                    OneOrMany::Many(bodies) => {
                        let mut res = Vec::new();
                        for body in bodies {
                            res.push(S::handle(body, &service, connection_id).await);
                        }
                        OneOrMany::Many(res)
                    }
                };

                if let Err(e) = req.respond(res).await {
                    tracing::error!("failed to respond to request: {}", e);
                    break;
                }
            }

            service.on_disconnect(connection_id);
        });

        Ok(())
    }
}

pub struct Connection<S: Service> {
    inner: super::Connection<OneOrMany<S::Request>, OneOrMany<S::Response>>,
}

impl<S: Service> Connection<S> {
    pub async fn create(server: impl ToSocketAddrs) -> Result<Connection<S>> {
        Ok(Connection {
            inner: super::Connection::create(server).await?,
        })
    }

    pub async fn create_with_timeout(
        server: impl ToSocketAddrs,
        timeout: Duration,
    ) -> Result<Connection<S>> {
        Ok(Connection {
            inner: super::Connection::create_with_timeout(server, timeout).await?,
        })
    }

    pub async fn create_with_timeout_retry(
        server: impl ToSocketAddrs + Clone,
        timeout: Duration,
        retry: impl Iterator<Item = Duration>,
    ) -> Result<Connection<S>> {
        Ok(Connection {
            inner: super::Connection::create_with_timeout_retry(server, timeout, retry).await?,
        })
    }

    /// Each call reuses the same underlying stream, so a process that keeps
    /// its `Connection` alive across calls is visible to the server as one
    /// continuous session: the server only runs `on_disconnect` once this
    /// connection (and every other clone of it on the peer side) goes away.
    pub async fn send<R: Wrapper<S>>(&mut self, request: R) -> Result<R::Response> {
        Ok(R::unwrap_response(
            self.inner
                .send(&OneOrMany::One(R::wrap_request(request)))
                .await?
                .one()
                .expect("response is missing"),
        )
        .unwrap())
    }

    pub async fn send_with_timeout<R: Wrapper<S>>(
        &mut self,
        request: R,
        timeout: Duration,
    ) -> Result<R::Response> {
        Ok(R::unwrap_response(
            self.inner
                .send_with_timeout(&OneOrMany::One(R::wrap_request(request)), timeout)
                .await?
                .one()
                .expect("response is missing"),
        )
        .unwrap())
    }

    pub async fn batch_send_with_timeout<R: Wrapper<S>>(
        &mut self,
        requests: Vec<R>,
        timeout: Duration,
    ) -> Result<Vec<R::Response>> {
        Ok(self
            .inner
            .send_with_timeout(
                &OneOrMany::Many(requests.into_iter().map(R::wrap_request).collect::<Vec<_>>()),
                timeout,
            )
            .await?
            .many()
            .into_iter()
            .map(|res| R::unwrap_response(res).unwrap())
            .collect())
    }
}

macro_rules! sonic_service {
    ($service:ident, [$($req:ident),*$(,)?], $on_disconnect:expr) => {
        mod service_impl__ {
            #![allow(dead_code)]

            use super::{$service, $($req),*};

            use $crate::distributed::sonic;

            #[derive(Debug, Clone, ::bincode::Encode, ::bincode::Decode)]
            pub enum Request {
                $($req(Box<$req>),)*
            }
            #[derive(::bincode::Encode, ::bincode::Decode)]
            pub enum Response {
                $($req(Box<<$req as sonic::service::Message<$service>>::Response>),)*
            }
            $(
                impl sonic::service::Wrapper<$service> for $req {
                    fn wrap_request(self) -> Request {
                        Request::$req(Box::new(self))
                    }
                    fn unwrap_response(res: <$service as sonic::service::Service>::Response) -> Option<Self::Response> {
                        #[allow(irrefutable_let_patterns)]
                        if let Response::$req(value) = res {
                            Some(*value)
                        } else {
                            None
                        }
                    }
                }
            )*
            impl sonic::service::Service for $service {
                type Request = Request;
                type Response = Response;

                // NOTE: This is a workaround for the fact that async functions
                // don't have a Send bound by default, and there's currently no
                // way of specifying that.
                #[allow(clippy::manual_async_fn)]
                fn handle(req: Request, server: &Self, connection: u64) -> impl std::future::Future<Output = Self::Response> + Send + '_ {
                    async move {
                        match req {
                            $(
                                Request::$req(value) => Response::$req(Box::new(sonic::service::Message::handle(*value, server, connection).await)),
                            )*
                        }
                    }
                }

                fn on_disconnect(&self, connection: u64) {
                    let f: fn(&$service, u64) = $on_disconnect;
                    f(self, connection)
                }
            }
            impl $service {
                pub async fn bind(self, addr: impl ::tokio::net::ToSocketAddrs) -> sonic::Result<sonic::service::Server<Self>> {
                    sonic::service::Server::bind(self, addr).await
                }
            }
        }
    };
}

pub(crate) use sonic_service;
