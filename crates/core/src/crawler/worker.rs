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

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::canonicalize;
use crate::config::CrawlerConfig;
use crate::crawler::Error;
use crate::frontier::Frontier;
use crate::html::{Event, HTMLTokenizer, Sink};
use crate::index_client::{AddOptions, Collection, DeleteOptions, Document, IndexClient};
use crate::suffix::PublicSuffixList;
use crate::text::tokenize_content;

const BACKOFF: Duration = Duration::from_secs(10);

/// Per-iteration buffer. Never shared or reused across iterations or
/// workers: cleared by being dropped at the end of `parse`.
#[derive(Default)]
struct Accumulator {
    title: String,
    meta_title: Option<String>,
    meta_description: Option<String>,
    meta_keywords: Option<String>,
    content: Vec<String>,
    found_urls: HashSet<String>,
    current_page: String,
}

impl Accumulator {
    fn new(current_page: String) -> Self {
        Self {
            current_page,
            ..Default::default()
        }
    }
}

impl Sink for Accumulator {
    fn emit(&mut self, event: Event) {
        match event {
            Event::Url(href) => {
                if let Some(canonical) = canonicalize::canonicalize(&href, &self.current_page) {
                    if canonicalize::validate(&canonical) {
                        self.found_urls.insert(canonical);
                    }
                }
            }
            Event::Image(_) => {
                // image download is disabled by default; the event exists
                // for a future opt-in sink.
            }
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

pub struct CrawlerWorker {
    id: usize,
    config: Arc<CrawlerConfig>,
    frontier: Frontier,
    index: Arc<IndexClient>,
    suffixes: Arc<PublicSuffixList>,
    http: reqwest::Client,
    /// Urls claimed in the last lock round-trip but not yet crawled.
    /// Refilled from `Frontier::claim_batch` once drained.
    queue: VecDeque<Document>,
}

impl CrawlerWorker {
    pub fn new(
        id: usize,
        config: Arc<CrawlerConfig>,
        frontier: Frontier,
        index: Arc<IndexClient>,
        suffixes: Arc<PublicSuffixList>,
    ) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            id,
            config,
            frontier,
            index,
            suffixes,
            http,
            queue: VecDeque::new(),
        })
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.iteration().await {
                tracing::error!(worker = self.id, error = %e, "crawler iteration failed");
            }
        }
    }

    async fn iteration(&mut self) -> crate::Result<()> {
        if self.queue.is_empty() {
            let claimed = self
                .frontier
                .claim_batch(self.config.claim_batch_size, crate::now())
                .await?;
            self.queue.extend(claimed);
        }

        let Some(doc) = self.queue.pop_front() else {
            tokio::time::sleep(BACKOFF).await;
            return Ok(());
        };

        let id = doc.id.clone();
        let scheme = if doc.is_https.unwrap_or(false) {
            "https"
        } else {
            "http"
        };
        let claimed_url = format!("{scheme}://{id}");

        tracing::info!("Crawling url: {}", claimed_url);

        match self.fetch(&claimed_url).await {
            Ok((body, final_url)) => {
                if final_url != claimed_url {
                    self.delete_record(&id).await;
                    if let Some(found) = self.frontier_doc(&final_url) {
                        self.index
                            .add(
                                Collection::Working,
                                std::slice::from_ref(&found),
                                AddOptions {
                                    overwrite: false,
                                    commit: false,
                                    boost: None,
                                },
                            )
                            .await
                            .ok();
                    }
                    return Ok(());
                }

                match self.parse_and_publish(&final_url, &body).await {
                    Ok(()) => {
                        self.frontier.commit_claims(&[id], crate::now()).await?;
                    }
                    Err(e) => {
                        tracing::warn!(url = %claimed_url, error = %e, "parsing failed");
                        self.delete_record(&id).await;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %claimed_url, error = %e, "fetch failed");
                self.delete_record(&id).await;
            }
        }

        Ok(())
    }

    async fn fetch(&self, url: &str) -> crate::Result<(String, String)> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| crate::Error::Fetch(e.to_string()))?;

        if !res.status().is_success() {
            return Err(Error::FetchFailed(res.status()).into());
        }

        let final_url = res.url().to_string();
        let body = res
            .text()
            .await
            .map_err(|_| Error::InvalidEncoding)?;

        Ok((body, final_url))
    }

    async fn parse_and_publish(&self, final_url: &str, body: &str) -> crate::Result<()> {
        let mut acc = Accumulator::new(final_url.to_string());
        HTMLTokenizer::run(body.as_bytes(), &mut acc)?;

        let title = match acc.meta_title.as_deref() {
            Some(meta_title) if !meta_title.trim().is_empty() => meta_title.to_string(),
            _ => acc.title.clone(),
        };

        let content = tokenize_content(&acc.content.join(" "));

        if !acc.title.trim().is_empty() && content.is_some() {
            let (doc_id, is_https, host, path) =
                canonicalize::identity(final_url).ok_or_else(|| Error::InvalidUrl(final_url.to_string()))?;
            let (subdomain, domain, tld) = canonicalize::split_host(&host, &self.suffixes);

            let doc = Document {
                id: doc_id,
                is_https: Some(is_https),
                subdomain: Some(subdomain),
                domain: Some(domain),
                tld: Some(tld),
                path: Some(path),
                last_update_time: None,
                title: Some(title),
                meta_description: acc.meta_description.clone(),
                meta_keywords: acc.meta_keywords.clone(),
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
                .await?;
        }

        let found: Vec<Document> = acc
            .found_urls
            .iter()
            .filter_map(|url| self.frontier_doc(url))
            .collect();

        if !found.is_empty() {
            self.index
                .add(
                    Collection::Working,
                    &found,
                    AddOptions {
                        overwrite: false,
                        commit: false,
                        boost: None,
                    },
                )
                .await?;
        }

        Ok(())
    }

    /// Builds the frontier entry for a freshly discovered url: no content
    /// fields, `last_update_time=0` so it becomes claimable immediately.
    fn frontier_doc(&self, canonical_url: &str) -> Option<Document> {
        if !canonicalize::validate(canonical_url) {
            return None;
        }

        let (id, is_https, host, path) = canonicalize::identity(canonical_url)?;

        if !canonicalize::allowed_extension(&path) {
            return None;
        }

        let (subdomain, domain, tld) = canonicalize::split_host(&host, &self.suffixes);

        Some(Document {
            id,
            is_https: Some(is_https),
            subdomain: Some(subdomain),
            domain: Some(domain),
            tld: Some(tld),
            path: Some(path),
            last_update_time: Some(0),
            title: None,
            meta_description: None,
            meta_keywords: None,
            content: None,
        })
    }

    async fn delete_record(&self, id: &str) {
        let opts = DeleteOptions { commit: false };
        self.index.delete(Collection::Working, id, opts.clone()).await.ok();
        self.index.delete(Collection::Main, id, opts).await.ok();
        self.frontier.release(id).await.ok();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as TokioMutex;

    use super::*;
    use crate::config::IndexClientConfig;
    use crate::lock::LockClient;

    /// A GET target that redirects `/from` to `/to` on itself and otherwise
    /// answers 200 with an empty body.
    struct RedirectStub {
        addr: std::net::SocketAddr,
    }

    impl RedirectStub {
        async fn spawn() -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let addr = listener.local_addr().unwrap();
            let redirect_to = format!("http://crawl.example.com:{}/to", addr.port());

            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(s) => s,
                        Err(_) => return,
                    };
                    let redirect_to = redirect_to.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8 * 1024];
                        let n = stream.read(&mut buf).await.unwrap_or(0);
                        let request = String::from_utf8_lossy(&buf[..n]).to_string();
                        let path = request
                            .lines()
                            .next()
                            .unwrap_or("")
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or("");

                        let response = if path.ends_with("/from") {
                            format!(
                                "HTTP/1.1 301 Moved Permanently\r\nLocation: {redirect_to}\r\nContent-Length: 0\r\n\r\n"
                            )
                        } else {
                            "HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n".to_string()
                        };
                        stream.write_all(response.as_bytes()).await.ok();
                    });
                }
            });

            RedirectStub { addr }
        }
    }

    /// A recording stand-in for the index cluster: answers every `/update`
    /// and `/commit` call with `200 {}` and keeps `(path, body)` for every
    /// request it saw.
    struct IndexStub {
        addr: std::net::SocketAddr,
        requests: Arc<StdMutex<Vec<(String, String)>>>,
    }

    impl IndexStub {
        async fn spawn() -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(StdMutex::new(Vec::new()));

            let requests_for_task = requests.clone();
            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(s) => s,
                        Err(_) => return,
                    };
                    let requests = requests_for_task.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 64 * 1024];
                        let n = stream.read(&mut buf).await.unwrap_or(0);
                        let request = String::from_utf8_lossy(&buf[..n]).to_string();

                        let path = request
                            .lines()
                            .next()
                            .unwrap_or("")
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or("")
                            .to_string();
                        let body = request
                            .find("\r\n\r\n")
                            .map(|i| request[i + 4..].to_string())
                            .unwrap_or_default();

                        requests.lock().unwrap().push((path, body));

                        let response =
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n{}";
                        stream.write_all(response.as_bytes()).await.ok();
                    });
                }
            });

            IndexStub { addr, requests }
        }

        fn index_client(&self) -> Arc<IndexClient> {
            let base = format!("http://{}", self.addr);
            let config = IndexClientConfig {
                working: vec![base.clone()],
                main: vec![base],
            };
            Arc::new(IndexClient::new(config, 0, Duration::from_secs(5)).unwrap())
        }
    }

    /// Testable property: redirect handling. A fetch that lands on a
    /// different url than the one claimed must delete the claimed record
    /// and queue the destination in the frontier instead of parsing the
    /// redirect response body as the claimed page.
    #[tokio::test]
    async fn redirect_deletes_old_record_and_queues_destination() {
        let redirect = RedirectStub::spawn().await;
        let index_stub = IndexStub::spawn().await;

        let http = reqwest::Client::builder()
            .resolve("crawl.example.com", redirect.addr)
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let suffixes = Arc::new(PublicSuffixList::from_entries(
            ["com".to_string()].into_iter(),
        ));
        let frontier = Frontier::new(
            index_stub.index_client(),
            LockClient::in_process(Arc::new(TokioMutex::new(HashSet::new()))),
            3600,
        );

        let mut worker = CrawlerWorker::new(
            0,
            Arc::new(CrawlerConfig::default()),
            frontier,
            index_stub.index_client(),
            suffixes,
        )
        .unwrap();
        worker.http = http;

        let from_id = format!("crawl.example.com:{}/from", redirect.addr.port());
        worker.queue.push_back(Document {
            id: from_id.clone(),
            is_https: Some(false),
            ..Default::default()
        });

        worker.iteration().await.unwrap();

        let requests = index_stub.requests.lock().unwrap();

        let delete_count = requests
            .iter()
            .filter(|(_, body)| body.contains(&format!("\"delete\":\"{from_id}\"")))
            .count();
        assert_eq!(
            delete_count, 2,
            "expected the claimed record deleted from both collections, got: {:?}",
            *requests
        );

        let queued_destination = requests.iter().any(|(path, body)| {
            path.ends_with("/working/update") && body.contains("\"id\":\"crawl.example.com/to\"")
        });
        assert!(
            queued_destination,
            "expected the redirect destination queued in the frontier, got: {:?}",
            *requests
        );
    }

    /// A GET target serving one fixed HTML body for every request.
    struct FetchStub {
        addr: std::net::SocketAddr,
    }

    impl FetchStub {
        async fn spawn(body: String) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let addr = listener.local_addr().unwrap();

            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(s) => s,
                        Err(_) => return,
                    };
                    let body = body.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 8 * 1024];
                        let _ = stream.read(&mut buf).await;
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        stream.write_all(response.as_bytes()).await.ok();
                    });
                }
            });

            FetchStub { addr }
        }
    }

    /// E2E scenario: crawling a freshly-seeded url publishes both the
    /// parsed page (title/content) and the link it discovered, the latter
    /// with `last_update_time = 0` so it is immediately claimable.
    #[tokio::test]
    async fn e2e_scenario_seed_and_crawl() {
        let html = r#"<html><title>T</title><body><a href="/a">x</a>hello</body></html>"#.to_string();
        let fetch = FetchStub::spawn(html).await;
        let index_stub = IndexStub::spawn().await;

        let http = reqwest::Client::builder()
            .resolve("crawl.example.com", fetch.addr)
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();

        let suffixes = Arc::new(PublicSuffixList::from_entries(
            ["com".to_string()].into_iter(),
        ));
        let frontier = Frontier::new(
            index_stub.index_client(),
            LockClient::in_process(Arc::new(TokioMutex::new(HashSet::new()))),
            3600,
        );

        let mut worker = CrawlerWorker::new(
            0,
            Arc::new(CrawlerConfig::default()),
            frontier,
            index_stub.index_client(),
            suffixes,
        )
        .unwrap();
        worker.http = http;

        let seed_id = format!("crawl.example.com:{}", fetch.addr.port());
        worker.queue.push_back(Document {
            id: seed_id,
            is_https: Some(false),
            ..Default::default()
        });

        worker.iteration().await.unwrap();

        let requests = index_stub.requests.lock().unwrap();

        let seed_update = requests.iter().find(|(path, body)| {
            path.ends_with("/working/update")
                && body.contains("\"id\":\"crawl.example.com\"")
                && body.contains("\"title\":\"T\"")
        });
        assert!(
            seed_update.is_some(),
            "expected the crawled page published with its parsed title, got: {:?}",
            *requests
        );
        assert!(seed_update.unwrap().1.contains("hello"));

        let discovered = requests.iter().any(|(path, body)| {
            path.ends_with("/working/update")
                && body.contains("\"id\":\"crawl.example.com/a\"")
                && body.contains("\"last_update_time\":0")
        });
        assert!(
            discovered,
            "expected the discovered link queued with last_update_time=0, got: {:?}",
            *requests
        );
    }
}

