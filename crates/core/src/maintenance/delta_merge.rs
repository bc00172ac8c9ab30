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

//! Promotes newly-populated `working` documents into `main` under a
//! snapshot timestamp cutoff. Runs once then exits, finishing with a
//! single Rebooster pass.

use std::sync::Arc;

use crate::index_client::{AddOptions, Collection, Document, IndexClient, Query, SearchOptions};
use crate::maintenance::rebooster::Rebooster;

pub struct DeltaMerge {
    index: Arc<IndexClient>,
    rows_per_iteration: usize,
    rebooster: Rebooster,
}

impl DeltaMerge {
    pub fn new(index: Arc<IndexClient>, rows_per_iteration: usize, rebooster_page_size: usize) -> Self {
        let rebooster = Rebooster::new(index.clone(), rebooster_page_size);
        Self {
            index,
            rows_per_iteration,
            rebooster,
        }
    }

    pub async fn run_once(&self) -> crate::Result<()> {
        let snapshot = crate::now();
        let mut start = 0;

        loop {
            let query = Query::and([Query::range("last_update_time", 0, snapshot), Query::raw("domain:*")]);

            let page = self
                .index
                .search(
                    Collection::Working,
                    query,
                    SearchOptions {
                        filter: None,
                        rows: self.rows_per_iteration,
                        start,
                        timeout: None,
                    },
                )
                .await?;

            if page.docs.is_empty() {
                break;
            }

            start += page.docs.len();

            let receipt_time = crate::now();
            let working_updates: Vec<Document> = page
                .docs
                .iter()
                .map(|doc| Document {
                    id: doc.id.clone(),
                    is_https: doc.is_https,
                    last_update_time: Some(receipt_time),
                    ..Default::default()
                })
                .collect();

            let main_updates: Vec<Document> = page
                .docs
                .into_iter()
                .filter(|doc| {
                    doc.domain.as_deref().is_some_and(|d| !d.is_empty())
                        && doc.content.as_deref().is_some_and(|c| !c.is_empty())
                })
                .map(|mut doc| {
                    doc.last_update_time = None;
                    doc
                })
                .collect();

            if !main_updates.is_empty() {
                self.index
                    .add(
                        Collection::Main,
                        &main_updates,
                        AddOptions {
                            overwrite: true,
                            commit: false,
                            boost: None,
                        },
                    )
                    .await?;
            }

            self.index
                .add(
                    Collection::Working,
                    &working_updates,
                    AddOptions {
                        overwrite: true,
                        commit: false,
                        boost: None,
                    },
                )
                .await?;
        }

        self.rebooster.run_once().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::IndexClientConfig;
    use crate::index_client::Page;

    fn extract_usize(json: &str, field: &str) -> usize {
        let needle = format!("\"{field}\":");
        match json.find(&needle) {
            Some(idx) => json[idx + needle.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0),
            None => 0,
        }
    }

    /// A recording index stand-in: `/working/select` returns a fixed page of
    /// stale documents once (`start == 0`) and nothing after, `/main/select`
    /// always comes back empty so the Rebooster pass it feeds into ends
    /// immediately, and every `/update`/`/commit` call succeeds. Every
    /// request is recorded as `(path, body)` for a test to inspect.
    struct IndexStub {
        addr: std::net::SocketAddr,
        requests: Arc<StdMutex<Vec<(String, String)>>>,
    }

    impl IndexStub {
        async fn spawn(working_docs: Vec<Document>) -> Self {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
            let addr = listener.local_addr().unwrap();
            let requests = Arc::new(StdMutex::new(Vec::new()));

            let page = Page {
                num_found: working_docs.len(),
                docs: working_docs,
            };
            let working_page_body = serde_json::to_string(&page).unwrap();

            let requests_for_task = requests.clone();
            tokio::spawn(async move {
                loop {
                    let (mut stream, _) = match listener.accept().await {
                        Ok(s) => s,
                        Err(_) => return,
                    };
                    let working_page_body = working_page_body.clone();
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

                        requests.lock().unwrap().push((path.clone(), body.clone()));

                        let response_body = if path.ends_with("/working/select") {
                            if extract_usize(&body, "start") == 0 {
                                working_page_body.clone()
                            } else {
                                r#"{"docs":[],"num_found":0}"#.to_string()
                            }
                        } else if path.ends_with("/main/select") {
                            r#"{"docs":[],"num_found":0}"#.to_string()
                        } else {
                            "{}".to_string()
                        };

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                            response_body.len(),
                            response_body
                        );
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
            Arc::new(IndexClient::new(config, 0, std::time::Duration::from_secs(5)).unwrap())
        }
    }

    /// Testable property: delta-merge receipt. Every working document seen
    /// in a pass gets a fresh `last_update_time` receipt regardless of
    /// eligibility, but only documents with both a domain and content are
    /// promoted into `main` — and the pass still ends with a `main` commit
    /// from the Rebooster tail.
    #[tokio::test]
    async fn run_once_stamps_receipt_and_promotes_eligible_docs_only() {
        let eligible = Document {
            id: "example.com".to_string(),
            domain: Some("example".to_string()),
            content: Some("hello world".to_string()),
            last_update_time: Some(0),
            ..Default::default()
        };
        let ineligible = Document {
            id: "stub.example.com".to_string(),
            domain: Some("example".to_string()),
            content: None,
            last_update_time: Some(0),
            ..Default::default()
        };

        let stub = IndexStub::spawn(vec![eligible.clone(), ineligible.clone()]).await;
        let merge = DeltaMerge::new(stub.index_client(), 200, 200);

        merge.run_once().await.unwrap();

        let requests = stub.requests.lock().unwrap();

        let working_update = requests
            .iter()
            .find(|(path, _)| path.ends_with("/working/update"))
            .map(|(_, body)| body.clone())
            .expect("a working/update request was sent");
        assert!(working_update.contains(&eligible.id));
        assert!(working_update.contains(&ineligible.id));
        assert!(
            !working_update.contains("\"last_update_time\":0"),
            "every working doc should be stamped with a fresh receipt time, not left at 0: {working_update}"
        );

        let main_update = requests
            .iter()
            .find(|(path, _)| path.ends_with("/main/update"))
            .map(|(_, body)| body.clone())
            .expect("a main/update request was sent");
        assert!(main_update.contains(&eligible.id));
        assert!(
            !main_update.contains(&ineligible.id),
            "the content-less doc must not be promoted to main: {main_update}"
        );
        assert!(
            !main_update.contains("last_update_time"),
            "main documents carry no last_update_time field: {main_update}"
        );

        assert!(
            requests.iter().any(|(path, _)| path.ends_with("/main/commit")),
            "expected the rebooster tail to commit main, got: {:?}",
            *requests
        );
    }

    /// E2E scenario: a single eligible `working` doc promotes into `main`
    /// without a `last_update_time`, while its `working` counterpart is
    /// restamped past the doc's pre-merge timestamp.
    #[tokio::test]
    async fn e2e_scenario_promotes_and_restamps_single_doc() {
        let doc = Document {
            id: "example.com".to_string(),
            domain: Some("example".to_string()),
            content: Some("hello".to_string()),
            last_update_time: Some(100),
            ..Default::default()
        };

        let stub = IndexStub::spawn(vec![doc]).await;
        let merge = DeltaMerge::new(stub.index_client(), 200, 200);

        merge.run_once().await.unwrap();

        let requests = stub.requests.lock().unwrap();

        let main_update = requests
            .iter()
            .find(|(path, _)| path.ends_with("/main/update"))
            .map(|(_, body)| body.clone())
            .expect("a main/update request was sent");
        assert!(main_update.contains("\"id\":\"example.com\""));
        assert!(!main_update.contains("last_update_time"));

        let working_update = requests
            .iter()
            .find(|(path, _)| path.ends_with("/working/update"))
            .map(|(_, body)| body.clone())
            .expect("a working/update request was sent");
        assert!(
            extract_usize(&working_update, "last_update_time") > 200,
            "restamped receipt should be past the snapshot, got: {working_update}"
        );
    }
}
