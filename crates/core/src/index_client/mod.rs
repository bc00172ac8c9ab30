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

//! A thin façade over the external full-text index cluster. The cluster
//! itself is treated as a black box (it could be Solr, Elasticsearch, or
//! anything speaking a JSON REST update/select protocol); what matters
//! here is the round-robin endpoint selection and the add/upsert/delete/
//! commit/optimize/search operation surface the rest of the crate relies
//! on.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::IndexClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Working,
    Main,
}

impl Collection {
    fn name(self) -> &'static str {
        match self {
            Collection::Working => "working",
            Collection::Main => "main",
        }
    }
}

/// A document in either collection. All fields besides `id` are optional
/// because the `working` and `main` schemas only partially overlap (see
/// the data model: `main` never carries `last_update_time`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_https: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tld: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta_keywords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    pub overwrite: bool,
    pub commit: bool,
    /// Index-time field boosts keyed by field name, applied by the
    /// Rebooster.
    pub boost: Option<HashMap<String, u32>>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub commit: bool,
}

/// A raw query string understood by the index cluster, e.g.
/// `last_update_time:[0 TO 1700000000] AND domain:*`. The client does not
/// interpret it; it is passed straight through.
#[derive(Debug, Clone)]
pub struct Query(pub String);

impl Query {
    pub fn range(field: &str, from: i64, to: i64) -> Self {
        Query(format!("{field}:[{from} TO {to}]"))
    }

    pub fn and(clauses: impl IntoIterator<Item = Query>) -> Self {
        Query(
            clauses
                .into_iter()
                .map(|q| q.0)
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }

    pub fn raw(s: impl Into<String>) -> Self {
        Query(s.into())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub filter: Option<Query>,
    pub rows: usize,
    pub start: usize,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Page {
    pub docs: Vec<Document>,
    pub num_found: usize,
}

#[derive(Serialize)]
struct UpdateRequest<'a> {
    add: &'a [Document],
    overwrite: bool,
    commit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    boost: &'a Option<HashMap<String, u32>>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    delete: &'a str,
    commit: bool,
}

#[derive(Serialize)]
struct SelectRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
    rows: usize,
    start: usize,
}

/// Handles are scoped to a single worker iteration loop: construct on
/// worker start, discard and reconstruct on a transient transport error.
pub struct IndexClient {
    config: IndexClientConfig,
    worker_id: usize,
    http: reqwest::Client,
}

impl IndexClient {
    pub fn new(config: IndexClientConfig, worker_id: usize, timeout: Duration) -> crate::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            config,
            worker_id,
            http,
        })
    }

    /// A worker with identifier `i` uses endpoint `i mod len(urls)`.
    fn endpoint(&self, collection: Collection) -> crate::Result<&str> {
        let urls = match collection {
            Collection::Working => &self.config.working,
            Collection::Main => &self.config.main,
        };

        if urls.is_empty() {
            return Err(crate::Error::IndexClient(format!(
                "no endpoints configured for {} collection",
                collection.name()
            ))
            .into());
        }

        Ok(&urls[self.worker_id % urls.len()])
    }

    pub async fn add(
        &self,
        collection: Collection,
        docs: &[Document],
        opts: AddOptions,
    ) -> crate::Result<()> {
        if docs.is_empty() {
            return Ok(());
        }

        let base = self.endpoint(collection)?;
        let body = UpdateRequest {
            add: docs,
            overwrite: opts.overwrite,
            commit: opts.commit,
            boost: &opts.boost,
        };

        self.http
            .post(format!("{base}/{}/update", collection.name()))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    pub async fn delete(
        &self,
        collection: Collection,
        id: &str,
        opts: DeleteOptions,
    ) -> crate::Result<()> {
        let base = self.endpoint(collection)?;
        let body = DeleteRequest {
            delete: id,
            commit: opts.commit,
        };

        self.http
            .post(format!("{base}/{}/update", collection.name()))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    pub async fn commit(&self, collection: Collection) -> crate::Result<()> {
        let base = self.endpoint(collection)?;
        self.http
            .post(format!("{base}/{}/commit", collection.name()))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn optimize(&self, collection: Collection) -> crate::Result<()> {
        let base = self.endpoint(collection)?;
        self.http
            .post(format!("{base}/{}/optimize", collection.name()))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn search(
        &self,
        collection: Collection,
        query: Query,
        opts: SearchOptions,
    ) -> crate::Result<Page> {
        let base = self.endpoint(collection)?;
        let body = SelectRequest {
            filter: opts.filter.as_ref().map(|q| q.0.as_str()),
            query: Some(query.0.as_str()),
            rows: opts.rows,
            start: opts.start,
        };

        let mut req = self
            .http
            .post(format!("{base}/{}/select", collection.name()))
            .json(&body);

        if let Some(timeout) = opts.timeout {
            req = req.timeout(timeout);
        }

        let page = req.send().await?.error_for_status()?.json::<Page>().await?;
        Ok(page)
    }
}
