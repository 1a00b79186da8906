//! The `ActorClient` trait and its Apify HTTP implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use crate::error::{ActorClientError, Result};
use crate::types::{Envelope, RunDto, RunInfo};

/// Per-request deadline; independent of the poll wall budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstraction over the upstream scraping provider.
#[async_trait]
pub trait ActorClient: Send + Sync {
    /// Start an actor run; returns the (usually non-terminal) initial state.
    async fn start_run(&self, actor_id: &str, input: &Value) -> Result<RunInfo>;

    /// Current state of a run.
    async fn get_run(&self, run_id: &str) -> Result<RunInfo>;

    /// Items of a dataset, in dataset order.
    async fn fetch_items(&self, dataset_id: &str, limit: u32, offset: u32) -> Result<Vec<Value>>;

    /// Poll a run to a terminal status under a monotonic wall budget.
    ///
    /// Never sleeps longer than `interval`, never returns a non-terminal
    /// `RunInfo`, and terminates within `timeout + interval` regardless of
    /// system clock changes.
    async fn poll_run(
        &self,
        run_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<RunInfo> {
        let started = Instant::now();
        loop {
            let info = self.get_run(run_id).await?;
            if info.is_terminal() {
                return Ok(info);
            }
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(ActorClientError::Timeout {
                    run_id: run_id.to_string(),
                    elapsed,
                });
            }
            let remaining = timeout - elapsed;
            tokio::time::sleep(interval.min(remaining)).await;
        }
    }
}

/// HTTP client for the Apify v2 API.
pub struct ApifyClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
}

impl ApifyClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ActorClientError::Decode(format!("Bad base URL {base_url:?}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| ActorClientError::Decode(format!("Bad URL path {path:?}: {e}")))
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(ActorClientError::Api { status, body })
    }
}

#[async_trait]
impl ActorClient for ApifyClient {
    async fn start_run(&self, actor_id: &str, input: &Value) -> Result<RunInfo> {
        // Actor ids use `~` in place of `/` on the wire.
        let url = self.url(&format!("/v2/acts/{}/runs", actor_id.replace('/', "~")))?;
        let res = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(input)
            .send()
            .await?;
        let res = Self::check(res).await?;
        let envelope: Envelope<RunDto> = res
            .json()
            .await
            .map_err(|e| ActorClientError::Decode(e.to_string()))?;
        let info = envelope.data.into_run_info();
        debug!("Started actor {} run {}", actor_id, info.run_id);
        Ok(info)
    }

    async fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        let url = self.url(&format!("/v2/actor-runs/{run_id}"))?;
        let res = self.http.get(url).bearer_auth(&self.token).send().await?;
        let res = Self::check(res).await?;
        let envelope: Envelope<RunDto> = res
            .json()
            .await
            .map_err(|e| ActorClientError::Decode(e.to_string()))?;
        Ok(envelope.data.into_run_info())
    }

    async fn fetch_items(&self, dataset_id: &str, limit: u32, offset: u32) -> Result<Vec<Value>> {
        let mut url = self.url(&format!("/v2/datasets/{dataset_id}/items"))?;
        url.query_pairs_mut()
            .append_pair("format", "json")
            .append_pair("clean", "true")
            .append_pair("limit", &limit.to_string())
            .append_pair("offset", &offset.to_string());
        let res = self.http.get(url).bearer_auth(&self.token).send().await?;
        let res = Self::check(res).await?;
        // Dataset items come back as a bare JSON array, not an envelope.
        let items: Vec<Value> = res
            .json()
            .await
            .map_err(|e| ActorClientError::Decode(e.to_string()))?;
        Ok(items)
    }
}
