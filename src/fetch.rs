//! Network retrieval of raw feed payloads.
use crate::config::Fetch;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Client;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const ACCEPT_FEEDS: &str =
    "application/rss+xml, application/atom+xml, application/rdf+xml, application/xml;q=0.9, text/xml;q=0.8, */*;q=0.5";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {uri}: {source}")]
    Transport {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    /// Non-2xx response. The body is kept so it can be stored for diagnosis.
    #[error("fetching {uri} returned HTTP {status}")]
    Status {
        uri: String,
        status: u16,
        body: Vec<u8>,
    },
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the full response body of `uri`.
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError>;
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    timeout: Duration,
}

impl fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpFetcher {
    pub fn new(cfg: &Fetch) -> Result<Self> {
        let timeout = Duration::from_secs(cfg.timeout_seconds);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_FEEDS));
        let http = Client::builder()
            .user_agent(cfg.user_agent.as_str())
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, timeout })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, uri: &str) -> Result<Vec<u8>, FetchError> {
        let transport = |source: reqwest::Error| FetchError::Transport {
            uri: uri.to_string(),
            source,
        };

        let res = self.http.get(uri).send().await.map_err(transport)?;
        let status = res.status();
        let body = res.bytes().await.map_err(transport)?.to_vec();
        debug!(%uri, %status, bytes = body.len(), "fetched feed");

        if !status.is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}
