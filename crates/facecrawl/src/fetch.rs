//! Single-shot HTTP GET wrapping reqwest.
//!
//! No retries and no backoff. Non-success statuses and timeouts surface as
//! typed [`FetchError`]s so the crawler can record them and move on.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

/// Failure of one fetch. Always non-fatal to a crawl session.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Raw response body and the headers the crawler cares about.
#[derive(Debug, Clone)]
pub struct FetchedBody {
    /// Requested URL.
    pub url: Url,
    /// URL after redirects.
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Page and image fetch capability.
///
/// Implementations must be safe to call from many download workers at once.
/// A headless-browser fetcher would plug in here with the same contract.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<FetchedBody, FetchError>;
}

/// reqwest-backed fetcher with a fixed identifying user agent.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<FetchedBody, FetchError> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(url.to_string()));
        }

        let request = async {
            let resp = self
                .client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            let final_url = resp.url().clone();
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let body = resp.bytes().await?.to_vec();

            Ok(FetchedBody {
                url: url.clone(),
                final_url,
                status: status.as_u16(),
                content_type,
                body,
            })
        };

        // Bound the body read as well as the request itself.
        match tokio::time::timeout(timeout, request).await {
            Ok(Err(FetchError::Http(e))) if e.is_timeout() => Err(FetchError::Timeout(timeout)),
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }
}
