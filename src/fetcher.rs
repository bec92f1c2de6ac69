//! Retrying HTTP fetcher with a process-wide parallelism gate.
//!
//! Every outgoing request passes through one weighted semaphore, which is
//! the sole global admission control on the network. Redirects are followed
//! manually with loop detection, and transient failures are retried with
//! bounded exponential backoff.

use crate::backoff::ExponentialBackoff;
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::{Client, Method, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Seam between the crawl engine and the network.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
    ) -> Result<FetchedPage, FetchError>;
}

/// A successfully fetched page. `url` is the final URL after redirects.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("connection refused - server not accepting connections")]
    ConnectionRefused,

    #[error("DNS resolution failed")]
    Dns,

    #[error("SSL/TLS error - certificate or encryption issue")]
    Ssl,

    #[error("request timeout")]
    Timeout,

    #[error("{url} returned status code {status}")]
    Status { status: u16, url: String },

    #[error("redirect loop detected while following {url}")]
    RedirectLoop { url: String },

    #[error("{url} returned status code {status} but no location header set")]
    MissingLocation { status: u16, url: String },

    #[error("invalid redirect target from {url}: {source}")]
    BadRedirect {
        url: String,
        source: url::ParseError,
    },

    #[error("failed to read response body: {0}")]
    Body(String),

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Convert reqwest::Error into FetchError.
    fn from_reqwest_error(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return FetchError::Timeout;
        }

        let message = error.to_string().to_lowercase();

        if error.is_connect() {
            if message.contains("connection refused") {
                return FetchError::ConnectionRefused;
            }
            if message.contains("dns")
                || message.contains("name resolution")
                || message.contains("no such host")
            {
                return FetchError::Dns;
            }
        }

        if message.contains("certificate") || message.contains("ssl") || message.contains("tls") {
            return FetchError::Ssl;
        }

        FetchError::Network(error.to_string())
    }

    /// Whether another attempt could succeed. Extra status codes extend the
    /// default 5xx/429 set.
    fn is_retriable(&self, extra_retry_status: &[u16]) -> bool {
        match self {
            FetchError::Network(_)
            | FetchError::ConnectionRefused
            | FetchError::Dns
            | FetchError::Timeout
            | FetchError::Body(_) => true,
            FetchError::Status { status, .. } => {
                (500..600).contains(status)
                    || *status == 429
                    || extra_retry_status.contains(status)
            }
            _ => false,
        }
    }
}

/// Configuration knobs for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Capacity of the global request semaphore.
    pub max_parallelism: usize,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub min_retry_wait: Duration,
    pub max_retry_wait: Duration,
    /// Status codes to retry beyond the default 5xx/429 set. The scraped
    /// site occasionally returns 403 under load, so it is retried by default.
    pub extra_retry_status: Vec<u16>,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            max_retries: 4,
            min_retry_wait: Duration::from_secs(1),
            max_retry_wait: Duration::from_secs(15),
            extra_retry_status: vec![403],
            user_agent: "bookcrawl/0.1".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Retrying reqwest wrapper implementing [`Fetch`].
pub struct HttpFetcher {
    client: Client,
    permits: Arc<Semaphore>,
    max_retries: u32,
    backoff: ExponentialBackoff,
    extra_retry_status: Vec<u16>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.request_timeout)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
            // Redirects are followed manually so loops can be detected.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::ClientBuild(e.to_string()))?;

        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_parallelism.max(1))),
            max_retries: config.max_retries,
            backoff: ExponentialBackoff::new(config.min_retry_wait, config.max_retry_wait),
            extra_retry_status: config.extra_retry_status,
        })
    }

    /// One gated attempt: acquire a permit, send the request, follow 301/302
    /// manually until a terminal response.
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
    ) -> Result<FetchedPage, FetchError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| FetchError::Cancelled)?,
        };

        let mut visited: HashSet<String> = HashSet::from([url.to_string()]);
        let mut method = method;
        let mut current = url.to_string();

        loop {
            let request = self.client.request(method.clone(), current.as_str());
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                response = request.send() => response.map_err(FetchError::from_reqwest_error)?,
            };

            let status = response.status();
            tracing::trace!(%current, status = status.as_u16(), "request completed");

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| FetchError::MissingLocation {
                        status: status.as_u16(),
                        url: current.clone(),
                    })?;
                let next = crate::urls::absolute(&current, &location).map_err(|source| {
                    FetchError::BadRedirect {
                        url: current.clone(),
                        source,
                    }
                })?;
                if !visited.insert(next.clone()) {
                    return Err(FetchError::RedirectLoop { url: current });
                }
                tracing::debug!(from = %current, to = %next, "following redirect");
                method = Method::GET;
                current = next;
                continue;
            }

            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: current,
                });
            }

            let body = response
                .text()
                .await
                .map_err(|e| FetchError::Body(e.to_string()))?;

            return Ok(FetchedPage {
                url: current,
                status: status.as_u16(),
                body,
            });
        }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(
        &self,
        cancel: &CancellationToken,
        method: Method,
        url: &str,
    ) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            match self.attempt(cancel, method.clone(), url).await {
                Ok(page) => return Ok(page),
                Err(error)
                    if attempt < self.max_retries
                        && error.is_retriable(&self.extra_retry_status) =>
                {
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        %url,
                        attempt = attempt + 1,
                        max = self.max_retries,
                        ?delay,
                        %error,
                        "retrying request"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_error(status: u16) -> FetchError {
        FetchError::Status {
            status,
            url: "https://books.test/book/show/1".to_string(),
        }
    }

    #[test]
    fn test_retries_5xx_and_429() {
        assert!(status_error(500).is_retriable(&[]));
        assert!(status_error(503).is_retriable(&[]));
        assert!(status_error(429).is_retriable(&[]));
    }

    #[test]
    fn test_does_not_retry_plain_4xx() {
        assert!(!status_error(404).is_retriable(&[]));
        assert!(!status_error(403).is_retriable(&[]));
        assert!(!status_error(400).is_retriable(&[]));
    }

    #[test]
    fn test_extra_status_codes_extend_the_retry_set() {
        assert!(status_error(403).is_retriable(&[403]));
        assert!(!status_error(404).is_retriable(&[403]));
    }

    #[test]
    fn test_retries_transient_transport_errors() {
        assert!(FetchError::Timeout.is_retriable(&[]));
        assert!(FetchError::ConnectionRefused.is_retriable(&[]));
        assert!(FetchError::Dns.is_retriable(&[]));
        assert!(FetchError::Network("reset".into()).is_retriable(&[]));
    }

    #[test]
    fn test_never_retries_redirect_or_cancel_errors() {
        let loop_error = FetchError::RedirectLoop {
            url: "https://books.test/a".to_string(),
        };
        assert!(!loop_error.is_retriable(&[]));
        assert!(!FetchError::Cancelled.is_retriable(&[403]));
    }

    #[test]
    fn test_default_config_retries_403() {
        let config = FetcherConfig::default();
        assert_eq!(config.extra_retry_status, vec![403]);
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.min_retry_wait, Duration::from_secs(1));
        assert_eq!(config.max_retry_wait, Duration::from_secs(15));
    }
}
