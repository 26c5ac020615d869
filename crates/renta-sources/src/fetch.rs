use std::time::Duration;

use async_trait::async_trait;
use renta_core::{RentaError, Result, UpstreamCause};
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("renta/", env!("CARGO_PKG_VERSION"));

/// Plain HTTP page fetch. Failures are classified into an
/// [`UpstreamCause`] so callers can escalate or map them to a status.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<String>;

    /// Degraded-mode fallback that skips TLS certificate verification.
    /// Defaults to a plain `get` so only implementations that can actually
    /// relax verification need to override it.
    async fn get_untrusted(&self, url: &str) -> Result<String> {
        self.get(url).await
    }
}

pub(crate) fn classify(err: reqwest::Error) -> RentaError {
    let cause = if err.is_timeout() {
        UpstreamCause::Timeout
    } else {
        UpstreamCause::Connection
    };
    RentaError::SourceUnavailable {
        cause,
        message: err.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch_with(&self, client: &reqwest::Client, url: &str) -> Result<String> {
        let response = client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RentaError::SourceUnavailable {
                cause: UpstreamCause::BadStatus(status.as_u16()),
                message: format!("GET {} answered {}", url, status),
            });
        }
        response.text().await.map_err(classify)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<String> {
        self.fetch_with(&self.client, url).await
    }

    async fn get_untrusted(&self, url: &str) -> Result<String> {
        warn!("retrying {} without certificate verification", url);
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(classify)?;
        self.fetch_with(&client, url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OnlyUntrusted;

    #[async_trait]
    impl PageFetcher for OnlyUntrusted {
        async fn get(&self, _url: &str) -> Result<String> {
            Ok("body".to_string())
        }
    }

    #[tokio::test]
    async fn get_untrusted_defaults_to_get() {
        let fetcher = OnlyUntrusted;
        assert_eq!(fetcher.get_untrusted("https://example.com").await.unwrap(), "body");
    }
}
