//! The network seam between the handler and the analysis service.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    /// Absolute path on the page's origin, e.g. `/research-assistant/project/42/analyze`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OutgoingRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("network error: {0}")]
    Network(String),
}

/// Sends a single POST; one call per trigger activation, never retried.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError>;
}

#[cfg(feature = "http")]
pub use http::{ClientConfig, HttpTransport};

#[cfg(feature = "http")]
mod http {
    use super::{OutgoingRequest, Transport, TransportError, TransportResponse};
    use async_trait::async_trait;
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
    use tracing::debug;
    use url::Url;

    #[derive(Debug, Clone)]
    pub struct ClientConfig {
        /// Origin the page was served from; request paths are joined onto it.
        pub base_url: Url,
        pub user_agent: String,
    }

    impl Default for ClientConfig {
        fn default() -> Self {
            Self {
                base_url: Url::parse("http://127.0.0.1:5000").expect("valid default base url"),
                user_agent: format!("selection-analyzer/{}", env!("CARGO_PKG_VERSION")),
            }
        }
    }

    /// reqwest-backed transport. Keeps a cookie store so a session cookie set
    /// while fetching the page accompanies the later POST.
    #[derive(Clone)]
    pub struct HttpTransport {
        http: reqwest::Client,
        base_url: Url,
    }

    impl HttpTransport {
        pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
            let http = reqwest::Client::builder()
                .user_agent(config.user_agent)
                .cookie_store(true)
                .build()
                .map_err(|err| TransportError::Network(err.to_string()))?;
            Ok(Self {
                http,
                base_url: config.base_url,
            })
        }

        pub fn base_url(&self) -> &Url {
            &self.base_url
        }

        /// Fetches page markup through the same client used for analysis requests.
        pub async fn fetch_page(&self, url: &Url) -> Result<String, TransportError> {
            let response = self
                .http
                .get(url.clone())
                .send()
                .await
                .map_err(|err| TransportError::Network(err.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Network(format!(
                    "page request returned HTTP {}",
                    status.as_u16()
                )));
            }
            response
                .text()
                .await
                .map_err(|err| TransportError::Network(err.to_string()))
        }
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn send(&self, request: OutgoingRequest) -> Result<TransportResponse, TransportError> {
            let url = self.base_url.join(&request.path)?;
            let mut headers = HeaderMap::new();
            for (name, value) in &request.headers {
                let name = HeaderName::from_bytes(name.as_bytes())
                    .map_err(|err| TransportError::Network(err.to_string()))?;
                let value = HeaderValue::from_str(value)
                    .map_err(|err| TransportError::Network(err.to_string()))?;
                headers.insert(name, value);
            }
            debug!(%url, bytes = request.body.len(), "posting analysis request");
            let response = self
                .http
                .post(url)
                .headers(headers)
                .body(request.body)
                .send()
                .await
                .map_err(|err| TransportError::Network(err.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .await
                .map_err(|err| TransportError::Network(err.to_string()))?;
            Ok(TransportResponse {
                status,
                body: body.to_vec(),
            })
        }
    }
}
