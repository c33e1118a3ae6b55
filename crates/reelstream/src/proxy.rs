//! The request proxy seam.
//!
//! The engine never talks HTTP directly; it goes through [`RequestProxy`], an
//! injected abstraction that performs an authenticated GET on its behalf.
//! Host environments that need credential inheritance or header spoofing
//! implement this trait over whatever transport they have. For plain
//! environments the crate ships [`HttpRequestProxy`], a thin `reqwest`-backed
//! implementation sharing one pooled client.

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

/// Which body representation the caller wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// UTF-8 text (playlists).
    Text,
    /// Raw bytes (segments, keys).
    Bytes,
}

/// Response body in the representation requested by the caller.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Bytes(Bytes),
}

impl ResponseBody {
    /// Body length in bytes.
    pub fn len(&self) -> usize {
        match self {
            ResponseBody::Text(t) => t.len(),
            ResponseBody::Bytes(b) => b.len(),
        }
    }

    /// True when the body is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrow the body as text, when it is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(t) => Some(t),
            ResponseBody::Bytes(_) => None,
        }
    }

    /// Consume the body as raw bytes, regardless of representation.
    pub fn into_bytes(self) -> Bytes {
        match self {
            ResponseBody::Text(t) => Bytes::from(t),
            ResponseBody::Bytes(b) => b,
        }
    }
}

/// A completed proxy response. Non-2xx statuses are returned here, not as
/// errors; classification is the fetch pipeline's job.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    /// HTTP status code.
    pub status: u16,
    /// Body in the requested representation.
    pub body: ResponseBody,
    /// URL after redirects.
    pub final_url: Url,
}

/// Transport-level failure: the proxy could not produce a response at all.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Connection-level failure (DNS, TLS, reset, ...).
    #[error("network error: {0}")]
    Network(String),
    /// The transport's own timeout fired.
    #[error("request timeout for {0}")]
    Timeout(String),
    /// A response arrived but its body could not be realized.
    #[error("HTTP transport error ({status}): {message}")]
    Http {
        /// Status of the broken response.
        status: u16,
        /// What went wrong reading it.
        message: String,
    },
}

/// Request headers attached by the engine (owner-supplied, copied per use).
pub type RequestHeaders = HashMap<String, String>;

/// Performs an authenticated HTTP GET on behalf of the engine.
///
/// Implementations decide the actual transport; the engine only cares about
/// `(status, body, final_url)`.
#[async_trait]
pub trait RequestProxy: Send + Sync {
    /// Fetch `url`, returning the response in the requested representation.
    async fn fetch(
        &self,
        url: &Url,
        want: BodyKind,
        headers: Option<&RequestHeaders>,
    ) -> Result<ProxyResponse, ProxyError>;
}

/// Default [`RequestProxy`] built on a shared `reqwest::Client`.
///
/// The client is created once and cloned cheaply (it is an `Arc` internally),
/// so connection pooling and DNS caching are shared across sessions.
#[derive(Debug, Clone)]
pub struct HttpRequestProxy {
    client: reqwest::Client,
}

impl HttpRequestProxy {
    /// Create a proxy with a fresh pooled client.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Create a proxy around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpRequestProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RequestProxy for HttpRequestProxy {
    async fn fetch(
        &self,
        url: &Url,
        want: BodyKind,
        headers: Option<&RequestHeaders>,
    ) -> Result<ProxyResponse, ProxyError> {
        let mut req = self.client.get(url.clone());
        if let Some(headers) = headers {
            for (k, v) in headers {
                req = req.header(k, v);
            }
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                ProxyError::Timeout(url.to_string())
            } else {
                // Alternate formatting includes the source chain
                // ("error sending request ...: connection refused").
                ProxyError::Network(format!("{e:#}"))
            }
        })?;

        let status = resp.status().as_u16();
        let final_url = resp.url().clone();

        let body = match want {
            BodyKind::Text => ResponseBody::Text(resp.text().await.map_err(|e| {
                ProxyError::Http {
                    status,
                    message: format!("{e:#}"),
                }
            })?),
            BodyKind::Bytes => ResponseBody::Bytes(resp.bytes().await.map_err(|e| {
                ProxyError::Http {
                    status,
                    message: format!("{e:#}"),
                }
            })?),
        };

        Ok(ProxyResponse {
            status,
            body,
            final_url,
        })
    }
}
