//! HTTP seam. Every call the client makes goes through [Transport],
//! so lifecycle logic can be exercised without a network.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Method, Url};
use tracing::debug;

use crate::error::{Error, Result};

/// Default timeout of a single HTTP call
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const NDJSON: &str = "application/x-ndjson";

#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Ndjson(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub bearer: Option<String>,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> HttpRequest {
        HttpRequest {
            method,
            url,
            bearer: None,
            body: Body::Empty,
        }
    }

    pub fn bearer(mut self, token: impl Into<String>) -> HttpRequest {
        self.bearer = Some(token.into());
        self
    }

    pub fn body(mut self, body: Body) -> HttpRequest {
        self.body = body;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> HttpResponse {
        HttpResponse {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == 401
    }

    /// Parse the body as JSON, reporting malformed payloads as transport errors.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| Error::transport(self.status, format!("malformed response body: {e}")))
    }
}

/// Appends percent-encoded path segments to `base`.
pub fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Transport {
            status: None,
            message: format!("{base} cannot be used as a base URL"),
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Sends one request and returns whatever the server answered.
/// Implementations must not retry: a non-2xx status is a valid response.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [Transport] backed by a single [reqwest::Client]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<HttpTransport> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(method = %request.method, path = request.url.path(), "http request");
        let mut builder = self
            .client
            .request(request.method, request.url)
            .header(header::ACCEPT, "application/json");
        if let Some(token) = request.bearer {
            builder = builder.bearer_auth(token);
        }
        builder = match request.body {
            Body::Empty => builder,
            Body::Json(v) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(v.to_string()),
            Body::Form(fields) => builder.form(&fields),
            Body::Ndjson(payload) => builder.header(header::CONTENT_TYPE, NDJSON).body(payload),
        };
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, "http response");
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_extends_base_path() {
        let base = Url::parse("https://proxy.internal/sf/").unwrap();
        let url = endpoint(&base, &["oauth", "token"]).unwrap();
        assert_eq!(url.as_str(), "https://proxy.internal/sf/oauth/token");
    }

    #[test]
    fn endpoint_encodes_segments() {
        let base = Url::parse("https://acme.snowflakecomputing.com").unwrap();
        let url = endpoint(&base, &["channels", "A B/C"]).unwrap();
        assert_eq!(url.path(), "/channels/A%20B%2FC");
    }

    #[test]
    fn response_classification() {
        assert!(HttpResponse::new(204, "").is_success());
        assert!(HttpResponse::new(401, "").is_unauthorized());
        let err = HttpResponse::new(200, "not json")
            .json::<serde_json::Value>()
            .unwrap_err();
        assert!(matches!(err, Error::Transport { status: Some(200), .. }));
    }
}
