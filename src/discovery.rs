//! Ingest host discovery
use std::sync::Arc;

use reqwest::{Method, Url};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use crate::{
    account::Account,
    auth::TokenManager,
    error::{Error, Result},
    transport::{endpoint, HttpRequest, HttpResponse, Transport},
};

#[derive(Deserialize)]
struct HostnameResponse {
    hostname: Option<String>,
}

/// Resolves the region-specific ingest host once and caches it for the
/// lifetime of the resolver.
pub struct HostResolver<T: Transport> {
    account: Account,
    url: Url,
    transport: Arc<T>,
    host: OnceCell<String>,
}

impl<T: Transport> HostResolver<T> {
    pub fn new(account: Account, account_url: &Url, transport: Arc<T>) -> Result<HostResolver<T>> {
        Ok(HostResolver {
            account,
            url: endpoint(account_url, &["v2", "streaming", "hostname"])?,
            transport,
            host: OnceCell::new(),
        })
    }

    pub async fn discover(&self, tokens: &TokenManager<T>) -> Result<&str> {
        let host = self
            .host
            .get_or_try_init(|| async {
                let mut response = self.request(tokens).await?;
                if response.is_unauthorized() {
                    tokens.invalidate().await;
                    response = self.request(tokens).await?;
                }
                if response.is_unauthorized() {
                    return Err(Error::Auth {
                        status: Some(response.status),
                        body: response.body,
                    });
                }
                if !response.is_success() {
                    return Err(Error::transport(
                        response.status,
                        format!("host discovery failed: {}", response.body),
                    ));
                }
                let host = parse_hostname(&response.body, &self.account)?;
                info!(host = %host, "ingest host discovered");
                Ok::<_, Error>(host)
            })
            .await?;
        Ok(host.as_str())
    }

    async fn request(&self, tokens: &TokenManager<T>) -> Result<HttpResponse> {
        let token = tokens.token().await?;
        let request = HttpRequest::new(Method::GET, self.url.clone()).bearer(token);
        self.transport.send(request).await
    }
}

/// Accepts a bare hostname, a `{"hostname": ...}` document, or nothing at all.
fn parse_hostname(body: &str, account: &Account) -> Result<String> {
    let body = body.trim();
    if body.starts_with('{') {
        let parsed: HostnameResponse = serde_json::from_str(body)
            .map_err(|e| Error::transport(200, format!("malformed hostname response: {e}")))?;
        if let Some(host) = parsed.hostname.filter(|h| !h.trim().is_empty()) {
            return Ok(host.trim().to_string());
        }
    } else if !body.is_empty() {
        return Ok(body.to_string());
    }
    let host = account.fallback_ingest_host();
    warn!(host = %host, "empty hostname response, using account host");
    Ok(host)
}
