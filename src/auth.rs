//! Credentials and the bearer tokens derived from them.
//!
//! Two credential kinds are supported:
//! * a static, pre-issued access token, handed out unchanged;
//! * an RSA [KeyPair], whose signed assertions are exchanged at the identity
//!   endpoint for a role-scoped bearer token.
//!
//! Renewal is driven by the callers: whoever sees an authentication failure
//! calls [TokenManager::invalidate] and the next [TokenManager::token] performs
//! a fresh exchange. There is no background refresh.
pub mod keypair;

use std::{fmt, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use reqwest::{Method, Url};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use keypair::KeyPair;

use crate::{
    error::{Error, Result},
    transport::{Body, HttpRequest, Transport},
};

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Validity assumed for an exchanged bearer token
pub const TOKEN_VALIDITY_SECS: i64 = 3600;

#[derive(Debug)]
pub enum Credential {
    Static(StaticToken),
    KeyPair(KeyPair),
}

/// Pre-issued access token, non-empty. Built through [Credential::static_token].
pub struct StaticToken(String);

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticToken(<redacted>)")
    }
}

impl Credential {
    pub fn static_token(token: impl Into<String>) -> Result<Credential> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(Error::Auth {
                status: None,
                body: String::from("static access token is empty"),
            });
        }
        Ok(Credential::Static(StaticToken(token)))
    }
}

/// Bearer token obtained from an exchange. Replaced wholesale on renewal.
struct BearerToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl BearerToken {
    fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token: Option<String>,
}

pub struct TokenManager<T: Transport> {
    credential: Credential,
    transport: Arc<T>,
    token_url: Url,
    role: String,
    validity: Duration,
    cached: Mutex<Option<BearerToken>>,
}

impl<T: Transport> TokenManager<T> {
    pub fn new(
        credential: Credential,
        transport: Arc<T>,
        token_url: Url,
        role: &str,
    ) -> TokenManager<T> {
        TokenManager {
            credential,
            transport,
            token_url,
            role: role.to_uppercase(),
            validity: Duration::seconds(TOKEN_VALIDITY_SECS),
            cached: Mutex::new(None),
        }
    }

    /// Override how long an exchanged token is trusted before a new exchange.
    pub fn with_validity(mut self, validity: Duration) -> TokenManager<T> {
        self.validity = validity;
        self
    }

    pub fn is_static(&self) -> bool {
        matches!(self.credential, Credential::Static(_))
    }

    /// Returns a non-empty bearer token, exchanging a fresh assertion if the
    /// cached one is missing or past its validity.
    pub async fn token(&self) -> Result<String> {
        let key_pair = match &self.credential {
            Credential::Static(StaticToken(token)) => return Ok(token.clone()),
            Credential::KeyPair(key_pair) => key_pair,
        };
        // held across the exchange so concurrent callers share one
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_valid_at(Utc::now())) {
            return Ok(token.value.clone());
        }
        let token = self.exchange(key_pair).await?;
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    /// Drops the cached token. No-op for static tokens.
    pub async fn invalidate(&self) {
        if let Credential::KeyPair(_) = self.credential {
            if self.cached.lock().await.take().is_some() {
                debug!("bearer token invalidated");
            }
        }
    }

    async fn exchange(&self, key_pair: &KeyPair) -> Result<BearerToken> {
        let now = Utc::now();
        let assertion = key_pair.assertion(now)?;
        info!(
            user = key_pair.qualified_user(),
            role = %self.role,
            "exchanging assertion for bearer token"
        );

        let request = HttpRequest::new(Method::POST, self.token_url.clone()).body(Body::Form(vec![
            (String::from("grant_type"), String::from(JWT_BEARER_GRANT)),
            (String::from("assertion"), assertion),
            (String::from("scope"), format!("session:role:{}", self.role)),
        ]));
        let response = self.transport.send(request).await.map_err(|e| Error::Auth {
            status: None,
            body: e.to_string(),
        })?;
        if !response.is_success() {
            warn!(
                status = response.status,
                fingerprint = key_pair.fingerprint(),
                "token exchange rejected, check that the public key is registered for the user"
            );
            return Err(Error::Auth {
                status: Some(response.status),
                body: response.body,
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&response.body).map_err(|e| Error::Auth {
            status: Some(response.status),
            body: format!("malformed token response: {e}"),
        })?;
        let value = parsed
            .access_token
            .or(parsed.token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Auth {
                status: Some(response.status),
                body: String::from("no access_token in response"),
            })?;
        let expires_at = now + self.validity;
        info!(%expires_at, "bearer token obtained");
        Ok(BearerToken { value, expires_at })
    }
}
