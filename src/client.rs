//! Client wiring: one credential, one ingest host, any number of channels
use std::{
    fmt,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use reqwest::Url;
use tracing::{info, warn};

use crate::{
    account::Account,
    auth::{Credential, KeyPair, TokenManager},
    channel::{Channel, ChannelTarget},
    discovery::HostResolver,
    error::{Error, Result},
    stats::{IngestionStats, StatsSnapshot},
    transport::{endpoint, HttpTransport, Transport, DEFAULT_TIMEOUT},
};

#[derive(Clone)]
pub enum AuthMethod {
    /// Pre-issued access token
    Pat(String),
    /// Unencrypted PEM private key; the public key is derived from it
    KeyPair { private_key_path: PathBuf },
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Pat(_) => f.write_str("Pat(<redacted>)"),
            AuthMethod::KeyPair { private_key_path } => f
                .debug_struct("KeyPair")
                .field("private_key_path", private_key_path)
                .finish(),
        }
    }
}

/// Validated client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub account: String,
    pub user: String,
    pub role: String,
    pub target: ChannelTarget,
    /// channel names are this base plus a creation timestamp
    pub channel_base_name: String,
    pub auth: AuthMethod,
    /// overrides the URL derived from the account identifier
    pub account_url: Option<String>,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(account: &str, user: &str, target: ChannelTarget, auth: AuthMethod) -> ClientConfig {
        ClientConfig {
            account: account.to_string(),
            user: user.to_string(),
            role: String::from("PUBLIC"),
            target,
            channel_base_name: String::from("STREAM"),
            auth,
            account_url: None,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Reads key material if needed. Static tokens are taken as is.
    pub fn load_credential(&self) -> Result<Credential> {
        match &self.auth {
            AuthMethod::Pat(token) => Credential::static_token(token.as_str()),
            AuthMethod::KeyPair { private_key_path } => {
                let user = Account::new(self.account.as_str()).qualified_user(&self.user);
                Ok(Credential::KeyPair(KeyPair::load(private_key_path, user)?))
            }
        }
    }
}

pub struct StreamingClient<T: Transport = HttpTransport> {
    config: ClientConfig,
    transport: Arc<T>,
    tokens: Arc<TokenManager<T>>,
    resolver: HostResolver<T>,
    stats: Arc<IngestionStats>,
    channels_created: AtomicU64,
}

impl StreamingClient<HttpTransport> {
    pub fn new(config: ClientConfig) -> Result<StreamingClient<HttpTransport>> {
        let credential = config.load_credential()?;
        let transport = Arc::new(HttpTransport::new(config.request_timeout)?);
        StreamingClient::with_transport(config, credential, transport)
    }
}

impl<T: Transport> StreamingClient<T> {
    pub fn with_transport(
        config: ClientConfig,
        credential: Credential,
        transport: Arc<T>,
    ) -> Result<StreamingClient<T>> {
        let account = Account::new(config.account.as_str());
        let account_url = config.account_url.clone().unwrap_or_else(|| account.url());
        let account_url = Url::parse(&account_url).map_err(|e| Error::Transport {
            status: None,
            message: format!("invalid account URL {account_url:?}: {e}"),
        })?;
        let token_url = endpoint(&account_url, &["oauth", "token"])?;
        let tokens = Arc::new(TokenManager::new(
            credential,
            transport.clone(),
            token_url,
            &config.role,
        ));
        let resolver = HostResolver::new(account, &account_url, transport.clone())?;
        info!(
            account = %config.account,
            target = %config.target,
            static_token = tokens.is_static(),
            "streaming client initialized"
        );
        Ok(StreamingClient {
            config,
            transport,
            tokens,
            resolver,
            stats: Arc::new(IngestionStats::new()),
            channels_created: AtomicU64::new(0),
        })
    }

    /// Discovers the ingest host on first use; later calls hit the cache.
    pub async fn ingest_host(&self) -> Result<String> {
        match self.resolver.discover(&self.tokens).await {
            Ok(host) => Ok(host.to_string()),
            Err(e) => {
                self.stats.record_error();
                warn!(error = %e, "ingest host discovery failed");
                Err(e)
            }
        }
    }

    /// New closed channel with a unique name, bound to the configured target.
    pub async fn channel(&self) -> Result<Channel<T>> {
        let host = self.ingest_host().await?;
        let seq = self.channels_created.fetch_add(1, Ordering::Relaxed);
        let name = channel_name(&self.config.channel_base_name, Utc::now(), seq);
        Channel::new(
            name,
            self.config.target.clone(),
            &host,
            self.tokens.clone(),
            self.transport.clone(),
            self.stats.clone(),
        )
    }

    pub async fn open_channel(&self) -> Result<Channel<T>> {
        let channel = self.channel().await?;
        channel.open().await?;
        Ok(channel)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

fn channel_name(base: &str, now: DateTime<Utc>, seq: u64) -> String {
    let name = format!("{base}_{}", now.format("%Y%m%d_%H%M%S"));
    if seq == 0 {
        name
    } else {
        format!("{name}_{seq}")
    }
}
