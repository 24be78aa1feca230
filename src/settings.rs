//! Application config
use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{
    channel::ChannelTarget,
    client::{AuthMethod, ClientConfig},
};

/// Connection and target of the streaming channel
#[derive(Deserialize)]
pub struct Snowflake {
    /// account identifier, e.g. `MYORG-MYACCOUNT`
    pub account: String,
    pub user: String,
    /// role requested for exchanged tokens (default: PUBLIC)
    pub role: Option<String>,
    pub database: String,
    pub schema: String,
    pub table: String,
    /// streaming pipe (default: `<table>-STREAMING`)
    pub pipe: Option<String>,
    /// channel base name (default: STREAM)
    pub channel_name: Option<String>,
    /// programmatic access token, used as is
    pub pat: Option<String>,
    /// unencrypted PEM private key for key-pair auth
    #[serde(alias = "private_key_file")]
    pub private_key_path: Option<PathBuf>,
    /// override of the URL derived from `account`
    pub account_url: Option<String>,
    /// HTTP timeout (default: 30s)
    pub request_timeout_seconds: Option<u64>,
}

/// Batching of input records
#[derive(Deserialize, Default)]
pub struct Pipeline {
    /// max rows per append (default: 100)
    pub batch_size: Option<usize>,
    /// batching timeout (default: 10s)
    pub batch_timeout_seconds: Option<u64>,
    /// attempts per batch on transport or auth failures (default: 3)
    pub max_attempts: Option<u32>,
    /// pause between attempts (default: 1s)
    pub retry_backoff_seconds: Option<u64>,
    /// resend a batch whose delivery is unconfirmed after a stale token (default: false)
    pub resend_unconfirmed: Option<bool>,
}

#[derive(Deserialize)]
pub struct Settings {
    pub snowflake: Snowflake,
    #[serde(default)]
    pub pipeline: Pipeline,
}

impl Settings {
    pub fn new(cfgfile: &str) -> Result<Self, ConfigError> {
        let cfg = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(cfgfile).required(true))
            .add_source(Environment::with_prefix("SNOWSTREAM").separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    /// Validates the connection section into a [ClientConfig], which supplies
    /// the defaults for anything left unset. Pipeline defaults live in
    /// [PipelineConfig](crate::pipeline::PipelineConfig).
    /// A static token takes precedence over key-pair material.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        let sf = &self.snowflake;
        for (key, value) in [
            ("account", &sf.account),
            ("user", &sf.user),
            ("database", &sf.database),
            ("schema", &sf.schema),
            ("table", &sf.table),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("snowflake.{key} must not be empty")));
            }
        }

        let auth = match (&sf.pat, &sf.private_key_path) {
            (Some(pat), _) if !pat.trim().is_empty() => AuthMethod::Pat(pat.clone()),
            (_, Some(private_key_path)) => AuthMethod::KeyPair {
                private_key_path: private_key_path.clone(),
            },
            _ => {
                return Err(ConfigError::Message(String::from(
                    "no authentication configured: set snowflake.pat or snowflake.private_key_path",
                )))
            }
        };

        let target = ChannelTarget {
            database: sf.database.clone(),
            schema: sf.schema.clone(),
            table: sf.table.clone(),
            pipe: sf
                .pipe
                .clone()
                .unwrap_or_else(|| format!("{}-STREAMING", sf.table)),
        };
        let mut config = ClientConfig::new(&sf.account, &sf.user, target, auth);
        if let Some(role) = &sf.role {
            config.role = role.clone();
        }
        if let Some(name) = &sf.channel_name {
            config.channel_base_name = name.clone();
        }
        config.account_url = sf.account_url.clone();
        if let Some(secs) = sf.request_timeout_seconds {
            config.request_timeout = Duration::from_secs(secs);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::pipeline::PipelineConfig;

    fn load(contents: &str) -> Result<Settings, ConfigError> {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        Settings::new(file.path().to_str().unwrap())
    }

    #[test]
    fn fills_defaults() {
        let settings = load(
            r#"
            [snowflake]
            account = "ACME-PROD"
            user = "INGEST"
            database = "DEMO"
            schema = "PUBLIC"
            table = "CAMERAS"
            pat = "pat-123"
            "#,
        )
        .unwrap();
        let pipeline = PipelineConfig::from(&settings.pipeline);
        assert_eq!(pipeline.batch_size, 100);
        assert_eq!(pipeline.max_attempts, 3);
        assert!(!pipeline.resend_unconfirmed);

        let config = settings.client_config().unwrap();
        assert_eq!(config.target.pipe, "CAMERAS-STREAMING");
        assert_eq!(config.role, "PUBLIC");
        assert_eq!(config.channel_base_name, "STREAM");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(matches!(config.auth, AuthMethod::Pat(ref t) if t == "pat-123"));
    }

    #[test]
    fn key_pair_needs_only_private_key() {
        let settings = load(
            r#"
            [snowflake]
            account = "ACME-PROD"
            user = "INGEST"
            database = "DEMO"
            schema = "PUBLIC"
            table = "CAMERAS"
            private_key_file = "keys/rsa_key.p8"
            "#,
        )
        .unwrap();
        match settings.client_config().unwrap().auth {
            AuthMethod::KeyPair { private_key_path } => {
                assert_eq!(private_key_path, PathBuf::from("keys/rsa_key.p8"));
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn missing_auth_is_rejected() {
        let settings = load(
            r#"
            [snowflake]
            account = "ACME-PROD"
            user = "INGEST"
            database = "DEMO"
            schema = "PUBLIC"
            table = "CAMERAS"
            "#,
        )
        .unwrap();
        assert!(settings.client_config().is_err());
    }
}
