//! RSA key-pair credential producing short-lived signed assertions
use std::{fmt, fs, path::Path};

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    RsaPrivateKey,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, Result};

/// Lifetime of one signed assertion, in seconds
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: String,
    sub: &'a str,
    iat: i64,
    exp: i64,
}

pub struct KeyPair {
    encoding_key: EncodingKey,
    fingerprint: String,
    qualified_user: String,
}

impl KeyPair {
    /// Build from an unencrypted PEM private key, PKCS#8 or PKCS#1.
    /// The public key is derived from it.
    pub fn from_pem(private_pem: &str, qualified_user: String) -> Result<KeyPair> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(private_pem))
            .map_err(|e| credential_error(format!("invalid RSA private key: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| credential_error(format!("invalid RSA private key: {e}")))?;
        Ok(KeyPair {
            encoding_key,
            fingerprint: fingerprint(&private_key)?,
            qualified_user,
        })
    }

    pub fn load(private_key_path: &Path, qualified_user: String) -> Result<KeyPair> {
        let private_pem = fs::read_to_string(private_key_path).map_err(|e| {
            credential_error(format!("reading {}: {e}", private_key_path.display()))
        })?;
        let key_pair = KeyPair::from_pem(&private_pem, qualified_user)?;
        debug!(
            key = %private_key_path.display(),
            fingerprint = %key_pair.fingerprint,
            "loaded key pair"
        );
        Ok(key_pair)
    }

    /// `SHA256:` followed by the base64 digest of the SubjectPublicKeyInfo DER
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn qualified_user(&self) -> &str {
        &self.qualified_user
    }

    /// Signs an RS256 assertion valid for [ASSERTION_LIFETIME_SECS] from `now`.
    pub fn assertion(&self, now: DateTime<Utc>) -> Result<String> {
        let claims = Claims {
            iss: format!("{}.{}", self.qualified_user, self.fingerprint),
            sub: &self.qualified_user,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ASSERTION_LIFETIME_SECS)).timestamp(),
        };
        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| credential_error(format!("signing assertion: {e}")))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint)
            .field("qualified_user", &self.qualified_user)
            .finish_non_exhaustive()
    }
}

fn fingerprint(private_key: &RsaPrivateKey) -> Result<String> {
    let der = private_key
        .to_public_key()
        .to_public_key_der()
        .map_err(|e| credential_error(format!("encoding public key: {e}")))?;
    Ok(format!("SHA256:{}", STANDARD.encode(Sha256::digest(der.as_bytes()))))
}

fn credential_error(body: impl Into<String>) -> Error {
    Error::Auth {
        status: None,
        body: body.into(),
    }
}
