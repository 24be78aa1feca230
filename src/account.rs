//! Account identifier and the addresses derived from it
use std::fmt;

const DOMAIN: &str = "snowflakecomputing.com";

/// Account identifier as configured, e.g. `MYORG-MYACCOUNT` or `xy12345.us-east-1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account(String);

impl Account {
    pub fn new(identifier: impl Into<String>) -> Account {
        Account(identifier.into())
    }

    fn host_form(&self) -> String {
        self.0.to_lowercase().replace('_', "-")
    }

    /// Base URL of the account, used for identity exchange and host discovery.
    /// Keeps at most the locator and the region part of the identifier.
    pub fn url(&self) -> String {
        let host = self.host_form();
        let parts: Vec<&str> = host.split('.').collect();
        if parts.len() >= 2 {
            format!("https://{}.{}.{DOMAIN}", parts[0], parts[1])
        } else {
            format!("https://{}.{DOMAIN}", parts[0])
        }
    }

    /// Ingest hostname used when discovery returns nothing
    pub fn fallback_ingest_host(&self) -> String {
        format!("{}.{DOMAIN}", self.host_form())
    }

    /// `ACCOUNT.USER`, the subject of signed assertions
    pub fn qualified_user(&self, user: &str) -> String {
        let locator = self.0.split('.').next().unwrap_or_default();
        format!("{}.{}", locator.to_uppercase(), user.to_uppercase())
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
