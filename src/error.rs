//! Error taxonomy of the streaming client
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// Credential loading or token exchange failed.
    /// `status` is the upstream HTTP status when the identity endpoint answered.
    #[error("authentication failed (status {}): {body}", display_status(.status))]
    Auth { status: Option<u16>, body: String },

    /// Channel could not be opened, even after one token renewal.
    #[error("failed to open channel {channel}: {reason}")]
    ChannelOpen { channel: String, reason: String },

    /// Server rejected the continuation token. The channel has been reopened,
    /// but delivery of the batch sent at `offset` is unconfirmed.
    #[error(
        "stale continuation token on channel {channel}, delivery of offset {offset} is unconfirmed"
    )]
    StaleContinuationToken { channel: String, offset: u64 },

    /// Network or HTTP-level failure. Never retried by the client itself.
    #[error("transport error (status {}): {message}", display_status(.status))]
    Transport { status: Option<u16>, message: String },

    /// Operation attempted from the wrong lifecycle state.
    #[error("cannot {operation} channel in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

impl Error {
    pub(crate) fn transport(status: u16, message: impl Into<String>) -> Self {
        Error::Transport {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Whether a caller may reasonably resubmit after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Auth { .. })
    }

    /// Whether a failed append may still have been committed by the server:
    /// a stale token, a request that got no answer, or a failure that
    /// followed an accepted response.
    pub fn is_unconfirmed(&self) -> bool {
        match self {
            Error::StaleContinuationToken { .. } => true,
            Error::Transport { status, .. } => {
                status.map_or(true, |s| (200..300).contains(&s))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport {
            status: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

fn display_status(status: &Option<u16>) -> String {
    match status {
        Some(s) => s.to_string(),
        None => String::from("none"),
    }
}
