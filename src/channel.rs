//! Channel lifecycle: open, append and close against one named channel.
//!
//! A [Channel] owns its continuation token and offset counter. All state
//! transitions go through a single async mutex per channel, so at most one
//! operation is in flight against it. Independent channels do not contend.
//!
//! ```text
//! Closed -> Opening -> Open -> Closing -> Closed
//!              |         |
//!              +-> Error <+
//! ```
use std::{fmt, sync::Arc};

use reqwest::{Method, Url};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    auth::TokenManager,
    encoder::{encode, Record},
    error::{Error, Result},
    stats::IngestionStats,
    transport::{endpoint, Body, HttpRequest, HttpResponse, Transport},
};

const STALE_TOKEN_MARKER: &str = "STALE_CONTINUATION_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
    Error,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelState::Closed => "closed",
            ChannelState::Opening => "opening",
            ChannelState::Open => "open",
            ChannelState::Closing => "closing",
            ChannelState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Table a channel appends to, and the pipe that ingests it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelTarget {
    pub database: String,
    pub schema: String,
    pub table: String,
    pub pipe: String,
}

impl fmt::Display for ChannelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.table)
    }
}

/// Acknowledged append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendAck {
    /// offset token the batch was sent with
    pub offset: u64,
    pub rows: usize,
    pub bytes: usize,
}

#[derive(Deserialize)]
struct OpenResponse {
    next_continuation_token: Option<String>,
    #[serde(default)]
    channel_status: ChannelStatus,
}

#[derive(Deserialize, Default)]
struct ChannelStatus {
    #[serde(default, deserialize_with = "offset_token")]
    last_committed_offset_token: u64,
}

#[derive(Deserialize)]
struct AppendResponse {
    next_continuation_token: Option<String>,
}

/// Offset tokens travel as strings; accept numbers and null as well.
fn offset_token<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    use serde::de::Error as _;
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0),
        Value::String(s) if s.is_empty() => Ok(0),
        Value::String(s) => s
            .parse()
            .map_err(|_| D::Error::custom(format!("invalid offset token {s:?}"))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| D::Error::custom(format!("invalid offset token {n}"))),
        other => Err(D::Error::custom(format!("invalid offset token {other}"))),
    }
}

struct Inner {
    state: ChannelState,
    continuation_token: Option<String>,
    offset: u64,
}

pub struct Channel<T: Transport> {
    name: String,
    target: ChannelTarget,
    channel_url: Url,
    rows_url: Url,
    tokens: Arc<TokenManager<T>>,
    transport: Arc<T>,
    stats: Arc<IngestionStats>,
    inner: Mutex<Inner>,
}

impl<T: Transport> Channel<T> {
    /// Creates a closed channel on `host`. Nothing is sent until [Channel::open].
    pub fn new(
        name: String,
        target: ChannelTarget,
        host: &str,
        tokens: Arc<TokenManager<T>>,
        transport: Arc<T>,
        stats: Arc<IngestionStats>,
    ) -> Result<Channel<T>> {
        let base = Url::parse(&format!("https://{host}")).map_err(|e| Error::Transport {
            status: None,
            message: format!("invalid ingest host {host:?}: {e}"),
        })?;
        let path = [
            "databases",
            target.database.as_str(),
            "schemas",
            target.schema.as_str(),
            "pipes",
            target.pipe.as_str(),
            "channels",
            name.as_str(),
        ];
        let channel_url = endpoint(&base, &[&["v2", "streaming"][..], &path[..]].concat())?;
        let rows_path = [&["v2", "streaming", "data"][..], &path[..], &["rows"][..]].concat();
        let rows_url = endpoint(&base, &rows_path)?;
        Ok(Channel {
            name,
            target,
            channel_url,
            rows_url,
            tokens,
            transport,
            stats,
            inner: Mutex::new(Inner {
                state: ChannelState::Closed,
                continuation_token: None,
                offset: 0,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &ChannelTarget {
        &self.target
    }

    pub async fn state(&self) -> ChannelState {
        self.inner.lock().await.state
    }

    /// Offset token of the last append, or the server's committed offset right after open
    pub async fn offset(&self) -> u64 {
        self.inner.lock().await.offset
    }

    pub async fn continuation_token(&self) -> Option<String> {
        self.inner.lock().await.continuation_token.clone()
    }

    /// Opens the channel. Valid only from [ChannelState::Closed].
    /// An authentication failure renews the token and retries once.
    pub async fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let result = match inner.state {
            ChannelState::Closed => self.open_locked(&mut inner).await,
            state => Err(invalid_state("open", state)),
        };
        self.observe(result)
    }

    /// Appends one batch. Valid only from [ChannelState::Open].
    ///
    /// The offset counter is advanced before the request is sent and is not
    /// rolled back on failure. Failed appends are never resent here: the
    /// caller holds the batch and decides whether a resend is safe.
    ///
    /// On a stale continuation token the channel is reopened from scratch and
    /// [Error::StaleContinuationToken] is returned, since the batch may or may
    /// not have been committed.
    ///
    /// An accepted append whose response carries no usable continuation token
    /// still counts as delivered: the channel is reopened for a fresh token. If
    /// that reopen fails its error is returned and the channel is left in
    /// [ChannelState::Error].
    pub async fn append(&self, batch: &[Record]) -> Result<AppendAck> {
        let mut inner = self.inner.lock().await;
        let result = self.append_locked(&mut inner, batch).await;
        self.observe(result)
    }

    /// Advisory close: the server reclaims idle channels on its own, so this
    /// does not wait for teardown. The channel is `Closed` afterwards even if
    /// the request failed.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let result = match inner.state {
            ChannelState::Open => {
                inner.state = ChannelState::Closing;
                info!(channel = %self.name, offset = inner.offset, "closing channel");
                let result = self.close_request().await;
                inner.state = ChannelState::Closed;
                inner.continuation_token = None;
                result
            }
            ChannelState::Error => {
                inner.state = ChannelState::Closed;
                inner.continuation_token = None;
                Ok(())
            }
            state => Err(invalid_state("close", state)),
        };
        self.observe(result)
    }

    async fn open_locked(&self, inner: &mut Inner) -> Result<()> {
        inner.state = ChannelState::Opening;
        info!(channel = %self.name, target = %self.target, "opening channel");

        let response = match self.open_request().await {
            Ok(r) if r.is_unauthorized() => {
                info!(channel = %self.name, "open rejected as unauthorized, renewing token");
                self.tokens.invalidate().await;
                self.open_request().await
            }
            other => other,
        };
        match response.and_then(|r| self.parse_open(r)) {
            Ok((token, offset)) => {
                inner.continuation_token = Some(token);
                inner.offset = offset;
                inner.state = ChannelState::Open;
                info!(channel = %self.name, offset, "channel opened");
                Ok(())
            }
            Err(e) => {
                inner.continuation_token = None;
                inner.state = ChannelState::Error;
                Err(e)
            }
        }
    }

    async fn open_request(&self) -> Result<HttpResponse> {
        let token = self.tokens.token().await?;
        let request = HttpRequest::new(Method::PUT, self.channel_url.clone())
            .bearer(token)
            .body(Body::Json(json!({})));
        self.transport.send(request).await
    }

    fn parse_open(&self, response: HttpResponse) -> Result<(String, u64)> {
        if !response.is_success() {
            return Err(Error::ChannelOpen {
                channel: self.name.clone(),
                reason: format!("status {}: {}", response.status, response.body),
            });
        }
        let parsed: OpenResponse = response.json()?;
        let token = parsed
            .next_continuation_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                Error::transport(response.status, "open response has no next_continuation_token")
            })?;
        Ok((token, parsed.channel_status.last_committed_offset_token))
    }

    async fn append_locked(&self, inner: &mut Inner, batch: &[Record]) -> Result<AppendAck> {
        let continuation = match (inner.state, &inner.continuation_token) {
            (ChannelState::Open, Some(token)) => token.clone(),
            (state, _) => return Err(invalid_state("append", state)),
        };
        if batch.is_empty() {
            return Ok(AppendAck {
                offset: inner.offset,
                rows: 0,
                bytes: 0,
            });
        }
        let encoded = encode(batch).map_err(|e| Error::Transport {
            status: None,
            message: format!("encoding batch: {e}"),
        })?;
        let bytes = encoded.len();
        let token = self.tokens.token().await?;

        inner.offset += 1;
        let offset = inner.offset;
        let mut url = self.rows_url.clone();
        url.query_pairs_mut()
            .append_pair("continuationToken", &continuation)
            .append_pair("offsetToken", &offset.to_string());
        let request = HttpRequest::new(Method::POST, url)
            .bearer(token)
            .body(Body::Ndjson(encoded.payload));
        let response = self.transport.send(request).await?;

        if response.is_success() {
            // committed from here on, whatever the body holds
            self.stats.record_append(encoded.rows, bytes);
            debug!(channel = %self.name, offset, rows = encoded.rows, bytes, "batch appended");
            match next_continuation_token(&response) {
                Some(next) => inner.continuation_token = Some(next),
                None => {
                    warn!(
                        channel = %self.name,
                        offset,
                        "append accepted without a continuation token, reopening channel"
                    );
                    inner.state = ChannelState::Closed;
                    inner.continuation_token = None;
                    self.open_locked(inner).await?;
                }
            }
            return Ok(AppendAck {
                offset,
                rows: encoded.rows,
                bytes,
            });
        }
        if response.is_unauthorized() {
            self.tokens.invalidate().await;
            return Err(Error::Auth {
                status: Some(response.status),
                body: response.body,
            });
        }
        if is_stale(&response) {
            warn!(channel = %self.name, offset, "stale continuation token, reopening channel");
            inner.state = ChannelState::Closed;
            inner.continuation_token = None;
            if let Err(e) = self.open_locked(inner).await {
                // the stale append is a failure of its own
                self.stats.record_error();
                return Err(e);
            }
            return Err(Error::StaleContinuationToken {
                channel: self.name.clone(),
                offset,
            });
        }
        Err(Error::transport(
            response.status,
            format!("append failed: {}", response.body),
        ))
    }

    async fn close_request(&self) -> Result<()> {
        let token = self.tokens.token().await?;
        let request = HttpRequest::new(Method::DELETE, self.channel_url.clone()).bearer(token);
        let response = self.transport.send(request).await?;
        match response.status {
            // already reclaimed by the server
            404 => Ok(()),
            401 => {
                self.tokens.invalidate().await;
                Err(Error::Auth {
                    status: Some(response.status),
                    body: response.body,
                })
            }
            _ if response.is_success() => Ok(()),
            status => Err(Error::transport(status, format!("close failed: {}", response.body))),
        }
    }

    fn observe<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            self.stats.record_error();
            warn!(channel = %self.name, error = %e, "channel operation failed");
        }
        result
    }
}

fn invalid_state(operation: &'static str, state: ChannelState) -> Error {
    Error::InvalidState {
        operation,
        state: state.to_string(),
    }
}

fn next_continuation_token(response: &HttpResponse) -> Option<String> {
    response
        .json::<AppendResponse>()
        .ok()?
        .next_continuation_token
        .filter(|t| !t.is_empty())
}

fn is_stale(response: &HttpResponse) -> bool {
    (400..500).contains(&response.status) && response.body.contains(STALE_TOKEN_MARKER)
}
