//! ## snowstream
//! Exactly-once streaming ingestion into Snowflake tables over the
//! Snowpipe Streaming REST API.
//!
//! ## Configuration
//! Example config:
//! ```toml
//! [snowflake]
//! account = "MYORG-MYACCOUNT"
//! user = "INGEST_USER"
//! role = "INGEST_ROLE"
//! database = "DEMO"
//! schema = "DEMO"
//! table = "CAMERAS"                 # pipe defaults to "CAMERAS-STREAMING"
//! channel_name = "NYC_CAM"          # channel is NYC_CAM_<timestamp>
//! private_key_path = "rsa_key.p8"   # or: pat = "<programmatic access token>"
//!
//! [pipeline]
//! batch_size = 100
//! batch_timeout_seconds = 10
//! ```
//! Every key can be overridden from the environment, e.g. `SNOWSTREAM__SNOWFLAKE__PAT`.
//!
//! ## Using the client
//! [StreamingClient] resolves the ingest host, obtains a bearer token and hands
//! out [Channel]s. A channel is opened once, then fed batches with
//! [Channel::append]; each append carries the continuation token of the
//! previous one and a client-assigned offset token, which the server uses for
//! exactly-once bookkeeping.
//!
//! The client never resends an append on its own. If an append fails, the
//! offset it consumed is skipped; if the server reports a stale continuation
//! token, the channel is reopened and
//! [Error::StaleContinuationToken](error::Error::StaleContinuationToken) tells
//! the caller that the batch may or may not have landed. Deciding whether to
//! resend is up to the caller, who holds the batch. [pipeline] is one such
//! caller.
//!
//! [StreamingClient]: client::StreamingClient
//! [Channel]: channel::Channel
//! [Channel::append]: channel::Channel::append

pub mod account;
pub mod auth;
pub mod channel;
pub mod client;
pub mod discovery;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod settings;
pub mod stats;
pub mod transport;

pub use error::{Error, Result};
