//! Batches newline-delimited JSON records from a reader and appends them to a channel
use std::time::Duration;

use serde_json::Value;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, Lines},
    time::{sleep, timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    channel::Channel,
    encoder::{Batch, Record},
    error::{Error, Result},
    settings,
    transport::Transport,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub resend_unconfirmed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            batch_size: 100,
            batch_timeout: Duration::from_secs(10),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            resend_unconfirmed: false,
        }
    }
}

impl From<&settings::Pipeline> for PipelineConfig {
    fn from(p: &settings::Pipeline) -> Self {
        let d = PipelineConfig::default();
        PipelineConfig {
            batch_size: p.batch_size.unwrap_or(d.batch_size).max(1),
            batch_timeout: p
                .batch_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.batch_timeout),
            max_attempts: p.max_attempts.unwrap_or(d.max_attempts).max(1),
            retry_backoff: p
                .retry_backoff_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.retry_backoff),
            resend_unconfirmed: p.resend_unconfirmed.unwrap_or(d.resend_unconfirmed),
        }
    }
}

/// What happened to the records read by a pipeline run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
    pub batches: u64,
    pub rows: u64,
    /// lines that were not JSON objects
    pub skipped_lines: u64,
    /// rows dropped because their delivery could not be confirmed
    pub unconfirmed_rows: u64,
}

pub struct Pipeline<'a, R, T: Transport> {
    lines: Lines<R>,
    channel: &'a Channel<T>,
    config: PipelineConfig,
    batch: Batch,
    eof: bool,
    summary: PipelineSummary,
}

impl<'a, R: AsyncBufRead + Unpin, T: Transport> Pipeline<'a, R, T> {
    pub fn new(reader: R, channel: &'a Channel<T>, config: PipelineConfig) -> Self {
        Pipeline {
            lines: reader.lines(),
            channel,
            config,
            batch: Batch::new(),
            eof: false,
            summary: PipelineSummary::default(),
        }
    }

    /// Runs until the input ends or `cancel` fires. A batch already being
    /// collected when cancelled is still submitted.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PipelineSummary> {
        while !self.eof && !cancel.is_cancelled() {
            self.fill_batch(&cancel).await;
            if self.batch.is_empty() {
                continue;
            }
            self.submit().await?;
        }
        info!(
            batches = self.summary.batches,
            rows = self.summary.rows,
            skipped = self.summary.skipped_lines,
            unconfirmed = self.summary.unconfirmed_rows,
            "pipeline finished"
        );
        Ok(self.summary)
    }

    async fn fill_batch(&mut self, cancel: &CancellationToken) {
        let deadline = Instant::now() + self.config.batch_timeout;
        while self.batch.len() < self.config.batch_size {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = timeout(
                    deadline.saturating_duration_since(Instant::now()),
                    self.lines.next_line(),
                ) => line,
            };
            match line {
                Err(_) => break,
                Ok(Ok(None)) => {
                    self.eof = true;
                    break;
                }
                Ok(Err(e)) => {
                    error!("reading input: {e}");
                    self.eof = true;
                    break;
                }
                Ok(Ok(Some(line))) => match parse_record(&line) {
                    Some(record) => self.batch.push(record),
                    None if line.trim().is_empty() => {}
                    None => {
                        warn!("skipping line that is not a JSON object");
                        self.summary.skipped_lines += 1;
                    }
                },
            }
        }
    }

    async fn submit(&mut self) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.channel.append(&self.batch).await {
                Ok(ack) => {
                    info!(offset = ack.offset, rows = ack.rows, "batch delivered");
                    self.summary.batches += 1;
                    self.summary.rows += ack.rows as u64;
                    self.batch.clear();
                    return Ok(());
                }
                Err(e) if e.is_unconfirmed() => {
                    let rows = self.batch.len();
                    if self.config.resend_unconfirmed && attempt < self.config.max_attempts {
                        warn!(attempt, rows, "delivery unconfirmed: {e}, resending batch");
                        attempt += 1;
                        if !matches!(e, Error::StaleContinuationToken { .. }) {
                            sleep(self.config.retry_backoff).await;
                        }
                        continue;
                    }
                    warn!(rows, "delivery unconfirmed: {e}, dropping batch");
                    self.summary.unconfirmed_rows += rows as u64;
                    self.batch.clear();
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(attempt, rows = self.batch.len(), "append failed: {e}, retrying");
                    attempt += 1;
                    sleep(self.config.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn parse_record(line: &str) -> Option<Record> {
    match serde_json::from_str(line) {
        Ok(Value::Object(record)) => Some(record),
        _ => None,
    }
}
