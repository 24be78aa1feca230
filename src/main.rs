use anyhow::Context;
use clap::Parser;
use snowstream::{
    client::StreamingClient,
    pipeline::{Pipeline, PipelineConfig},
    settings::Settings,
};
use tokio::{
    fs::File,
    io::{self, AsyncBufRead, BufReader},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[doc(hidden)]
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: String,
    /// newline-delimited JSON input (default: stdin)
    #[arg(short, long)]
    input: Option<String>,
    /// log as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "snowstream=info".into());
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let settings = Settings::new(&args.config).context("cannot load config")?;
    let client = StreamingClient::new(settings.client_config()?)?;
    let channel = client.open_channel().await.context("opening channel")?;
    info!(channel = channel.name(), "streaming to {}", channel.target());

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).await.with_context(|| format!("opening {path}"))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown requested, finishing current batch");
                cancel.cancel();
            }
        }
    });

    let result = Pipeline::new(reader, &channel, PipelineConfig::from(&settings.pipeline))
        .run(cancel)
        .await;

    if let Err(e) = channel.close().await {
        warn!("closing channel: {e}");
    }
    let stats = client.stats();
    info!(
        rows = stats.rows_sent,
        batches = stats.batches_sent,
        bytes = stats.bytes_sent,
        errors = stats.errors,
        offset = channel.offset().await,
        "final statistics: {stats}"
    );
    result?;
    Ok(())
}
