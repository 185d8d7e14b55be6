use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

use banner_grab_rs::config::{
    ScanConfig, DEFAULT_MAX_READ_LENGTH, DEFAULT_QUEUE_MULTIPLIER, DEFAULT_SENDERS,
    DEFAULT_STATS_INTERVAL_SECS, DEFAULT_TIMEOUT_SECS,
};
use banner_grab_rs::{logging, scanner};

/// banner-grab-rs — Fast async service banner grabber with ordered TCP/TLS/HTTP probe fallback.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "banner-grab-rs",
    version,
    about = "Fast async service banner grabber with ordered TCP/TLS/HTTP probe fallback.",
    long_about = None
)]
struct Cli {
    /// File with one host:port per line, use - for stdin.
    #[arg(long = "input-file", default_value = "-")]
    input_file: String,

    /// File to write JSON results to, use - for stdout.
    #[arg(long = "output-file", default_value = "-")]
    output_file: String,

    /// Number of concurrent workers.
    #[arg(long, default_value_t = DEFAULT_SENDERS)]
    senders: usize,

    /// Per-operation timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Max banner length in bytes.
    #[arg(long = "read-max-length", default_value_t = DEFAULT_MAX_READ_LENGTH)]
    read_max_length: usize,

    /// Include failed targets in the output.
    #[arg(long = "emit-errors", default_value_t = false)]
    emit_errors: bool,

    /// Attach the peer certificate summary to TLS results.
    #[arg(long = "tls-handshake", default_value_t = false)]
    tls_handshake: bool,

    /// Send this file's bytes instead of trying TLS as the second probe.
    #[arg(long = "payload-file")]
    payload_file: Option<PathBuf>,

    /// Do not log periodic throughput stats.
    #[arg(long = "no-stats", default_value_t = false)]
    no_stats: bool,

    /// Queue capacity is senders times this value.
    #[arg(long = "queue-multiplier", default_value_t = DEFAULT_QUEUE_MULTIPLIER)]
    queue_multiplier: usize,

    /// Seconds between throughput reports.
    #[arg(long = "stats-interval", default_value_t = DEFAULT_STATS_INTERVAL_SECS)]
    stats_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.no_stats)?;

    let payload = match cli.payload_file.as_deref() {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read payload file: {}", path.display()))?,
        ),
        None => None,
    };

    let config = ScanConfig::default()
        .with_senders(cli.senders)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_max_read_length(cli.read_max_length)
        .with_emit_failures(cli.emit_errors)
        .with_capture_tls(cli.tls_handshake)
        .with_payload(payload)
        .with_stats(!cli.no_stats)
        .with_stats_interval(Duration::from_secs(cli.stats_interval))
        .with_queue_multiplier(cli.queue_multiplier);
    config.validate()?;

    let input = BufReader::new(open_input(&cli.input_file).await?);
    let output = open_output(&cli.output_file).await?;

    let summary = scanner::run_scan(config, input, output).await?;
    println!("{}", serde_json::to_string(&summary)?);
    Ok(())
}

async fn open_input(name: &str) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
    if name == "-" {
        return Ok(Box::new(tokio::io::stdin()));
    }
    let file = File::open(name)
        .await
        .with_context(|| format!("failed to open input file: {name}"))?;
    Ok(Box::new(file))
}

async fn open_output(name: &str) -> Result<Box<dyn AsyncWrite + Unpin + Send>> {
    if name == "-" {
        return Ok(Box::new(tokio::io::stdout()));
    }
    let file = File::create(name)
        .await
        .with_context(|| format!("failed to create output file: {name}"))?;
    Ok(Box::new(file))
}
