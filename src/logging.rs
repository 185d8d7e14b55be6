use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Route tracing output to stderr so it never mixes with JSON results on stdout.
///
/// The filter comes from `RUST_LOG`, falling back to `banner_grab_rs=info`,
/// or `banner_grab_rs=warn` when periodic stats are suppressed.
pub fn init(quiet: bool) -> Result<()> {
    let default = if quiet {
        format!("{}=warn", env!("CARGO_CRATE_NAME"))
    } else {
        format!("{}=info", env!("CARGO_CRATE_NAME"))
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {e}"))
}
