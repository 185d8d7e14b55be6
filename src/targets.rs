use anyhow::{anyhow, bail, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::types::Target;

/// Counts reported by the target source once the input is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub accepted: u64,
    pub malformed: u64,
}

/// Parse one input line into a target.
///
/// Supported formats:
/// - `host:port`, split on the first `:`
/// - `[v6addr]:port`
/// - blank lines and lines starting with `#` yield `Ok(None)`
///
/// The port must be an integer in 1..=65535.
pub fn parse_target_line(raw_line: &str) -> Result<Option<Target>> {
    let line = raw_line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (host, port) = if let Some(rest) = line.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated '[' in target: {line}"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing port after ']' in target: {line}"))?;
        (host, port)
    } else {
        line.split_once(':')
            .ok_or_else(|| anyhow!("missing ':' separator in target: {line}"))?
    };

    let host = host.trim();
    let port = port.trim();
    if host.is_empty() {
        bail!("empty host in target: {line}");
    }
    validate_port(port).with_context(|| format!("invalid port in target: {line}"))?;

    Ok(Some(Target::new(host, port)))
}

/// Read targets line by line and push them onto the dispatch queue.
///
/// Suspends while the queue is full. Malformed lines are skipped, logged and
/// counted. Fails only on input I/O errors or if every worker has gone away.
pub async fn feed_targets<R>(mut reader: R, tx: &mpsc::Sender<Target>) -> Result<SourceStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = SourceStats::default();
    let mut buf = Vec::new();
    let mut line_no = 0u64;

    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .await
            .context("failed to read target input")?;
        if n == 0 {
            break;
        }
        line_no += 1;

        let line = match std::str::from_utf8(&buf) {
            Ok(s) => s,
            Err(_) => {
                warn!(line = line_no, "skipping target line that is not valid UTF-8");
                stats.malformed += 1;
                continue;
            }
        };

        match parse_target_line(line) {
            Ok(Some(target)) => {
                tx.send(target)
                    .await
                    .map_err(|_| anyhow!("dispatch queue closed before input was exhausted"))?;
                stats.accepted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(line = line_no, error = %e, "skipping malformed target line");
                stats.malformed += 1;
            }
        }
    }

    debug!(accepted = stats.accepted, malformed = stats.malformed, "target input exhausted");
    Ok(stats)
}

fn validate_port(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
