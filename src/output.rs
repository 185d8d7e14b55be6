use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::types::{RunCounters, ScanResult};

/// What the aggregator did with the results it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub written: u64,
    pub suppressed: u64,
    pub encode_errors: u64,
}

/// Sole consumer of the result queue. Owns the write side of the counters
/// and the output sink.
pub struct Aggregator<W: AsyncWrite + Unpin> {
    sink: Option<BufWriter<W>>,
    counters: RunCounters,
    emit_failures: bool,
    stats: OutputStats,
}

impl<W: AsyncWrite + Unpin> Aggregator<W> {
    pub fn new(sink: W, counters: RunCounters, emit_failures: bool) -> Self {
        Self {
            sink: Some(BufWriter::new(sink)),
            counters,
            emit_failures,
            stats: OutputStats::default(),
        }
    }

    /// Consume results until every sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<ScanResult>) -> OutputStats {
        while let Some(result) = rx.recv().await {
            self.handle(result).await;
            if rx.is_empty() {
                self.flush().await;
            }
        }
        self.flush().await;
        self.stats
    }

    async fn handle(&mut self, result: ScanResult) {
        let success = result.is_success();
        self.counters.record(success);
        if !success && !self.emit_failures {
            self.stats.suppressed += 1;
            return;
        }

        let mut line = match serde_json::to_vec(&result.record()) {
            Ok(v) => v,
            Err(e) => {
                warn!(addr = %result.target, error = %e, "dropping result that failed to encode");
                self.stats.encode_errors += 1;
                return;
            }
        };
        line.push(b'\n');

        // A broken sink is abandoned; the queue keeps draining so workers never stall.
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.write_all(&line).await {
                error!(error = %e, "output sink failed, discarding further results");
                self.sink = None;
                return;
            }
            self.stats.written += 1;
        }
    }

    async fn flush(&mut self) {
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.flush().await {
                error!(error = %e, "output sink failed, discarding further results");
                self.sink = None;
            }
        }
    }
}
