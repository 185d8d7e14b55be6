use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::types::RunCounters;

/// Results per second. Elapsed time is taken in whole seconds and clamped to 1
/// so an early tick never divides by zero.
pub fn throughput(total: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs().max(1);
    total as f64 / secs as f64
}

/// Periodically log progress to the tracing side channel until `cancel` fires.
///
/// Sleeps for `warmup` first, then reports every `interval`. The handle
/// resolves to the number of reports emitted.
pub fn spawn_reporter(
    counters: RunCounters,
    started: Instant,
    warmup: Duration,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => return 0,
            _ = time::sleep(warmup) => {}
        }

        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut reports = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let elapsed = started.elapsed();
                    let total = counters.total();
                    info!(
                        elapsed_secs = elapsed.as_secs(),
                        total,
                        success = counters.success(),
                        failure = counters.failure(),
                        rate_per_sec = throughput(total, elapsed),
                        "progress"
                    );
                    reports += 1;
                }
            }
        }
        reports
    })
}
