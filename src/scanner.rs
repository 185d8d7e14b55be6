use crate::config::ScanConfig;
use crate::output::Aggregator;
use crate::probe::ProbeChain;
use crate::stats;
use crate::targets::feed_targets;
use crate::types::{RunCounters, RunSummary, ScanResult, Target};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use ::time::OffsetDateTime;
use tracing::{debug, error, info, warn};

/// Scan every target read from `input`, writing one JSON line per retained
/// result to `output`, and return the run summary.
///
/// - Targets flow through a bounded dispatch queue to `config.senders` workers.
/// - Each worker runs the probe chain and pushes its result onto a bounded result queue.
/// - A single aggregator task counts results and serializes them.
/// - Shutdown drains in order: dispatch queue, workers, result queue, aggregator, stats.
pub async fn run_scan<R, W>(config: ScanConfig, input: R, output: W) -> Result<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    config.validate()?;
    let chain = Arc::new(ProbeChain::from_config(&config)?);
    let config = Arc::new(config);
    let counters = RunCounters::new();

    let started = Instant::now();
    let start_time = unix_now();

    let capacity = config.queue_capacity();
    let (target_tx, target_rx) = mpsc::channel::<Target>(capacity);
    let (result_tx, result_rx) = mpsc::channel::<ScanResult>(capacity);

    let aggregator = tokio::spawn(
        Aggregator::new(output, counters.clone(), config.emit_failures).run(result_rx),
    );

    let mut workers = spawn_workers(config.clone(), chain, target_rx, result_tx);

    let cancel = CancellationToken::new();
    let reporter = config.stats_enabled.then(|| {
        stats::spawn_reporter(
            counters.clone(),
            started,
            config.stats_warmup,
            config.stats_interval,
            cancel.clone(),
        )
    });

    info!(
        senders = config.senders,
        timeout_secs = config.timeout_secs(),
        queue_capacity = capacity,
        "scan started"
    );

    let fed = feed_targets(input, &target_tx).await;
    drop(target_tx);

    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "worker task failed");
        }
    }

    let written = aggregator.await.context("aggregator task failed")?;
    cancel.cancel();
    if let Some(handle) = reporter {
        if let Err(e) = handle.await {
            warn!(error = %e, "stats reporter task failed");
        }
    }

    let source = fed?;
    let end_time = unix_now();
    let summary = RunSummary {
        success_count: counters.success(),
        failure_count: counters.failure(),
        total: counters.total(),
        malformed_count: source.malformed,
        senders: config.senders,
        timeout: config.timeout_secs(),
        start_time,
        end_time,
        cost: end_time - start_time,
    };
    info!(
        total = summary.total,
        success = summary.success_count,
        failure = summary.failure_count,
        written = written.written,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan finished"
    );
    Ok(summary)
}

/// Start `config.senders` workers sharing one dispatch receiver. The result
/// sender is cloned into each worker, so the result queue closes once the last
/// worker exits.
fn spawn_workers(
    config: Arc<ScanConfig>,
    chain: Arc<ProbeChain>,
    targets: mpsc::Receiver<Target>,
    results: mpsc::Sender<ScanResult>,
) -> JoinSet<()> {
    let targets = Arc::new(Mutex::new(targets));
    let mut set = JoinSet::new();
    for id in 0..config.senders {
        let config = config.clone();
        let chain = chain.clone();
        let targets = targets.clone();
        let results = results.clone();
        set.spawn(async move {
            let mut handled = 0u64;
            loop {
                // Only one idle worker waits on the queue at a time.
                let next = targets.lock().await.recv().await;
                let Some(target) = next else { break };

                let outcome = chain
                    .run(&target, &config)
                    .await
                    .map_err(|e| format!("{e:#}"));
                let result = ScanResult {
                    target,
                    timestamp: unix_now(),
                    outcome,
                };
                if results.send(result).await.is_err() {
                    warn!(worker = id, "result queue closed, worker exiting");
                    break;
                }
                handled += 1;
            }
            debug!(worker = id, handled, "worker drained");
        });
    }
    set
}

/// Current UTC time as unix seconds.
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
