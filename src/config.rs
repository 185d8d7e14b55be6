use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SENDERS: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_MAX_READ_LENGTH: usize = 65535;
pub const DEFAULT_QUEUE_MULTIPLIER: usize = 5;
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

const MAX_SENDERS: usize = 50_000;

/// Immutable run configuration, built once and shared by every worker.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Number of concurrent workers.
    pub senders: usize,
    /// Queue capacity is `senders * queue_multiplier`.
    pub queue_multiplier: usize,
    /// Bound applied separately to each connect, handshake, write and read.
    pub timeout: Duration,
    /// Banners are truncated to this many bytes.
    pub max_read_length: usize,
    /// Emit failed targets in the output stream.
    pub emit_failures: bool,
    /// Attach a peer certificate summary to TLS results.
    pub capture_tls: bool,
    /// When set, the TLS probe is replaced by a probe that sends these bytes.
    pub payload: Option<Arc<[u8]>>,
    pub stats_enabled: bool,
    pub stats_warmup: Duration,
    pub stats_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            senders: DEFAULT_SENDERS,
            queue_multiplier: DEFAULT_QUEUE_MULTIPLIER,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_read_length: DEFAULT_MAX_READ_LENGTH,
            emit_failures: false,
            capture_tls: false,
            payload: None,
            stats_enabled: true,
            stats_warmup: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
            stats_interval: Duration::from_secs(DEFAULT_STATS_INTERVAL_SECS),
        }
    }
}

impl ScanConfig {
    pub fn with_senders(mut self, senders: usize) -> Self {
        self.senders = senders;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_read_length(mut self, len: usize) -> Self {
        self.max_read_length = len;
        self
    }

    pub fn with_emit_failures(mut self, emit: bool) -> Self {
        self.emit_failures = emit;
        self
    }

    pub fn with_capture_tls(mut self, capture: bool) -> Self {
        self.capture_tls = capture;
        self
    }

    pub fn with_payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload.map(Arc::from);
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_warmup = interval;
        self.stats_interval = interval;
        self
    }

    pub fn with_queue_multiplier(mut self, multiplier: usize) -> Self {
        self.queue_multiplier = multiplier;
        self
    }

    /// Capacity shared by the dispatch and result queues.
    pub fn queue_capacity(&self) -> usize {
        self.senders.saturating_mul(self.queue_multiplier).max(1)
    }

    /// Timeout in whole seconds, as reported in the run summary.
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    pub fn validate(&self) -> Result<()> {
        if self.senders == 0 || self.senders > MAX_SENDERS {
            bail!("senders must be between 1 and {MAX_SENDERS} (got {})", self.senders);
        }
        if self.queue_multiplier == 0 {
            bail!("queue multiplier must be at least 1");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be greater than zero");
        }
        if self.max_read_length == 0 {
            bail!("max read length must be at least 1 byte");
        }
        if self.stats_enabled && self.stats_interval.is_zero() {
            bail!("stats interval must be greater than zero");
        }
        if let Some(p) = &self.payload {
            if p.is_empty() {
                bail!("payload file is empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_cli_surface() {
        let c = ScanConfig::default();
        assert_eq!(c.senders, 500);
        assert_eq!(c.timeout_secs(), 10);
        assert_eq!(c.max_read_length, 65535);
        assert!(!c.emit_failures);
        assert!(!c.capture_tls);
        assert!(c.payload.is_none());
        assert_eq!(c.queue_capacity(), 2500);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn invalid_values_rejected() {
        assert!(ScanConfig::default().with_senders(0).validate().is_err());
        assert!(ScanConfig::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
        assert!(ScanConfig::default()
            .with_max_read_length(0)
            .validate()
            .is_err());
        assert!(ScanConfig::default()
            .with_payload(Some(Vec::new()))
            .validate()
            .is_err());
    }
}
