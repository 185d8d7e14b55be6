use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// One `host:port` pair read from the target list.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub host: String,
    pub port: String,
}

impl Target {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// Dialable address. IPv6 literals are bracketed.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Which probe produced a banner.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    Basic,
    Tls,
    Data,
    Http,
}

impl Component {
    pub fn as_str(&self) -> &'static str {
        match self {
            Component::Basic => "basic",
            Component::Tls => "tls",
            Component::Data => "data",
            Component::Http => "http",
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Peer certificate details captured after a TLS handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct TlsHandshakeSummary {
    pub subject: String,
    pub issuer: String,
    pub serial: String,
    pub not_before: i64,
    pub not_after: i64,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<String>,
    pub der_len: usize,
}

/// Data returned by the first probe that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub component: Component,
    pub banner: Vec<u8>,
    pub is_tls: bool,
    pub tls: Option<TlsHandshakeSummary>,
}

/// Result for a single target. `outcome` holds either the banner or the
/// error text of the last probe attempted.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub target: Target,
    pub timestamp: i64,
    pub outcome: Result<ProbeOutcome, String>,
}

impl ScanResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn record(&self) -> ResultRecord<'_> {
        let (data, error) = match &self.outcome {
            Ok(o) => (
                Some(DataRecord {
                    banner: String::from_utf8_lossy(&o.banner).into_owned(),
                    banner_bytes: &o.banner,
                    is_tls: o.is_tls,
                    tls: o.tls.as_ref(),
                    component: o.component,
                }),
                None,
            ),
            Err(e) => (None, Some(e.as_str())),
        };
        ResultRecord {
            ip: &self.target.host,
            port: &self.target.port,
            timestamp: self.timestamp,
            data,
            error,
        }
    }
}

/// Wire shape of one output line.
#[derive(Serialize, Debug)]
pub struct ResultRecord<'a> {
    pub ip: &'a str,
    pub port: &'a str,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<DataRecord<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'a str>,
}

#[derive(Serialize, Debug)]
pub struct DataRecord<'a> {
    pub banner: String,
    pub banner_bytes: &'a [u8],
    pub is_tls: bool,
    pub tls: Option<&'a TlsHandshakeSummary>,
    pub component: Component,
}

/// Counters shared between the aggregator (writer) and the stats reporter (reader).
#[derive(Clone, Debug, Default)]
pub struct RunCounters {
    pub success: Arc<AtomicU64>,
    pub failure: Arc<AtomicU64>,
    pub total: Arc<AtomicU64>,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Success/failure is bumped before total so a concurrent reader never
    /// observes `total > success + failure`.
    pub fn record(&self, success: bool) {
        if success {
            self.success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Release);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn failure(&self) -> u64 {
        self.failure.load(Ordering::Relaxed)
    }
}

/// Final record printed once the pipeline has drained.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub success_count: u64,
    pub failure_count: u64,
    pub total: u64,
    pub malformed_count: u64,
    pub senders: usize,
    pub timeout: u64,
    pub start_time: i64,
    pub end_time: i64,
    pub cost: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipv6_address_is_bracketed() {
        assert_eq!(Target::new("::1", "22").address(), "[::1]:22");
        assert_eq!(Target::new("example.com", "80").address(), "example.com:80");
    }

    #[test]
    fn success_record_has_data_and_no_error() {
        let res = ScanResult {
            target: Target::new("10.0.0.1", "22"),
            timestamp: 42,
            outcome: Ok(ProbeOutcome {
                component: Component::Basic,
                banner: b"SSH-2.0-x\r\n".to_vec(),
                is_tls: false,
                tls: None,
            }),
        };
        let v = serde_json::to_value(res.record()).unwrap();
        assert_eq!(v["ip"], "10.0.0.1");
        assert_eq!(v["port"], "22");
        assert_eq!(v["timestamp"], 42);
        assert_eq!(v["data"]["component"], "basic");
        assert_eq!(v["data"]["banner"], "SSH-2.0-x\r\n");
        assert_eq!(v["data"]["banner_bytes"][0], 83);
        assert_eq!(v["data"]["is_tls"], false);
        assert!(v.get("error").is_none());
    }

    #[test]
    fn failure_record_has_error_only() {
        let res = ScanResult {
            target: Target::new("10.0.0.2", "80"),
            timestamp: 1,
            outcome: Err("connection refused".into()),
        };
        let v = serde_json::to_value(res.record()).unwrap();
        assert_eq!(v["error"], "connection refused");
        assert!(v.get("data").is_none());
    }

    #[test]
    fn counters_keep_total_consistent() {
        let c = RunCounters::new();
        c.record(true);
        c.record(false);
        c.record(false);
        assert_eq!(c.total(), 3);
        assert_eq!(c.success() + c.failure(), c.total());
    }
}
