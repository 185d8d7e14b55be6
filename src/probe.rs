use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tracing::{debug, trace};
use x509_parser::prelude::*;

use crate::config::ScanConfig;
use crate::types::{Component, ProbeOutcome, Target, TlsHandshakeSummary};

/// One strategy for eliciting a banner from a target.
///
/// Every attempt opens its own connection; nothing is shared between probes.
#[async_trait]
pub trait Probe: Send + Sync {
    fn component(&self) -> Component;

    async fn attempt(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome>;
}

/// Ordered list of probes tried until one returns data.
pub struct ProbeChain {
    probes: Vec<Box<dyn Probe>>,
}

impl ProbeChain {
    pub fn new(probes: Vec<Box<dyn Probe>>) -> Self {
        Self { probes }
    }

    /// Basic read, then either the custom payload probe or TLS, then plain HTTP.
    pub fn from_config(config: &ScanConfig) -> Result<Self> {
        let secondary: Box<dyn Probe> = match &config.payload {
            Some(payload) => Box::new(DataProbe::new(payload.clone())),
            None => Box::new(TlsProbe::new()?),
        };
        Ok(Self::new(vec![Box::new(BasicProbe), secondary, Box::new(HttpProbe)]))
    }

    pub fn components(&self) -> Vec<Component> {
        self.probes.iter().map(|p| p.component()).collect()
    }

    /// Run the probes in order. On total failure the error of the last probe
    /// is returned.
    pub async fn run(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome> {
        let mut last_err = anyhow!("no probes configured");
        for probe in &self.probes {
            match probe.attempt(target, config).await {
                Ok(outcome) => {
                    trace!(addr = %target, component = %outcome.component, "probe succeeded");
                    return Ok(outcome);
                }
                Err(e) => {
                    trace!(addr = %target, component = %probe.component(), error = %e, "probe failed");
                    last_err = e.context(format!("{} probe", probe.component()));
                }
            }
        }
        Err(last_err)
    }
}

/// Connect and read whatever the service volunteers.
pub struct BasicProbe;

#[async_trait]
impl Probe for BasicProbe {
    fn component(&self) -> Component {
        Component::Basic
    }

    async fn attempt(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome> {
        let addr = target.address();
        let mut stream = dial(&addr, config.timeout).await?;
        let banner = read_banner(&mut stream, config.max_read_length, config.timeout).await?;
        Ok(plain_outcome(Component::Basic, banner))
    }
}

/// Connect, send the configured payload and read the reply.
pub struct DataProbe {
    payload: Arc<[u8]>,
}

impl DataProbe {
    pub fn new(payload: Arc<[u8]>) -> Self {
        Self { payload }
    }
}

#[async_trait]
impl Probe for DataProbe {
    fn component(&self) -> Component {
        Component::Data
    }

    async fn attempt(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome> {
        let addr = target.address();
        let mut stream = dial(&addr, config.timeout).await?;
        send(&mut stream, &self.payload, config.timeout).await?;
        let banner = read_banner(&mut stream, config.max_read_length, config.timeout).await?;
        Ok(plain_outcome(Component::Data, banner))
    }
}

/// Send a bare `GET /` over plain TCP.
pub struct HttpProbe;

#[async_trait]
impl Probe for HttpProbe {
    fn component(&self) -> Component {
        Component::Http
    }

    async fn attempt(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome> {
        let addr = target.address();
        let mut stream = dial(&addr, config.timeout).await?;
        send(&mut stream, &http_request(target), config.timeout).await?;
        let banner = read_banner(&mut stream, config.max_read_length, config.timeout).await?;
        Ok(plain_outcome(Component::Http, banner))
    }
}

/// Negotiate TLS without verifying the peer, then send a bare `GET /`.
pub struct TlsProbe {
    connector: tokio_native_tls::TlsConnector,
}

impl TlsProbe {
    pub fn new() -> Result<Self> {
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .context("failed to initialize TLS connector")?;
        Ok(Self {
            connector: tokio_native_tls::TlsConnector::from(connector),
        })
    }
}

#[async_trait]
impl Probe for TlsProbe {
    fn component(&self) -> Component {
        Component::Tls
    }

    async fn attempt(&self, target: &Target, config: &ScanConfig) -> Result<ProbeOutcome> {
        let addr = target.address();
        let tcp = dial(&addr, config.timeout).await?;
        let mut tls = time::timeout(config.timeout, self.connector.connect(&target.host, tcp))
            .await
            .map_err(|_| anyhow!("tls handshake with {addr}: timed out"))?
            .with_context(|| format!("tls handshake with {addr}"))?;

        send(&mut tls, &http_request(target), config.timeout).await?;
        let banner = read_banner(&mut tls, config.max_read_length, config.timeout).await?;

        let summary = if config.capture_tls {
            match summarize_handshake(tls.get_ref()) {
                Ok(s) => Some(s),
                Err(e) => {
                    debug!(addr = %target, error = %e, "could not summarize TLS handshake");
                    None
                }
            }
        } else {
            None
        };

        Ok(ProbeOutcome {
            component: Component::Tls,
            banner,
            is_tls: true,
            tls: summary,
        })
    }
}

fn summarize_handshake<S>(stream: &native_tls::TlsStream<S>) -> Result<TlsHandshakeSummary>
where
    S: std::io::Read + std::io::Write,
{
    let cert = stream
        .peer_certificate()
        .context("read peer certificate")?
        .ok_or_else(|| anyhow!("server presented no certificate"))?;
    let der = cert.to_der().context("encode peer certificate")?;
    let (_, parsed) =
        parse_x509_certificate(&der).map_err(|e| anyhow!("parse peer certificate: {e}"))?;

    let mut dns_names = Vec::new();
    let mut ip_addresses = Vec::new();
    if let Ok(Some(ext)) = parsed.subject_alternative_name() {
        for name in ext.value.general_names.iter() {
            match name {
                GeneralName::DNSName(d) => dns_names.push(d.to_string()),
                GeneralName::IPAddress(raw) => {
                    if let Some(ip) = ip_from_bytes(raw) {
                        ip_addresses.push(ip.to_string());
                    }
                }
                _ => {}
            }
        }
    }

    Ok(TlsHandshakeSummary {
        subject: parsed.subject().to_string(),
        issuer: parsed.issuer().to_string(),
        serial: parsed.raw_serial_as_string(),
        not_before: parsed.validity().not_before.timestamp(),
        not_after: parsed.validity().not_after.timestamp(),
        dns_names,
        ip_addresses,
        der_len: der.len(),
    })
}

fn ip_from_bytes(raw: &[u8]) -> Option<IpAddr> {
    if let Ok(v4) = <[u8; 4]>::try_from(raw) {
        return Some(IpAddr::V4(Ipv4Addr::from(v4)));
    }
    if let Ok(v6) = <[u8; 16]>::try_from(raw) {
        return Some(IpAddr::V6(Ipv6Addr::from(v6)));
    }
    None
}

fn plain_outcome(component: Component, banner: Vec<u8>) -> ProbeOutcome {
    ProbeOutcome {
        component,
        banner,
        is_tls: false,
        tls: None,
    }
}

fn http_request(target: &Target) -> Vec<u8> {
    format!("GET / HTTP/1.1\r\nHost: {}\r\n\r\n", target.address()).into_bytes()
}

async fn dial(addr: &str, timeout: Duration) -> Result<TcpStream> {
    time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| anyhow!("connect {addr}: timed out"))?
        .with_context(|| format!("connect {addr}"))
}

async fn send<S>(stream: &mut S, bytes: &[u8], timeout: Duration) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    time::timeout(timeout, async {
        stream.write_all(bytes).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| anyhow!("write: timed out"))?
    .context("write")
}

/// Single read of at most `max` bytes. Zero bytes (peer closed) is an error.
async fn read_banner<S>(stream: &mut S, max: usize, timeout: Duration) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; max];
    let n = time::timeout(timeout, stream.read(&mut buf))
        .await
        .map_err(|_| anyhow!("read: timed out"))?
        .context("read")?;
    if n == 0 {
        bail!("read: connection closed before any data was received");
    }
    buf.truncate(n);
    Ok(buf)
}
