use std::time::Duration;

use banner_grab_rs::config::ScanConfig;
use banner_grab_rs::scanner::run_scan;
use banner_grab_rs::types::RunSummary;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Service that greets every connection with a fixed banner.
async fn greeting_server(banner: &'static [u8]) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = sock.write_all(banner).await;
            });
        }
    });
    addr.to_string()
}

async fn refused_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().to_string()
}

fn quick_config(senders: usize) -> ScanConfig {
    ScanConfig::default()
        .with_senders(senders)
        .with_timeout(Duration::from_millis(300))
        .with_max_read_length(128)
        .with_stats(false)
}

async fn scan(config: ScanConfig, input: String) -> (RunSummary, Vec<Value>) {
    let (writer, mut reader) = tokio::io::duplex(8 * 1024);
    let collector = tokio::spawn(async move {
        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        out
    });
    let summary = run_scan(config, input.as_bytes(), writer).await.unwrap();
    let out = collector.await.unwrap();
    let lines = out
        .lines()
        .map(|l| serde_json::from_str::<Value>(l).expect("each line is a JSON object"))
        .collect();
    (summary, lines)
}

#[tokio::test]
async fn fewer_targets_than_workers() {
    let addr = greeting_server(b"220 ftp ready\r\n").await;
    let input = format!("{addr}\n{addr}\n{addr}\n");
    let (summary, lines) = scan(quick_config(16), input).await;

    assert_eq!(summary.total, 3);
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(summary.senders, 16);
    assert_eq!(lines.len(), 3);
    for v in &lines {
        assert_eq!(v["data"]["component"], "basic");
        assert_eq!(v["data"]["banner"], "220 ftp ready\r\n");
        assert_eq!(v["ip"], "127.0.0.1");
    }
}

#[tokio::test]
async fn more_targets_than_workers() {
    let addr = greeting_server(b"SSH-2.0-test\r\n").await;
    let input: String = (0..50).map(|_| format!("{addr}\n")).collect();
    let (summary, lines) = scan(quick_config(3), input).await;

    assert_eq!(summary.total, 50);
    assert_eq!(summary.success_count + summary.failure_count, summary.total);
    assert_eq!(lines.len(), 50);
}

#[tokio::test]
async fn failures_hidden_unless_emitted() {
    let ok = greeting_server(b"+OK\r\n").await;
    let bad = refused_addr().await;
    let input = format!("{ok}\n{bad}\n");

    let (summary, lines) = scan(quick_config(4), input.clone()).await;
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.total, 2);
    assert_eq!(lines.len(), 1);
    assert!(lines[0].get("error").is_none());

    let (summary, lines) = scan(quick_config(4).with_emit_failures(true), input).await;
    assert_eq!(summary.total, 2);
    assert_eq!(lines.len(), 2);
    let failed: Vec<&Value> = lines.iter().filter(|v| v.get("error").is_some()).collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].get("data").is_none());
    assert!(!failed[0]["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_lines_are_skipped_and_counted() {
    let addr = greeting_server(b"hello\n").await;
    let input = format!("not-a-target\n\n{addr}\n10.0.0.1:notaport\n");
    let (summary, lines) = scan(quick_config(2), input).await;

    assert_eq!(summary.total, 1);
    assert_eq!(summary.malformed_count, 2);
    assert_eq!(lines.len(), 1);
}

#[tokio::test]
async fn banner_never_exceeds_max_length() {
    let addr = greeting_server(&[b'Z'; 300]).await;
    let (_, lines) = scan(quick_config(1).with_max_read_length(32), format!("{addr}\n")).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["data"]["banner_bytes"].as_array().unwrap().len(), 32);
}

#[tokio::test]
async fn summary_timing_is_consistent() {
    let (summary, lines) = scan(quick_config(2), String::new()).await;
    assert!(lines.is_empty());
    assert_eq!(summary.total, 0);
    assert!(summary.end_time >= summary.start_time);
    assert_eq!(summary.cost, summary.end_time - summary.start_time);
}

#[tokio::test]
async fn stats_reporter_does_not_block_shutdown() {
    let addr = greeting_server(b"hi\n").await;
    let config = quick_config(2)
        .with_stats(true)
        .with_stats_interval(Duration::from_millis(10));
    let (summary, _) = scan(config, format!("{addr}\n{addr}\n")).await;
    assert_eq!(summary.total, 2);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_scanning() {
    let (writer, _reader) = tokio::io::duplex(64);
    let res = run_scan(quick_config(0), &b"127.0.0.1:1\n"[..], writer).await;
    assert!(res.is_err());
}
