//! End-to-end tests over a real TCP socket.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use business_processor::http::response::MessageBody;
use business_processor::server::ACKNOWLEDGEMENT;
use business_processor::{ProcessorConfig, Stopped, Supervisor, SupervisorError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

struct Harness {
    addr: SocketAddr,
    run: JoinHandle<Result<Stopped, SupervisorError>>,
    completed: Box<dyn Fn() -> u64 + Send>,
}

async fn start(benchmark_delay_ms: u64) -> Harness {
    start_with_workers(2, benchmark_delay_ms).await
}

async fn start_with_workers(workers: usize, benchmark_delay_ms: u64) -> Harness {
    let config = ProcessorConfig {
        port: 0,
        workers: Some(workers),
        benchmark_delay_ms,
        shutdown_grace_secs: 10,
        ..ProcessorConfig::default()
    };
    let mut supervisor = Supervisor::new(config);
    supervisor.mount_standard_endpoints().unwrap();
    let settings = supervisor.benchmark_settings().clone();

    let running = supervisor.bind().await.unwrap();
    let addr = running.local_addr();
    Harness {
        addr,
        run: tokio::spawn(running.run()),
        completed: Box::new(move || settings.completed()),
    }
}

/// Sends one `Connection: close` request and returns (status, message).
async fn post(addr: SocketAddr, path: &str, body: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let text = String::from_utf8(raw).unwrap();

    let status = text[9..12].parse().unwrap();
    let (_, json) = text.split_once("\r\n\r\n").unwrap();
    let body: MessageBody = serde_json::from_str(json).unwrap();
    (status, body.message)
}

async fn wait_for(mut done: impl FnMut() -> bool, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    done()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn benchmark_is_acknowledged_before_processing() {
    let h = start(300).await;

    let started = Instant::now();
    let (status, message) = post(h.addr, "/benchmark", r#"{"value": 7}"#).await;
    assert_eq!(status, 200);
    assert_eq!(message, ACKNOWLEDGEMENT);
    assert!(started.elapsed() < Duration::from_millis(300));
    assert_eq!((h.completed)(), 0);

    assert!(wait_for(|| (h.completed)() == 1, Duration::from_secs(5)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn consecutive_benchmarks_both_complete() {
    let h = start(20).await;
    for value in [1, 2] {
        let (status, _) = post(h.addr, "/benchmark", &format!(r#"{{"value": {value}}}"#)).await;
        assert_eq!(status, 200);
    }
    assert!(wait_for(|| (h.completed)() == 2, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn malformed_body_is_rejected_and_not_processed() {
    let h = start(0).await;
    for body in [r#"{"value": "seven"}"#, r#"{"value": 1, "extra": true}"#, "not json"] {
        let (status, _) = post(h.addr, "/benchmark", body).await;
        assert_eq!(status, 400, "body {body:?}");
    }
    let (status, _) = post(h.addr, "/shutdown", r#"{"urgency": "LATER", "reason": "x"}"#).await;
    assert_eq!(status, 400);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!((h.completed)(), 0);
    assert!(!h.run.is_finished());
}

#[tokio::test]
async fn unknown_path_is_not_found() {
    let h = start(0).await;
    let (status, message) = post(h.addr, "/nowhere", "{}").await;
    assert_eq!(status, 404);
    assert!(message.contains("/nowhere"));
}

#[tokio::test]
async fn empty_post_body_is_bad_request() {
    let h = start(0).await;
    let (status, _) = post(h.addr, "/benchmark", "").await;
    assert_eq!(status, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn graceful_shutdown_drains_queued_work() {
    let h = start(200).await;
    let (status, _) = post(h.addr, "/benchmark", r#"{"value": 1}"#).await;
    assert_eq!(status, 200);

    let (status, message) = post(
        h.addr,
        "/shutdown",
        r#"{"urgency": "GRACEFUL", "reason": "maintenance"}"#,
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(message, ACKNOWLEDGEMENT);

    let stopped = tokio::time::timeout(Duration::from_secs(5), h.run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(
        stopped,
        Stopped::Graceful {
            reason: "maintenance".into()
        }
    );
    assert_eq!((h.completed)(), 1);
    assert!(TcpStream::connect(h.addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_shutdown_returns_at_once() {
    let h = start(1_000).await;
    let (status, _) = post(h.addr, "/benchmark", r#"{"value": 1}"#).await;
    assert_eq!(status, 200);

    let (status, _) = post(
        h.addr,
        "/shutdown",
        r#"{"urgency": "IMMEDIATE", "reason": "test"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let stopped = tokio::time::timeout(Duration::from_secs(2), h.run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(stopped, Stopped::Immediate { ref reason } if reason == "test"));
    assert_eq!((h.completed)(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn immediate_shutdown_is_not_queued_behind_busy_workers() {
    let h = start_with_workers(1, 1_500).await;
    for value in [1, 2] {
        let (status, _) = post(h.addr, "/benchmark", &format!(r#"{{"value": {value}}}"#)).await;
        assert_eq!(status, 200);
    }

    let started = Instant::now();
    let (status, _) = post(
        h.addr,
        "/shutdown",
        r#"{"urgency": "IMMEDIATE", "reason": "backlog"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let stopped = tokio::time::timeout(Duration::from_secs(1), h.run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(stopped, Stopped::Immediate { ref reason } if reason == "backlog"));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!((h.completed)(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keep_alive_benchmarks_on_one_connection() {
    let h = start(10).await;
    let body = r#"{"value": 3}"#;
    let first = format!(
        "POST /benchmark HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let second = format!(
        "POST /benchmark HTTP/1.1\r\nHost: localhost\r\nContent-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    stream.write_all(first.as_bytes()).await.unwrap();
    stream.write_all(second.as_bytes()).await.unwrap();

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .unwrap()
        .unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert_eq!(text.matches("HTTP/1.1 200 OK").count(), 2, "{text}");

    assert!(wait_for(|| (h.completed)() == 2, Duration::from_secs(5)).await);
}
