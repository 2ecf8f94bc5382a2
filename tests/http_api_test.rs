use dedup_harness::metrics::{TestMetrics, TestStatus};
use dedup_harness::{Harness, HarnessSettings, server};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let harness = Arc::new(Harness::new(HarnessSettings {
            consumers: 3,
            consumer_prefix: "http".to_string(),
            delivery_copies: 2,
            sweep_interval: Duration::from_millis(100),
        }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            server::serve_listener(harness, listener, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        });
        Self { addr, shutdown: Some(tx), handle }
    }

    async fn request(&self, method: &str, path: &str, body: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        let request = format!(
            "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            method,
            path,
            body.len(),
            body
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut raw = Vec::new();
        stream.read_to_end(&mut raw).await.unwrap();
        let raw = String::from_utf8(raw).unwrap();
        let status = raw[9..12].parse().unwrap();
        let body = raw.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
        (status, body)
    }

    async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_control_api_full_run() {
    let server = TestServer::spawn().await;

    let (code, _) = server
        .request("POST", "/api/start", r#"{"num_keys":50,"key_delay":2,"key_ttl":20,"dedup_window":200}"#)
        .await;
    assert_eq!(code, 200);

    let (code, body) = server
        .request("POST", "/api/start", r#"{"num_keys":50,"key_delay":2,"key_ttl":20,"dedup_window":200}"#)
        .await;
    assert_eq!(code, 409);
    assert!(body.contains("already running"));

    let mut metrics = TestMetrics::default();
    for _ in 0..300 {
        let (_, body) = server.request("GET", "/api/metrics", "").await;
        metrics = serde_json::from_str(&body).unwrap();
        if metrics.consumed == 50 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(metrics.generated, 50);
    assert_eq!(metrics.consumed, 50);
    assert_eq!(metrics.consumers.values().sum::<u64>(), 50);
    assert_eq!(metrics.consumers.len(), 3);

    let (code, body) = server.request("GET", "/api/status", "").await;
    assert_eq!(code, 200);
    let status: TestStatus = serde_json::from_str(&body).unwrap();
    assert!(status.is_running);

    let (code, _) = server.request("POST", "/api/stop", "").await;
    assert_eq!(code, 200);
    let (code, _) = server.request("POST", "/api/stop", "").await;
    assert_eq!(code, 200);

    let (_, body) = server.request("GET", "/api/status", "").await;
    let status: TestStatus = serde_json::from_str(&body).unwrap();
    assert!(!status.is_running);
    assert_eq!(status.consumed, 50);

    server.shutdown().await;
}

#[tokio::test]
async fn test_control_api_rejects_bad_requests() {
    let server = TestServer::spawn().await;

    let (code, body) = server
        .request("POST", "/api/start", r#"{"num_keys":10,"key_delay":1,"key_ttl":10,"dedup_window":-1}"#)
        .await;
    assert_eq!(code, 400);
    assert!(body.contains("dedup_window"));

    let (code, _) = server.request("POST", "/api/start", "{").await;
    assert_eq!(code, 400);

    let (code, _) = server.request("GET", "/api/start", "").await;
    assert_eq!(code, 405);

    let (_, body) = server.request("GET", "/api/status", "").await;
    let status: TestStatus = serde_json::from_str(&body).unwrap();
    assert!(!status.is_running);

    server.shutdown().await;
}
