//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use resilient_dispatch::{DispatcherConfig, OperationError};

/// An operation that replays a fixed script of outcomes, repeating the last one.
#[allow(dead_code)]
#[derive(Clone)]
pub struct Scripted<T> {
    steps: Arc<Vec<Result<T, OperationError>>>,
    calls: Arc<AtomicU32>,
}

#[allow(dead_code)]
impl<T: Clone + Send + 'static> Scripted<T> {
    pub fn new(steps: Vec<Result<T, OperationError>>) -> Self {
        Self {
            steps: Arc::new(steps),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn always(outcome: Result<T, OperationError>) -> Self {
        Self::new(vec![outcome])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn operation(&self) -> impl FnMut() -> std::future::Ready<Result<T, OperationError>> {
        let steps = self.steps.clone();
        let calls = self.calls.clone();
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) as usize;
            let step = steps
                .get(n)
                .or_else(|| steps.last())
                .cloned()
                .unwrap_or_else(|| Err(OperationError::fatal("empty script")));
            std::future::ready(step)
        }
    }
}

/// Defaults with short delays so paused-clock tests stay readable.
#[allow(dead_code)]
pub fn fast_config() -> DispatcherConfig {
    let mut config = DispatcherConfig::default();
    config.retry.base_delay_ms = 100;
    config.retry.max_delay_ms = 1_000;
    config
}

/// Start a mock backend on an ephemeral port answering every request with `status`.
#[allow(dead_code)]
pub async fn start_status_backend(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = socket.read(&mut buf).await;
                        let reason = match status {
                            200 => "OK",
                            503 => "Service Unavailable",
                            _ => "Unknown",
                        };
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                            status, reason
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}
