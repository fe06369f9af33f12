//! Shared helpers for unit tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use crate::task::{HealthCheck, HealthCheckFrequency, TaskSpec};

/// Serves a fixed response to every connection and returns the URL to probe.
pub async fn serve_http(status: u16, content_type: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            request.extend_from_slice(&buf[..n]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let response = format!(
                    "HTTP/1.1 {} Status\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    content_type,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}/health", addr)
}

/// A URL on a local port with nothing listening.
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/health", addr)
}

pub fn make_spec(name: &str, argv: &[&str], deps: &[&str], check: Option<HealthCheck>) -> TaskSpec {
    TaskSpec {
        name: name.to_string(),
        base_dir: None,
        envs: Vec::new(),
        executable: argv[0].to_string(),
        args: argv[1..].iter().map(|a| a.to_string()).collect(),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        healthcheck: check,
        frequency: HealthCheckFrequency::default(),
    }
}
