//! Port readiness.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Interval between connection attempts.
pub const PORT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default time to wait for a port to open.
pub const DEFAULT_PORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Waits until a TCP connection to `host:port` succeeds.
pub async fn wait_tcp_port(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let remaining = timeout.saturating_sub(start.elapsed());
        let connect = TcpStream::connect((host, port));

        let budget = remaining.max(PORT_POLL_INTERVAL);
        if let Ok(Ok(_stream)) = tokio::time::timeout(budget, connect).await {
            debug!(host, port, attempts, "Port is open");
            return Ok(());
        }

        if start.elapsed() >= timeout {
            return Err(OrchestratorError::timeout(format!("port {host}:{port} to open")));
        }
        tokio::time::sleep(PORT_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        wait_tcp_port("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_port_times_out() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = wait_tcp_port("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout { .. }));
    }
}
