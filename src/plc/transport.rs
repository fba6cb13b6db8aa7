//! Wire transport seam for [`crate::plc::client::Mc3eClient`].
//!
//! Modeled as a trait so unit tests can substitute an in-memory transport
//! instead of a live PLC socket, mirroring the teacher's `ProtocolAdapter`
//! trait seam in `adapters/mod.rs`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

#[async_trait]
pub trait PlcTransport: Send + Sync {
    async fn connect(host: &str, port: u16, connect_timeout: Duration) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Sends a full MC 3E ASCII frame and returns the raw response bytes.
    async fn request(&mut self, frame: &[u8], read_timeout: Duration) -> std::io::Result<Vec<u8>>;

    async fn close(&mut self);
}

/// Real TCP transport used in production.
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl PlcTransport for TcpTransport {
    async fn connect(host: &str, port: u16, connect_timeout: Duration) -> std::io::Result<Self> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timeout"))??;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }

    async fn request(&mut self, frame: &[u8], read_timeout: Duration) -> std::io::Result<Vec<u8>> {
        self.stream.write_all(frame).await?;
        let mut buf = vec![0u8; 2048];
        let n = timeout(read_timeout, self.stream.read(&mut buf))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "read timeout"))??;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-read",
            ));
        }
        buf.truncate(n);
        Ok(buf)
    }

    async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// In-memory transport for unit tests: replays a queue of canned
    /// responses (or errors) instead of touching the network.
    pub struct MockTransport {
        responses: std::sync::Arc<Mutex<VecDeque<std::io::Result<Vec<u8>>>>>,
    }

    impl MockTransport {
        pub fn new(responses: Vec<std::io::Result<Vec<u8>>>) -> Self {
            Self {
                responses: std::sync::Arc::new(Mutex::new(responses.into())),
            }
        }
    }

    #[async_trait]
    impl PlcTransport for MockTransport {
        async fn connect(_host: &str, _port: u16, _connect_timeout: Duration) -> std::io::Result<Self> {
            Ok(Self::new(vec![]))
        }

        async fn request(&mut self, _frame: &[u8], _read_timeout: Duration) -> std::io::Result<Vec<u8>> {
            let mut q = self.responses.lock().await;
            q.pop_front().unwrap_or_else(|| {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "no more mock responses"))
            })
        }

        async fn close(&mut self) {}
    }
}
