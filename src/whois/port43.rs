//! Raw WHOIS wire protocol (RFC 3912)

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{LookupError, Result};

pub const WHOIS_PORT: u16 = 43;

/// Responses are cut off past this size
pub const MAX_WHOIS_BYTES: u64 = 1024 * 1024;

/// Connect, send one query line, read until the server closes
#[derive(Debug, Clone)]
pub struct Port43Client {
    timeout: Duration,
    port: u16,
}

impl Port43Client {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            port: WHOIS_PORT,
        }
    }

    /// Talk to a non-standard port; used against local test servers
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub async fn query_raw(&self, query: &str, server: &str) -> Result<String> {
        let addr = format!("{}:{}", server, self.port);
        let secs = self.timeout.as_secs();

        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| LookupError::timeout(format!("WHOIS connect to {server}"), secs))?
            .map_err(|e| LookupError::upstream(server, format!("WHOIS connect failed: {e}")))?;

        timeout(self.timeout, stream.write_all(format!("{query}\r\n").as_bytes()))
            .await
            .map_err(|_| LookupError::timeout(format!("WHOIS write to {server}"), secs))?
            .map_err(|e| LookupError::upstream(server, format!("WHOIS write failed: {e}")))?;

        let mut buf = Vec::new();
        let mut limited = stream.take(MAX_WHOIS_BYTES);
        timeout(self.timeout, limited.read_to_end(&mut buf))
            .await
            .map_err(|_| LookupError::timeout(format!("WHOIS read from {server}"), secs))?
            .map_err(|e| LookupError::upstream(server, format!("WHOIS read failed: {e}")))?;

        let text = String::from_utf8_lossy(&buf).to_string();
        if text.trim().is_empty() {
            return Err(LookupError::upstream(server, "empty WHOIS response"));
        }
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A local port 43 stand-in: replies with `respond(query)` and counts connections
    pub struct ScriptedWhois {
        pub port: u16,
        pub connections: Arc<AtomicUsize>,
    }

    impl ScriptedWhois {
        pub fn connections(&self) -> usize {
            self.connections.load(Ordering::SeqCst)
        }
    }

    pub async fn spawn<F>(respond: F) -> ScriptedWhois
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);
        let respond = Arc::new(respond);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let respond = Arc::clone(&respond);
                tokio::spawn(async move {
                    let mut line = Vec::new();
                    let mut byte = [0u8; 1];
                    while socket.read(&mut byte).await.unwrap_or(0) == 1 {
                        if byte[0] == b'\n' {
                            break;
                        }
                        line.push(byte[0]);
                    }
                    let query = String::from_utf8_lossy(&line).trim().to_string();
                    let _ = socket.write_all(respond(&query).as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        ScriptedWhois { port, connections }
    }

    /// Accepts connections and holds them open without ever answering
    pub async fn spawn_silent() -> ScriptedWhois {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&connections);

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        ScriptedWhois { port, connections }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_sends_crlf_line() {
        let server = test_server::spawn(|query| format!("you asked for {query}\n")).await;
        let client = Port43Client::new(Duration::from_secs(5)).with_port(server.port);

        let text = client.query_raw("example.com", "127.0.0.1").await.unwrap();
        assert_eq!(text, "you asked for example.com\n");
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_blank_response_is_error() {
        let server = test_server::spawn(|_| "  \r\n".to_string()).await;
        let client = Port43Client::new(Duration::from_secs(5)).with_port(server.port);

        let err = client.query_raw("example.com", "127.0.0.1").await.unwrap_err();
        assert!(err.to_string().contains("empty WHOIS response"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let server = test_server::spawn_silent().await;
        let client = Port43Client::new(Duration::from_secs(1)).with_port(server.port);
        let started = std::time::Instant::now();
        let err = client.query_raw("example.com", "127.0.0.1").await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            LookupError::Timeout { operation, timeout_secs } => {
                assert_eq!(operation, "WHOIS read from 127.0.0.1");
                assert_eq!(timeout_secs, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(server.connections(), 1);
    }

    #[tokio::test]
    async fn test_oversized_response_is_truncated() {
        let server = test_server::spawn(|_| "x".repeat(2 * MAX_WHOIS_BYTES as usize)).await;
        let client = Port43Client::new(Duration::from_secs(5)).with_port(server.port);

        let text = client.query_raw("example.com", "127.0.0.1").await.unwrap();
        assert_eq!(text.len() as u64, MAX_WHOIS_BYTES);
    }

    #[tokio::test]
    async fn test_connection_refused() {
        // bind then drop to get a port nobody listens on
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = Port43Client::new(Duration::from_secs(2)).with_port(port);
        let err = client.query_raw("example.com", "127.0.0.1").await.unwrap_err();
        assert!(err.is_retryable());
    }
}
