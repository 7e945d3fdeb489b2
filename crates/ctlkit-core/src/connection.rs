//! Shared line-oriented IP transport
//!
//! One [`IpConnection`] is typically shared (behind an `Arc`) by a root controller and all
//! of its sub-controllers. The stream sits in a `tokio::sync::Mutex` that [`send_query`]
//! holds from the write until the response line has been read, so a request and its
//! response are never split by another task's request.
//!
//! [`send_query`]: IpConnection::send_query

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::{CtlError, CtlResult};

/// Any bidirectional byte stream the connection can run over.
///
/// Covers `TcpStream` as well as `tokio::io::DuplexStream` in tests.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

/// Type-erased boxed stream.
pub type DynStream = Box<dyn StreamIo>;

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    25565
}

fn default_timeout_ms() -> u64 {
    2000
}

/// Where to connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpConnectionSettings {
    /// Host address.
    #[serde(default = "default_ip")]
    pub ip: String,
    /// TCP port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on waiting for a response line.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for IpConnectionSettings {
    fn default() -> Self {
        Self {
            ip: default_ip(),
            port: default_port(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl IpConnectionSettings {
    /// Settings for `ip:port` with the default timeout.
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }
}

/// A shared, lazily opened stream connection.
pub struct IpConnection {
    stream: Mutex<Option<BufReader<DynStream>>>,
    timeout: parking_lot::Mutex<Duration>,
}

impl std::fmt::Debug for IpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpConnection").finish_non_exhaustive()
    }
}

impl Default for IpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl IpConnection {
    /// A connection that is not yet open.
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(None),
            timeout: parking_lot::Mutex::new(Duration::from_millis(default_timeout_ms())),
        }
    }

    /// Open a TCP connection, replacing any current stream.
    pub async fn connect(&self, settings: &IpConnectionSettings) -> CtlResult<()> {
        let addr = format!("{}:{}", settings.ip, settings.port);
        let stream = TcpStream::connect(&addr).await?;
        tracing::info!(%addr, "connected");
        *self.timeout.lock() = Duration::from_millis(settings.timeout_ms);
        self.attach(Box::new(stream)).await;
        Ok(())
    }

    /// Use an already open stream, replacing any current one.
    pub async fn attach(&self, stream: DynStream) {
        *self.stream.lock().await = Some(BufReader::new(stream));
    }

    /// Whether a stream is attached.
    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Write `message` without waiting for a response.
    pub async fn send_command(&self, message: &str) -> CtlResult<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(not_connected)?;
        tracing::debug!(message = message.trim_end(), "send");
        stream.get_mut().write_all(message.as_bytes()).await?;
        stream.get_mut().flush().await?;
        Ok(())
    }

    /// Write `message` and read one response line, as one critical section.
    ///
    /// The returned line has its line terminator stripped. A missing response within the
    /// configured timeout closes the connection and reports it as disconnected.
    pub async fn send_query(&self, message: &str) -> CtlResult<String> {
        let timeout = *self.timeout.lock();
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(not_connected)?;

        tracing::debug!(message = message.trim_end(), "query");
        stream.get_mut().write_all(message.as_bytes()).await?;
        stream.get_mut().flush().await?;

        let mut line = String::new();
        // A late or partial reply would answer the next request, so the stream is dropped.
        let outcome = tokio::time::timeout(timeout, stream.read_line(&mut line)).await;
        let read = match outcome {
            Ok(read) => read,
            Err(_) => {
                *guard = None;
                tracing::warn!(
                    message = message.trim_end(),
                    ?timeout,
                    "response timed out, dropping connection"
                );
                return Err(CtlError::Disconnected(format!(
                    "no response to '{}' within {:?}",
                    message.trim_end(),
                    timeout
                )));
            }
        };
        let read = match read {
            Ok(read) => read,
            Err(e) => {
                *guard = None;
                return Err(e.into());
            }
        };
        if read == 0 {
            *guard = None;
            return Err(CtlError::Disconnected("peer closed the connection".into()));
        }
        let line = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::debug!(response = %line, "response");
        Ok(line)
    }

    /// Shut the stream down. Later use fails with a disconnected error.
    pub async fn close(&self) -> CtlResult<()> {
        let mut stream = self.stream.lock().await.take().ok_or_else(not_connected)?;
        stream.get_mut().shutdown().await?;
        tracing::info!("connection closed");
        Ok(())
    }
}

fn not_connected() -> CtlError {
    CtlError::Disconnected("connection is not open".into())
}
