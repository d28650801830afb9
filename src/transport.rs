//! # THZ Transport Layer
//!
//! Byte-level channels to the heat pump. A transport knows nothing about
//! telegrams: it opens a channel, writes bytes, hands back whatever bytes are
//! readable, reports whether the channel still looks alive and closes it.
//! Framing lives in [`crate::protocol`], retry policy in [`crate::session`].
//!
//! ## Supported Transports
//!
//! ### Serial (`SerialTransport`)
//! - Direct connection to the service interface (USB/RS-232 adapter)
//! - 8 data bits, no parity, one stop bit; 115200 baud by default
//! - Liveness: the port is open and its input queue can be queried
//!
//! ### TCP (`TcpTransport`)
//! - Serial-to-network bridges (ser2net and similar), port 2323 by default
//! - TCP keepalive (idle 60 s, interval 10 s, 6 probes) and `TCP_NODELAY`
//! - Liveness: non-blocking, non-consuming peek on the socket
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use voltage_thz::transport::{TcpTransport, ThzTransport};
//! use voltage_thz::protocol::build_read;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transport = TcpTransport::new("192.168.1.50", 2323);
//!     transport.open().await?;
//!
//!     transport.write(&build_read(0x00FB)).await?;
//!     let bytes = transport.read_available().await?;
//!     println!("Received {} bytes", bytes.len());
//!
//!     let stats = transport.get_stats();
//!     println!("Bytes sent: {}", stats.bytes_sent);
//!
//!     transport.close().await?;
//!     Ok(())
//! }
//! ```

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::time::Duration;
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};
use tracing::{debug, info, warn};

use crate::error::{ThzError, ThzResult};
use crate::utils::format::bytes_to_hex;

/// Size of the buffer used for a single read
const READ_CHUNK_SIZE: usize = 256;

/// Default time a single `read_available` call waits for data
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Default time allowed for establishing a TCP connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Log packet with direction and channel
fn log_packet(direction: &str, data: &[u8], channel: &str) {
    info!("[THZ-{}] {} {}", channel, direction, bytes_to_hex(data));
}

/// Byte channel to a THZ device
///
/// Implementations must be `Send + Sync` so a session can be shared across
/// tasks. All calls are made by the session while it holds its lock, so
/// implementations never see concurrent calls.
#[async_trait]
pub trait ThzTransport: Send + Sync {
    /// Establish the channel
    ///
    /// Fails with [`ThzError::Connection`] when the device or bridge cannot
    /// be reached.
    async fn open(&mut self) -> ThzResult<()>;

    /// Send all bytes
    ///
    /// Any OS-level failure is reported as [`ThzError::Connection`] and the
    /// handle is dropped, so the next liveness check reports dead.
    async fn write(&mut self, data: &[u8]) -> ThzResult<()>;

    /// Return the bytes readable right now
    ///
    /// Waits at most one poll interval and returns an empty vector when
    /// nothing arrived. A peer that closed the channel is a connection error.
    async fn read_available(&mut self) -> ThzResult<Vec<u8>>;

    /// Whether the channel still looks usable, without consuming input
    async fn is_alive(&self) -> bool;

    /// Close the channel; closing a closed transport is a no-op
    async fn close(&mut self) -> ThzResult<()>;

    /// Drop stale input left over from an earlier exchange
    async fn discard_input(&mut self) -> ThzResult<()> {
        Ok(())
    }

    /// Close and reopen the channel
    async fn reconnect(&mut self) -> ThzResult<()> {
        self.close().await?;
        self.open().await
    }

    /// Get communication statistics
    fn get_stats(&self) -> TransportStats;

    /// Human-readable endpoint, used in log messages
    fn endpoint(&self) -> String;
}

#[async_trait]
impl<T: ThzTransport + ?Sized> ThzTransport for Box<T> {
    async fn open(&mut self) -> ThzResult<()> {
        (**self).open().await
    }

    async fn write(&mut self, data: &[u8]) -> ThzResult<()> {
        (**self).write(data).await
    }

    async fn read_available(&mut self) -> ThzResult<Vec<u8>> {
        (**self).read_available().await
    }

    async fn is_alive(&self) -> bool {
        (**self).is_alive().await
    }

    async fn close(&mut self) -> ThzResult<()> {
        (**self).close().await
    }

    async fn discard_input(&mut self) -> ThzResult<()> {
        (**self).discard_input().await
    }

    async fn reconnect(&mut self) -> ThzResult<()> {
        (**self).reconnect().await
    }

    fn get_stats(&self) -> TransportStats {
        (**self).get_stats()
    }

    fn endpoint(&self) -> String {
        (**self).endpoint()
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub connects: u64,
    pub writes: u64,
    pub reads: u64,
    pub errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// TCP keepalive parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepaliveSettings {
    pub idle: Duration,
    pub interval: Duration,
    pub retries: u32,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            idle: Duration::from_secs(60),
            interval: Duration::from_secs(10),
            retries: 6,
        }
    }
}

/// TCP transport for serial-to-network bridges
pub struct TcpTransport {
    stream: Option<TcpStream>,
    host: String,
    port: u16,
    connect_timeout: Duration,
    poll_interval: Duration,
    keepalive: KeepaliveSettings,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl TcpTransport {
    /// Create an unopened TCP transport
    pub fn new<S: Into<String>>(host: S, port: u16) -> Self {
        Self {
            stream: None,
            host: host.into(),
            port,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive: KeepaliveSettings::default(),
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    /// Create and open a TCP transport
    pub async fn connect<S: Into<String>>(host: S, port: u16) -> ThzResult<Self> {
        let mut transport = Self::new(host, port);
        transport.open().await?;
        Ok(transport)
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_keepalive(mut self, keepalive: KeepaliveSettings) -> Self {
        self.keepalive = keepalive;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    /// Apply keepalive and `TCP_NODELAY`; failures are logged, not fatal
    fn configure_socket(&self, stream: &TcpStream) {
        let socket = SockRef::from(stream);

        let keepalive = TcpKeepalive::new().with_time(self.keepalive.idle);
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        let keepalive = keepalive
            .with_interval(self.keepalive.interval)
            .with_retries(self.keepalive.retries);

        if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
            warn!("Failed to set keep-alive on {}: {}", self.endpoint(), e);
        }

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on {}: {}", self.endpoint(), e);
        }
    }

    fn fail(&mut self, message: String) -> ThzError {
        self.stream = None;
        self.stats.errors += 1;
        ThzError::connection(message)
    }
}

#[async_trait]
impl ThzTransport for TcpTransport {
    async fn open(&mut self) -> ThzResult<()> {
        let endpoint = self.endpoint();
        let connect = TcpStream::connect((self.host.as_str(), self.port));
        let stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ThzError::connection(format!(
                    "Failed to connect to {}: {}",
                    endpoint, e
                )));
            }
            Err(_) => {
                self.stats.errors += 1;
                return Err(ThzError::connection(format!(
                    "Connecting to {} timed out after {}ms",
                    endpoint,
                    self.connect_timeout.as_millis()
                )));
            }
        };

        self.configure_socket(&stream);
        self.stream = Some(stream);
        self.stats.connects += 1;
        debug!("Connected to {}", endpoint);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> ThzResult<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ThzError::connection("TCP transport not open"))?;

        if let Err(e) = stream.write_all(data).await {
            let endpoint = self.endpoint();
            return Err(self.fail(format!("Failed to send to {}: {}", endpoint, e)));
        }

        self.stats.writes += 1;
        self.stats.bytes_sent += data.len() as u64;
        if self.packet_logging {
            log_packet("send", data, "TCP");
        }
        Ok(())
    }

    async fn read_available(&mut self) -> ThzResult<Vec<u8>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| ThzError::connection("TCP transport not open"))?;

        let mut buffer = [0u8; READ_CHUNK_SIZE];
        match timeout(self.poll_interval, stream.read(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => {
                let endpoint = self.endpoint();
                Err(self.fail(format!("Connection closed by {}", endpoint)))
            }
            Ok(Ok(n)) => {
                self.stats.reads += 1;
                self.stats.bytes_received += n as u64;
                if self.packet_logging {
                    log_packet("receive", &buffer[..n], "TCP");
                }
                Ok(buffer[..n].to_vec())
            }
            Ok(Err(e)) => {
                let endpoint = self.endpoint();
                Err(self.fail(format!("Failed to read from {}: {}", endpoint, e)))
            }
        }
    }

    async fn is_alive(&self) -> bool {
        let Some(stream) = self.stream.as_ref() else {
            return false;
        };

        // The socket is non-blocking, so the peek returns immediately.
        let mut probe = [MaybeUninit::<u8>::uninit(); 1];
        match SockRef::from(stream).peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(e) => {
                debug!("Liveness probe on {} failed: {}", self.endpoint(), e);
                false
            }
        }
    }

    async fn close(&mut self) -> ThzResult<()> {
        if let Some(mut stream) = self.stream.take() {
            // Best effort; the socket is dropped either way.
            let _ = stream.shutdown().await;
            debug!("Closed connection to {}", self.endpoint());
        }
        Ok(())
    }

    async fn discard_input(&mut self) -> ThzResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Ok(());
        };

        let mut buffer = [0u8; READ_CHUNK_SIZE];
        loop {
            match stream.try_read(&mut buffer) {
                Ok(0) => {
                    let endpoint = self.endpoint();
                    return Err(self.fail(format!("Connection closed by {}", endpoint)));
                }
                Ok(n) => debug!("Discarded {} stale byte(s)", n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) => {
                    let endpoint = self.endpoint();
                    return Err(self.fail(format!("Failed to read from {}: {}", endpoint, e)));
                }
            }
        }
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Serial transport for a directly attached service interface
pub struct SerialTransport {
    port: Option<SerialStream>,
    device: String,
    baud_rate: u32,
    poll_interval: Duration,
    stats: TransportStats,
    /// Enable packet logging for debugging
    packet_logging: bool,
}

impl SerialTransport {
    /// Create an unopened serial transport
    pub fn new<S: Into<String>>(device: S, baud_rate: u32) -> Self {
        Self {
            port: None,
            device: device.into(),
            baud_rate,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stats: TransportStats::default(),
            packet_logging: false,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }

    fn fail(&mut self, message: String) -> ThzError {
        self.port = None;
        self.stats.errors += 1;
        ThzError::connection(message)
    }
}

#[async_trait]
impl ThzTransport for SerialTransport {
    async fn open(&mut self) -> ThzResult<()> {
        let builder = tokio_serial::new(&self.device, self.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(tokio_serial::Parity::None)
            .timeout(self.poll_interval);

        let port = SerialStream::open(&builder).map_err(|e| {
            self.stats.errors += 1;
            ThzError::connection(format!("Failed to open serial port {}: {}", self.device, e))
        })?;

        self.port = Some(port);
        self.stats.connects += 1;
        debug!("Opened serial port {} at {} baud", self.device, self.baud_rate);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> ThzResult<()> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ThzError::connection("Serial port not open"))?;

        let result = match port.write_all(data).await {
            Ok(()) => port.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            let message = format!("Failed to write to {}: {}", self.device, e);
            return Err(self.fail(message));
        }

        self.stats.writes += 1;
        self.stats.bytes_sent += data.len() as u64;
        if self.packet_logging {
            log_packet("send", data, "SERIAL");
        }
        Ok(())
    }

    async fn read_available(&mut self) -> ThzResult<Vec<u8>> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ThzError::connection("Serial port not open"))?;

        let mut buffer = [0u8; READ_CHUNK_SIZE];
        match timeout(self.poll_interval, port.read(&mut buffer)).await {
            Err(_) => Ok(Vec::new()),
            Ok(Ok(0)) => Ok(Vec::new()),
            Ok(Ok(n)) => {
                self.stats.reads += 1;
                self.stats.bytes_received += n as u64;
                if self.packet_logging {
                    log_packet("receive", &buffer[..n], "SERIAL");
                }
                Ok(buffer[..n].to_vec())
            }
            Ok(Err(e)) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Ok(Err(e)) => {
                let message = format!("Failed to read from {}: {}", self.device, e);
                Err(self.fail(message))
            }
        }
    }

    async fn is_alive(&self) -> bool {
        self.port
            .as_ref()
            .map_or(false, |port| port.bytes_to_read().is_ok())
    }

    async fn close(&mut self) -> ThzResult<()> {
        if self.port.take().is_some() {
            debug!("Closed serial port {}", self.device);
        }
        Ok(())
    }

    async fn discard_input(&mut self) -> ThzResult<()> {
        if let Some(port) = self.port.as_ref() {
            if let Err(e) = port.clear(ClearBuffer::Input) {
                let message = format!("Failed to clear input of {}: {}", self.device, e);
                return Err(self.fail(message));
            }
        }
        Ok(())
    }

    fn get_stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn endpoint(&self) -> String {
        self.device.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_transport_unreachable() {
        // Bind and drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port)
            .with_connect_timeout(Duration::from_millis(500));
        let result = transport.open().await;
        assert!(matches!(result, Err(ThzError::Connection { .. })));
        assert!(!transport.is_alive().await);
        assert_eq!(transport.get_stats().errors, 1);
    }

    #[tokio::test]
    async fn test_tcp_transport_exchange_and_liveness() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buffer = [0u8; 16];
            let n = socket.read(&mut buffer).await.unwrap();
            socket.write_all(&buffer[..n]).await.unwrap();
            // Keep the peer open until the client has checked liveness.
            let _ = socket.read(&mut buffer).await;
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        assert!(transport.is_alive().await);

        transport.write(&[0x02, 0x00, 0x03]).await.unwrap();
        let mut received = Vec::new();
        while received.len() < 3 {
            received.extend(transport.read_available().await.unwrap());
        }
        assert_eq!(received, vec![0x02, 0x00, 0x03]);

        // Nothing pending: returns empty instead of blocking.
        assert!(transport.read_available().await.unwrap().is_empty());
        assert!(transport.is_alive().await);

        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_alive().await);
        server.await.unwrap();

        let stats = transport.get_stats();
        assert_eq!(stats.connects, 1);
        assert_eq!(stats.bytes_sent, 3);
        assert_eq!(stats.bytes_received, 3);
    }

    #[tokio::test]
    async fn test_tcp_peer_close_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let mut transport = TcpTransport::connect("127.0.0.1", port).await.unwrap();
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!transport.is_alive().await);
        let result = transport.read_available().await;
        assert!(matches!(result, Err(ThzError::Connection { .. })));
    }

    #[tokio::test]
    async fn test_serial_transport_missing_device() {
        let mut transport = SerialTransport::new("/dev/does-not-exist-thz", 115_200);
        assert!(transport.open().await.is_err());
        assert!(!transport.is_alive().await);
        assert!(matches!(
            transport.write(&[0x00]).await,
            Err(ThzError::Connection { .. })
        ));
        transport.close().await.unwrap();
    }
}
