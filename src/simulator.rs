/// Simulated THZ heat pump
///
/// This module provides an in-process TCP endpoint that behaves like a heat
/// pump behind a serial-to-network bridge. It answers read and write telegrams
/// from a [`BlockBank`] and can inject faults on demand: closing a connection
/// in the middle of a request, corrupting response checksums, or answering
/// late.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{ThzError, ThzResult};
use crate::protocol::{
    encode_corrupted_response, find_frame, parse_request, ResponseStatus, ThzRequest, ThzResponse,
    START_MARKER,
};
use crate::register_bank::{BlockBank, BlockBankStats};

/// Read chunk size for client connections
const READ_CHUNK_SIZE: usize = 256;

/// Simulator statistics
#[derive(Debug, Clone, Default)]
pub struct SimulatorStats {
    pub connections_count: u64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub dropped_connections: u64,
    pub corrupted_responses: u64,
    pub uptime_seconds: u64,
    pub block_bank_stats: Option<BlockBankStats>,
}

/// Simulator configuration
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub bind_address: SocketAddr,
    /// Clients silent for this long are disconnected
    pub idle_timeout: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], crate::DEFAULT_TCP_PORT)),
            idle_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    dropped_connections: AtomicU64,
    corrupted_responses: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, amount: u64) {
        counter.fetch_add(amount, Ordering::Relaxed);
    }
}

/// Pending fault injections
#[derive(Debug, Default)]
struct Faults {
    drop_connections: AtomicUsize,
    corrupt_responses: AtomicUsize,
    response_delay_ms: AtomicU64,
}

impl Faults {
    /// Consume one pending fault, if any
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms.load(Ordering::Relaxed))
    }
}

#[derive(Clone)]
struct ClientContext {
    bank: BlockBank,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
    idle_timeout: Duration,
}

/// THZ TCP simulator
pub struct ThzTcpSimulator {
    config: SimulatorConfig,
    bank: BlockBank,
    counters: Arc<Counters>,
    faults: Arc<Faults>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    kick_tx: broadcast::Sender<()>,
    is_running: Arc<AtomicBool>,
    local_addr: Option<SocketAddr>,
    start_time: Option<std::time::Instant>,
}

impl ThzTcpSimulator {
    /// Create a simulator serving `bank` on `bind_address`
    pub fn new(bind_address: &str, bank: BlockBank) -> ThzResult<Self> {
        let bind_address = bind_address
            .parse()
            .map_err(|e| ThzError::configuration(format!("Invalid bind address: {}", e)))?;

        let config = SimulatorConfig {
            bind_address,
            ..Default::default()
        };
        Ok(Self::with_config(config, bank))
    }

    /// Create a simulator with custom configuration
    pub fn with_config(config: SimulatorConfig, bank: BlockBank) -> Self {
        let (kick_tx, _) = broadcast::channel(1);
        Self {
            config,
            bank,
            counters: Arc::new(Counters::default()),
            faults: Arc::new(Faults::default()),
            shutdown_tx: None,
            kick_tx,
            is_running: Arc::new(AtomicBool::new(false)),
            local_addr: None,
            start_time: None,
        }
    }

    /// Bind and start accepting clients; returns the bound address
    pub async fn start(&mut self) -> ThzResult<SocketAddr> {
        if self.is_running() {
            return Err(ThzError::configuration("Simulator is already running"));
        }

        let listener = TcpListener::bind(self.config.bind_address).await.map_err(|e| {
            ThzError::connection(format!("Failed to bind to {}: {}", self.config.bind_address, e))
        })?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        self.local_addr = Some(local_addr);
        self.start_time = Some(std::time::Instant::now());
        self.is_running.store(true, Ordering::SeqCst);

        info!("🚀 THZ simulator listening on {}", local_addr);

        let context = ClientContext {
            bank: self.bank.clone(),
            counters: Arc::clone(&self.counters),
            faults: Arc::clone(&self.faults),
            idle_timeout: self.config.idle_timeout,
        };
        let kick_tx = self.kick_tx.clone();
        let is_running = Arc::clone(&self.is_running);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, addr)) => {
                                debug!("Accepted connection from {}", addr);
                                let context = context.clone();
                                let shutdown_rx = shutdown_tx.subscribe();
                                let kick_rx = kick_tx.subscribe();
                                tokio::spawn(async move {
                                    Self::handle_client(stream, context, shutdown_rx, kick_rx).await;
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Shutdown signal received, stopping simulator");
                        break;
                    }
                }
            }
            is_running.store(false, Ordering::SeqCst);
        });

        Ok(local_addr)
    }

    /// Stop accepting clients and close every connection
    pub fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
            info!("⏹️  THZ simulator stopped");
        }
        self.is_running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Address the simulator is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn block_bank(&self) -> &BlockBank {
        &self.bank
    }

    /// Close the connection instead of answering, for the next `count` requests
    pub fn drop_next_connections(&self, count: usize) {
        self.faults.drop_connections.fetch_add(count, Ordering::SeqCst);
    }

    /// Send a wrong checksum in the next `count` responses
    pub fn corrupt_next_responses(&self, count: usize) {
        self.faults.corrupt_responses.fetch_add(count, Ordering::SeqCst);
    }

    /// Wait this long before every response
    pub fn set_response_delay(&self, delay: Duration) {
        self.faults
            .response_delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Close every open client connection; the listener keeps running
    pub fn disconnect_clients(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Get simulator statistics
    pub fn get_stats(&self) -> SimulatorStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        SimulatorStats {
            connections_count: load(&self.counters.connections),
            total_requests: load(&self.counters.total_requests),
            successful_requests: load(&self.counters.successful_requests),
            failed_requests: load(&self.counters.failed_requests),
            bytes_received: load(&self.counters.bytes_received),
            bytes_sent: load(&self.counters.bytes_sent),
            dropped_connections: load(&self.counters.dropped_connections),
            corrupted_responses: load(&self.counters.corrupted_responses),
            uptime_seconds: self.start_time.map_or(0, |start| start.elapsed().as_secs()),
            block_bank_stats: Some(self.bank.get_stats()),
        }
    }

    /// Handle client connection
    async fn handle_client(
        mut stream: TcpStream,
        context: ClientContext,
        mut shutdown_rx: broadcast::Receiver<()>,
        mut kick_rx: broadcast::Receiver<()>,
    ) {
        let peer_addr = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr| addr.to_string());
        info!("📡 New client connected: {}", peer_addr);
        Counters::bump(&context.counters.connections, 1);

        let mut chunk = [0u8; READ_CHUNK_SIZE];
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Shutdown signal received for client {}", peer_addr);
                    break;
                }
                _ = kick_rx.recv() => {
                    debug!("Disconnecting client {}", peer_addr);
                    break;
                }
                result = timeout(context.idle_timeout, stream.read(&mut chunk)) => {
                    match result {
                        Ok(Ok(0)) => {
                            debug!("Client {} closed the connection", peer_addr);
                            break;
                        }
                        Ok(Ok(bytes_read)) => {
                            Counters::bump(&context.counters.bytes_received, bytes_read as u64);
                            buffer.extend_from_slice(&chunk[..bytes_read]);
                            if !Self::answer_frames(&mut stream, &mut buffer, &context).await {
                                break;
                            }
                        }
                        Ok(Err(e)) => {
                            error!("Read error from {}: {}", peer_addr, e);
                            break;
                        }
                        Err(_) => {
                            warn!("Client {} idle, disconnecting", peer_addr);
                            break;
                        }
                    }
                }
            }
        }

        info!("🔌 Client {} disconnected", peer_addr);
    }

    /// Answer every complete telegram in `buffer`; false closes the connection
    async fn answer_frames(stream: &mut TcpStream, buffer: &mut Vec<u8>, context: &ClientContext) -> bool {
        while let Some(range) = find_frame(buffer) {
            let frame = buffer[range.clone()].to_vec();
            buffer.drain(..range.end);
            Counters::bump(&context.counters.total_requests, 1);

            if Faults::take(&context.faults.drop_connections) {
                warn!("Fault injection: dropping connection mid-request");
                Counters::bump(&context.counters.dropped_connections, 1);
                return false;
            }

            let response = Self::process_frame(&frame, &context.bank);
            if response.is_success() {
                Counters::bump(&context.counters.successful_requests, 1);
            } else {
                Counters::bump(&context.counters.failed_requests, 1);
            }

            let bytes = if Faults::take(&context.faults.corrupt_responses) {
                warn!("Fault injection: corrupting response checksum");
                Counters::bump(&context.counters.corrupted_responses, 1);
                encode_corrupted_response(&response)
            } else {
                response.encode()
            };

            let delay = context.faults.response_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            if let Err(e) = stream.write_all(&bytes).await {
                error!("Failed to send response: {}", e);
                return false;
            }
            Counters::bump(&context.counters.bytes_sent, bytes.len() as u64);
        }

        // Line noise without a start marker can never become a telegram.
        if !buffer.contains(&START_MARKER) {
            buffer.clear();
        }
        true
    }

    /// Build the device's answer to one request telegram
    fn process_frame(frame: &[u8], bank: &BlockBank) -> ThzResponse {
        match parse_request(frame) {
            Ok(ThzRequest::Read { block }) => match bank.read_block(block) {
                Ok(data) => ThzResponse::new_read(data),
                Err(e) => {
                    debug!("Read rejected: {}", e);
                    ThzResponse::new_error(ResponseStatus::UnknownRegister)
                }
            },
            Ok(ThzRequest::Write { command, payload }) => match payload.split_first() {
                Some((&offset, value)) if !value.is_empty() => {
                    match bank.apply_write(command, offset, value) {
                        Ok(block) => {
                            debug!("Write 0x{:02X} stored in block 0x{:04X}", command, block);
                            ThzResponse::new_write_ack(payload.clone())
                        }
                        Err(e) => {
                            debug!("Write rejected: {}", e);
                            ThzResponse::new_error(ResponseStatus::UnknownRegister)
                        }
                    }
                }
                _ => ThzResponse::new_error(ResponseStatus::UnknownCommand),
            },
            Err(ThzError::DeviceStatus { status, .. }) => ThzResponse::new_error(
                ResponseStatus::from_u8(status).unwrap_or(ResponseStatus::UnknownCommand),
            ),
            Err(e) => {
                warn!("Rejecting malformed request: {}", e);
                ThzResponse::new_error(ResponseStatus::RequestChecksumError)
            }
        }
    }
}

impl Drop for ThzTcpSimulator {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_read, build_write, encode_frame, parse_response};

    fn bank() -> BlockBank {
        let bank = BlockBank::new();
        bank.set_block(0x00FB, vec![0x00, 0xD7, 0x10]).unwrap();
        bank
    }

    #[test]
    fn test_process_read() {
        let bank = bank();
        let response = ThzTcpSimulator::process_frame(&build_read(0x00FB), &bank);
        assert_eq!(response, ThzResponse::new_read(vec![0x00, 0xD7, 0x10]));

        let response = ThzTcpSimulator::process_frame(&build_read(0x0099), &bank);
        assert_eq!(response.status, ResponseStatus::UnknownRegister.to_u8());
    }

    #[test]
    fn test_process_write() {
        let bank = bank();
        let response = ThzTcpSimulator::process_frame(&build_write(0xFB, &[0x01, 0x42]), &bank);
        assert_eq!(response, ThzResponse::new_write_ack(vec![0x01, 0x42]));
        assert_eq!(bank.read_block(0x00FB).unwrap(), vec![0x00, 0x42, 0x10]);
    }

    #[test]
    fn test_process_malformed() {
        let bank = bank();

        let mut frame = build_read(0x00FB);
        frame[3] ^= 0x01;
        let response = ThzTcpSimulator::process_frame(&frame, &bank);
        assert_eq!(response.status, ResponseStatus::RequestChecksumError.to_u8());

        let response = ThzTcpSimulator::process_frame(&encode_frame(&[0x05, 0x00]), &bank);
        assert_eq!(response.status, ResponseStatus::UnknownCommand.to_u8());
    }

    #[test]
    fn test_fault_counter() {
        let counter = AtomicUsize::new(2);
        assert!(Faults::take(&counter));
        assert!(Faults::take(&counter));
        assert!(!Faults::take(&counter));
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let mut simulator = ThzTcpSimulator::new("127.0.0.1:0", bank()).unwrap();
        let addr = simulator.start().await.unwrap();
        assert!(simulator.is_running());

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&build_read(0x00FB)).await.unwrap();

        let mut received = Vec::new();
        let mut chunk = [0u8; 64];
        while find_frame(&received).is_none() {
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(parse_response(&received).unwrap(), vec![0x00, 0xD7, 0x10]);

        simulator.stop();
        assert!(!simulator.is_running());
        assert_eq!(simulator.get_stats().successful_requests, 1);
    }
}
