/// Device session
///
/// A [`DeviceSession`] owns one transport to the heat pump and serializes
/// every telegram exchange behind a single async lock. On top of the raw
/// block read and register write it adds:
///
/// - a per-block read cache with a fixed lifetime
/// - a liveness check before every exchange, reconnecting a dead channel
/// - exactly one reconnect and one retry after a failed exchange
/// - the memoized firmware version and the register map selected from it
/// - named value access through the register map and the value codec
///
/// The lock is held from the cache check through the last retry, so no other
/// caller can interleave a telegram with a half-recovered transport.
///
/// ```rust,no_run
/// use voltage_thz::{connect, RegisterCatalog, SessionConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = connect(&SessionConfig::tcp("192.168.1.50", 2323)).await?;
/// session.initialize(&RegisterCatalog::builtin()?).await?;
///
/// let outside = session.read_value("outsideTemp").await?;
/// println!("Outside temperature: {}", outside);
/// # Ok(())
/// # }
/// ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{self, Value};
use crate::config::SessionConfig;
use crate::error::{ThzError, ThzResult};
use crate::logging::CallbackLogger;
use crate::protocol::{decode_frame, find_frame, BlockAddress, ThzRequest, ThzResponse};
use crate::register_map::{blocks, RegisterCatalog, RegisterMap};
use crate::transport::{SerialTransport, TcpTransport, ThzTransport, TransportStats};
use crate::utils::{validation, OperationTimer, PerformanceMetrics};

/// Byte offset of the firmware version inside the firmware block
pub const FIRMWARE_VERSION_OFFSET: usize = 2;

/// Byte length of the firmware version
pub const FIRMWARE_VERSION_LENGTH: usize = 2;

/// Session over a TCP bridge
pub type TcpSession = DeviceSession<TcpTransport>;

/// Session over a serial port
pub type SerialSession = DeviceSession<SerialTransport>;

/// Timing parameters of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Time allowed for a complete response telegram
    pub read_timeout: Duration,
    /// How long a read block is served from cache
    pub cache_duration: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(crate::DEFAULT_READ_TIMEOUT_MS),
            cache_duration: crate::DEFAULT_CACHE_DURATION,
        }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            read_timeout: config.read_timeout(),
            cache_duration: config.cache_duration(),
        }
    }
}

/// Session counters
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Telegram exchanges attempted, retries included
    pub exchanges: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Exchanges repeated after a recoverable failure
    pub retries: u64,
    pub reconnects: u64,
    /// Operations that failed for the caller
    pub failures: u64,
    pub metrics: PerformanceMetrics,
    pub transport: TransportStats,
}

struct CachedBlock {
    fetched_at: Instant,
    data: Vec<u8>,
}

struct BlockCache {
    ttl: Duration,
    blocks: HashMap<BlockAddress, CachedBlock>,
}

impl BlockCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            blocks: HashMap::new(),
        }
    }

    fn get(&self, block: BlockAddress) -> Option<Vec<u8>> {
        self.blocks
            .get(&block)
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.data.clone())
    }

    fn insert(&mut self, block: BlockAddress, data: Vec<u8>) {
        self.blocks.insert(
            block,
            CachedBlock {
                fetched_at: Instant::now(),
                data,
            },
        );
    }

    fn invalidate(&mut self, block: BlockAddress) {
        self.blocks.remove(&block);
    }

    fn clear(&mut self) {
        self.blocks.clear();
    }
}

struct SessionState<T> {
    transport: T,
    cache: BlockCache,
    stats: SessionStats,
}

/// Locked, caching, self-healing session with one heat pump
pub struct DeviceSession<T: ThzTransport> {
    state: Mutex<SessionState<T>>,
    settings: SessionSettings,
    firmware: OnceCell<String>,
    register_map: OnceCell<Arc<RegisterMap>>,
    firmware_override: Option<String>,
    logger: Option<CallbackLogger>,
}

/// Open a session as described by `config`
pub async fn connect(config: &SessionConfig) -> ThzResult<DeviceSession<Box<dyn ThzTransport>>> {
    config.validate()?;
    let session = DeviceSession::open(config.build_transport(), SessionSettings::from(config)).await?;
    Ok(session.with_firmware_override(config.firmware_override.clone()))
}

impl<T: ThzTransport> DeviceSession<T> {
    /// Wrap a transport without opening it
    pub fn new(transport: T, settings: SessionSettings) -> Self {
        Self {
            state: Mutex::new(SessionState {
                transport,
                cache: BlockCache::new(settings.cache_duration),
                stats: SessionStats::default(),
            }),
            settings,
            firmware: OnceCell::new(),
            register_map: OnceCell::new(),
            firmware_override: None,
            logger: None,
        }
    }

    /// Open the transport and wrap it
    pub async fn open(mut transport: T, settings: SessionSettings) -> ThzResult<Self> {
        transport.open().await?;
        info!("THZ session opened on {}", transport.endpoint());
        Ok(Self::new(transport, settings))
    }

    /// Attach a callback logger for telegram traffic
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Select register maps by this firmware id instead of the reported one
    pub fn with_firmware_override(mut self, firmware: Option<String>) -> Self {
        self.firmware_override = firmware;
        self
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings
    }

    /// Read a register block, from cache when fresh
    ///
    /// Fails with [`ThzError::Communication`] when the exchange still fails
    /// after one reconnect and one retry.
    pub async fn read_block(&self, block: BlockAddress) -> ThzResult<Vec<u8>> {
        let mut state = self.state.lock().await;

        if let Some(data) = state.cache.get(block) {
            state.stats.cache_hits += 1;
            debug!("Block 0x{:04X} served from cache", block);
            return Ok(data);
        }
        state.stats.cache_misses += 1;

        let request = ThzRequest::new_read(block);
        let payload = self.exchange_with_retry(&mut state, &request).await?;
        state.cache.insert(block, payload.clone());
        Ok(payload)
    }

    /// Write raw bytes to a register
    ///
    /// Never served from cache. Cached blocks holding a register written by
    /// `command` are dropped before the exchange; without a loaded register
    /// map, or when no register matches, the whole cache is dropped.
    /// Returns the confirmation payload.
    pub async fn write_register(
        &self,
        command: u8,
        write_offset: u8,
        write_length: usize,
        value: &[u8],
    ) -> ThzResult<Vec<u8>> {
        validation::validate_write_length(value, write_length)?;
        let request = ThzRequest::write_register(command, write_offset, value);

        let mut state = self.state.lock().await;
        self.invalidate_for_write(&mut state, command);
        self.exchange_with_retry(&mut state, &request).await
    }

    /// Firmware version reported by the heat pump, read once per session
    pub async fn read_firmware_version(&self) -> ThzResult<String> {
        let version = self
            .firmware
            .get_or_try_init(|| async {
                let block = self.read_block(blocks::FIRMWARE).await?;
                let end = FIRMWARE_VERSION_OFFSET + FIRMWARE_VERSION_LENGTH;
                let raw = block.get(FIRMWARE_VERSION_OFFSET..end).ok_or_else(|| {
                    ThzError::decode(
                        "firmwareVersion",
                        FIRMWARE_VERSION_LENGTH,
                        block.len().saturating_sub(FIRMWARE_VERSION_OFFSET),
                    )
                })?;
                let version = u16::from_be_bytes([raw[0], raw[1]]).to_string();
                info!("Heat pump reports firmware {}", version);
                Ok::<_, ThzError>(version)
            })
            .await?;
        Ok(version.clone())
    }

    /// Select the register map for this device
    ///
    /// Uses the firmware override when configured, the reported firmware
    /// version otherwise. Fails with [`ThzError::UnsupportedFirmware`] when
    /// the catalog has no map for it. Runs once; later calls return the
    /// selected map.
    pub async fn initialize(&self, catalog: &RegisterCatalog) -> ThzResult<Arc<RegisterMap>> {
        let map = self
            .register_map
            .get_or_try_init(|| async {
                let firmware = match &self.firmware_override {
                    Some(firmware) => {
                        info!("Using configured firmware {}", firmware);
                        firmware.clone()
                    }
                    None => self.read_firmware_version().await?,
                };
                let map = catalog.select(&firmware)?;
                info!(
                    "Register map for firmware {} loaded ({} registers)",
                    map.firmware(),
                    map.len()
                );
                Ok::<_, ThzError>(map)
            })
            .await?;
        Ok(Arc::clone(map))
    }

    /// The register map selected by [`initialize`](Self::initialize)
    pub fn register_map(&self) -> ThzResult<Arc<RegisterMap>> {
        self.register_map
            .get()
            .cloned()
            .ok_or_else(|| ThzError::configuration("Session not initialized: no register map loaded"))
    }

    /// Read and decode a named register
    pub async fn read_value(&self, name: &str) -> ThzResult<Value> {
        let map = self.register_map()?;
        let register = map.get(name).ok_or_else(|| ThzError::unknown_register(name))?;
        let block = self.read_block(register.block).await?;
        codec::decode(&register.kind, register.slice(&block)?, register.byte_order)
    }

    /// Read a block once and decode every register it holds
    pub async fn read_block_values(&self, block: BlockAddress) -> ThzResult<Vec<(String, Value)>> {
        let map = self.register_map()?;
        let data = self.read_block(block).await?;
        map.registers_in_block(block)
            .map(|register| {
                let value = codec::decode(&register.kind, register.slice(&data)?, register.byte_order)?;
                Ok::<_, ThzError>((register.name.clone(), value))
            })
            .collect()
    }

    /// Encode and write a named register
    ///
    /// Returns the confirmation payload.
    pub async fn write_value(&self, name: &str, value: &Value) -> ThzResult<Vec<u8>> {
        let map = self.register_map()?;
        let register = map.get(name).ok_or_else(|| ThzError::unknown_register(name))?;
        let write = register.write.ok_or_else(|| ThzError::read_only(name))?;
        let bytes = codec::encode(&register.kind, value, write.length, register.byte_order)?;
        debug!("Writing {} = {} as {:02X?}", name, value, bytes);
        self.write_register(write.command, write.offset, write.length, &bytes)
            .await
    }

    /// Drop every cached block
    pub async fn invalidate_cache(&self) {
        self.state.lock().await.cache.clear();
    }

    /// Whether the transport currently looks alive
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.transport.is_alive().await
    }

    /// Snapshot of session and transport counters
    pub async fn stats(&self) -> SessionStats {
        let state = self.state.lock().await;
        let mut stats = state.stats.clone();
        stats.transport = state.transport.get_stats();
        stats
    }

    /// Close the transport and drop the cache
    pub async fn close(&self) -> ThzResult<()> {
        let mut state = self.state.lock().await;
        state.cache.clear();
        state.transport.close().await?;
        info!("THZ session on {} closed", state.transport.endpoint());
        Ok(())
    }

    fn invalidate_for_write(&self, state: &mut SessionState<T>, command: u8) {
        let affected = self
            .register_map
            .get()
            .map(|map| map.blocks_written_by(command))
            .unwrap_or_default();

        if affected.is_empty() {
            state.cache.clear();
        } else {
            for block in affected {
                state.cache.invalidate(block);
            }
        }
    }

    async fn reconnect(&self, state: &mut SessionState<T>) -> ThzResult<()> {
        state.stats.reconnects += 1;
        state.transport.reconnect().await?;
        info!("Reconnected to {}", state.transport.endpoint());
        Ok(())
    }

    /// One exchange with the liveness check and the single retry
    async fn exchange_with_retry(
        &self,
        state: &mut SessionState<T>,
        request: &ThzRequest,
    ) -> ThzResult<Vec<u8>> {
        let operation = describe(request);

        if !state.transport.is_alive().await {
            warn!(
                "Transport {} not alive before {}, reconnecting",
                state.transport.endpoint(),
                operation
            );
            if let Err(e) = self.reconnect(state).await {
                state.stats.failures += 1;
                return Err(ThzError::communication(
                    format!("{}: reconnect failed: {}", operation, e),
                    0,
                ));
            }
        }

        let first = match self.exchange(state, request).await {
            Ok(payload) => return Ok(payload),
            Err(e) if e.is_recoverable() => e,
            Err(e) => {
                state.stats.failures += 1;
                return Err(e);
            }
        };

        warn!("{} failed: {}; reconnecting and retrying once", operation, first);
        state.stats.retries += 1;
        if let Err(e) = self.reconnect(state).await {
            state.stats.failures += 1;
            return Err(ThzError::communication(
                format!("{} failed ({}), reconnect failed: {}", operation, first, e),
                1,
            ));
        }

        match self.exchange(state, request).await {
            Ok(payload) => {
                info!("{} succeeded after reconnect", operation);
                Ok(payload)
            }
            Err(e) => {
                state.stats.failures += 1;
                Err(ThzError::communication(
                    format!("{} failed after retry: {}", operation, e),
                    2,
                ))
            }
        }
    }

    /// A single request/response round trip
    async fn exchange(&self, state: &mut SessionState<T>, request: &ThzRequest) -> ThzResult<Vec<u8>> {
        let timer = OperationTimer::start(&describe(request));
        if let Some(logger) = &self.logger {
            logger.log_request(request);
        }

        let result = self.transact(&mut state.transport, request).await;

        let duration = timer.stop_and_log(result.is_ok());
        state.stats.exchanges += 1;
        match &result {
            Ok(_) => state.stats.metrics.record_success(duration),
            Err(_) => state.stats.metrics.record_failure(duration),
        }
        result
    }

    async fn transact(&self, transport: &mut T, request: &ThzRequest) -> ThzResult<Vec<u8>> {
        transport.discard_input().await?;
        transport.write(&request.encode()).await?;

        let frame = self.read_frame(transport).await?;
        let response = ThzResponse::decode(&frame)?;
        if let Some(logger) = &self.logger {
            logger.log_response(&response);
        }
        response.into_payload()
    }

    /// Collect bytes until a complete telegram arrived or the read timeout passed
    async fn read_frame(&self, transport: &mut T) -> ThzResult<Vec<u8>> {
        let deadline = Instant::now() + self.settings.read_timeout;
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            while let Some(range) = find_frame(&buffer) {
                if range.start > 0 {
                    debug!("Skipped {} byte(s) before start marker", range.start);
                }
                match decode_frame(&buffer[range.clone()]) {
                    // Noise that happens to be framed by markers; keep scanning.
                    Err(ThzError::Frame { message }) => {
                        debug!("Discarding malformed telegram: {}", message);
                        buffer.drain(..range.end);
                    }
                    _ => return Ok(buffer[range].to_vec()),
                }
            }
            if Instant::now() >= deadline {
                return Err(ThzError::timeout(
                    format!("waiting for response ({} byte(s) received)", buffer.len()),
                    self.settings.read_timeout.as_millis() as u64,
                ));
            }
            buffer.extend(transport.read_available().await?);
        }
    }
}

fn describe(request: &ThzRequest) -> String {
    match request {
        ThzRequest::Read { block } => format!("read block 0x{:04X}", block),
        ThzRequest::Write { command, .. } => format!("write register 0x{:02X}", command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_response, ResponseStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Transport handing out scripted chunks, one per read
    #[derive(Default)]
    struct ChunkedTransport {
        chunks: VecDeque<Vec<u8>>,
        written: Vec<Vec<u8>>,
        alive: bool,
    }

    #[async_trait]
    impl ThzTransport for ChunkedTransport {
        async fn open(&mut self) -> ThzResult<()> {
            self.alive = true;
            Ok(())
        }

        async fn write(&mut self, data: &[u8]) -> ThzResult<()> {
            self.written.push(data.to_vec());
            Ok(())
        }

        async fn read_available(&mut self) -> ThzResult<Vec<u8>> {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(self.chunks.pop_front().unwrap_or_default())
        }

        async fn is_alive(&self) -> bool {
            self.alive
        }

        async fn close(&mut self) -> ThzResult<()> {
            self.alive = false;
            Ok(())
        }

        fn get_stats(&self) -> TransportStats {
            TransportStats::default()
        }

        fn endpoint(&self) -> String {
            "chunked".to_string()
        }
    }

    fn settings() -> SessionSettings {
        SessionSettings {
            read_timeout: Duration::from_millis(50),
            cache_duration: Duration::from_secs(60),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_cache_expiry() {
        let mut cache = BlockCache::new(Duration::from_secs(60));
        cache.insert(0x00FB, vec![0x01]);
        assert_eq!(cache.get(0x00FB), Some(vec![0x01]));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.get(0x00FB).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.get(0x00FB).is_none());

        let mut disabled = BlockCache::new(Duration::ZERO);
        disabled.insert(0x00FB, vec![0x01]);
        assert!(disabled.get(0x00FB).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_assembled_from_chunks() {
        let response = encode_response(ResponseStatus::ReadOk, &[0x00, 0x00, 0x02, 0x1B]);
        let (head, tail) = response.split_at(3);

        let mut transport = ChunkedTransport::default();
        transport.chunks.push_back(vec![0xFF, 0x00]);
        transport.chunks.push_back(head.to_vec());
        transport.chunks.push_back(Vec::new());
        transport.chunks.push_back(tail.to_vec());

        let session = DeviceSession::open(transport, settings()).await.unwrap();
        assert_eq!(session.read_firmware_version().await.unwrap(), "539");
        // Memoized: no second telegram.
        assert_eq!(session.read_firmware_version().await.unwrap(), "539");

        let state = session.state.lock().await;
        assert_eq!(state.transport.written, vec![crate::protocol::build_read(blocks::FIRMWARE)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stray_markers_before_response() {
        let response = encode_response(ResponseStatus::ReadOk, &[0x01, 0x02]);

        let mut transport = ChunkedTransport::default();
        let mut chunk = vec![0x02, 0x41];
        chunk.extend_from_slice(&response);
        transport.chunks.push_back(chunk);
        let mut chunk = vec![0x02, 0x41, 0x03];
        chunk.extend_from_slice(&response);
        transport.chunks.push_back(chunk);

        let session = DeviceSession::open(transport, settings()).await.unwrap();
        assert_eq!(session.read_block(0x00FB).await.unwrap(), vec![0x01, 0x02]);
        assert_eq!(session.read_block(0x00FC).await.unwrap(), vec![0x01, 0x02]);

        let stats = session.stats().await;
        assert_eq!(stats.exchanges, 2);
        assert_eq!(stats.retries, 0);
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_into_communication_error() {
        let session = DeviceSession::open(ChunkedTransport::default(), settings())
            .await
            .unwrap();

        let error = session.read_block(0x00FB).await.unwrap_err();
        assert!(matches!(error, ThzError::Communication { attempts: 2, .. }));

        let stats = session.stats().await;
        assert_eq!(stats.exchanges, 2);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_firmware_block() {
        let mut transport = ChunkedTransport::default();
        transport
            .chunks
            .push_back(encode_response(ResponseStatus::ReadOk, &[0x00, 0x00, 0x02]));

        let session = DeviceSession::open(transport, settings()).await.unwrap();
        assert!(matches!(
            session.read_firmware_version().await,
            Err(ThzError::Decode { expected: 2, actual: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_uninitialized_session() {
        let session = DeviceSession::new(ChunkedTransport::default(), SessionSettings::default());
        assert!(session.register_map().is_err());
        assert!(matches!(
            session.read_value("outsideTemp").await,
            Err(ThzError::Configuration { .. })
        ));
        assert_eq!(session.settings().read_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_describe() {
        assert_eq!(describe(&ThzRequest::new_read(0x00FB)), "read block 0x00FB");
        assert_eq!(
            describe(&ThzRequest::write_register(0x05, 0, &[0x00, 0xD7])),
            "write register 0x05"
        );
    }
}
