//! # Voltage THZ - Async Communication Layer for LWZ/THZ Heat Pumps
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **Version:** 0.1.0
//! **License:** MIT
//!
//! An async Rust implementation of the service-interface protocol spoken by
//! Stiebel Eltron / Tecalor LWZ and THZ heat pumps, reachable through a local
//! serial port or a serial-to-network bridge.
//!
//! ## Features
//!
//! - **🔌 Serial and TCP**: one transport trait, a USB/serial and a TCP implementation
//! - **🧾 Telegram Codec**: framing, XOR checksum and byte escaping
//! - **🔒 Locked Sessions**: one exchange at a time, never interleaved
//! - **🔄 Self-Healing**: liveness check, one reconnect and one retry, then a hard error
//! - **🗃️ Block Cache**: register blocks served from cache for a configurable time
//! - **🧮 Value Codec**: temperatures, bits, quarter-hour times, schedules and enumerations
//! - **🗺️ Firmware Maps**: register layouts selected by the reported firmware version
//! - **🧪 Simulator**: an in-process heat pump with fault injection for tests
//!
//! ## Telegram Types
//!
//! | Direction | Layout |
//! |-----------|--------|
//! | Read request | `[02][00][ADDR_H][ADDR_L][CHK][03]` |
//! | Write request | `[02][01][CMD][OFFSET][VALUE...][CHK][03]` |
//! | Response | `[02][STATUS][DATA...][CHK][03]` |
//!
//! ## Quick Start
//!
//! ### Session Example
//!
//! ```rust,no_run
//! use voltage_thz::{connect, RegisterCatalog, SessionConfig, ThzResult, Value};
//!
//! #[tokio::main]
//! async fn main() -> ThzResult<()> {
//!     let session = connect(&SessionConfig::tcp("192.168.1.50", 2323)).await?;
//!
//!     // Select the register map matching the device firmware
//!     let map = session.initialize(&RegisterCatalog::builtin()?).await?;
//!     println!("Firmware {} with {} registers", map.firmware(), map.len());
//!
//!     // Read a decoded value
//!     let outside = session.read_value("outsideTemp").await?;
//!     println!("Outside temperature: {}", outside);
//!
//!     // Write a setpoint
//!     session.write_value("p01RoomTempDay", &Value::Number(21.5)).await?;
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ### Simulator Example
//!
//! ```rust,no_run
//! use voltage_thz::{BlockBank, RegisterCatalog, ThzTcpSimulator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let map = RegisterCatalog::builtin()?.select("539")?;
//!     let bank = BlockBank::for_register_map(&map, 539)?;
//!
//!     let mut simulator = ThzTcpSimulator::new("127.0.0.1:2323", bank)?;
//!     simulator.start().await?;
//!
//!     // Simulator is now running...
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Application   │    │     Tests       │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Register Map +  │    │   Simulator     │
//! │  Value Codec    │    │                 │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Device Session  │    │   Block Bank    │
//! │ (lock, cache)   │    │   (Storage)     │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │ Telegram Codec  │    │ Telegram Codec  │
//! └─────────────────┘    └─────────────────┘
//!          │                       │
//! ┌─────────────────┐    ┌─────────────────┐
//! │   Transport     │◄──►│   TCP Listener  │
//! │ (Serial / TCP)  │    │   (Async I/O)   │
//! └─────────────────┘    └─────────────────┘
//! ```

/// Core error types and result handling
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod error;

/// THZ telegram definitions, framing and checksum
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod protocol;

/// Serial and TCP transports
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod transport;

/// Locked, caching, self-healing device session
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod session;

/// Register value encoding and decoding
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod codec;

/// Firmware-dependent register maps
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register_map;

/// Session configuration
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod config;

/// Thread-safe block storage for the simulator
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod register_bank;

/// Simulated heat pump over TCP
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod simulator;

/// Utility functions and performance monitoring
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod utils;

/// Logging system for the library
///
/// Author: Evan Liu <evan.liu@voltageenergy.com>
pub mod logging;

// Re-export main types for convenience
pub use error::{ThzError, ThzResult};
pub use protocol::{BlockAddress, ResponseStatus, ThzCommand, ThzRequest, ThzResponse};
pub use transport::{KeepaliveSettings, SerialTransport, TcpTransport, ThzTransport, TransportStats};
pub use session::{connect, DeviceSession, SerialSession, SessionSettings, SessionStats, TcpSession};
pub use codec::{ByteOrder, DecodeKind, EnumTable, Value};
pub use register_map::{RegisterCatalog, RegisterDescriptor, RegisterMap, WriteLayout};
pub use config::{ConnectionConfig, KeepaliveConfig, SessionConfig};
pub use register_bank::{BlockBank, BlockBankStats};
pub use simulator::{SimulatorConfig, SimulatorStats, ThzTcpSimulator};
pub use utils::{OperationTimer, PerformanceMetrics};
pub use logging::{CallbackLogger, LogCallback, LogLevel, LoggingMode};

/// Service interface baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default port of serial-to-network bridges
pub const DEFAULT_TCP_PORT: u16 = 2323;

/// Default time allowed for a complete response telegram
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 500;

/// Default lifetime of a cached register block
pub const DEFAULT_CACHE_DURATION: std::time::Duration = std::time::Duration::from_secs(60);

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage THZ v{} - LWZ/THZ heat pump communication library by Evan Liu", VERSION)
}
