//! Callback logging for telegram traffic
//!
//! The library itself reports through `tracing`. [`CallbackLogger`] is an
//! additional, opt-in channel that hands every request and response telegram
//! of a session to an application callback, either as raw hex, as an
//! interpreted one-liner, or both.

use std::sync::Arc;

use crate::protocol::{ResponseStatus, ThzRequest, ThzResponse};
use crate::utils::format::bytes_to_hex;

/// Log levels for the callback logging system
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Logging mode for telegram display
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// Show the encoded telegram only
    Raw,
    /// Show the decoded fields only
    Interpreted,
    /// Show both; the raw form at debug level
    Both,
}

impl LogLevel {
    /// Convert log level to string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

/// Type alias for log callback functions
///
/// The callback receives a log level and message string
pub type LogCallback = Box<dyn Fn(LogLevel, &str) + Send + Sync>;

/// Logger that uses callbacks for flexible logging
#[derive(Clone)]
pub struct CallbackLogger {
    callback: Option<Arc<LogCallback>>,
    min_level: LogLevel,
    mode: LoggingMode,
}

impl CallbackLogger {
    /// Create a new callback logger
    pub fn new(callback: Option<LogCallback>, min_level: LogLevel) -> Self {
        Self::with_mode(callback, min_level, LoggingMode::Interpreted)
    }

    /// Create a new callback logger with specific mode
    pub fn with_mode(callback: Option<LogCallback>, min_level: LogLevel, mode: LoggingMode) -> Self {
        Self {
            callback: callback.map(Arc::new),
            min_level,
            mode,
        }
    }

    /// Create a logger with timestamped console output
    pub fn console() -> Self {
        let callback: LogCallback = Box::new(|level, message| {
            let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            match level {
                LogLevel::Error | LogLevel::Warn => {
                    eprintln!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
                LogLevel::Info | LogLevel::Debug => {
                    println!("[{}] {}: {}", timestamp, level.as_str(), message)
                }
            }
        });
        Self::new(Some(callback), LogLevel::Info)
    }

    /// Create a logger that outputs nothing (disabled)
    pub fn disabled() -> Self {
        Self::new(None, LogLevel::Error)
    }

    /// Set logging mode
    pub fn set_mode(&mut self, mode: LoggingMode) {
        self.mode = mode;
    }

    /// Get current logging mode
    pub fn get_mode(&self) -> LoggingMode {
        self.mode
    }

    /// Log a message at the specified level
    pub fn log(&self, level: LogLevel, message: &str) {
        if self.should_log(level) {
            if let Some(ref callback) = self.callback {
                callback(level, message);
            }
        }
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn should_log(&self, level: LogLevel) -> bool {
        self.callback.is_some() && level as u8 <= self.min_level as u8
    }

    /// Log raw bytes with a hex dump
    pub fn log_packet(&self, level: LogLevel, direction: &str, data: &[u8]) {
        if !self.should_log(level) {
            return;
        }
        let message = format!("{} packet ({} bytes): {}", direction, data.len(), bytes_to_hex(data));
        self.log(level, &message);
    }

    /// Log a request telegram
    pub fn log_request(&self, request: &ThzRequest) {
        let interpreted = || format!("THZ Request -> {}", Self::describe_request(request));
        let raw = || format!("THZ Request -> Raw: {}", bytes_to_hex(&request.encode()));
        self.emit(interpreted, raw);
    }

    /// Log a response telegram
    pub fn log_response(&self, response: &ThzResponse) {
        let interpreted = || format!("THZ Response <- {}", Self::describe_response(response));
        let raw = || format!("THZ Response <- Raw: {}", bytes_to_hex(&response.encode()));
        self.emit(interpreted, raw);
    }

    fn emit(&self, interpreted: impl Fn() -> String, raw: impl Fn() -> String) {
        match self.mode {
            LoggingMode::Raw => self.info(&raw()),
            LoggingMode::Interpreted => self.info(&interpreted()),
            LoggingMode::Both => {
                self.info(&interpreted());
                self.debug(&raw());
            }
        }
    }

    fn describe_request(request: &ThzRequest) -> String {
        match request {
            ThzRequest::Read { block } => {
                format!("Command: {}, Block: 0x{:04X}", request.command(), block)
            }
            ThzRequest::Write { command, payload } => match payload.split_first() {
                Some((offset, value)) => format!(
                    "Command: {}, Register: 0x{:02X}, Offset: {}, Value: {}",
                    request.command(),
                    command,
                    offset,
                    hex::encode(value)
                ),
                None => format!("Command: {}, Register: 0x{:02X}, No data", request.command(), command),
            },
        }
    }

    fn describe_response(response: &ThzResponse) -> String {
        let status = match ResponseStatus::from_u8(response.status) {
            Some(status) => status.description().to_string(),
            None => format!("Unknown status 0x{:02X}", response.status),
        };
        if response.payload.is_empty() {
            format!("Status: {}, No data", status)
        } else {
            format!(
                "Status: {}, {} byte(s): {}",
                status,
                response.payload.len(),
                hex::encode(&response.payload)
            )
        }
    }
}

impl Default for CallbackLogger {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Convenience macro for creating a simple console logger
#[macro_export]
macro_rules! console_logger {
    () => {
        $crate::logging::CallbackLogger::console()
    };
}

/// Convenience macro for creating a custom logger
#[macro_export]
macro_rules! custom_logger {
    ($callback:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $crate::logging::LogLevel::Info)
    };
    ($callback:expr, $level:expr) => {
        $crate::logging::CallbackLogger::new(Some($callback), $level)
    };
    ($callback:expr, $level:expr, $mode:expr) => {
        $crate::logging::CallbackLogger::with_mode(Some($callback), $level, $mode)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn capturing(mode: LoggingMode, level: LogLevel) -> (CallbackLogger, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let callback: LogCallback = Box::new(move |_, message| {
            sink.lock().unwrap().push(message.to_string());
        });
        (CallbackLogger::with_mode(Some(callback), level, mode), lines)
    }

    #[test]
    fn test_interpreted_request() {
        let (logger, lines) = capturing(LoggingMode::Interpreted, LogLevel::Info);
        logger.log_request(&ThzRequest::new_read(0x00FB));
        logger.log_request(&ThzRequest::write_register(0x05, 0, &[0x00, 0xD7]));

        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Block: 0x00FB"));
        assert!(lines[1].contains("Register: 0x05"));
        assert!(lines[1].contains("00d7"));
    }

    #[test]
    fn test_both_mode_respects_level() {
        let (logger, lines) = capturing(LoggingMode::Both, LogLevel::Info);
        logger.log_response(&ThzResponse::new_read(vec![0x01, 0x02]));
        // The raw line is emitted at debug level and filtered out.
        assert_eq!(lines.lock().unwrap().len(), 1);

        let (logger, lines) = capturing(LoggingMode::Both, LogLevel::Debug);
        logger.log_response(&ThzResponse::new_error(ResponseStatus::UnknownRegister));
        let lines = lines.lock().unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Unknown register request"));
        assert!(lines[1].starts_with("THZ Response <- Raw: 02 04"));
    }

    #[test]
    fn test_disabled_logger_is_silent() {
        let logger = CallbackLogger::disabled();
        logger.error("nothing happens");
        logger.log_packet(LogLevel::Error, "send", &[0x02]);
    }
}
