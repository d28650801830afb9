/// THZ telegram definitions and codec
///
/// This module contains the wire format spoken by LWZ/THZ heat pumps on their
/// service interface: command and status codes, request/response structures,
/// the XOR checksum and the byte-escaping applied between the frame markers.
///
/// ```text
/// request  (read):  [STX][0x00][ADDR_H][ADDR_L][CHK][ETX]
/// request  (write): [STX][0x01][CMD][OFFSET][VALUE...][CHK][ETX]
/// response:         [STX][STATUS][DATA...][CHK][ETX]
/// ```
///
/// CHK is the XOR of every byte between STX and CHK. Everything between the
/// markers, checksum included, is escaped.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ThzError, ThzResult};

/// Address of a register block (2 bytes on the wire, big-endian)
pub type BlockAddress = u16;

/// Start-of-telegram marker
pub const START_MARKER: u8 = 0x02;

/// End-of-telegram marker
pub const END_MARKER: u8 = 0x03;

/// Escape marker, followed by the escaped byte XOR [`ESCAPE_MASK`]
pub const ESCAPE_MARKER: u8 = 0x10;

/// Mask applied to escaped bytes
pub const ESCAPE_MASK: u8 = 0x20;

/// Smallest valid response telegram: STX, STATUS, CHK, ETX
pub const MIN_RESPONSE_LENGTH: usize = 4;

/// Telegram command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ThzCommand {
    /// Read a register block (0x00)
    Read = 0x00,
    /// Write a register (0x01)
    Write = 0x01,
}

impl ThzCommand {
    /// Convert from u8 to ThzCommand
    pub fn from_u8(value: u8) -> ThzResult<Self> {
        match value {
            0x00 => Ok(ThzCommand::Read),
            0x01 => Ok(ThzCommand::Write),
            _ => Err(ThzError::device_status(ResponseStatus::UnknownCommand.to_u8())),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ThzCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThzCommand::Read => "Read Block",
            ThzCommand::Write => "Write Register",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Status byte of a response telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseStatus {
    /// Read request answered
    ReadOk = 0x00,
    /// Write request acknowledged
    WriteOk = 0x80,
    TimingIssue = 0x01,
    RequestChecksumError = 0x02,
    UnknownCommand = 0x03,
    UnknownRegister = 0x04,
}

impl ResponseStatus {
    /// Convert from u8 to ResponseStatus
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ResponseStatus::ReadOk),
            0x80 => Some(ResponseStatus::WriteOk),
            0x01 => Some(ResponseStatus::TimingIssue),
            0x02 => Some(ResponseStatus::RequestChecksumError),
            0x03 => Some(ResponseStatus::UnknownCommand),
            0x04 => Some(ResponseStatus::UnknownRegister),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Whether the device accepted the request
    pub fn is_success(self) -> bool {
        matches!(self, ResponseStatus::ReadOk | ResponseStatus::WriteOk)
    }

    /// Get human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ResponseStatus::ReadOk => "Read request answered",
            ResponseStatus::WriteOk => "Write request acknowledged",
            ResponseStatus::TimingIssue => "Timing issue",
            ResponseStatus::RequestChecksumError => "CRC error in request",
            ResponseStatus::UnknownCommand => "Unknown command",
            ResponseStatus::UnknownRegister => "Unknown register request",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status 0x{:02X}: {}", self.to_u8(), self.description())
    }
}

/// THZ request telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThzRequest {
    /// Read a whole register block
    Read { block: BlockAddress },
    /// Write a register; `payload` is `[write_offset][value bytes...]`
    Write { command: u8, payload: Vec<u8> },
}

impl ThzRequest {
    /// Create a new block read request
    pub fn new_read(block: BlockAddress) -> Self {
        ThzRequest::Read { block }
    }

    /// Create a new write request from a raw payload
    pub fn new_write(command: u8, payload: Vec<u8>) -> Self {
        ThzRequest::Write { command, payload }
    }

    /// Create a write request placing `value` at `write_offset`
    pub fn write_register(command: u8, write_offset: u8, value: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(value.len() + 1);
        payload.push(write_offset);
        payload.extend_from_slice(value);
        ThzRequest::Write { command, payload }
    }

    pub fn command(&self) -> ThzCommand {
        match self {
            ThzRequest::Read { .. } => ThzCommand::Read,
            ThzRequest::Write { .. } => ThzCommand::Write,
        }
    }

    /// Unescaped telegram content between STX and CHK
    pub fn content(&self) -> Vec<u8> {
        match self {
            ThzRequest::Read { block } => {
                let [high, low] = block.to_be_bytes();
                vec![ThzCommand::Read.to_u8(), high, low]
            }
            ThzRequest::Write { command, payload } => {
                let mut content = Vec::with_capacity(payload.len() + 2);
                content.push(ThzCommand::Write.to_u8());
                content.push(*command);
                content.extend_from_slice(payload);
                content
            }
        }
    }

    /// Encode to a complete wire telegram
    pub fn encode(&self) -> Vec<u8> {
        encode_frame(&self.content())
    }

    /// Decode a request telegram (device side)
    ///
    /// Telegrams with an unknown command byte yield a
    /// [`ThzError::DeviceStatus`] carrying the `UnknownCommand` status the
    /// device would answer with.
    pub fn decode(frame: &[u8]) -> ThzResult<Self> {
        let content = decode_frame(frame)?;
        match ThzCommand::from_u8(content[0])? {
            ThzCommand::Read => {
                if content.len() != 3 {
                    return Err(ThzError::frame(format!(
                        "Read request carries {} content bytes, expected 3",
                        content.len()
                    )));
                }
                Ok(ThzRequest::Read {
                    block: u16::from_be_bytes([content[1], content[2]]),
                })
            }
            ThzCommand::Write => {
                if content.len() < 2 {
                    return Err(ThzError::frame("Write request without command byte"));
                }
                Ok(ThzRequest::Write {
                    command: content[1],
                    payload: content[2..].to_vec(),
                })
            }
        }
    }
}

/// THZ response telegram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThzResponse {
    pub status: u8,
    pub payload: Vec<u8>,
}

impl ThzResponse {
    /// Create a successful read response
    pub fn new_read(payload: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::ReadOk.to_u8(),
            payload,
        }
    }

    /// Create a write acknowledgement echoing `payload`
    pub fn new_write_ack(payload: Vec<u8>) -> Self {
        Self {
            status: ResponseStatus::WriteOk.to_u8(),
            payload,
        }
    }

    /// Create an error response without payload
    pub fn new_error(status: ResponseStatus) -> Self {
        Self {
            status: status.to_u8(),
            payload: Vec::new(),
        }
    }

    /// Whether the status byte signals success
    pub fn is_success(&self) -> bool {
        ResponseStatus::from_u8(self.status).map_or(false, ResponseStatus::is_success)
    }

    /// Get the device error, if any
    pub fn get_error(&self) -> Option<ThzError> {
        if self.is_success() {
            None
        } else {
            Some(ThzError::device_status(self.status))
        }
    }

    /// Encode to a complete wire telegram
    pub fn encode(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(self.payload.len() + 1);
        content.push(self.status);
        content.extend_from_slice(&self.payload);
        encode_frame(&content)
    }

    /// Decode a response telegram without interpreting the status byte
    pub fn decode(frame: &[u8]) -> ThzResult<Self> {
        if frame.len() < MIN_RESPONSE_LENGTH {
            return Err(ThzError::frame(format!(
                "Response too short: {} bytes",
                frame.len()
            )));
        }
        let content = decode_frame(frame)?;
        Ok(Self {
            status: content[0],
            payload: content[1..].to_vec(),
        })
    }

    /// Consume the response, returning the payload or the device error
    pub fn into_payload(self) -> ThzResult<Vec<u8>> {
        match self.get_error() {
            Some(error) => Err(error),
            None => Ok(self.payload),
        }
    }
}

/// XOR checksum over unescaped telegram content
pub fn checksum(content: &[u8]) -> u8 {
    content.iter().fold(0u8, |acc, byte| acc ^ byte)
}

fn is_reserved(byte: u8) -> bool {
    matches!(byte, START_MARKER | END_MARKER | ESCAPE_MARKER)
}

/// Escape reserved bytes for transmission inside a frame
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len() + data.len() / 8);
    for &byte in data {
        if is_reserved(byte) {
            escaped.push(ESCAPE_MARKER);
            escaped.push(byte ^ ESCAPE_MASK);
        } else {
            escaped.push(byte);
        }
    }
    escaped
}

/// Reverse [`escape`]
///
/// A dangling escape marker, or one followed by a byte that does not encode a
/// reserved byte, is a frame error.
pub fn unescape(data: &[u8]) -> ThzResult<Vec<u8>> {
    let mut unescaped = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte != ESCAPE_MARKER {
            unescaped.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&code) if is_reserved(code ^ ESCAPE_MASK) => unescaped.push(code ^ ESCAPE_MASK),
            Some(&code) => {
                return Err(ThzError::frame(format!(
                    "Invalid escape sequence 10 {:02X}",
                    code
                )))
            }
            None => return Err(ThzError::frame("Dangling escape marker")),
        }
    }
    Ok(unescaped)
}

/// Wrap telegram content: append checksum, escape, add markers
pub fn encode_frame(content: &[u8]) -> Vec<u8> {
    let mut body = content.to_vec();
    body.push(checksum(content));

    let escaped = escape(&body);
    let mut frame = Vec::with_capacity(escaped.len() + 2);
    frame.push(START_MARKER);
    frame.extend_from_slice(&escaped);
    frame.push(END_MARKER);
    frame
}

/// Unwrap a telegram: check markers, unescape, verify checksum
///
/// Returns the content between STX and CHK; never empty.
pub fn decode_frame(frame: &[u8]) -> ThzResult<Vec<u8>> {
    match (frame.first(), frame.last()) {
        (Some(&START_MARKER), Some(&END_MARKER)) if frame.len() >= 2 => {}
        (Some(&START_MARKER), _) => return Err(ThzError::frame("Missing end marker")),
        _ => return Err(ThzError::frame("Missing start marker")),
    }

    let inner = &frame[1..frame.len() - 1];
    if let Some(position) = inner
        .iter()
        .position(|&byte| byte == START_MARKER || byte == END_MARKER)
    {
        return Err(ThzError::frame(format!(
            "Unescaped marker inside telegram at byte {}",
            position + 1
        )));
    }

    let mut body = unescape(inner)?;
    if body.len() < 2 {
        return Err(ThzError::frame(format!(
            "Telegram body too short: {} bytes",
            body.len()
        )));
    }

    let received = body.pop().unwrap_or_default();
    let expected = checksum(&body);
    if expected != received {
        return Err(ThzError::checksum_mismatch(expected, received));
    }
    Ok(body)
}

/// Locate the first complete telegram in a receive buffer
///
/// Markers never appear unescaped inside a telegram, so the telegram starts
/// at the last start marker before the first end marker that follows one.
/// Everything before it is line noise. Returns the index range of the
/// telegram, markers included.
pub fn find_frame(buffer: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut start = None;
    for (index, &byte) in buffer.iter().enumerate() {
        match byte {
            START_MARKER => start = Some(index),
            END_MARKER => {
                if let Some(start) = start {
                    return Some(start..index + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Build a block read telegram
pub fn build_read(block: BlockAddress) -> Vec<u8> {
    ThzRequest::new_read(block).encode()
}

/// Build a write telegram
pub fn build_write(command: u8, payload: &[u8]) -> Vec<u8> {
    ThzRequest::new_write(command, payload.to_vec()).encode()
}

/// Validate a response telegram and return its payload
///
/// Fails on framing, escaping or checksum errors, and when the device reports
/// an error status.
pub fn parse_response(frame: &[u8]) -> ThzResult<Vec<u8>> {
    ThzResponse::decode(frame)?.into_payload()
}

/// Decode a request telegram as the device does
pub fn parse_request(frame: &[u8]) -> ThzResult<ThzRequest> {
    ThzRequest::decode(frame)
}

/// Build a response telegram as the device does
pub fn encode_response(status: ResponseStatus, payload: &[u8]) -> Vec<u8> {
    ThzResponse {
        status: status.to_u8(),
        payload: payload.to_vec(),
    }
    .encode()
}

/// Response telegram whose checksum byte is deliberately wrong
pub fn encode_corrupted_response(response: &ThzResponse) -> Vec<u8> {
    let mut content = Vec::with_capacity(response.payload.len() + 2);
    content.push(response.status);
    content.extend_from_slice(&response.payload);
    let bad_checksum = !checksum(&content);
    content.push(bad_checksum);

    let mut frame = vec![START_MARKER];
    frame.extend(escape(&content));
    frame.push(END_MARKER);
    frame
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use proptest::sample::Index;

    proptest! {
        #[test]
        fn escape_roundtrip(data in vec(any::<u8>(), 0..512)) {
            let escaped = escape(&data);
            prop_assert!(!escaped.contains(&START_MARKER));
            prop_assert!(!escaped.contains(&END_MARKER));
            prop_assert_eq!(unescape(&escaped).unwrap(), data);
        }

        #[test]
        fn single_bit_flip_rejected(
            payload in vec(any::<u8>(), 0..64),
            position in any::<Index>(),
            bit in 0u8..8,
        ) {
            let frame = ThzResponse::new_read(payload.clone()).encode();
            prop_assert_eq!(parse_response(&frame).unwrap(), payload);

            let mut corrupted = frame.clone();
            corrupted[position.index(frame.len())] ^= 1 << bit;
            prop_assert!(parse_response(&corrupted).is_err());
        }

        #[test]
        fn noise_before_frame_is_skipped(
            noise in vec(any::<u8>(), 0..16),
            payload in vec(any::<u8>(), 0..32),
        ) {
            let frame = ThzResponse::new_read(payload).encode();
            let mut buffer: Vec<u8> = noise.into_iter().filter(|&b| b != END_MARKER).collect();
            buffer.extend_from_slice(&frame);
            let range = find_frame(&buffer).unwrap();
            prop_assert_eq!(&buffer[range], frame.as_slice());
        }
    }
}
