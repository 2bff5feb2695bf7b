//! Modbus RTU frame parsing for "read holding registers"
//!
//! Both parsers are pure: they look at a byte slice and report whether it
//! holds a complete, checksum-valid frame, needs more bytes, or is garbage.
//!
//! ```text
//! request  (8 bytes):  unit | fc=3 | addr_hi addr_lo | count_hi count_lo | crc_lo crc_hi
//! response (5 + n):    unit | fc=3 | n | n bytes of big-endian registers | crc_lo crc_hi
//! ```

use thiserror::Error;

use crate::crc::crc16;
use crate::READ_HOLDING_REGISTERS;

/// Fixed length of a read-holding-registers request.
pub const REQUEST_LEN: usize = 8;

/// Unit, function code and byte count precede the register data.
const RESPONSE_HEADER_LEN: usize = 3;
const CRC_LEN: usize = 2;

/// Why a candidate frame was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid function code: {0}")]
    InvalidFunctionCode(u8),

    #[error("invalid checksum: received {received:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { received: u16, computed: u16 },
}

/// Result of attempting to parse a frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome<'a, F> {
    /// A complete frame plus whatever bytes followed it.
    Parsed { frame: F, remainder: &'a [u8] },
    /// Not enough bytes yet; keep buffering.
    Incomplete,
    /// The bytes cannot form a valid frame.
    Invalid(FrameError),
}

/// A read-holding-registers request as written by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFrame {
    pub unit: u8,
    pub function_code: u8,
    pub address: u16,
    pub register_count: u16,
    pub checksum: u16,
}

/// A read-holding-registers response as read back from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ResponseFrame {
    pub unit: u8,
    pub function_code: u8,
    pub byte_count: u8,
    pub registers: Vec<u16>,
    pub checksum: u16,
}

fn verify_checksum(covered: &[u8], trailer: [u8; 2]) -> Result<u16, FrameError> {
    let received = u16::from_le_bytes(trailer);
    let computed = crc16(covered);
    if received == computed {
        Ok(received)
    } else {
        Err(FrameError::ChecksumMismatch { received, computed })
    }
}

/// Parse a request from the front of `buf`.
#[must_use]
pub fn parse_request(buf: &[u8]) -> ParseOutcome<'_, RequestFrame> {
    if buf.len() < REQUEST_LEN {
        return ParseOutcome::Incomplete;
    }

    let function_code = buf[1];
    if function_code != READ_HOLDING_REGISTERS {
        return ParseOutcome::Invalid(FrameError::InvalidFunctionCode(function_code));
    }

    let checksum = match verify_checksum(&buf[..6], [buf[6], buf[7]]) {
        Ok(checksum) => checksum,
        Err(e) => return ParseOutcome::Invalid(e),
    };

    ParseOutcome::Parsed {
        frame: RequestFrame {
            unit: buf[0],
            function_code,
            address: u16::from_be_bytes([buf[2], buf[3]]),
            register_count: u16::from_be_bytes([buf[4], buf[5]]),
            checksum,
        },
        remainder: &buf[REQUEST_LEN..],
    }
}

/// Parse a response from the front of `buf`.
///
/// The function code is checked as soon as the three header bytes are
/// present; the checksum only once the full `5 + byte_count` bytes are.
#[must_use]
pub fn parse_response(buf: &[u8]) -> ParseOutcome<'_, ResponseFrame> {
    if buf.len() < RESPONSE_HEADER_LEN {
        return ParseOutcome::Incomplete;
    }

    let function_code = buf[1];
    if function_code != READ_HOLDING_REGISTERS {
        return ParseOutcome::Invalid(FrameError::InvalidFunctionCode(function_code));
    }

    let byte_count = buf[2];
    let data_end = RESPONSE_HEADER_LEN + usize::from(byte_count);
    let frame_len = data_end + CRC_LEN;
    if buf.len() < frame_len {
        return ParseOutcome::Incomplete;
    }

    let checksum = match verify_checksum(&buf[..data_end], [buf[data_end], buf[data_end + 1]]) {
        Ok(checksum) => checksum,
        Err(e) => return ParseOutcome::Invalid(e),
    };

    // An odd trailing byte is covered by the checksum but carries no register.
    let registers = buf[RESPONSE_HEADER_LEN..data_end]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    ParseOutcome::Parsed {
        frame: ResponseFrame { unit: buf[0], function_code, byte_count, registers, checksum },
        remainder: &buf[frame_len..],
    }
}
