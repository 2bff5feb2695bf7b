//! Captured I/O messages
//!
//! A [`Message`] is produced once per intercepted read/write syscall (or per
//! replayed record) and consumed exactly once by the dispatch loop.

use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// Which way the bytes travelled from the traced process's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes returned by `read(2)`: device → process (responses).
    Read,
    /// Bytes passed to `write(2)`: process → device (requests).
    Write,
}

impl Direction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Read => "read",
            Direction::Write => "write",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a direction string is neither `read` nor `write`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown direction: {0:?}")]
pub struct UnknownDirection(pub String);

impl FromStr for Direction {
    type Err = UnknownDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Direction::Read),
            "write" => Ok(Direction::Write),
            other => Err(UnknownDirection(other.to_string())),
        }
    }
}

/// One captured syscall worth of serial traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: SystemTime,
    pub pid: i32,
    pub fd: i32,
    pub direction: Direction,
    pub payload: Vec<u8>,
}

impl Message {
    #[must_use]
    pub fn new(pid: i32, fd: i32, direction: Direction, payload: Vec<u8>) -> Self {
        Self { timestamp: SystemTime::now(), pid, fd, direction, payload }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pid={} fd={} dir={} len={} buf=", self.pid, self.fd, self.direction, self.payload.len())?;
        for byte in &self.payload {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_parse() {
        assert_eq!("read".parse::<Direction>(), Ok(Direction::Read));
        assert_eq!("write".parse::<Direction>(), Ok(Direction::Write));
        assert!("READ".parse::<Direction>().is_err());
    }

    #[test]
    fn test_message_display() {
        let msg = Message::new(42, 5, Direction::Write, vec![0x01, 0x03, 0xab]);
        assert_eq!(msg.to_string(), "pid=42 fd=5 dir=write len=3 buf=0103ab");
    }
}
