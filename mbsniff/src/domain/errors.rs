//! Structured error types for mbsniff
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use super::types::Pid;
use thiserror::Error;

/// Failure of a single tracer worker. Terminal for that worker only.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("Failed to attach to process {pid}: {source}")]
    Attach { pid: Pid, source: io::Error },

    #[error("Failed to wait for process {pid}: {source}")]
    Wait { pid: Pid, source: io::Error },

    #[error("Failed to set ptrace options on process {pid}: {source}")]
    SetOptions { pid: Pid, source: io::Error },

    #[error("Failed to resume process {pid}: {source}")]
    Resume { pid: Pid, source: io::Error },

    #[error("Failed to read registers of process {pid}: {source}")]
    Registers { pid: Pid, source: io::Error },

    #[error("Failed to read {len} bytes at {addr:#x} from process {pid}: {source}")]
    Memory { pid: Pid, addr: usize, len: usize, source: io::Error },

    #[error("Process {pid} exited before it could be traced")]
    Vanished { pid: Pid },

    #[error("Syscall tracing is not supported on {0}")]
    Unsupported(&'static str),

    #[error("Failed to spawn tracer thread for process {pid}: {source}")]
    Spawn { pid: Pid, source: io::Error },

    #[error("Tracer thread for process {0} panicked")]
    Panicked(Pid),

    #[error("Message channel closed")]
    ChannelClosed,
}

/// Malformed or unreadable sensor/device configuration. Fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_yml::Error },

    #[error("Register {register:#x} is mapped by both '{first}' and '{second}'")]
    DuplicateRegister { register: u16, first: String, second: String },
}

/// Failure while reading or writing recorded messages.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("Malformed record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure to reach the MQTT broker at startup.
#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Invalid MQTT broker url '{0}', expected tcp://host[:port]")]
    InvalidBroker(String),

    #[error("Failed to connect to MQTT broker {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Timed out after {timeout:?} waiting for MQTT broker {broker}")]
    Timeout { broker: String, timeout: Duration },

    #[error("Failed to spawn MQTT thread: {0}")]
    Spawn(io::Error),
}
