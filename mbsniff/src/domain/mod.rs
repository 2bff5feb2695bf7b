//! Domain model for mbsniff
//!
//! Newtypes for the identifiers that flow between tracer workers and the
//! dispatch loop, plus the structured error enums each stage reports.

pub mod errors;
pub mod types;

pub use types::{LinkId, Pid};

pub use errors::{ConfigError, MqttError, RecordError, TraceError};
