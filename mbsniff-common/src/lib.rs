//! # Shared Protocol Core (Tracer ↔ Decoder)
//!
//! Defines the captured-I/O message type and the Modbus RTU reassembly and
//! decoding engine that consumes it. Nothing in this crate touches the OS:
//! bytes go in, decoded register values come out.
//!
//! ## Pipeline
//!
//! ```text
//!  Message (Write) ──▶ frame::parse_request  ──▶ outstanding request
//!  Message (Read)  ──▶ response buffer ──▶ frame::parse_response
//!                                              │
//!                                              ▼
//!                              filter::ResponseFilter::accept
//!                                              │
//!                                              ▼
//!                           quantity::Quantity::decode ──▶ Reading
//! ```
//!
//! ## Key Types
//!
//! - [`Message`] - One captured read/write syscall with its payload
//! - [`ParseOutcome`] - `Parsed` / `Incomplete` / `Invalid` tri-state
//! - [`Quantity`] - Register window plus linear scale/offset
//! - [`ResponseFilter`] - Per-link acceptance policy
//! - [`Decoder`] - Per-link reassembly and correlation state machine
//!
//! Enable the `serde` feature to derive `Serialize`/`Deserialize` on the
//! configuration and snapshot types.

pub mod crc;
pub mod decoder;
pub mod filter;
pub mod frame;
pub mod message;
pub mod quantity;

pub use decoder::Decoder;
pub use filter::{PcsFilter, ResponseFilter};
pub use frame::{FrameError, ParseOutcome, RequestFrame, ResponseFrame};
pub use message::{Direction, Message};
pub use quantity::{Quantity, QuantityError, QuantitySize, Reading};

/// Modbus function code for "read holding registers", the only one observed.
pub const READ_HOLDING_REGISTERS: u8 = 3;
