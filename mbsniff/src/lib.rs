//! # mbsniff - Passive Modbus RTU Sniffer
//!
//! Observes the serial traffic of running processes by tracing their
//! `read(2)`/`write(2)` syscalls, reassembles Modbus RTU "read holding
//! registers" exchanges from the captured bytes, and decodes configured
//! register windows into physical values. The traced processes are never
//! modified and the serial line is never touched.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────┐     ┌──────────────────────────────┐
//! │  traced process (PID A, B…)  │     │   recorded capture (--from)  │
//! └──────────────┬───────────────┘     └──────────────┬───────────────┘
//!                │ ptrace syscall stops               │ one line per message
//!                ▼                                    ▼
//!        tracer-<pid> threads                   replay thread
//!                │                                    │
//!                └─────────────┬──────────────────────┘
//!                              ▼
//!                 bounded crossbeam channel of Message
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │ dispatch: route ─▶ Decoder per link ─▶ ReadingEvent ─▶ sinks        │
//! │                                   │                 ├─ status board │
//! │                                   └─ recorder (--to)└─ publisher    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                 axum status API (--http), tokio runtime
//! ```
//!
//! ## Module Structure
//!
//! - [`tracer`]: ptrace sessions, per-architecture register decoding, worker threads
//! - [`dispatch`]: routing of messages to links and fan-out of readings
//! - [`sinks`]: status board, HTTP endpoint and topic publisher
//! - [`record`]: line-oriented capture format for `--to` / `--from`
//! - [`config`]: sensor and device YAML files
//! - [`process_lookup`] and [`preflight`]: target resolution and permission checks
//! - [`cli`]: command-line arguments
//! - [`domain`]: identifier newtypes and error enums
//!
//! Frame parsing, CRC, quantities, filters and the per-link decoder live in
//! the OS-independent `mbsniff-common` crate.

pub mod cli;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod preflight;
pub mod process_lookup;
pub mod record;
pub mod sinks;
pub mod tracer;
