//! Syscall tracer
//!
//! One dedicated OS thread per traced process. Each thread attaches with
//! ptrace, steps the tracee from syscall stop to syscall stop, and turns
//! every serial-sized `read`/`write` into a [`Message`](mbsniff_common::Message)
//! on the shared bounded channel.
//!
//! ```text
//! attach ─▶ SIGSTOP ─▶ PTRACE_SYSCALL ─▶ entry stop (save regs)
//!                           ▲                  │
//!                           │                  ▼
//!                     send Message ◀── exit stop (decode, copy bytes)
//! ```
//!
//! The tracee is suspended at every stop until the worker resumes it, so a
//! full channel stalls the traced process's I/O.

pub mod syscall;
pub mod worker;

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
))]
mod regs;
#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
))]
mod session;

pub use syscall::{classify, SyscallNumbers, SyscallRecord, Transfer, MAX_TRANSFER};
pub use worker::{spawn, TracerHandle};
