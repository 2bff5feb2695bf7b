//! Tracer worker threads

use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use log::{error, info};
use mbsniff_common::Message;

use crate::domain::{Pid, TraceError};

/// A running tracer thread.
pub struct TracerHandle {
    pid: Pid,
    handle: JoinHandle<Result<(), TraceError>>,
}

impl TracerHandle {
    #[must_use]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Wait for the worker to finish and return how it ended.
    ///
    /// # Errors
    /// Returns the worker's tracing error, or [`TraceError::Panicked`].
    pub fn join(self) -> Result<(), TraceError> {
        let pid = self.pid;
        self.handle.join().unwrap_or(Err(TraceError::Panicked(pid)))
    }
}

/// Start tracing `pid` on a fresh, dedicated thread.
///
/// The ptrace session never leaves that thread. Failures inside the worker
/// are logged once and end only that worker.
///
/// # Errors
/// Returns [`TraceError::Unsupported`] immediately on platforms without
/// syscall tracing, or [`TraceError::Spawn`] if the thread cannot start.
pub fn spawn(pid: Pid, tx: Sender<Message>) -> Result<TracerHandle, TraceError> {
    if !SUPPORTED {
        return Err(TraceError::Unsupported(std::env::consts::ARCH));
    }

    let handle = thread::Builder::new()
        .name(format!("tracer-{}", pid.0))
        .spawn(move || {
            let result = trace(pid, &tx);
            match &result {
                Ok(()) => info!("Tracer for {pid} finished"),
                Err(e) => error!("Tracer for {pid} stopped: {e}"),
            }
            result
        })
        .map_err(|source| TraceError::Spawn { pid, source })?;

    Ok(TracerHandle { pid, handle })
}

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
))]
const SUPPORTED: bool = true;

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
)))]
const SUPPORTED: bool = false;

#[cfg(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
))]
fn trace(pid: Pid, tx: &Sender<Message>) -> Result<(), TraceError> {
    use super::regs::{ArchRegs, SyscallRegisters};
    use super::session::{PtraceSession, Stop};
    use super::syscall::classify;
    use log::debug;

    let session = PtraceSession::attach(pid)?;
    session.set_options()?;

    // Entry snapshot of the syscall in flight, if any
    let mut entry: Option<ArchRegs> = None;
    let mut signal = 0;

    loop {
        session.resume_syscall(signal)?;
        signal = 0;

        match session.wait()? {
            Stop::Syscall => {
                let regs: ArchRegs = session.registers()?;
                let Some(entry_regs) = entry.take() else {
                    entry = Some(regs);
                    continue;
                };

                let record = ArchRegs::decode(&entry_regs, &regs);
                let Some(transfer) = classify(&record, ArchRegs::NUMBERS) else {
                    continue;
                };

                let payload = session.read_memory(transfer.addr, transfer.len)?;
                let message = Message::new(pid.0, transfer.fd, transfer.direction, payload);
                debug!("captured {message}");
                tx.send(message).map_err(|_| TraceError::ChannelClosed)?;
            }
            // Group stop from our own attach or a job-control stop: swallow it
            Stop::Signal(libc::SIGSTOP) => {}
            Stop::Signal(sig) => signal = sig,
            Stop::Exited(code) => {
                info!("{pid} exited with status {code}");
                return Ok(());
            }
            Stop::Killed(sig) => {
                info!("{pid} killed by signal {sig}");
                return Ok(());
            }
        }
    }
}

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
)))]
fn trace(_pid: Pid, _tx: &Sender<Message>) -> Result<(), TraceError> {
    Err(TraceError::Unsupported(std::env::consts::ARCH))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_missing_process_fails_worker_only() {
        let (tx, rx) = bounded(1);
        let result = spawn(Pid(999_999_999), tx).and_then(TracerHandle::join);
        assert!(result.is_err());
        // The worker dropped its sender, so the channel is closed and empty
        assert!(rx.recv().is_err());
    }

    #[cfg(all(
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "arm")
    ))]
    #[test]
    fn test_captures_child_writes() {
        use mbsniff_common::Direction;
        use std::io;
        use std::process::{Command, Stdio};
        use std::time::{Duration, Instant};

        // 01 03 0010 0002 + CRC, as octal escapes for printf
        let request = [0x01, 0x03, 0x00, 0x10, 0x00, 0x02, 0xC5, 0xCE];
        let script = r"while :; do printf '\001\003\000\020\000\002\305\316'; sleep 0.05; done";
        let mut child = Command::new("sh")
            .args(["-c", script])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = Pid(i32::try_from(child.id()).unwrap());

        if let Err(e) = crate::preflight::run_preflight_checks(&[pid]) {
            eprintln!("skipping: {e}");
            let _ = child.kill();
            let _ = child.wait();
            return;
        }

        let (tx, rx) = bounded(16);
        let worker = spawn(pid, tx).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut captured = None;
        while captured.is_none() && Instant::now() < deadline {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(message) if message.direction == Direction::Write && message.payload == request => {
                    captured = Some(message);
                }
                Ok(_) | Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }

        drop(rx);
        let _ = child.kill();
        let result = worker.join();
        let _ = child.wait();

        if let Err(TraceError::Attach { source, .. }) = &result {
            if source.kind() == io::ErrorKind::PermissionDenied {
                eprintln!("skipping: {source}");
                return;
            }
        }

        let message = captured.expect("no Modbus request captured from the child");
        assert_eq!(message.pid, pid.0);
        assert_eq!(message.fd, 1);
        assert!(matches!(result, Ok(()) | Err(TraceError::ChannelClosed)), "{result:?}");
    }
}
