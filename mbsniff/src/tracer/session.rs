//! Scoped ptrace attachment
//!
//! A [`PtraceSession`] exists only while the tracee is attached: creating one
//! attaches and waits for the initial stop, dropping one detaches. The kernel
//! ties a ptrace relationship to the attaching thread, so a session must be
//! created, used and dropped on the same OS thread.

#![allow(unsafe_code)] // raw ptrace/waitpid/process_vm_readv calls

use std::io;
use std::ptr;

use libc::{c_int, c_void};
use log::{debug, info};

use super::regs::SyscallRegisters;
use crate::domain::{Pid, TraceError};

#[cfg(target_env = "musl")]
type Request = c_int;
#[cfg(not(target_env = "musl"))]
type Request = libc::c_uint;

/// Why `waitpid` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stop {
    /// Syscall entry or exit stop (`SIGTRAP | 0x80` under `TRACESYSGOOD`).
    Syscall,
    /// Signal-delivery stop; the signal is suppressed unless re-injected.
    Signal(c_int),
    /// Tracee exited with this status.
    Exited(c_int),
    /// Tracee was killed by this signal.
    Killed(c_int),
}

fn request(req: Request, pid: Pid, addr: *mut c_void, data: *mut c_void) -> io::Result<()> {
    // SAFETY: none of the requests issued here read or write through addr/data
    // beyond what the caller provides.
    let rc = unsafe { libc::ptrace(req, pid.0, addr, data) };
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[allow(clippy::cast_sign_loss)]
fn word(value: c_int) -> *mut c_void {
    value as usize as *mut c_void
}

pub struct PtraceSession {
    pid: Pid,
}

impl PtraceSession {
    /// Attach to `pid` and block until it is stopped.
    ///
    /// # Errors
    /// Returns [`TraceError::Attach`] if the kernel refuses the attach, or a
    /// wait error if the tracee cannot be observed stopping.
    pub fn attach(pid: Pid) -> Result<Self, TraceError> {
        info!("Attaching to {pid}");
        request(libc::PTRACE_ATTACH, pid, ptr::null_mut(), ptr::null_mut())
            .map_err(|source| TraceError::Attach { pid, source })?;

        // From here on Drop detaches, whatever happens next
        let session = Self { pid };
        session.wait_attached()?;
        Ok(session)
    }

    fn wait_attached(&self) -> Result<(), TraceError> {
        loop {
            match self.wait()? {
                Stop::Signal(libc::SIGSTOP | libc::SIGTRAP) | Stop::Syscall => return Ok(()),
                Stop::Signal(sig) => {
                    // Some other signal won the race with our SIGSTOP
                    debug!("{} stopped by signal {sig} while attaching, passing it on", self.pid);
                    request(libc::PTRACE_CONT, self.pid, ptr::null_mut(), word(sig))
                        .map_err(|source| TraceError::Resume { pid: self.pid, source })?;
                }
                Stop::Exited(_) | Stop::Killed(_) => return Err(TraceError::Vanished { pid: self.pid }),
            }
        }
    }

    /// Mark syscall stops with bit 7 so they can't be confused with SIGTRAP.
    pub fn set_options(&self) -> Result<(), TraceError> {
        request(libc::PTRACE_SETOPTIONS, self.pid, ptr::null_mut(), word(libc::PTRACE_O_TRACESYSGOOD))
            .map_err(|source| TraceError::SetOptions { pid: self.pid, source })
    }

    /// Resume until the next syscall entry/exit, delivering `signal` (0 = none).
    pub fn resume_syscall(&self, signal: c_int) -> Result<(), TraceError> {
        request(libc::PTRACE_SYSCALL, self.pid, ptr::null_mut(), word(signal))
            .map_err(|source| TraceError::Resume { pid: self.pid, source })
    }

    /// Block until the tracee changes state.
    pub fn wait(&self) -> Result<Stop, TraceError> {
        let mut status: c_int = 0;
        loop {
            // SAFETY: status is a valid out pointer
            let rc = unsafe { libc::waitpid(self.pid.0, &mut status, libc::__WALL) };
            if rc != -1 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(TraceError::Wait { pid: self.pid, source: err });
            }
        }

        if libc::WIFEXITED(status) {
            Ok(Stop::Exited(libc::WEXITSTATUS(status)))
        } else if libc::WIFSIGNALED(status) {
            Ok(Stop::Killed(libc::WTERMSIG(status)))
        } else if libc::WIFSTOPPED(status) {
            let sig = libc::WSTOPSIG(status);
            if sig == libc::SIGTRAP | 0x80 {
                Ok(Stop::Syscall)
            } else {
                Ok(Stop::Signal(sig))
            }
        } else {
            Err(TraceError::Wait {
                pid: self.pid,
                source: io::Error::other(format!("unexpected wait status {status:#x}")),
            })
        }
    }

    /// Registers of the stopped tracee.
    pub fn registers<R: SyscallRegisters>(&self) -> Result<R, TraceError> {
        R::fetch(self.pid).map_err(|source| TraceError::Registers { pid: self.pid, source })
    }

    /// Copy `len` bytes starting at `addr` out of the tracee.
    pub fn read_memory(&self, addr: usize, len: usize) -> Result<Vec<u8>, TraceError> {
        let mut buf = vec![0u8; len];
        let local = libc::iovec { iov_base: buf.as_mut_ptr().cast(), iov_len: len };
        let remote = libc::iovec { iov_base: addr as *mut c_void, iov_len: len };

        // SAFETY: local covers exactly `len` writable bytes owned by `buf`
        let n = unsafe { libc::process_vm_readv(self.pid.0, &local, 1, &remote, 1, 0) };

        let memory_error = |source| TraceError::Memory { pid: self.pid, addr, len, source };
        match usize::try_from(n) {
            Err(_) => Err(memory_error(io::Error::last_os_error())),
            Ok(read) if read != len => Err(memory_error(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read of {read} bytes"),
            ))),
            Ok(_) => Ok(buf),
        }
    }
}

impl Drop for PtraceSession {
    fn drop(&mut self) {
        match request(libc::PTRACE_DETACH, self.pid, ptr::null_mut(), ptr::null_mut()) {
            Ok(()) => info!("Detached from {}", self.pid),
            // ESRCH: already gone, or running and not in a ptrace-stop
            Err(e) => debug!("Detach from {} failed: {e}", self.pid),
        }
    }
}
