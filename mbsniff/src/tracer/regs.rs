//! Per-architecture syscall register layouts
//!
//! Exactly one [`ArchRegs`] implementation is compiled in, chosen by the
//! target architecture. Nothing outside this module knows where a syscall
//! number or argument lives.
//!
//! | arch    | syscall id | fd / buf / count | return |
//! |---------|------------|------------------|--------|
//! | x86_64  | orig_rax   | rdi / rsi / rdx  | rax    |
//! | aarch64 | x8         | x0 / x1 / x2     | x0     |
//! | arm     | r7         | r0 / r1 / r2     | r0     |
//!
//! On aarch64 and arm the first argument register is overwritten by the
//! return value, hence the entry snapshot is kept until the exit stop.

#![allow(unsafe_code)] // PTRACE_GETREGS / PTRACE_GETREGSET fill raw structs

use std::io;

use super::syscall::{SyscallNumbers, SyscallRecord};
use crate::domain::Pid;

/// Register snapshot taken at a syscall stop.
pub trait SyscallRegisters: Sized + Copy {
    /// `read(2)` and `write(2)` numbers for this ABI.
    const NUMBERS: SyscallNumbers;

    /// Fetch the registers of a stopped tracee.
    fn fetch(pid: Pid) -> io::Result<Self>;

    /// Combine entry and exit snapshots of the same syscall.
    fn decode(entry: &Self, exit: &Self) -> SyscallRecord;
}

fn check(rc: libc::c_long) -> io::Result<()> {
    if rc == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(target_arch = "x86_64")]
mod arch {
    use std::mem::MaybeUninit;
    use std::{io, ptr};

    use super::{check, Pid, SyscallNumbers, SyscallRecord, SyscallRegisters};

    #[derive(Clone, Copy)]
    pub struct Regs(libc::user_regs_struct);

    impl SyscallRegisters for Regs {
        const NUMBERS: SyscallNumbers =
            SyscallNumbers { read: libc::SYS_read, write: libc::SYS_write };

        fn fetch(pid: Pid) -> io::Result<Self> {
            let mut regs = MaybeUninit::<libc::user_regs_struct>::uninit();
            // SAFETY: PTRACE_GETREGS writes a full user_regs_struct on success
            let rc = unsafe {
                libc::ptrace(
                    libc::PTRACE_GETREGS,
                    pid.0,
                    ptr::null_mut::<libc::c_void>(),
                    regs.as_mut_ptr(),
                )
            };
            check(rc)?;
            // SAFETY: initialized by the successful call above
            Ok(Regs(unsafe { regs.assume_init() }))
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        fn decode(entry: &Self, exit: &Self) -> SyscallRecord {
            SyscallRecord {
                id: entry.0.orig_rax as i64,
                fd: entry.0.rdi as i32,
                buf: entry.0.rsi as usize,
                count: entry.0.rdx as usize,
                ret: exit.0.rax as i64,
            }
        }
    }
}

#[cfg(target_arch = "aarch64")]
mod arch {
    use std::io;
    use std::mem::{self, MaybeUninit};

    use super::{check, Pid, SyscallNumbers, SyscallRecord, SyscallRegisters};

    /// Regset note type for the general purpose registers.
    const NT_PRSTATUS: usize = 1;

    #[derive(Clone, Copy)]
    pub struct Regs(libc::user_regs_struct);

    impl SyscallRegisters for Regs {
        const NUMBERS: SyscallNumbers =
            SyscallNumbers { read: libc::SYS_read, write: libc::SYS_write };

        fn fetch(pid: Pid) -> io::Result<Self> {
            let mut regs = MaybeUninit::<libc::user_regs_struct>::uninit();
            let mut iov = libc::iovec {
                iov_base: regs.as_mut_ptr().cast(),
                iov_len: mem::size_of::<libc::user_regs_struct>(),
            };
            // SAFETY: the iovec points at a buffer large enough for NT_PRSTATUS
            let rc = unsafe {
                libc::ptrace(
                    libc::PTRACE_GETREGSET,
                    pid.0,
                    NT_PRSTATUS as *mut libc::c_void,
                    &mut iov as *mut libc::iovec,
                )
            };
            check(rc)?;
            // SAFETY: initialized by the successful call above
            Ok(Regs(unsafe { regs.assume_init() }))
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        fn decode(entry: &Self, exit: &Self) -> SyscallRecord {
            SyscallRecord {
                id: entry.0.regs[8] as i64,
                fd: entry.0.regs[0] as i32,
                buf: entry.0.regs[1] as usize,
                count: entry.0.regs[2] as usize,
                ret: exit.0.regs[0] as i64,
            }
        }
    }
}

#[cfg(target_arch = "arm")]
mod arch {
    use std::mem::MaybeUninit;
    use std::{io, ptr};

    use super::{check, Pid, SyscallNumbers, SyscallRecord, SyscallRegisters};

    /// `struct user_regs` from `<sys/user.h>`: r0-r15, cpsr, orig_r0.
    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct Regs {
        uregs: [libc::c_ulong; 18],
    }

    impl SyscallRegisters for Regs {
        const NUMBERS: SyscallNumbers =
            SyscallNumbers { read: libc::SYS_read as i64, write: libc::SYS_write as i64 };

        fn fetch(pid: Pid) -> io::Result<Self> {
            let mut regs = MaybeUninit::<Regs>::uninit();
            // SAFETY: PTRACE_GETREGS writes 18 words on success
            let rc = unsafe {
                libc::ptrace(
                    libc::PTRACE_GETREGS,
                    pid.0,
                    ptr::null_mut::<libc::c_void>(),
                    regs.as_mut_ptr(),
                )
            };
            check(rc)?;
            // SAFETY: initialized by the successful call above
            Ok(unsafe { regs.assume_init() })
        }

        #[allow(clippy::cast_possible_wrap)]
        fn decode(entry: &Self, exit: &Self) -> SyscallRecord {
            SyscallRecord {
                id: i64::from(entry.uregs[7]),
                fd: entry.uregs[0] as i32,
                buf: entry.uregs[1] as usize,
                count: entry.uregs[2] as usize,
                // Sign-extend so errno returns stay negative
                ret: i64::from(exit.uregs[0] as i32),
            }
        }
    }
}

pub use arch::Regs as ArchRegs;
