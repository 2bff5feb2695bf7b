//! Classification of decoded syscalls into captured transfers.

use mbsniff_common::Direction;

/// Largest transfer that is copied out of the tracee; longer ones are noise.
pub const MAX_TRANSFER: usize = 4096;

/// Syscall arguments recovered from an entry/exit register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallRecord {
    pub id: i64,
    pub fd: i32,
    pub buf: usize,
    pub count: usize,
    pub ret: i64,
}

/// Syscall numbers of `read(2)` and `write(2)` on the traced architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallNumbers {
    pub read: i64,
    pub write: i64,
}

/// Bytes to copy out of the tracee for one syscall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub direction: Direction,
    pub fd: i32,
    pub addr: usize,
    pub len: usize,
}

/// Decide whether a finished syscall moved serial bytes worth capturing.
///
/// Reads use the number of bytes actually returned, writes the requested
/// count. Failed or empty transfers and anything above [`MAX_TRANSFER`] are
/// skipped.
#[must_use]
pub fn classify(record: &SyscallRecord, numbers: SyscallNumbers) -> Option<Transfer> {
    let (direction, len) = if record.id == numbers.read {
        (Direction::Read, usize::try_from(record.ret).ok()?)
    } else if record.id == numbers.write {
        (Direction::Write, record.count)
    } else {
        return None;
    };

    if len == 0 || len > MAX_TRANSFER {
        return None;
    }

    Some(Transfer { direction, fd: record.fd, addr: record.buf, len })
}
