//! Response acceptance filters
//!
//! A filter sees every correlated (request, response) pair before any
//! quantity is decoded and may veto it. Filters are owned by exactly one
//! [`Decoder`](crate::Decoder) and may keep history between calls.

use std::fmt;

use crate::frame::{RequestFrame, ResponseFrame};

/// Predicate signature accepted by [`ResponseFilter::Custom`].
pub type FilterFn = dyn FnMut(&RequestFrame, &ResponseFrame) -> bool + Send;

/// Per-link acceptance policy.
#[derive(Default)]
pub enum ResponseFilter {
    /// Accept every response.
    #[default]
    None,
    /// Reject captures the LG ESS power conversion system emits out of band.
    Pcs(PcsFilter),
    /// User-supplied predicate.
    Custom(Box<FilterFn>),
}

impl ResponseFilter {
    #[must_use]
    pub fn custom<F>(predicate: F) -> Self
    where
        F: FnMut(&RequestFrame, &ResponseFrame) -> bool + Send + 'static,
    {
        ResponseFilter::Custom(Box::new(predicate))
    }

    /// Returns `true` if the response should be decoded.
    pub fn accept(&mut self, request: &RequestFrame, response: &ResponseFrame) -> bool {
        match self {
            ResponseFilter::None => true,
            ResponseFilter::Pcs(filter) => filter.accept(request, response),
            ResponseFilter::Custom(predicate) => predicate(request, response),
        }
    }
}

impl fmt::Debug for ResponseFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseFilter::None => f.write_str("None"),
            ResponseFilter::Pcs(filter) => f.debug_tuple("Pcs").field(filter).finish(),
            ResponseFilter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Device-quirk filter for the PCS polling loop.
///
/// The very first response is always rejected to seed a baseline. After that
/// a response is accepted only if it is the full status block (at least
/// [`PcsFilter::MIN_REGISTERS`] registers), answers a request for
/// [`PcsFilter::STATUS_ADDRESS`], and carries a strictly positive 32-bit value
/// in registers 50..52.
#[derive(Debug, Clone, Default)]
pub struct PcsFilter {
    seen_first: bool,
}

impl PcsFilter {
    pub const STATUS_ADDRESS: u16 = 0x9c72;
    pub const MIN_REGISTERS: usize = 92;
    /// Index of the high word of the 32-bit sanity value inside the block.
    pub const CHECK_REGISTER: usize = 50;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::cast_possible_wrap)]
    pub fn accept(&mut self, request: &RequestFrame, response: &ResponseFrame) -> bool {
        if !self.seen_first {
            self.seen_first = true;
            return false;
        }

        if response.registers.len() < Self::MIN_REGISTERS {
            return false;
        }

        if request.address != Self::STATUS_ADDRESS {
            return false;
        }

        let hi = u32::from(response.registers[Self::CHECK_REGISTER]);
        let lo = u32::from(response.registers[Self::CHECK_REGISTER + 1]);
        ((hi << 16) | lo) as i32 > 0
    }
}
