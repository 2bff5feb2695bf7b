//! Quantity codec: register window → scaled physical value.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("quantity {register:#x} spans {expected} registers, got {actual}")]
    SizeMismatch { register: u16, expected: usize, actual: usize },

    #[error("unsupported quantity size {0} (must be 1, 2 or 4 registers)")]
    UnsupportedSize(u8),
}

/// Number of consecutive 16-bit registers a quantity occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(try_from = "u8", into = "u8")
)]
pub enum QuantitySize {
    /// 16-bit signed
    One,
    /// 32-bit signed
    Two,
    /// 64-bit signed
    Four,
}

impl QuantitySize {
    #[must_use]
    pub fn registers(self) -> usize {
        match self {
            QuantitySize::One => 1,
            QuantitySize::Two => 2,
            QuantitySize::Four => 4,
        }
    }
}

impl TryFrom<u8> for QuantitySize {
    type Error = QuantityError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(QuantitySize::One),
            2 => Ok(QuantitySize::Two),
            4 => Ok(QuantitySize::Four),
            other => Err(QuantityError::UnsupportedSize(other)),
        }
    }
}

impl From<QuantitySize> for u8 {
    fn from(size: QuantitySize) -> Self {
        match size {
            QuantitySize::One => 1,
            QuantitySize::Two => 2,
            QuantitySize::Four => 4,
        }
    }
}

#[cfg(feature = "serde")]
fn default_offset() -> f64 {
    0.0
}

/// A physical measurement mapped onto a register window.
///
/// Decoded as `(signed(registers) + offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Quantity {
    pub register: u16,
    pub size: QuantitySize,
    pub scale: f64,
    #[cfg_attr(feature = "serde", serde(default = "default_offset"))]
    pub offset: f64,
}

impl Quantity {
    #[must_use]
    pub fn new(register: u16, size: QuantitySize, scale: f64, offset: f64) -> Self {
        Self { register, size, scale, offset }
    }

    /// Stable identifier used by sinks, e.g. `0x9c72`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{:#x}", self.register)
    }

    /// Decode `registers`, which must be exactly this quantity's window.
    ///
    /// # Errors
    /// Returns [`QuantityError::SizeMismatch`] if the slice length differs
    /// from the configured size.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
    pub fn decode(&self, registers: &[u16]) -> Result<Reading, QuantityError> {
        let expected = self.size.registers();
        if registers.len() != expected {
            return Err(QuantityError::SizeMismatch {
                register: self.register,
                expected,
                actual: registers.len(),
            });
        }

        let raw = match registers {
            [a] => f64::from(i16::from_be_bytes(a.to_be_bytes())),
            [a, b] => f64::from(((u32::from(*a) << 16) | u32::from(*b)) as i32),
            [a, b, c, d] => {
                let bits = (u64::from(*a) << 48)
                    | (u64::from(*b) << 32)
                    | (u64::from(*c) << 16)
                    | u64::from(*d);
                bits as i64 as f64
            }
            _ => unreachable!("length checked against QuantitySize"),
        };

        Ok(Reading { quantity: *self, value: (raw + self.offset) * self.scale, raw: registers.to_vec() })
    }
}

/// One decoded value together with the registers it came from.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Reading {
    pub quantity: Quantity,
    pub value: f64,
    pub raw: Vec<u16>,
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "register={} value={:.3}", self.quantity.key(), self.value)
    }
}
