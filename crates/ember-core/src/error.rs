//! Error types raised by the object core.

use std::fmt;

/// Why a key was rejected on write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyError {
    Nil,
    NaN,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Nil => write!(f, "nil"),
            KeyError::NaN => write!(f, "NaN"),
        }
    }
}

/// An error from a core operation. None of these are recovered locally;
/// the execution layer decides what the user sees.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// The allocator refused a request (or the configured limit was hit).
    #[error("not enough memory")]
    OutOfMemory,
    /// Nil or NaN used as a table key on write.
    #[error("table index is {0}")]
    InvalidKey(KeyError),
    /// `next` was given a key that is not in the table.
    #[error("invalid key to 'next'")]
    InvalidIteratorKey,
    /// The hash part would need more than 2^26 nodes.
    #[error("table overflow")]
    TableOverflow,
    /// A string length that cannot be represented.
    #[error("memory allocation error: block too big")]
    OversizedString,
}

pub type CoreResult<T> = Result<T, CoreError>;
