//! Allocation accounting.
//!
//! Every structural allocation in the core goes through a [`MemoryAccount`],
//! which plays the role of the host allocator: `realloc(old, new)` with
//! `old == 0` meaning a fresh block and `new == 0` meaning free.

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Default)]
pub struct MemoryAccount {
    total_bytes: usize,
    limit: Option<usize>,
}

impl MemoryAccount {
    pub fn new(limit: Option<usize>) -> Self {
        MemoryAccount {
            total_bytes: 0,
            limit,
        }
    }

    /// Bytes currently accounted.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    /// Resize an accounted block from `old` to `new` bytes.
    ///
    /// Shrinking never fails. On failure nothing is recorded.
    pub fn realloc(&mut self, old: usize, new: usize) -> CoreResult<()> {
        let base = self.total_bytes.saturating_sub(old);
        let next = base.checked_add(new).ok_or(CoreError::OutOfMemory)?;
        if new > old {
            if let Some(limit) = self.limit {
                if next > limit {
                    return Err(CoreError::OutOfMemory);
                }
            }
        }
        self.total_bytes = next;
        Ok(())
    }

    /// Account for a fresh block.
    #[inline]
    pub fn alloc(&mut self, bytes: usize) -> CoreResult<()> {
        self.realloc(0, bytes)
    }

    /// Release a block.
    #[inline]
    pub fn free(&mut self, bytes: usize) {
        self.total_bytes = self.total_bytes.saturating_sub(bytes);
    }

    /// Build a `len`-element vector filled with `fill`, charging its size.
    ///
    /// Both the accounting limit and a refused reservation produce
    /// `OutOfMemory`; in either case nothing stays charged.
    pub fn try_vec<T: Clone>(&mut self, len: usize, fill: T) -> CoreResult<Vec<T>> {
        let bytes = vec_bytes::<T>(len).ok_or(CoreError::OutOfMemory)?;
        self.alloc(bytes)?;
        let mut v = Vec::new();
        if v.try_reserve_exact(len).is_err() {
            self.free(bytes);
            return Err(CoreError::OutOfMemory);
        }
        v.resize(len, fill);
        Ok(v)
    }

    /// Release a vector previously built by [`try_vec`](Self::try_vec).
    pub fn free_vec<T>(&mut self, v: Vec<T>) {
        self.free(v.len() * std::mem::size_of::<T>());
    }
}

/// Byte size of `len` elements of `T`, or `None` on overflow.
#[inline]
pub fn vec_bytes<T>(len: usize) -> Option<usize> {
    len.checked_mul(std::mem::size_of::<T>())
}
