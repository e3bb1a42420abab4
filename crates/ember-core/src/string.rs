//! Lua string type with SSO (Small String Optimization) and interning.
//!
//! Every string is interned: one object per distinct byte sequence. Short
//! strings (<=40 bytes) are stored inline, longer ones in a boxed slice.
//! The interner's buckets are a weak index; strings die when the collector
//! finds them unreachable.
use crate::config::MINSTRTABSIZE;
use crate::error::{CoreError, CoreResult};
use crate::gc::{GcPhase, GcState, Mark};
use crate::mem::MemoryAccount;
use std::fmt;

/// Maximum bytes for inline (short) string storage.
const SSO_MAX: usize = 40;

/// Largest sizes the interner works with.
pub const MAX_INT: usize = (i32::MAX - 2) as usize;
pub const MAX_SIZET: usize = usize::MAX - 2;

/// An opaque handle to a string in the interner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StringId(pub u32);

/// Internal storage for string data.
#[derive(Clone)]
enum StringData {
    Short { buf: [u8; SSO_MAX], len: u8 },
    Long(Box<[u8]>),
}

/// A Lua string with precomputed hash.
pub struct TString {
    data: StringData,
    hash: u32,
    mark: Mark,
    /// Next string in the same bucket.
    next: Option<StringId>,
}

impl TString {
    fn new(bytes: &[u8], hash: u32, mark: Mark) -> CoreResult<Self> {
        let data = if bytes.len() <= SSO_MAX {
            let mut buf = [0u8; SSO_MAX];
            buf[..bytes.len()].copy_from_slice(bytes);
            StringData::Short {
                buf,
                len: bytes.len() as u8,
            }
        } else {
            let mut v = Vec::new();
            v.try_reserve_exact(bytes.len())
                .map_err(|_| CoreError::OutOfMemory)?;
            v.extend_from_slice(bytes);
            StringData::Long(v.into_boxed_slice())
        };
        Ok(TString {
            data,
            hash,
            mark,
            next: None,
        })
    }

    /// Get the bytes of this string.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.data {
            StringData::Short { buf, len } => &buf[..*len as usize],
            StringData::Long(v) => v,
        }
    }

    /// Get the length in bytes.
    pub fn len(&self) -> usize {
        match &self.data {
            StringData::Short { len, .. } => *len as usize,
            StringData::Long(v) => v.len(),
        }
    }

    /// Returns true if the string is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is a short (inline) string.
    pub fn is_short(&self) -> bool {
        matches!(&self.data, StringData::Short { .. })
    }

    /// Get the precomputed hash.
    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn mark(&self) -> Mark {
        self.mark
    }
}

impl fmt::Debug for TString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(s) = std::str::from_utf8(self.as_bytes()) {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "<binary string len={}>", self.len())
        }
    }
}

/// PUC Lua 5.1 string hash.
///
/// Seeded with the length; long strings only sample every
/// `(len >> 5) + 1`-th byte, walking from the end.
pub fn lua_hash(bytes: &[u8]) -> u32 {
    let len = bytes.len();
    let mut h = len as u32;
    // Hash step: skip some bytes for long strings
    let step = (len >> 5) + 1;
    let mut i = len;
    while i >= step {
        h ^= (h << 5).wrapping_add(h >> 2).wrapping_add(bytes[i - 1] as u32);
        i -= step;
    }
    h
}

/// Accounted size of a string of `len` bytes, or `OversizedString`.
pub fn string_size(len: usize) -> CoreResult<usize> {
    let header = std::mem::size_of::<TString>();
    match len.checked_add(1) {
        Some(n) if n <= MAX_SIZET - header => Ok(header + n),
        _ => Err(CoreError::OversizedString),
    }
}

/// String interner: owns all strings and deduplicates them through a
/// chained hash table whose size is always a power of two.
#[derive(Debug)]
pub struct StringInterner {
    /// All strings, indexed by StringId. Freed slots are `None`.
    strings: Vec<Option<TString>>,
    free: Vec<u32>,
    /// Head of each bucket's chain.
    buckets: Vec<Option<StringId>>,
    /// Number of live strings.
    nuse: usize,
}

impl StringInterner {
    /// Create an empty interner with `size` buckets (rounded up to a power of two).
    pub fn new(size: usize, mem: &mut MemoryAccount) -> CoreResult<Self> {
        let size = size.max(1).next_power_of_two();
        Ok(StringInterner {
            strings: Vec::new(),
            free: Vec::new(),
            buckets: mem.try_vec(size, None)?,
            nuse: 0,
        })
    }

    /// Return the id for `bytes`, creating the string if it does not exist.
    pub fn intern(
        &mut self,
        bytes: &[u8],
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<StringId> {
        let hash = lua_hash(bytes);
        let bucket = hash as usize & (self.buckets.len() - 1);

        let mut cur = self.buckets[bucket];
        while let Some(id) = cur {
            let s = self.entry_mut(id);
            if s.len() == bytes.len() && s.as_bytes() == bytes {
                // a sweep may be about to free it
                gc.revive(&mut s.mark);
                return Ok(id);
            }
            cur = s.next;
        }

        let bytes_charged = string_size(bytes.len())?;
        mem.alloc(bytes_charged)?;
        let mut s = match TString::new(bytes, hash, gc.new_mark()) {
            Ok(s) => s,
            Err(e) => {
                mem.free(bytes_charged);
                return Err(e);
            }
        };
        s.next = self.buckets[bucket];
        let id = match self.free.pop() {
            Some(i) => {
                self.strings[i as usize] = Some(s);
                StringId(i)
            }
            None => {
                self.strings.push(Some(s));
                StringId((self.strings.len() - 1) as u32)
            }
        };
        self.buckets[bucket] = Some(id);
        self.nuse += 1;

        let size = self.buckets.len();
        if self.nuse > size && size <= MAX_INT / 2 {
            // on failure the string stays interned under the old buckets
            self.resize(size * 2, gc, mem)?;
        }
        Ok(id)
    }

    /// Relink every string into `new_size` buckets.
    ///
    /// Returns `Ok(false)` without touching anything while the collector is
    /// sweeping strings.
    pub fn resize(
        &mut self,
        new_size: usize,
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<bool> {
        if gc.phase() == GcPhase::SweepString {
            tracing::debug!(new_size, "string table resize deferred during sweep");
            return Ok(false);
        }
        let new_size = new_size.max(1).next_power_of_two();
        let mut new_buckets: Vec<Option<StringId>> = mem.try_vec(new_size, None)?;
        for head in &self.buckets {
            let mut cur = *head;
            while let Some(id) = cur {
                let s = self.strings[id.0 as usize]
                    .as_mut()
                    .expect("string was freed");
                cur = s.next;
                let h = s.hash as usize & (new_size - 1);
                s.next = new_buckets[h];
                new_buckets[h] = Some(id);
            }
        }
        let old = std::mem::replace(&mut self.buckets, new_buckets);
        tracing::debug!(from = old.len(), to = new_size, nuse = self.nuse, "string table resized");
        mem.free_vec(old);
        Ok(true)
    }

    /// Free dead strings of one bucket and rewhiten the survivors.
    /// Returns the bytes released.
    pub fn sweep_bucket(&mut self, bucket: usize, gc: &GcState, mem: &mut MemoryAccount) -> usize {
        let mut freed = 0;
        let mut prev: Option<StringId> = None;
        let mut cur = self.buckets[bucket];
        while let Some(id) = cur {
            let s = self.strings[id.0 as usize]
                .as_mut()
                .expect("string was freed");
            let next = s.next;
            if gc.is_dead(s.mark) {
                match prev {
                    None => self.buckets[bucket] = next,
                    Some(p) => self.entry_mut(p).next = next,
                }
                if let Some(dead) = self.strings[id.0 as usize].take() {
                    let bytes = std::mem::size_of::<TString>() + dead.len() + 1;
                    mem.free(bytes);
                    freed += bytes;
                }
                self.free.push(id.0);
                self.nuse -= 1;
            } else {
                s.mark.color = gc.white();
                prev = Some(id);
            }
            cur = next;
        }
        freed
    }

    /// Sweep every bucket.
    pub fn sweep_all(&mut self, gc: &GcState, mem: &mut MemoryAccount) -> usize {
        (0..self.buckets.len())
            .map(|b| self.sweep_bucket(b, gc, mem))
            .sum()
    }

    /// Halve the table while it is under a quarter full. Returns true if resized.
    pub fn shrink_if_sparse(&mut self, gc: &GcState, mem: &mut MemoryAccount) -> CoreResult<bool> {
        let mut target = self.buckets.len();
        while self.nuse < target / 4 && target > MINSTRTABSIZE * 2 {
            target /= 2;
        }
        if target == self.buckets.len() {
            return Ok(false);
        }
        self.resize(target, gc, mem)
    }

    /// Make a string permanently reachable.
    pub fn fix(&mut self, id: StringId) {
        self.entry_mut(id).mark.fixed = true;
    }

    /// Get a string by its ID.
    pub fn get(&self, id: StringId) -> &TString {
        self.strings[id.0 as usize]
            .as_ref()
            .expect("string was freed")
    }

    /// Get the raw bytes of a string by its ID.
    pub fn get_bytes(&self, id: StringId) -> &[u8] {
        self.get(id).as_bytes()
    }

    pub fn hash_of(&self, id: StringId) -> u32 {
        self.get(id).hash
    }

    /// True if `id` names a live string.
    pub fn contains(&self, id: StringId) -> bool {
        matches!(self.strings.get(id.0 as usize), Some(Some(_)))
    }

    pub fn mark(&self, id: StringId) -> Option<Mark> {
        self.strings.get(id.0 as usize)?.as_ref().map(|s| s.mark)
    }

    pub fn mark_mut(&mut self, id: StringId) -> Option<&mut Mark> {
        self.strings.get_mut(id.0 as usize)?.as_mut().map(|s| &mut s.mark)
    }

    /// Get the number of strings stored.
    pub fn len(&self) -> usize {
        self.nuse
    }

    /// Returns true if no strings are stored.
    pub fn is_empty(&self) -> bool {
        self.nuse == 0
    }

    /// Number of buckets.
    pub fn size(&self) -> usize {
        self.buckets.len()
    }

    fn entry_mut(&mut self, id: StringId) -> &mut TString {
        self.strings[id.0 as usize]
            .as_mut()
            .expect("string was freed")
    }
}
