//! Hybrid array+hash table for Lua.
//!
//! Positive integer keys live in a dense array part when at least half of
//! `1..=n` is in use; every other key lives in a chained scatter table of
//! `2^k` nodes. Collisions are resolved Brent-style: a key that sits outside
//! its main position is moved to a free node when the owner of that position
//! arrives, so every chain starts at its keys' main position.

use crate::error::{CoreError, CoreResult, KeyError};
use crate::gc::{trace_value, Colored, GcIdx, GcRef, Mark, Traceable};
use crate::mem::MemoryAccount;
use crate::object::{GcKind, ValueKind};
use crate::string::{StringId, StringInterner, MAX_INT};
use crate::value::{raw_equal, TValue};

/// Largest array part is `2^MAXBITS`; the node vector may not exceed it either.
pub const MAXBITS: usize = 26;
pub const MAXASIZE: usize = 1 << MAXBITS;

/// A slot of the hash part.
#[derive(Clone, Copy, Debug)]
pub struct Node {
    pub key: TValue,
    pub value: TValue,
    /// Next node in the collision chain.
    next: Option<u32>,
}

const EMPTY_NODE: Node = Node {
    key: TValue::nil(),
    value: TValue::nil(),
    next: None,
};

/// Location of an existing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Array(usize),
    Node(usize),
}

/// A Lua table: hybrid array + hash.
pub struct Table {
    /// Array part (1-indexed: array[0] corresponds to key 1).
    array: Vec<TValue>,
    /// Hash part; empty or a power of two.
    nodes: Vec<Node>,
    /// Every node at or above this index has a key.
    last_free: usize,
    /// Metatable (if any).
    pub metatable: Option<GcIdx<Table>>,
    /// Cache of absent metamethods; cleared by every write.
    pub flags: u8,
    mark: Mark,
}

impl Table {
    /// Create a new empty table with size hints.
    pub fn new(
        array_hint: usize,
        hash_hint: usize,
        mark: Mark,
        mem: &mut MemoryAccount,
    ) -> CoreResult<Self> {
        let hsize = node_vector_size(hash_hint)?;
        let array = mem.try_vec(array_hint, TValue::nil())?;
        let nodes = match mem.try_vec(hsize, EMPTY_NODE) {
            Ok(n) => n,
            Err(e) => {
                mem.free_vec(array);
                return Err(e);
            }
        };
        Ok(Table {
            array,
            last_free: nodes.len(),
            nodes,
            metatable: None,
            flags: 0,
            mark,
        })
    }

    /// Raw get by TValue key.
    pub fn get(&self, key: TValue, strings: &StringInterner) -> TValue {
        match self.find(key, strings) {
            Some(slot) => self.read(slot),
            None => TValue::nil(),
        }
    }

    /// Fast integer get (1-indexed).
    ///
    /// Keys are numbers, so `key` names the slot of `key as f64`. Beyond
    /// 2^53 neighbouring integers round to the same key, exactly as they do
    /// through [`get`](Self::get).
    pub fn get_int(&self, key: i64) -> TValue {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            return self.array[(key - 1) as usize];
        }
        match self.find_int_node(key) {
            Some(i) => self.nodes[i].value,
            None => TValue::nil(),
        }
    }

    /// Fast string key get.
    pub fn get_str(&self, key: StringId, strings: &StringInterner) -> TValue {
        match self.find_str_node(key, strings) {
            Some(i) => self.nodes[i].value,
            None => TValue::nil(),
        }
    }

    /// Raw set by TValue key.
    ///
    /// Assigning nil to an absent key does nothing. Assigning nil to a
    /// present key keeps its node, so a traversal in progress stays valid.
    pub fn set(
        &mut self,
        key: TValue,
        value: TValue,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        check_key(key)?;
        self.flags = 0;
        if let Some(slot) = self.find(key, strings) {
            self.write(slot, value);
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        self.new_key(key, value, strings, mem)
    }

    /// Fast integer set (1-indexed). Same key rounding as
    /// [`get_int`](Self::get_int).
    pub fn set_int(
        &mut self,
        key: i64,
        value: TValue,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        self.flags = 0;
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            self.array[(key - 1) as usize] = value;
            return Ok(());
        }
        if let Some(i) = self.find_int_node(key) {
            self.nodes[i].value = value;
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        self.new_key(TValue::from_number(key as f64), value, strings, mem)
    }

    /// Fast string key set.
    pub fn set_str(
        &mut self,
        key: StringId,
        value: TValue,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        self.flags = 0;
        if let Some(i) = self.find_str_node(key, strings) {
            self.nodes[i].value = value;
            return Ok(());
        }
        if value.is_nil() {
            return Ok(());
        }
        self.new_key(TValue::from_string_id(key), value, strings, mem)
    }

    /// Get the "length" of a table: some border `n` with `t[n]` non-nil
    /// (or `n == 0`) and `t[n+1]` nil. Tables with holes may have several.
    pub fn length(&self) -> usize {
        let mut j = self.array.len();
        if j > 0 && self.array[j - 1].is_nil() {
            // binary search for a border inside the array
            let mut i = 0;
            while j - i > 1 {
                let m = (i + j) / 2;
                if self.array[m - 1].is_nil() {
                    j = m;
                } else {
                    i = m;
                }
            }
            return i;
        }
        if self.nodes.is_empty() {
            return j;
        }
        self.unbound_search(j)
    }

    fn unbound_search(&self, start: usize) -> usize {
        let mut i = start;
        let mut j = start + 1;
        while !self.get_int(j as i64).is_nil() {
            i = j;
            j *= 2;
            if j > MAX_INT {
                // pathological table: linear scan
                let mut k = 1;
                while !self.get_int(k as i64).is_nil() {
                    k += 1;
                }
                return k - 1;
            }
        }
        while j - i > 1 {
            let m = (i + j) / 2;
            if self.get_int(m as i64).is_nil() {
                j = m;
            } else {
                i = m;
            }
        }
        i
    }

    /// Get the next key-value pair after `key` (nil starts the traversal).
    ///
    /// Keys may be assigned (nil included) during a traversal; adding new
    /// keys invalidates it.
    pub fn next(
        &self,
        key: TValue,
        strings: &StringInterner,
    ) -> CoreResult<Option<(TValue, TValue)>> {
        let start = self.find_index(key, strings)?;
        for i in start..self.array.len() {
            let v = self.array[i];
            if !v.is_nil() {
                return Ok(Some((TValue::from_number((i + 1) as f64), v)));
            }
        }
        for node in self.nodes.iter().skip(start.saturating_sub(self.array.len())) {
            if !node.value.is_nil() {
                return Ok(Some((node.key, node.value)));
            }
        }
        Ok(None)
    }

    /// Position right after `key` in traversal order.
    fn find_index(&self, key: TValue, strings: &StringInterner) -> CoreResult<usize> {
        if key.is_nil() {
            return Ok(0);
        }
        if let Some(k) = key.as_array_index() {
            if k >= 1 && (k as u64) <= self.array.len() as u64 {
                return Ok(k as usize);
            }
        }
        if self.nodes.is_empty() {
            return Err(CoreError::InvalidIteratorKey);
        }
        // a collected string has no hash left to find its chain with
        let hashable = key.as_string_id().map_or(true, |id| strings.contains(id));
        if hashable {
            let mut n = Some(self.main_position(key, strings));
            while let Some(i) = n {
                let nk = self.nodes[i].key;
                // the collector may have turned a removed key into a dead key
                if raw_equal(nk, key) || nk.dead_key_matches(key) {
                    return Ok(self.array.len() + i + 1);
                }
                n = self.nodes[i].next.map(|x| x as usize);
            }
        }
        // a dead key keeps its old chain slot, which a reused string id
        // hashes away from
        self.nodes
            .iter()
            .position(|n| n.key.dead_key_matches(key))
            .map(|i| self.array.len() + i + 1)
            .ok_or(CoreError::InvalidIteratorKey)
    }

    /// Resize both parts. Integer keys in `1..=narray` move into the array,
    /// everything else into the hash part. All-or-nothing: on failure the
    /// table is unchanged.
    pub fn resize(
        &mut self,
        narray: usize,
        nhash: usize,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        let hsize = node_vector_size(nhash.max(self.spilled_entries(narray)))?;
        let mut new_array = mem.try_vec(narray, TValue::nil())?;
        let new_nodes = match mem.try_vec(hsize, EMPTY_NODE) {
            Ok(n) => n,
            Err(e) => {
                mem.free_vec(new_array);
                return Err(e);
            }
        };

        let keep = narray.min(self.array.len());
        new_array[..keep].copy_from_slice(&self.array[..keep]);
        let old_array = std::mem::replace(&mut self.array, new_array);
        let old_nodes = std::mem::replace(&mut self.nodes, new_nodes);
        self.last_free = self.nodes.len();

        for (i, &v) in old_array.iter().enumerate().skip(keep) {
            if !v.is_nil() {
                self.reinsert(TValue::from_number((i + 1) as f64), v, strings);
            }
        }
        for node in old_nodes.iter().rev() {
            if !node.value.is_nil() {
                self.reinsert(node.key, node.value, strings);
            }
        }
        tracing::debug!(
            array = old_array.len(),
            nodes = old_nodes.len(),
            new_array = self.array.len(),
            new_nodes = self.nodes.len(),
            "table resized"
        );
        mem.free_vec(old_array);
        mem.free_vec(old_nodes);
        Ok(())
    }

    /// Resize only the array part.
    pub fn resize_array(
        &mut self,
        narray: usize,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        let nhash = self.nodes.len();
        self.resize(narray, nhash, strings, mem)
    }

    /// Turn collectable keys of removed entries into dead keys.
    /// Returns how many were converted.
    pub fn clear_removed_keys(&mut self) -> usize {
        let mut cleared = 0;
        for node in self.nodes.iter_mut() {
            if node.value.is_nil() && node.key.is_gc() {
                node.key = node.key.to_dead_key();
                cleared += 1;
            }
        }
        cleared
    }

    /// Size of the array part.
    pub fn array_len(&self) -> usize {
        self.array.len()
    }

    /// Number of nodes in the hash part.
    pub fn node_len(&self) -> usize {
        self.nodes.len()
    }

    /// Bytes held by the array and hash parts.
    pub fn storage_bytes(&self) -> usize {
        self.array.len() * std::mem::size_of::<TValue>()
            + self.nodes.len() * std::mem::size_of::<Node>()
    }

    /// Iterate over all values in the array part (for GC traversal).
    pub fn array_values(&self) -> &[TValue] {
        &self.array
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // ---- internals ----

    fn new_key(
        &mut self,
        key: TValue,
        value: TValue,
        strings: &StringInterner,
        mem: &mut MemoryAccount,
    ) -> CoreResult<()> {
        if self.insert_node(key, value, strings) {
            return Ok(());
        }
        self.rehash(key, strings, mem)?;
        // the key may now belong to the array part
        self.set(key, value, strings, mem)
    }

    /// Place a key known to be absent. Returns false when no node is free.
    fn insert_node(&mut self, key: TValue, value: TValue, strings: &StringInterner) -> bool {
        if self.nodes.is_empty() {
            return false;
        }
        let mut mp = self.main_position(key, strings);
        if !self.nodes[mp].value.is_nil() {
            let Some(free) = self.get_free_pos() else {
                return false;
            };
            let other = self.main_position(self.nodes[mp].key, strings);
            if other != mp {
                // occupant is not in its main position: move it out
                let mut prev = other;
                while let Some(n) = self.nodes[prev].next {
                    if n as usize == mp {
                        break;
                    }
                    prev = n as usize;
                }
                self.nodes[prev].next = Some(free as u32);
                self.nodes[free] = self.nodes[mp];
                self.nodes[mp].next = None;
                self.nodes[mp].value = TValue::nil();
            } else {
                // occupant owns the position: chain the new key after it
                self.nodes[free].next = self.nodes[mp].next;
                self.nodes[mp].next = Some(free as u32);
                mp = free;
            }
        }
        self.nodes[mp].key = key;
        self.nodes[mp].value = value;
        true
    }

    fn get_free_pos(&mut self) -> Option<usize> {
        while self.last_free > 0 {
            self.last_free -= 1;
            if self.nodes[self.last_free].key.is_nil() {
                return Some(self.last_free);
            }
        }
        None
    }

    /// Pick new sizes from the key population (plus `extra`) and resize.
    fn rehash(&mut self, extra: TValue, strings: &StringInterner, mem: &mut MemoryAccount) -> CoreResult<()> {
        let mut nums = [0usize; MAXBITS + 1];
        let mut nasize = self.num_use_array(&mut nums);
        let mut total = nasize;
        for node in &self.nodes {
            if !node.value.is_nil() {
                nasize += count_int(node.key, &mut nums);
                total += 1;
            }
        }
        nasize += count_int(extra, &mut nums);
        total += 1;
        let (narray, na) = compute_sizes(&nums, nasize);
        tracing::debug!(narray, nhash = total - na, "table rehash");
        self.resize(narray, total - na, strings, mem)
    }

    /// Count non-nil array slots per `2^(lg-1) < k <= 2^lg` slice.
    fn num_use_array(&self, nums: &mut [usize; MAXBITS + 1]) -> usize {
        let mut ause = 0;
        let mut i = 1;
        let mut ttlg = 1;
        for slice in nums.iter_mut() {
            let lim = ttlg.min(self.array.len());
            if i > lim {
                break;
            }
            let lc = self.array[i - 1..lim].iter().filter(|v| !v.is_nil()).count();
            i = lim + 1;
            *slice += lc;
            ause += lc;
            ttlg *= 2;
        }
        ause
    }

    /// Live entries that would not fit an array part of `narray` slots.
    fn spilled_entries(&self, narray: usize) -> usize {
        let from_array = self
            .array
            .iter()
            .skip(narray)
            .filter(|v| !v.is_nil())
            .count();
        let from_nodes = self
            .nodes
            .iter()
            .filter(|n| !n.value.is_nil() && !fits_array(n.key, narray))
            .count();
        from_array + from_nodes
    }

    /// Insert during a resize. The replacement parts always have room.
    fn reinsert(&mut self, key: TValue, value: TValue, strings: &StringInterner) {
        if fits_array(key, self.array.len()) {
            if let Some(k) = key.as_array_index() {
                self.array[(k - 1) as usize] = value;
                return;
            }
        }
        let placed = self.insert_node(key, value, strings);
        debug_assert!(placed, "resized hash part has no free node");
    }

    fn main_position(&self, key: TValue, strings: &StringInterner) -> usize {
        let size = self.nodes.len();
        match key.kind() {
            ValueKind::Number => {
                let n = key.as_number().unwrap_or(0.0) + 1.0;
                let bits = n.to_bits();
                hash_mod((bits as u32).wrapping_add((bits >> 32) as u32), size)
            }
            ValueKind::Boolean => key.as_bool().unwrap_or(false) as usize & (size - 1),
            ValueKind::Gc(GcKind::String) => match key.as_string_id() {
                Some(id) if strings.contains(id) => strings.hash_of(id) as usize & (size - 1),
                _ => 0,
            },
            _ => hash_mod(key.payload_hash(), size),
        }
    }

    fn find(&self, key: TValue, strings: &StringInterner) -> Option<Slot> {
        match key.kind() {
            ValueKind::Nil => None,
            ValueKind::Gc(GcKind::String) => {
                let id = key.as_string_id()?;
                self.find_str_node(id, strings).map(Slot::Node)
            }
            ValueKind::Number => match key.as_array_index() {
                Some(k) if k >= 1 && (k as u64) <= self.array.len() as u64 => {
                    Some(Slot::Array((k - 1) as usize))
                }
                Some(k) => self.find_int_node(k).map(Slot::Node),
                None => self.find_generic_node(key, strings).map(Slot::Node),
            },
            _ => self.find_generic_node(key, strings).map(Slot::Node),
        }
    }

    fn find_int_node(&self, key: i64) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let nk = key as f64;
        // numbers never need the interner
        let mut n = Some(self.number_position(nk));
        while let Some(i) = n {
            if self.nodes[i].key.as_number() == Some(nk) {
                return Some(i);
            }
            n = self.nodes[i].next.map(|x| x as usize);
        }
        None
    }

    fn find_str_node(&self, key: StringId, strings: &StringInterner) -> Option<usize> {
        if self.nodes.is_empty() || !strings.contains(key) {
            return None;
        }
        let mut n = Some(strings.hash_of(key) as usize & (self.nodes.len() - 1));
        while let Some(i) = n {
            if self.nodes[i].key.as_string_id() == Some(key) {
                return Some(i);
            }
            n = self.nodes[i].next.map(|x| x as usize);
        }
        None
    }

    fn find_generic_node(&self, key: TValue, strings: &StringInterner) -> Option<usize> {
        if self.nodes.is_empty() {
            return None;
        }
        let mut n = Some(self.main_position(key, strings));
        while let Some(i) = n {
            if raw_equal(self.nodes[i].key, key) {
                return Some(i);
            }
            n = self.nodes[i].next.map(|x| x as usize);
        }
        None
    }

    fn number_position(&self, n: f64) -> usize {
        let bits = (n + 1.0).to_bits();
        hash_mod((bits as u32).wrapping_add((bits >> 32) as u32), self.nodes.len())
    }

    #[inline]
    fn read(&self, slot: Slot) -> TValue {
        match slot {
            Slot::Array(i) => self.array[i],
            Slot::Node(i) => self.nodes[i].value,
        }
    }

    #[inline]
    fn write(&mut self, slot: Slot, value: TValue) {
        match slot {
            Slot::Array(i) => self.array[i] = value,
            Slot::Node(i) => self.nodes[i].value = value,
        }
    }

    /// Every live entry is reachable from its key's main position, and a
    /// live entry away from its main position finds that node taken by a
    /// key sitting at its own main position. Removed entries keep their
    /// key, so occupancy is judged by key.
    #[cfg(test)]
    pub(crate) fn main_positions_hold(&self, strings: &StringInterner) -> bool {
        self.chains_reach_entries(strings) && self.colliders_yield_to_owners(strings)
    }

    #[cfg(test)]
    fn colliders_yield_to_owners(&self, strings: &StringInterner) -> bool {
        self.nodes.iter().enumerate().all(|(i, node)| {
            if node.value.is_nil() {
                return true;
            }
            let mp = self.main_position(node.key, strings);
            if mp == i {
                return true;
            }
            let owner = self.nodes[mp].key;
            if owner.is_nil() {
                return false;
            }
            owner.is_dead_key() || self.main_position(owner, strings) == mp
        })
    }

    #[cfg(test)]
    fn chains_reach_entries(&self, strings: &StringInterner) -> bool {
        self.nodes.iter().enumerate().all(|(i, node)| {
            if node.value.is_nil() {
                return true;
            }
            let mut n = Some(self.main_position(node.key, strings));
            let mut steps = 0;
            while let Some(j) = n {
                if j == i {
                    return true;
                }
                steps += 1;
                if steps > self.nodes.len() {
                    return false;
                }
                n = self.nodes[j].next.map(|x| x as usize);
            }
            false
        })
    }
}

impl Colored for Table {
    #[inline]
    fn mark(&self) -> Mark {
        self.mark
    }
    #[inline]
    fn mark_mut(&mut self) -> &mut Mark {
        &mut self.mark
    }
}

impl Traceable for Table {
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        if let Some(mt) = self.metatable {
            visit(GcRef::Table(mt));
        }
        for &v in &self.array {
            trace_value(v, visit);
        }
        for node in &self.nodes {
            if !node.value.is_nil() {
                trace_value(node.key, visit);
                trace_value(node.value, visit);
            }
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.nodes.len()
        )
    }
}

/// Reject the keys Lua forbids.
fn check_key(key: TValue) -> CoreResult<()> {
    if key.is_nil() {
        return Err(CoreError::InvalidKey(KeyError::Nil));
    }
    if key.as_number().is_some_and(f64::is_nan) {
        return Err(CoreError::InvalidKey(KeyError::NaN));
    }
    Ok(())
}

#[inline]
fn hash_mod(h: u32, size: usize) -> usize {
    (h % (((size - 1) | 1) as u32)) as usize
}

/// `ceil(log2(x))` for `x >= 1`.
#[inline]
fn ceil_log2(x: usize) -> usize {
    (usize::BITS - (x - 1).leading_zeros()) as usize
}

/// Node count for a requested hash size: 0 or the next power of two.
fn node_vector_size(n: usize) -> CoreResult<usize> {
    if n == 0 {
        return Ok(0);
    }
    let lsize = ceil_log2(n);
    if lsize > MAXBITS {
        return Err(CoreError::TableOverflow);
    }
    Ok(1 << lsize)
}

fn fits_array(key: TValue, narray: usize) -> bool {
    matches!(key.as_array_index(), Some(k) if k >= 1 && (k as u64) <= narray as u64)
}

/// Record `key` in `nums` if it is an array candidate.
fn count_int(key: TValue, nums: &mut [usize; MAXBITS + 1]) -> usize {
    match key.as_array_index() {
        Some(k) if k >= 1 && (k as u64) <= MAXASIZE as u64 => {
            nums[ceil_log2(k as usize)] += 1;
            1
        }
        _ => 0,
    }
}

/// Largest power of two `n` with more than `n/2` of `1..=n` in use.
/// Returns `(n, keys that go to the array)`.
fn compute_sizes(nums: &[usize; MAXBITS + 1], candidates: usize) -> (usize, usize) {
    let mut a = 0;
    let mut na = 0;
    let mut n = 0;
    let mut twotoi = 1usize;
    for &count in nums.iter() {
        if twotoi / 2 >= candidates {
            break;
        }
        if count > 0 {
            a += count;
            if a > twotoi / 2 {
                n = twotoi;
                na = a;
            }
        }
        twotoi *= 2;
    }
    (n, na)
}
