/// NaN-boxed Lua value representation.
///
/// Layout (64 bits):
/// - Pure f64: any non-NaN double (every NaN is canonicalized to QNAN)
/// - Tagged values: QNAN prefix (0x7FF8) | tag (3 bits, 47-49) | payload (47 bits)
///
/// Tags (bits 49-47):
///   000 = canonical NaN (no payload)
///   001 = nil
///   010 = bool
///   011 = light userdata
///   100 = GC reference (sub-tag in bits 44-46, arena index below)
///   101 = dead key (GC payload of a reclaimed key, only inside table nodes)
use crate::gc::*;
use crate::heap::{Closure, LuaThread, Proto, UserData};
use crate::object::{GcKind, ValueKind};
use crate::string::StringId;
use crate::table::Table;
use crate::upval::UpVal;
use std::fmt;

/// Quiet NaN prefix: exponent all 1s + quiet bit set
const QNAN: u64 = 0x7FF8_0000_0000_0000;

/// Tag mask: 3 bits at positions 47-49
const TAG_MASK: u64 = 0x0003_8000_0000_0000;
/// Payload mask: lower 47 bits
const PAYLOAD_MASK: u64 = 0x0000_7FFF_FFFF_FFFF;

const TAG_NIL: u64 = 0x0000_8000_0000_0000;
const TAG_BOOL: u64 = 0x0001_0000_0000_0000;
const TAG_LIGHT: u64 = 0x0001_8000_0000_0000;
const TAG_GC: u64 = 0x0002_0000_0000_0000;
const TAG_DEADKEY: u64 = 0x0002_8000_0000_0000;

/// Largest magnitude below which every f64 has an exact i64 counterpart.
const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// A NaN-boxed Lua value packed into 8 bytes.
#[derive(Clone, Copy)]
pub struct TValue(u64);

impl TValue {
    // ---- Constructors ----

    /// Create a nil value.
    #[inline]
    pub const fn nil() -> Self {
        TValue(QNAN | TAG_NIL)
    }

    /// Create a boolean value.
    #[inline]
    pub fn from_bool(b: bool) -> Self {
        TValue(QNAN | TAG_BOOL | (b as u64))
    }

    /// Create a number value. NaN inputs are canonicalized.
    #[inline]
    pub fn from_number(n: f64) -> Self {
        if n.is_nan() {
            TValue(QNAN)
        } else {
            TValue(n.to_bits())
        }
    }

    /// Create a light userdata value.
    ///
    /// # Panics
    /// Panics if the pointer uses more than 47 bits.
    #[inline]
    pub fn from_light_userdata(ptr: usize) -> Self {
        let ptr64 = ptr as u64;
        assert!(
            ptr64 & !PAYLOAD_MASK == 0,
            "light userdata pointer exceeds 47-bit address space"
        );
        TValue(QNAN | TAG_LIGHT | ptr64)
    }

    /// Create a GC value with a sub-tag and index.
    #[inline]
    fn from_gc_sub(sub_tag: u64, index: u32) -> Self {
        let payload = (sub_tag << GC_SUB_SHIFT) | (index as u64);
        debug_assert!(payload & !PAYLOAD_MASK == 0);
        TValue(QNAN | TAG_GC | payload)
    }

    /// Create a value referencing a collectable object.
    #[inline]
    pub fn from_gc(r: GcRef) -> Self {
        Self::from_gc_sub(r.kind().sub_tag(), r.index())
    }

    #[inline]
    pub fn from_string_id(id: StringId) -> Self {
        Self::from_gc_sub(GC_SUB_STRING, id.0)
    }

    #[inline]
    pub fn from_table(idx: GcIdx<Table>) -> Self {
        Self::from_gc_sub(GC_SUB_TABLE, idx.0)
    }

    #[inline]
    pub fn from_closure(idx: GcIdx<Closure>) -> Self {
        Self::from_gc_sub(GC_SUB_CLOSURE, idx.0)
    }

    #[inline]
    pub fn from_userdata(idx: GcIdx<UserData>) -> Self {
        Self::from_gc_sub(GC_SUB_USERDATA, idx.0)
    }

    #[inline]
    pub fn from_thread(idx: GcIdx<LuaThread>) -> Self {
        Self::from_gc_sub(GC_SUB_THREAD, idx.0)
    }

    #[inline]
    pub fn from_proto(idx: GcIdx<Proto>) -> Self {
        Self::from_gc_sub(GC_SUB_PROTO, idx.0)
    }

    #[inline]
    pub fn from_upval(idx: GcIdx<UpVal>) -> Self {
        Self::from_gc_sub(GC_SUB_UPVAL, idx.0)
    }

    // ---- Type checks ----

    /// Returns true if this is a NaN-boxed tagged value (not a plain float).
    #[inline]
    fn is_tagged(&self) -> bool {
        (self.0 & QNAN) == QNAN
    }

    #[inline]
    fn tag(&self) -> u64 {
        self.0 & TAG_MASK
    }

    #[inline]
    fn payload(&self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// The tag as an enum.
    pub fn kind(&self) -> ValueKind {
        if !self.is_tagged() {
            return ValueKind::Number;
        }
        match self.tag() {
            0 => ValueKind::Number,
            TAG_NIL => ValueKind::Nil,
            TAG_BOOL => ValueKind::Boolean,
            TAG_LIGHT => ValueKind::LightUserData,
            TAG_DEADKEY => ValueKind::DeadKey,
            _ => match self.gc_kind() {
                Some(k) => ValueKind::Gc(k),
                None => ValueKind::DeadKey,
            },
        }
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_NIL
    }

    #[inline]
    pub fn is_bool(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_BOOL
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        !self.is_tagged() || self.tag() == 0
    }

    /// Returns true if this value references a collectable object.
    #[inline]
    pub fn is_gc(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_GC
    }

    #[inline]
    pub fn is_light_userdata(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_LIGHT
    }

    #[inline]
    pub fn is_dead_key(&self) -> bool {
        self.is_tagged() && self.tag() == TAG_DEADKEY
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_STRING)
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_TABLE)
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        self.gc_sub_tag() == Some(GC_SUB_CLOSURE)
    }

    // ---- Extractors ----

    /// Extract number value. Returns None for non-number values.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        if !self.is_tagged() {
            Some(f64::from_bits(self.0))
        } else if self.tag() == 0 {
            Some(f64::NAN)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        if self.is_bool() {
            Some((self.0 & 1) != 0)
        } else {
            None
        }
    }

    #[inline]
    pub fn as_light_userdata(&self) -> Option<usize> {
        if self.is_light_userdata() {
            Some(self.payload() as usize)
        } else {
            None
        }
    }

    #[inline]
    fn gc_sub_tag(&self) -> Option<u64> {
        if self.is_gc() {
            Some((self.payload() >> GC_SUB_SHIFT) & GC_SUB_MASK)
        } else {
            None
        }
    }

    #[inline]
    fn gc_index(&self) -> u32 {
        (self.payload() & GC_INDEX_MASK) as u32
    }

    /// The kind of the referenced object, if collectable.
    #[inline]
    pub fn gc_kind(&self) -> Option<GcKind> {
        self.gc_sub_tag().and_then(GcKind::from_sub_tag)
    }

    /// The referenced object, if collectable.
    #[inline]
    pub fn as_gc_ref(&self) -> Option<GcRef> {
        self.gc_kind().map(|k| GcRef::from_parts(k, self.gc_index()))
    }

    #[inline]
    pub fn as_string_id(&self) -> Option<StringId> {
        if self.gc_sub_tag() == Some(GC_SUB_STRING) {
            Some(StringId(self.gc_index()))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_table_idx(&self) -> Option<GcIdx<Table>> {
        if self.gc_sub_tag() == Some(GC_SUB_TABLE) {
            Some(GcIdx::new(self.gc_index()))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_closure_idx(&self) -> Option<GcIdx<Closure>> {
        if self.gc_sub_tag() == Some(GC_SUB_CLOSURE) {
            Some(GcIdx::new(self.gc_index()))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_userdata_idx(&self) -> Option<GcIdx<UserData>> {
        if self.gc_sub_tag() == Some(GC_SUB_USERDATA) {
            Some(GcIdx::new(self.gc_index()))
        } else {
            None
        }
    }

    #[inline]
    pub fn as_thread_idx(&self) -> Option<GcIdx<LuaThread>> {
        if self.gc_sub_tag() == Some(GC_SUB_THREAD) {
            Some(GcIdx::new(self.gc_index()))
        } else {
            None
        }
    }

    /// The integer `k` if this is a number with an exact integral value.
    #[inline]
    pub fn as_array_index(&self) -> Option<i64> {
        let n = self.as_number()?;
        if n >= -TWO_POW_63 && n < TWO_POW_63 {
            let k = n as i64;
            if k as f64 == n {
                return Some(k);
            }
        }
        None
    }

    // ---- Dead keys ----

    /// The tombstone form of a collectable key. Other values are returned
    /// unchanged.
    #[inline]
    pub fn to_dead_key(self) -> Self {
        if self.is_gc() {
            TValue(QNAN | TAG_DEADKEY | self.payload())
        } else {
            self
        }
    }

    /// True if `self` is the tombstone of the collectable `key`.
    #[inline]
    pub fn dead_key_matches(&self, key: TValue) -> bool {
        self.is_dead_key() && key.is_gc() && self.payload() == key.payload()
    }

    /// Payload bits folded to 32 bits, for hashing identity-keyed values.
    #[inline]
    pub(crate) fn payload_hash(&self) -> u32 {
        let p = self.payload();
        (p as u32).wrapping_add((p >> 32) as u32)
    }

    // ---- Lua semantics ----

    /// Lua falsy: only nil and false are falsy.
    #[inline]
    pub fn is_falsy(&self) -> bool {
        self.is_nil() || (self.is_bool() && self.as_bool() == Some(false))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    /// Get the raw bits for debugging/testing.
    #[inline]
    pub fn raw_bits(&self) -> u64 {
        self.0
    }

    /// Create a TValue from raw bits (for reconstructing from stored bits).
    #[inline]
    pub fn from_raw_bits(bits: u64) -> Self {
        TValue(bits)
    }
}

/// Primitive equality: same tag and same payload, no coercion, no
/// metamethods. Numbers compare by IEEE rules.
#[inline]
pub fn raw_equal(a: TValue, b: TValue) -> bool {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => x == y,
        (None, None) => a.0 == b.0,
        _ => false,
    }
}

impl fmt::Debug for TValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            ValueKind::Nil => write!(f, "nil"),
            ValueKind::Boolean => write!(f, "{}", self.0 & 1 != 0),
            ValueKind::Number => write!(f, "{}", f64::from_bits(self.0)),
            ValueKind::LightUserData => write!(f, "lightuserdata({:#x})", self.payload()),
            ValueKind::Gc(kind) => {
                write!(f, "{}(#{})", kind_label(kind), self.gc_index())
            }
            ValueKind::DeadKey => write!(f, "deadkey({:#x})", self.payload()),
        }
    }
}

fn kind_label(kind: GcKind) -> &'static str {
    match kind {
        GcKind::String => "string",
        GcKind::Table => "table",
        GcKind::Closure => "closure",
        GcKind::UserData => "userdata",
        GcKind::Thread => "thread",
        GcKind::Proto => "proto",
        GcKind::UpVal => "upval",
    }
}

impl PartialEq for TValue {
    fn eq(&self, other: &Self) -> bool {
        raw_equal(*self, *other)
    }
}

impl From<bool> for TValue {
    fn from(b: bool) -> Self {
        TValue::from_bool(b)
    }
}

impl From<f64> for TValue {
    fn from(n: f64) -> Self {
        TValue::from_number(n)
    }
}

impl From<StringId> for TValue {
    fn from(id: StringId) -> Self {
        TValue::from_string_id(id)
    }
}

impl From<GcIdx<Table>> for TValue {
    fn from(idx: GcIdx<Table>) -> Self {
        TValue::from_table(idx)
    }
}
