//! GC handles, colors and the hooks the collector relies on.
//!
//! Every collectable entity lives in an arena and is referred to by a typed
//! [`GcIdx`]. Entities expose their children through [`Traceable`] and their
//! mark through [`Colored`]; there is no shared header layout.

use crate::heap::{Closure, LuaThread, Proto, UserData};
use crate::object::GcKind;
use crate::string::StringId;
use crate::table::Table;
use crate::upval::UpVal;
use crate::value::TValue;
use std::marker::PhantomData;

/// A typed index into an arena in the GcHeap.
#[derive(Debug)]
pub struct GcIdx<T>(pub u32, pub PhantomData<T>);

impl<T> Clone for GcIdx<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for GcIdx<T> {}

impl<T> PartialEq for GcIdx<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for GcIdx<T> {}

impl<T> std::hash::Hash for GcIdx<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl<T> GcIdx<T> {
    #[inline]
    pub fn new(index: u32) -> Self {
        GcIdx(index, PhantomData)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Sub-tags for GC objects (stored in bits 44-46 of payload).
pub const GC_SUB_STRING: u64 = 0;
pub const GC_SUB_TABLE: u64 = 1;
pub const GC_SUB_CLOSURE: u64 = 2;
pub const GC_SUB_USERDATA: u64 = 3;
pub const GC_SUB_THREAD: u64 = 4;
pub const GC_SUB_PROTO: u64 = 5;
pub const GC_SUB_UPVAL: u64 = 6;

/// Bits used for sub-tag within the 47-bit payload.
pub const GC_SUB_SHIFT: u64 = 44;
pub const GC_SUB_MASK: u64 = 0x7; // 3 bits
/// Mask for the index within the payload (lower 44 bits).
pub const GC_INDEX_MASK: u64 = (1u64 << 44) - 1;

/// A reference to any collectable entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GcRef {
    String(StringId),
    Table(GcIdx<Table>),
    Closure(GcIdx<Closure>),
    UserData(GcIdx<UserData>),
    Thread(GcIdx<LuaThread>),
    Proto(GcIdx<Proto>),
    UpVal(GcIdx<UpVal>),
}

impl GcRef {
    pub fn kind(self) -> GcKind {
        match self {
            GcRef::String(_) => GcKind::String,
            GcRef::Table(_) => GcKind::Table,
            GcRef::Closure(_) => GcKind::Closure,
            GcRef::UserData(_) => GcKind::UserData,
            GcRef::Thread(_) => GcKind::Thread,
            GcRef::Proto(_) => GcKind::Proto,
            GcRef::UpVal(_) => GcKind::UpVal,
        }
    }

    pub fn index(self) -> u32 {
        match self {
            GcRef::String(id) => id.0,
            GcRef::Table(i) => i.0,
            GcRef::Closure(i) => i.0,
            GcRef::UserData(i) => i.0,
            GcRef::Thread(i) => i.0,
            GcRef::Proto(i) => i.0,
            GcRef::UpVal(i) => i.0,
        }
    }

    /// Rebuild a reference from its kind and arena index.
    pub fn from_parts(kind: GcKind, index: u32) -> Self {
        match kind {
            GcKind::String => GcRef::String(StringId(index)),
            GcKind::Table => GcRef::Table(GcIdx::new(index)),
            GcKind::Closure => GcRef::Closure(GcIdx::new(index)),
            GcKind::UserData => GcRef::UserData(GcIdx::new(index)),
            GcKind::Thread => GcRef::Thread(GcIdx::new(index)),
            GcKind::Proto => GcRef::Proto(GcIdx::new(index)),
            GcKind::UpVal => GcRef::UpVal(GcIdx::new(index)),
        }
    }

    #[inline]
    pub fn to_value(self) -> TValue {
        TValue::from_gc(self)
    }
}

/// Tri-color mark with two alternating whites.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    White0,
    White1,
    Gray,
    Black,
}

impl Color {
    #[inline]
    pub fn is_white(self) -> bool {
        matches!(self, Color::White0 | Color::White1)
    }
}

/// The per-object mark: a color plus the "never collect" bit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mark {
    pub color: Color,
    pub fixed: bool,
}

impl Default for Mark {
    fn default() -> Self {
        Mark::new(Color::White0)
    }
}

impl Mark {
    pub fn new(color: Color) -> Self {
        Mark {
            color,
            fixed: false,
        }
    }
}

/// Collector phase, as far as the core needs to know it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GcPhase {
    Pause,
    Propagate,
    /// Sweeping the string table. String-table resizes are deferred.
    SweepString,
    Sweep,
    Finalize,
}

/// Enumerate the collectable children of an entity.
pub trait Traceable {
    fn trace(&self, visit: &mut dyn FnMut(GcRef));
}

/// Mark access for an entity.
pub trait Colored {
    fn mark(&self) -> Mark;
    fn mark_mut(&mut self) -> &mut Mark;

    #[inline]
    fn color(&self) -> Color {
        self.mark().color
    }

    #[inline]
    fn set_color(&mut self, color: Color) {
        self.mark_mut().color = color;
    }
}

/// Visit `v` if it references a collectable object.
#[inline]
pub fn trace_value(v: TValue, visit: &mut dyn FnMut(GcRef)) {
    if let Some(r) = v.as_gc_ref() {
        visit(r);
    }
}

/// Collector bookkeeping shared by the whole runtime: the current white,
/// the phase and the gray queues.
#[derive(Debug)]
pub struct GcState {
    current_white: Color,
    phase: GcPhase,
    pub(crate) gray: Vec<GcRef>,
    pub(crate) gray_again: Vec<GcRef>,
}

impl GcState {
    pub fn new() -> Self {
        GcState {
            current_white: Color::White0,
            phase: GcPhase::Pause,
            gray: Vec::new(),
            gray_again: Vec::new(),
        }
    }

    #[inline]
    pub fn white(&self) -> Color {
        self.current_white
    }

    #[inline]
    pub fn other_white(&self) -> Color {
        match self.current_white {
            Color::White0 => Color::White1,
            _ => Color::White0,
        }
    }

    /// A mark for a freshly allocated object.
    #[inline]
    pub fn new_mark(&self) -> Mark {
        Mark::new(self.current_white)
    }

    #[inline]
    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: GcPhase) {
        self.phase = phase;
    }

    /// True while black objects must never point to white ones.
    #[inline]
    pub fn keep_invariant(&self) -> bool {
        self.phase == GcPhase::Propagate
    }

    /// Provisionally dead: carries the previous cycle's white and is not fixed.
    #[inline]
    pub fn is_dead(&self, mark: Mark) -> bool {
        !mark.fixed && mark.color == self.other_white()
    }

    /// Bring a provisionally dead object back; a live reference just appeared.
    #[inline]
    pub fn revive(&self, mark: &mut Mark) {
        if self.is_dead(*mark) {
            mark.color = self.current_white;
        }
    }

    pub fn flip_white(&mut self) {
        self.current_white = self.other_white();
    }

    /// Table barrier: a black table that gained a white child goes back to
    /// gray and is revisited in the atomic step.
    pub fn barrier_back(&mut self, table: GcIdx<Table>, table_mark: &mut Mark, child: Mark) {
        if table_mark.color == Color::Black && child.color.is_white() {
            table_mark.color = Color::Gray;
            self.gray_again.push(GcRef::Table(table));
        }
    }

    /// Forward barrier: a black parent that gained a white child either
    /// marks the child (while propagating) or is whitened.
    pub fn barrier_forward(&mut self, parent_mark: &mut Mark, child: GcRef, child_mark: &mut Mark) {
        if parent_mark.color != Color::Black || !child_mark.color.is_white() {
            return;
        }
        if self.keep_invariant() {
            child_mark.color = Color::Gray;
            self.gray.push(child);
        } else {
            parent_mark.color = self.current_white;
        }
    }
}

impl Default for GcState {
    fn default() -> Self {
        Self::new()
    }
}
