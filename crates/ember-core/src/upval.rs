//! Upvalues: captured locals shared between closures.
//!
//! An upvalue is open while the captured local still lives in a thread's
//! stack, and closed once the frame exits and the value has been copied in.
//! Each thread keeps its open upvalues sorted by slot (highest first) so that
//! two closures capturing the same slot find the same upvalue.

use crate::collector::forward_barrier;
use crate::error::CoreResult;
use crate::gc::*;
use crate::heap::{GcHeap, LuaThread};
use crate::mem::MemoryAccount;
use crate::string::StringInterner;
use crate::value::TValue;

/// Where an upvalue's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UpValLocation {
    /// Still on the stack of `thread`.
    Open { thread: GcIdx<LuaThread>, slot: usize },
    /// The frame exited; the upvalue owns its value.
    Closed(TValue),
}

#[derive(Debug)]
pub struct UpVal {
    pub location: UpValLocation,
    mark: Mark,
}

impl UpVal {
    pub fn new(location: UpValLocation, mark: Mark) -> Self {
        UpVal { location, mark }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        matches!(self.location, UpValLocation::Open { .. })
    }

    /// Stack slot of an open upvalue.
    #[inline]
    pub fn slot(&self) -> Option<usize> {
        match self.location {
            UpValLocation::Open { slot, .. } => Some(slot),
            UpValLocation::Closed(_) => None,
        }
    }
}

impl Colored for UpVal {
    #[inline]
    fn mark(&self) -> Mark {
        self.mark
    }
    #[inline]
    fn mark_mut(&mut self) -> &mut Mark {
        &mut self.mark
    }
}

impl Traceable for UpVal {
    // An open upvalue's value belongs to the thread's stack.
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        if let UpValLocation::Closed(v) = self.location {
            trace_value(v, visit);
        }
    }
}

/// Find the open upvalue for `slot` of `thread`, creating it if needed.
pub fn find_or_create(
    heap: &mut GcHeap,
    gc: &GcState,
    mem: &mut MemoryAccount,
    thread: GcIdx<LuaThread>,
    slot: usize,
) -> CoreResult<GcIdx<UpVal>> {
    let mut pos = 0;
    let mut found = None;
    for &uv in heap.get_thread(thread).open_upvals.iter() {
        let s = heap.get_upval(uv).slot().unwrap_or(0);
        if s < slot {
            break;
        }
        if s == slot {
            found = Some(uv);
            break;
        }
        pos += 1;
    }

    if let Some(uv) = found {
        // may have been marked dead by a collection in progress
        gc.revive(heap.get_upval_mut(uv).mark_mut());
        return Ok(uv);
    }

    let uv = heap.alloc_upval(UpValLocation::Open { thread, slot }, gc, mem)?;
    heap.get_thread_mut(thread).open_upvals.insert(pos, uv);
    heap.uv_roots.insert(uv);
    tracing::trace!(slot, upval = uv.0, "open upvalue");
    Ok(uv)
}

/// Close every open upvalue of `thread` at or above `level`.
pub fn close(
    heap: &mut GcHeap,
    strings: &mut StringInterner,
    gc: &mut GcState,
    mem: &mut MemoryAccount,
    thread: GcIdx<LuaThread>,
    level: usize,
) {
    loop {
        let Some(&uv) = heap.get_thread(thread).open_upvals.first() else {
            break;
        };
        let slot = heap.get_upval(uv).slot().unwrap_or(0);
        if slot < level {
            break;
        }
        heap.get_thread_mut(thread).open_upvals.remove(0);
        heap.uv_roots.shift_remove(&uv);

        let mark = heap.get_upval(uv).mark();
        if gc.is_dead(mark) {
            // unreachable already: nobody will read the value
            heap.free(GcRef::UpVal(uv), mem);
            tracing::trace!(slot, upval = uv.0, "freed dead upvalue on close");
            continue;
        }

        let value = heap
            .get_thread(thread)
            .stack
            .get(slot)
            .copied()
            .unwrap_or_else(TValue::nil);
        let upval = heap.get_upval_mut(uv);
        upval.location = UpValLocation::Closed(value);
        if upval.mark.color == Color::Gray {
            if gc.keep_invariant() {
                upval.mark.color = Color::Black;
                forward_barrier(heap, strings, gc, GcRef::UpVal(uv), value);
            } else {
                upval.mark.color = gc.white();
            }
        }
        tracing::trace!(slot, upval = uv.0, "close upvalue");
    }
}

/// Current value of an upvalue.
pub fn get(heap: &GcHeap, uv: GcIdx<UpVal>) -> TValue {
    match heap.get_upval(uv).location {
        UpValLocation::Open { thread, slot } => heap
            .get_thread(thread)
            .stack
            .get(slot)
            .copied()
            .unwrap_or_else(TValue::nil),
        UpValLocation::Closed(v) => v,
    }
}

/// Assign through an upvalue.
pub fn set(
    heap: &mut GcHeap,
    strings: &mut StringInterner,
    gc: &mut GcState,
    uv: GcIdx<UpVal>,
    value: TValue,
) {
    match heap.get_upval(uv).location {
        UpValLocation::Open { thread, slot } => {
            if let Some(s) = heap.get_thread_mut(thread).stack.get_mut(slot) {
                *s = value;
            }
        }
        UpValLocation::Closed(_) => {
            heap.get_upval_mut(uv).location = UpValLocation::Closed(value);
            forward_barrier(heap, strings, gc, GcRef::UpVal(uv), value);
        }
    }
}
