//! Reference mark-sweep collector over the GcHeap and the string table.
//!
//! Phases run in order: `start_cycle` marks the roots, `propagate` drains
//! the gray queue, `atomic` remarks what the mutator may have touched and
//! flips the current white, then strings and heap entities are swept.

use crate::gc::*;
use crate::heap::{Arena, GcHeap};
use crate::mem::MemoryAccount;
use crate::string::StringInterner;
use crate::table::Table;
use crate::upval::{self, UpValLocation};
use crate::value::TValue;

/// What a cycle released.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub strings_freed: usize,
    pub objects_freed: usize,
    pub bytes_freed: usize,
}

/// Mark of any collectable, strings included.
pub(crate) fn mark_of(heap: &GcHeap, strings: &StringInterner, r: GcRef) -> Option<Mark> {
    match r {
        GcRef::String(id) => strings.mark(id),
        _ => heap.mark_of(r),
    }
}

pub(crate) fn set_mark(heap: &mut GcHeap, strings: &mut StringInterner, r: GcRef, mark: Mark) {
    let slot = match r {
        GcRef::String(id) => strings.mark_mut(id),
        _ => heap.mark_mut(r),
    };
    if let Some(m) = slot {
        *m = mark;
    }
}

/// Forward barrier for `parent` now holding `value`.
pub(crate) fn forward_barrier(
    heap: &mut GcHeap,
    strings: &mut StringInterner,
    gc: &mut GcState,
    parent: GcRef,
    value: TValue,
) {
    let Some(child) = value.as_gc_ref() else {
        return;
    };
    let (Some(mut pm), Some(mut cm)) = (mark_of(heap, strings, parent), mark_of(heap, strings, child))
    else {
        return;
    };
    gc.barrier_forward(&mut pm, child, &mut cm);
    set_mark(heap, strings, parent, pm);
    set_mark(heap, strings, child, cm);
}

/// Backward barrier for `table` now holding `value` (as key or value).
pub(crate) fn table_barrier(
    heap: &mut GcHeap,
    strings: &StringInterner,
    gc: &mut GcState,
    table: GcIdx<Table>,
    value: TValue,
) {
    let Some(child) = value.as_gc_ref() else {
        return;
    };
    let Some(cm) = mark_of(heap, strings, child) else {
        return;
    };
    let mut tm = heap.get_table(table).mark();
    gc.barrier_back(table, &mut tm, cm);
    *heap.get_table_mut(table).mark_mut() = tm;
}

pub struct Collector<'a> {
    heap: &'a mut GcHeap,
    strings: &'a mut StringInterner,
    gc: &'a mut GcState,
    mem: &'a mut MemoryAccount,
    in_atomic: bool,
}

impl<'a> Collector<'a> {
    pub fn new(
        heap: &'a mut GcHeap,
        strings: &'a mut StringInterner,
        gc: &'a mut GcState,
        mem: &'a mut MemoryAccount,
    ) -> Self {
        Collector {
            heap,
            strings,
            gc,
            mem,
            in_atomic: false,
        }
    }

    /// Run a whole cycle.
    pub fn full_collect(&mut self, roots: &[GcRef]) -> CollectStats {
        let before = self.mem.total_bytes();
        self.start_cycle(roots);
        self.propagate();
        self.atomic();
        let strings_freed = self.sweep_strings();
        let objects_freed = self.sweep();
        self.finish();
        let stats = CollectStats {
            strings_freed,
            objects_freed,
            bytes_freed: before.saturating_sub(self.mem.total_bytes()),
        };
        tracing::debug!(
            strings = stats.strings_freed,
            objects = stats.objects_freed,
            bytes = stats.bytes_freed,
            in_use = self.mem.total_bytes(),
            "collection finished"
        );
        stats
    }

    /// Phase 1: mark the roots gray.
    pub fn start_cycle(&mut self, roots: &[GcRef]) {
        self.gc.gray.clear();
        self.gc.gray_again.clear();
        self.in_atomic = false;
        self.gc.set_phase(GcPhase::Propagate);
        for &r in roots {
            self.mark_object(r);
        }
        tracing::debug!(roots = roots.len(), "collection started");
    }

    /// Phase 2: traverse gray objects until none remain. Returns how many
    /// were traversed.
    pub fn propagate(&mut self) -> usize {
        let mut work = 0;
        while let Some(r) = self.gc.gray.pop() {
            self.traverse(r);
            work += 1;
        }
        work
    }

    /// Phase 3: remark open upvalues and everything barriers sent back to
    /// gray, then flip the white so unmarked objects read as dead.
    pub fn atomic(&mut self) {
        // values of marked open upvalues whose thread may be unmarked
        let open: Vec<_> = self.heap.uv_roots.iter().copied().collect();
        for uv in open {
            if !self.heap.get_upval(uv).color().is_white() {
                let v = upval::get(self.heap, uv);
                self.mark_value(v);
            }
        }
        self.propagate();

        self.in_atomic = true;
        let again = std::mem::take(&mut self.gc.gray_again);
        self.gc.gray.extend(again);
        let work = self.propagate();
        self.in_atomic = false;

        self.gc.flip_white();
        self.gc.set_phase(GcPhase::SweepString);
        tracing::debug!(remarked = work, "atomic phase done");
    }

    /// Phase 4: free dead strings.
    pub fn sweep_strings(&mut self) -> usize {
        let before = self.strings.len();
        let bytes = self.strings.sweep_all(self.gc, self.mem);
        let freed = before - self.strings.len();
        self.gc.set_phase(GcPhase::Sweep);
        tracing::debug!(freed, bytes, "strings swept");
        freed
    }

    /// Phase 5: free dead heap entities and rewhiten survivors. Returns the
    /// number of entities freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;

        // threads first: closing their upvalues needs the stacks
        for i in dead_or_rewhiten(&mut self.heap.threads, self.gc) {
            let th = GcIdx::new(i);
            upval::close(self.heap, self.strings, self.gc, self.mem, th, 0);
            self.heap.free(GcRef::Thread(th), self.mem);
            freed += 1;
        }
        for i in dead_or_rewhiten(&mut self.heap.tables, self.gc) {
            self.heap.free(GcRef::Table(GcIdx::new(i)), self.mem);
            freed += 1;
        }
        for i in dead_or_rewhiten(&mut self.heap.closures, self.gc) {
            self.heap.free(GcRef::Closure(GcIdx::new(i)), self.mem);
            freed += 1;
        }
        for i in dead_or_rewhiten(&mut self.heap.userdata, self.gc) {
            self.heap.free(GcRef::UserData(GcIdx::new(i)), self.mem);
            freed += 1;
        }
        for i in dead_or_rewhiten(&mut self.heap.protos, self.gc) {
            self.heap.free(GcRef::Proto(GcIdx::new(i)), self.mem);
            freed += 1;
        }

        // open upvalues live as long as their thread
        let white = self.gc.white();
        let mut dead = Vec::new();
        for (i, uv) in self.heap.upvals.iter_mut() {
            if self.gc.is_dead(uv.mark()) && !uv.is_open() {
                dead.push(i);
            } else {
                uv.set_color(white);
            }
        }
        for i in dead {
            self.heap.free(GcRef::UpVal(GcIdx::new(i)), self.mem);
            freed += 1;
        }

        self.gc.set_phase(GcPhase::Finalize);
        tracing::debug!(freed, "heap swept");
        freed
    }

    /// Phase 6: shrink the string table and return to Pause.
    pub fn finish(&mut self) {
        if let Err(e) = self.strings.shrink_if_sparse(self.gc, self.mem) {
            tracing::debug!(error = %e, "string table shrink refused");
        }
        self.gc.set_phase(GcPhase::Pause);
    }

    fn mark_value(&mut self, v: TValue) {
        if let Some(r) = v.as_gc_ref() {
            self.mark_object(r);
        }
    }

    fn mark_object(&mut self, r: GcRef) {
        match r {
            GcRef::String(id) => {
                // strings have no children
                if let Some(m) = self.strings.mark_mut(id) {
                    if m.color.is_white() {
                        m.color = Color::Black;
                    }
                }
            }
            GcRef::UpVal(idx) => {
                let Some(uv) = self.heap.upvals.get_mut(idx.0) else {
                    return;
                };
                if !uv.color().is_white() {
                    return;
                }
                let location = uv.location;
                match location {
                    // the value belongs to a stack; stays gray until closed
                    UpValLocation::Open { .. } => uv.set_color(Color::Gray),
                    UpValLocation::Closed(v) => {
                        uv.set_color(Color::Black);
                        self.mark_value(v);
                    }
                }
            }
            _ => {
                let Some(m) = self.heap.mark_mut(r) else {
                    return;
                };
                if m.color.is_white() {
                    m.color = Color::Gray;
                    self.gc.gray.push(r);
                }
            }
        }
    }

    fn traverse(&mut self, r: GcRef) {
        if let GcRef::Table(t) = r {
            self.heap.get_table_mut(t).clear_removed_keys();
        }
        let mut children = Vec::new();
        self.heap.trace(r, &mut |c| children.push(c));

        let color = match r {
            // stacks change without barriers: revisit in the atomic phase
            GcRef::Thread(_) if !self.in_atomic => {
                self.gc.gray_again.push(r);
                Color::Gray
            }
            _ => Color::Black,
        };
        if let Some(m) = self.heap.mark_mut(r) {
            m.color = color;
        }
        for c in children {
            self.mark_object(c);
        }
    }
}

/// Indices of dead entries; survivors get the current white.
fn dead_or_rewhiten<T: Colored>(arena: &mut Arena<T>, gc: &GcState) -> Vec<u32> {
    let mut dead = Vec::new();
    for (i, obj) in arena.iter_mut() {
        if gc.is_dead(obj.mark()) {
            dead.push(i);
        } else {
            obj.set_color(gc.white());
        }
    }
    dead
}
