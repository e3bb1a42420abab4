//! Arena-based heap for every collectable entity except strings.
//!
//! Entities are addressed by [`GcIdx`] handles; references between entities
//! are handles too, never owning pointers. Only the collector frees.

use crate::error::CoreResult;
use crate::gc::*;
use crate::mem::MemoryAccount;
use crate::string::StringId;
use crate::table::Table;
use crate::upval::{UpVal, UpValLocation};
use crate::value::TValue;
use indexmap::IndexSet;

/// A Lua closure (prototype + environment + captured upvalues).
#[derive(Debug)]
pub struct Closure {
    pub proto: GcIdx<Proto>,
    pub env: Option<GcIdx<Table>>,
    pub upvals: Vec<GcIdx<UpVal>>,
    mark: Mark,
}

/// A function prototype as far as the object core sees it: the values and
/// nested prototypes it keeps alive.
#[derive(Debug, Default)]
pub struct Proto {
    pub source: Option<StringId>,
    pub constants: Vec<TValue>,
    pub protos: Vec<GcIdx<Proto>>,
    pub upvalue_names: Vec<StringId>,
    mark: Mark,
}

/// Full userdata: an opaque byte block with a metatable and environment.
#[derive(Debug)]
pub struct UserData {
    pub data: Box<[u8]>,
    pub metatable: Option<GcIdx<Table>>,
    pub env: Option<GcIdx<Table>>,
    mark: Mark,
}

/// An execution context: a value stack plus the upvalues open over it.
#[derive(Debug)]
pub struct LuaThread {
    pub stack: Vec<TValue>,
    /// Open upvalues, sorted by stack slot (descending).
    pub(crate) open_upvals: Vec<GcIdx<UpVal>>,
    mark: Mark,
}

impl LuaThread {
    /// Open upvalues of this thread, highest slot first.
    pub fn open_upvals(&self) -> &[GcIdx<UpVal>] {
        &self.open_upvals
    }
}

macro_rules! impl_colored {
    ($($ty:ty),*) => {$(
        impl Colored for $ty {
            #[inline]
            fn mark(&self) -> Mark {
                self.mark
            }
            #[inline]
            fn mark_mut(&mut self) -> &mut Mark {
                &mut self.mark
            }
        }
    )*};
}

impl_colored!(Closure, Proto, UserData, LuaThread);

impl Traceable for Closure {
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        visit(GcRef::Proto(self.proto));
        if let Some(env) = self.env {
            visit(GcRef::Table(env));
        }
        for &uv in &self.upvals {
            visit(GcRef::UpVal(uv));
        }
    }
}

impl Traceable for Proto {
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        if let Some(src) = self.source {
            visit(GcRef::String(src));
        }
        for &k in &self.constants {
            trace_value(k, visit);
        }
        for &p in &self.protos {
            visit(GcRef::Proto(p));
        }
        for &name in &self.upvalue_names {
            visit(GcRef::String(name));
        }
    }
}

impl Traceable for UserData {
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        if let Some(mt) = self.metatable {
            visit(GcRef::Table(mt));
        }
        if let Some(env) = self.env {
            visit(GcRef::Table(env));
        }
    }
}

impl Traceable for LuaThread {
    fn trace(&self, visit: &mut dyn FnMut(GcRef)) {
        for &v in &self.stack {
            trace_value(v, visit);
        }
        for &uv in &self.open_upvals {
            visit(GcRef::UpVal(uv));
        }
    }
}

/// Slot storage with a free list, one per entity type.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn alloc(&mut self, value: T) -> u32 {
        self.live += 1;
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = Some(value);
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Some(value));
            idx
        }
    }

    #[inline]
    pub fn get(&self, idx: u32) -> Option<&T> {
        self.slots.get(idx as usize).and_then(Option::as_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, idx: u32) -> Option<&mut T> {
        self.slots.get_mut(idx as usize).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, idx: u32) -> Option<T> {
        let v = self.slots.get_mut(idx as usize)?.take()?;
        self.free.push(idx);
        self.live -= 1;
        Some(v)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Indices of live entries.
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i as u32)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i as u32, v)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> + '_ {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|v| (i as u32, v)))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Arena-based GC heap.
#[derive(Debug, Default)]
pub struct GcHeap {
    pub tables: Arena<Table>,
    pub closures: Arena<Closure>,
    pub userdata: Arena<UserData>,
    pub threads: Arena<LuaThread>,
    pub protos: Arena<Proto>,
    pub upvals: Arena<UpVal>,
    /// Every open upvalue of every thread, for the collector.
    pub(crate) uv_roots: IndexSet<GcIdx<UpVal>>,
}

impl GcHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_table(
        &mut self,
        array_hint: usize,
        hash_hint: usize,
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<GcIdx<Table>> {
        mem.alloc(std::mem::size_of::<Table>())?;
        let table = match Table::new(array_hint, hash_hint, gc.new_mark(), mem) {
            Ok(t) => t,
            Err(e) => {
                mem.free(std::mem::size_of::<Table>());
                return Err(e);
            }
        };
        Ok(GcIdx::new(self.tables.alloc(table)))
    }

    pub fn get_table(&self, idx: GcIdx<Table>) -> &Table {
        self.tables.get(idx.0).expect("table was freed")
    }

    pub fn get_table_mut(&mut self, idx: GcIdx<Table>) -> &mut Table {
        self.tables.get_mut(idx.0).expect("table was freed")
    }

    pub fn alloc_closure(
        &mut self,
        proto: GcIdx<Proto>,
        env: Option<GcIdx<Table>>,
        upvals: Vec<GcIdx<UpVal>>,
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<GcIdx<Closure>> {
        let closure = Closure {
            proto,
            env,
            upvals,
            mark: gc.new_mark(),
        };
        mem.alloc(closure_size(&closure))?;
        Ok(GcIdx::new(self.closures.alloc(closure)))
    }

    pub fn get_closure(&self, idx: GcIdx<Closure>) -> &Closure {
        self.closures.get(idx.0).expect("closure was freed")
    }

    pub fn get_closure_mut(&mut self, idx: GcIdx<Closure>) -> &mut Closure {
        self.closures.get_mut(idx.0).expect("closure was freed")
    }

    pub fn alloc_proto(&mut self, mut proto: Proto, gc: &GcState, mem: &mut MemoryAccount) -> CoreResult<GcIdx<Proto>> {
        proto.mark = gc.new_mark();
        mem.alloc(proto_size(&proto))?;
        Ok(GcIdx::new(self.protos.alloc(proto)))
    }

    pub fn get_proto(&self, idx: GcIdx<Proto>) -> &Proto {
        self.protos.get(idx.0).expect("proto was freed")
    }

    pub fn alloc_userdata(
        &mut self,
        size: usize,
        env: Option<GcIdx<Table>>,
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<GcIdx<UserData>> {
        mem.alloc(std::mem::size_of::<UserData>())?;
        let data = match mem.try_vec(size, 0u8) {
            Ok(d) => d,
            Err(e) => {
                mem.free(std::mem::size_of::<UserData>());
                return Err(e);
            }
        };
        let ud = UserData {
            data: data.into_boxed_slice(),
            metatable: None,
            env,
            mark: gc.new_mark(),
        };
        Ok(GcIdx::new(self.userdata.alloc(ud)))
    }

    pub fn get_userdata(&self, idx: GcIdx<UserData>) -> &UserData {
        self.userdata.get(idx.0).expect("userdata was freed")
    }

    pub fn get_userdata_mut(&mut self, idx: GcIdx<UserData>) -> &mut UserData {
        self.userdata.get_mut(idx.0).expect("userdata was freed")
    }

    pub fn alloc_thread(
        &mut self,
        stack_size: usize,
        gc: &GcState,
        mem: &mut MemoryAccount,
    ) -> CoreResult<GcIdx<LuaThread>> {
        mem.alloc(std::mem::size_of::<LuaThread>())?;
        let stack = match mem.try_vec(stack_size, TValue::nil()) {
            Ok(s) => s,
            Err(e) => {
                mem.free(std::mem::size_of::<LuaThread>());
                return Err(e);
            }
        };
        let thread = LuaThread {
            stack,
            open_upvals: Vec::new(),
            mark: gc.new_mark(),
        };
        Ok(GcIdx::new(self.threads.alloc(thread)))
    }

    pub fn get_thread(&self, idx: GcIdx<LuaThread>) -> &LuaThread {
        self.threads.get(idx.0).expect("thread was freed")
    }

    pub fn get_thread_mut(&mut self, idx: GcIdx<LuaThread>) -> &mut LuaThread {
        self.threads.get_mut(idx.0).expect("thread was freed")
    }

    pub fn alloc_upval(&mut self, location: UpValLocation, gc: &GcState, mem: &mut MemoryAccount) -> CoreResult<GcIdx<UpVal>> {
        mem.alloc(std::mem::size_of::<UpVal>())?;
        Ok(GcIdx::new(self.upvals.alloc(UpVal::new(location, gc.new_mark()))))
    }

    pub fn get_upval(&self, idx: GcIdx<UpVal>) -> &UpVal {
        self.upvals.get(idx.0).expect("upval was freed")
    }

    pub fn get_upval_mut(&mut self, idx: GcIdx<UpVal>) -> &mut UpVal {
        self.upvals.get_mut(idx.0).expect("upval was freed")
    }

    /// The mark of a heap entity. Strings live in the interner and yield `None`.
    pub fn mark_of(&self, r: GcRef) -> Option<Mark> {
        match r {
            GcRef::String(_) => None,
            GcRef::Table(i) => self.tables.get(i.0).map(Colored::mark),
            GcRef::Closure(i) => self.closures.get(i.0).map(Colored::mark),
            GcRef::UserData(i) => self.userdata.get(i.0).map(Colored::mark),
            GcRef::Thread(i) => self.threads.get(i.0).map(Colored::mark),
            GcRef::Proto(i) => self.protos.get(i.0).map(Colored::mark),
            GcRef::UpVal(i) => self.upvals.get(i.0).map(Colored::mark),
        }
    }

    pub fn mark_mut(&mut self, r: GcRef) -> Option<&mut Mark> {
        match r {
            GcRef::String(_) => None,
            GcRef::Table(i) => self.tables.get_mut(i.0).map(Colored::mark_mut),
            GcRef::Closure(i) => self.closures.get_mut(i.0).map(Colored::mark_mut),
            GcRef::UserData(i) => self.userdata.get_mut(i.0).map(Colored::mark_mut),
            GcRef::Thread(i) => self.threads.get_mut(i.0).map(Colored::mark_mut),
            GcRef::Proto(i) => self.protos.get_mut(i.0).map(Colored::mark_mut),
            GcRef::UpVal(i) => self.upvals.get_mut(i.0).map(Colored::mark_mut),
        }
    }

    /// Enumerate the children of a heap entity.
    pub fn trace(&self, r: GcRef, visit: &mut dyn FnMut(GcRef)) {
        match r {
            GcRef::String(_) => {}
            GcRef::Table(i) => {
                if let Some(t) = self.tables.get(i.0) {
                    t.trace(visit);
                }
            }
            GcRef::Closure(i) => {
                if let Some(c) = self.closures.get(i.0) {
                    c.trace(visit);
                }
            }
            GcRef::UserData(i) => {
                if let Some(u) = self.userdata.get(i.0) {
                    u.trace(visit);
                }
            }
            GcRef::Thread(i) => {
                if let Some(t) = self.threads.get(i.0) {
                    t.trace(visit);
                }
            }
            GcRef::Proto(i) => {
                if let Some(p) = self.protos.get(i.0) {
                    p.trace(visit);
                }
            }
            GcRef::UpVal(i) => {
                if let Some(u) = self.upvals.get(i.0) {
                    u.trace(visit);
                }
            }
        }
    }

    /// Release a heap entity and its accounted bytes. Returns bytes freed.
    pub fn free(&mut self, r: GcRef, mem: &mut MemoryAccount) -> usize {
        let bytes = match r {
            GcRef::String(_) => 0,
            GcRef::Table(i) => self.tables.remove(i.0).map_or(0, |t| {
                std::mem::size_of::<Table>() + t.storage_bytes()
            }),
            GcRef::Closure(i) => self.closures.remove(i.0).map_or(0, |c| closure_size(&c)),
            GcRef::UserData(i) => self
                .userdata
                .remove(i.0)
                .map_or(0, |u| std::mem::size_of::<UserData>() + u.data.len()),
            GcRef::Thread(i) => self.threads.remove(i.0).map_or(0, |t| {
                std::mem::size_of::<LuaThread>() + t.stack.len() * std::mem::size_of::<TValue>()
            }),
            GcRef::Proto(i) => self.protos.remove(i.0).map_or(0, |p| proto_size(&p)),
            GcRef::UpVal(i) => {
                self.uv_roots.shift_remove(&i);
                self.upvals.remove(i.0).map_or(0, |_| std::mem::size_of::<UpVal>())
            }
        };
        mem.free(bytes);
        bytes
    }

    /// Number of open upvalues tracked for the collector.
    pub fn open_upval_count(&self) -> usize {
        self.uv_roots.len()
    }
}

fn closure_size(c: &Closure) -> usize {
    std::mem::size_of::<Closure>() + c.upvals.len() * std::mem::size_of::<GcIdx<UpVal>>()
}

fn proto_size(p: &Proto) -> usize {
    std::mem::size_of::<Proto>()
        + p.constants.len() * std::mem::size_of::<TValue>()
        + p.protos.len() * std::mem::size_of::<GcIdx<Proto>>()
        + p.upvalue_names.len() * std::mem::size_of::<StringId>()
}
