//! The runtime object: owns the heap, the string table and collector state.
//!
//! Every mutating operation goes through `&mut Runtime`, which applies the
//! write barriers the collector relies on.

use crate::collector::{forward_barrier, table_barrier, CollectStats, Collector};
use crate::config::RuntimeConfig;
use crate::error::CoreResult;
use crate::gc::{GcIdx, GcRef, GcState};
use crate::heap::{Closure, GcHeap, LuaThread, Proto, UserData};
use crate::mem::MemoryAccount;
use crate::object::lua_type_name;
use crate::string::{StringId, StringInterner};
use crate::table::Table;
use crate::upval::{self, UpVal};
use crate::value::{self, TValue};

const MEMERRMSG: &[u8] = b"not enough memory";

pub struct Runtime {
    heap: GcHeap,
    strings: StringInterner,
    gc: GcState,
    mem: MemoryAccount,
    config: RuntimeConfig,
    main_thread: GcIdx<LuaThread>,
    registry: GcIdx<Table>,
    globals: GcIdx<Table>,
    memerrmsg: StringId,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> CoreResult<Self> {
        let mut mem = MemoryAccount::new(config.memory_limit);
        let gc = GcState::new();
        let mut heap = GcHeap::new();
        let mut strings = StringInterner::new(config.effective_string_table_size(), &mut mem)?;
        let registry = heap.alloc_table(0, config.registry_hash_hint, &gc, &mut mem)?;
        let globals = heap.alloc_table(0, config.globals_hash_hint, &gc, &mut mem)?;
        let main_thread = heap.alloc_thread(config.stack_size, &gc, &mut mem)?;
        let memerrmsg = strings.intern(MEMERRMSG, &gc, &mut mem)?;
        strings.fix(memerrmsg);
        tracing::debug!(
            string_table = strings.size(),
            stack = config.stack_size,
            bytes = mem.total_bytes(),
            "runtime created"
        );
        Ok(Runtime {
            heap,
            strings,
            gc,
            mem,
            config,
            main_thread,
            registry,
            globals,
            memerrmsg,
        })
    }

    /// Close every open upvalue and release the runtime.
    pub fn close(mut self) {
        let threads: Vec<_> = self.heap.threads.indices().map(GcIdx::new).collect();
        for th in threads {
            upval::close(&mut self.heap, &mut self.strings, &mut self.gc, &mut self.mem, th, 0);
        }
        tracing::debug!(
            bytes = self.mem.total_bytes(),
            strings = self.strings.len(),
            tables = self.heap.tables.len(),
            "runtime closed"
        );
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> GcIdx<Table> {
        self.registry
    }

    pub fn globals(&self) -> GcIdx<Table> {
        self.globals
    }

    pub fn main_thread(&self) -> GcIdx<LuaThread> {
        self.main_thread
    }

    /// The preallocated "not enough memory" message.
    pub fn memory_error_message(&self) -> StringId {
        self.memerrmsg
    }

    /// Bytes currently accounted.
    pub fn memory_in_use(&self) -> usize {
        self.mem.total_bytes()
    }

    pub fn set_memory_limit(&mut self, limit: Option<usize>) {
        self.mem.set_limit(limit);
    }

    pub fn heap(&self) -> &GcHeap {
        &self.heap
    }

    pub fn strings(&self) -> &StringInterner {
        &self.strings
    }

    pub fn gc_state(&self) -> &GcState {
        &self.gc
    }

    // ---- Strings ----

    pub fn intern(&mut self, bytes: &[u8]) -> CoreResult<StringId> {
        self.strings.intern(bytes, &self.gc, &mut self.mem)
    }

    pub fn str_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get_bytes(id)
    }

    // ---- Tables ----

    pub fn new_table(&mut self, narray: usize, nhash: usize) -> CoreResult<GcIdx<Table>> {
        self.heap.alloc_table(narray, nhash, &self.gc, &mut self.mem)
    }

    pub fn table(&self, t: GcIdx<Table>) -> &Table {
        self.heap.get_table(t)
    }

    pub fn table_get(&self, t: GcIdx<Table>, key: TValue) -> TValue {
        self.heap.get_table(t).get(key, &self.strings)
    }

    pub fn table_get_int(&self, t: GcIdx<Table>, key: i64) -> TValue {
        self.heap.get_table(t).get_int(key)
    }

    pub fn table_get_str(&self, t: GcIdx<Table>, key: StringId) -> TValue {
        self.heap.get_table(t).get_str(key, &self.strings)
    }

    pub fn table_set(&mut self, t: GcIdx<Table>, key: TValue, value: TValue) -> CoreResult<()> {
        self.heap
            .get_table_mut(t)
            .set(key, value, &self.strings, &mut self.mem)?;
        table_barrier(&mut self.heap, &self.strings, &mut self.gc, t, key);
        table_barrier(&mut self.heap, &self.strings, &mut self.gc, t, value);
        Ok(())
    }

    pub fn table_set_int(&mut self, t: GcIdx<Table>, key: i64, value: TValue) -> CoreResult<()> {
        self.heap
            .get_table_mut(t)
            .set_int(key, value, &self.strings, &mut self.mem)?;
        table_barrier(&mut self.heap, &self.strings, &mut self.gc, t, value);
        Ok(())
    }

    pub fn table_set_str(&mut self, t: GcIdx<Table>, key: StringId, value: TValue) -> CoreResult<()> {
        self.heap
            .get_table_mut(t)
            .set_str(key, value, &self.strings, &mut self.mem)?;
        table_barrier(
            &mut self.heap,
            &self.strings,
            &mut self.gc,
            t,
            TValue::from_string_id(key),
        );
        table_barrier(&mut self.heap, &self.strings, &mut self.gc, t, value);
        Ok(())
    }

    /// Border of the table (the `#` operator without metamethods).
    pub fn table_length(&self, t: GcIdx<Table>) -> usize {
        self.heap.get_table(t).length()
    }

    pub fn table_next(&self, t: GcIdx<Table>, key: TValue) -> CoreResult<Option<(TValue, TValue)>> {
        self.heap.get_table(t).next(key, &self.strings)
    }

    pub fn table_resize(&mut self, t: GcIdx<Table>, narray: usize, nhash: usize) -> CoreResult<()> {
        self.heap
            .get_table_mut(t)
            .resize(narray, nhash, &self.strings, &mut self.mem)
    }

    pub fn set_metatable(&mut self, t: GcIdx<Table>, mt: Option<GcIdx<Table>>) {
        self.heap.get_table_mut(t).metatable = mt;
        if let Some(mt) = mt {
            table_barrier(&mut self.heap, &self.strings, &mut self.gc, t, TValue::from_table(mt));
        }
    }

    pub fn get_metatable(&self, t: GcIdx<Table>) -> Option<GcIdx<Table>> {
        self.heap.get_table(t).metatable
    }

    pub fn set_userdata_metatable(&mut self, ud: GcIdx<UserData>, mt: Option<GcIdx<Table>>) {
        self.heap.get_userdata_mut(ud).metatable = mt;
        if let Some(mt) = mt {
            forward_barrier(
                &mut self.heap,
                &mut self.strings,
                &mut self.gc,
                GcRef::UserData(ud),
                TValue::from_table(mt),
            );
        }
    }

    // ---- Threads ----

    pub fn new_thread(&mut self) -> CoreResult<GcIdx<LuaThread>> {
        self.heap
            .alloc_thread(self.config.stack_size, &self.gc, &mut self.mem)
    }

    pub fn stack(&self, th: GcIdx<LuaThread>) -> &[TValue] {
        &self.heap.get_thread(th).stack
    }

    /// Stacks are rescanned by the collector, so writes need no barrier.
    /// The slice keeps the accounted stack size fixed.
    pub fn stack_mut(&mut self, th: GcIdx<LuaThread>) -> &mut [TValue] {
        &mut self.heap.get_thread_mut(th).stack
    }

    // ---- Functions and userdata ----

    pub fn new_proto(&mut self, proto: Proto) -> CoreResult<GcIdx<Proto>> {
        self.heap.alloc_proto(proto, &self.gc, &mut self.mem)
    }

    pub fn new_closure(
        &mut self,
        proto: GcIdx<Proto>,
        env: Option<GcIdx<Table>>,
        upvals: Vec<GcIdx<UpVal>>,
    ) -> CoreResult<GcIdx<Closure>> {
        self.heap
            .alloc_closure(proto, env, upvals, &self.gc, &mut self.mem)
    }

    pub fn closure(&self, c: GcIdx<Closure>) -> &Closure {
        self.heap.get_closure(c)
    }

    pub fn new_userdata(&mut self, size: usize, env: Option<GcIdx<Table>>) -> CoreResult<GcIdx<UserData>> {
        self.heap.alloc_userdata(size, env, &self.gc, &mut self.mem)
    }

    pub fn userdata(&self, ud: GcIdx<UserData>) -> &UserData {
        self.heap.get_userdata(ud)
    }

    pub fn userdata_mut(&mut self, ud: GcIdx<UserData>) -> &mut UserData {
        self.heap.get_userdata_mut(ud)
    }

    // ---- Upvalues ----

    pub fn find_or_create_upval(&mut self, th: GcIdx<LuaThread>, slot: usize) -> CoreResult<GcIdx<UpVal>> {
        upval::find_or_create(&mut self.heap, &self.gc, &mut self.mem, th, slot)
    }

    /// Close the upvalues of `th` at stack level `level` and above.
    pub fn close_upvals(&mut self, th: GcIdx<LuaThread>, level: usize) {
        upval::close(&mut self.heap, &mut self.strings, &mut self.gc, &mut self.mem, th, level);
    }

    pub fn upval_get(&self, uv: GcIdx<UpVal>) -> TValue {
        upval::get(&self.heap, uv)
    }

    pub fn upval_set(&mut self, uv: GcIdx<UpVal>, value: TValue) {
        upval::set(&mut self.heap, &mut self.strings, &mut self.gc, uv, value);
    }

    // ---- Values ----

    pub fn raw_equal(&self, a: TValue, b: TValue) -> bool {
        value::raw_equal(a, b)
    }

    pub fn type_name(&self, v: TValue) -> &'static str {
        lua_type_name(v)
    }

    // ---- Collection ----

    /// Run a full collection from the registry, the globals and the main thread.
    pub fn collect_garbage(&mut self) -> CollectStats {
        let roots = [
            GcRef::Table(self.registry),
            GcRef::Table(self.globals),
            GcRef::Thread(self.main_thread),
        ];
        Collector::new(&mut self.heap, &mut self.strings, &mut self.gc, &mut self.mem)
            .full_collect(&roots)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("bytes", &self.mem.total_bytes())
            .field("strings", &self.strings.len())
            .field("tables", &self.heap.tables.len())
            .field("phase", &self.gc.phase())
            .finish()
    }
}
