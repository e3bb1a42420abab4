//! Runtime construction parameters.

/// Minimum size of the string table (must be a power of 2).
pub const MINSTRTABSIZE: usize = 32;

/// Initial value-stack size for a new thread.
pub const BASIC_STACK_SIZE: usize = 40;

/// Parameters for [`Runtime::new`](crate::state::Runtime::new).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Initial bucket count of the string table. Rounded up to a power of 2
    /// and never below [`MINSTRTABSIZE`].
    pub string_table_size: usize,
    /// Hard cap on accounted bytes. `None` means unlimited.
    pub memory_limit: Option<usize>,
    /// Stack slots for the main thread and every new thread.
    pub stack_size: usize,
    /// Hash-part hint for the registry table.
    pub registry_hash_hint: usize,
    /// Hash-part hint for the globals table.
    pub globals_hash_hint: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            string_table_size: MINSTRTABSIZE,
            memory_limit: None,
            stack_size: BASIC_STACK_SIZE,
            registry_hash_hint: 2,
            globals_hash_hint: 2,
        }
    }
}

impl RuntimeConfig {
    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn with_string_table_size(mut self, size: usize) -> Self {
        self.string_table_size = size;
        self
    }

    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// The string table size actually used at startup.
    pub fn effective_string_table_size(&self) -> usize {
        self.string_table_size.max(MINSTRTABSIZE).next_power_of_two()
    }
}
