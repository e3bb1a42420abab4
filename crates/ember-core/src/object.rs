//! Value kinds and type name helpers.

use crate::gc::*;
use crate::value::TValue;

/// The kind of a collectable object, as encoded in the value's sub-tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GcKind {
    String,
    Table,
    Closure,
    UserData,
    Thread,
    /// Function prototype. Internal only.
    Proto,
    /// Captured variable. Internal only.
    UpVal,
}

impl GcKind {
    /// Convert from sub-tag value to enum.
    pub fn from_sub_tag(tag: u64) -> Option<Self> {
        match tag {
            GC_SUB_STRING => Some(GcKind::String),
            GC_SUB_TABLE => Some(GcKind::Table),
            GC_SUB_CLOSURE => Some(GcKind::Closure),
            GC_SUB_USERDATA => Some(GcKind::UserData),
            GC_SUB_THREAD => Some(GcKind::Thread),
            GC_SUB_PROTO => Some(GcKind::Proto),
            GC_SUB_UPVAL => Some(GcKind::UpVal),
            _ => None,
        }
    }

    pub fn sub_tag(self) -> u64 {
        match self {
            GcKind::String => GC_SUB_STRING,
            GcKind::Table => GC_SUB_TABLE,
            GcKind::Closure => GC_SUB_CLOSURE,
            GcKind::UserData => GC_SUB_USERDATA,
            GcKind::Thread => GC_SUB_THREAD,
            GcKind::Proto => GC_SUB_PROTO,
            GcKind::UpVal => GC_SUB_UPVAL,
        }
    }

    /// True for kinds that user code can hold.
    pub fn is_user_visible(self) -> bool {
        !matches!(self, GcKind::Proto | GcKind::UpVal)
    }
}

/// The tag of a [`TValue`], as an enum for `match`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Boolean,
    Number,
    LightUserData,
    Gc(GcKind),
    /// A table key whose object was reclaimed.
    DeadKey,
}

impl ValueKind {
    /// The Lua type name.
    pub fn type_name(self) -> &'static str {
        match self {
            ValueKind::Nil => "nil",
            ValueKind::Boolean => "boolean",
            ValueKind::Number => "number",
            ValueKind::LightUserData => "userdata",
            ValueKind::Gc(GcKind::String) => "string",
            ValueKind::Gc(GcKind::Table) => "table",
            ValueKind::Gc(GcKind::Closure) => "function",
            ValueKind::Gc(GcKind::UserData) => "userdata",
            ValueKind::Gc(GcKind::Thread) => "thread",
            ValueKind::Gc(GcKind::Proto) => "proto",
            ValueKind::Gc(GcKind::UpVal) => "upval",
            ValueKind::DeadKey => "deadkey",
        }
    }
}

/// Get the Lua type name for a TValue.
pub fn lua_type_name(val: TValue) -> &'static str {
    val.kind().type_name()
}
