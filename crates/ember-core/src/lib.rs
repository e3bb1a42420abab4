//! Ember core object model: tagged values, interned strings, hybrid tables,
//! upvalues and the collector bookkeeping that ties them together.
pub mod collector;
pub mod config;
pub mod error;
pub mod gc;
pub mod heap;
pub mod mem;
pub mod object;
pub mod state;
pub mod string;
pub mod table;
pub mod upval;
pub mod value;

pub use config::RuntimeConfig;
pub use error::{CoreError, CoreResult};
pub use state::Runtime;
pub use value::TValue;
