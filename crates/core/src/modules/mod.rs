pub mod flush_module;
pub mod traits;

pub use flush_module::{FlushDriver, FlushModule};
pub use traits::{AsyncModule, ModuleEvent, ModuleId, ModuleMessage};
