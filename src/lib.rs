//! Panda Runtime is the managed-runtime substrate of the Panda VM: class linking and the
//! bootstrap of the class roots, the memory manager with its collector configuration, and the
//! managed string type with its two encodings.
//!
//! Logical structure
//!
//! * [Runtime](runtime/struct.Runtime.html): A running VM. It owns the memory manager and the
//!   class linker, and is the VM the collector asks for roots.
//! * [Class linker](runtime/class_linker/index.html): Loads classes from class files into class
//!   linker contexts. The per-language part is a
//!   [ClassLinkerExtension](runtime/class_linker/extension/trait.ClassLinkerExtension.html).
//! * [Memory manager](mem/memory_manager/struct.MemoryManager.html): The heap, the collector,
//!   its trigger and statistics, and the global reference storage.
//! * [Strings](runtime/coretypes/string/index.html): Managed strings and the operations that
//!   create them.
//! * [Options](util/options/struct.Options.html): Runtime options, settable by environment
//!   variables prefixed with `PANDA_`.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;

pub mod mem;
pub mod runtime;
pub mod util;
pub mod vm;

#[cfg(test)]
mod tests;

pub use crate::mem::memory_manager::MemoryManager;
pub use crate::runtime::{Runtime, RuntimeError};
pub use crate::util::options::Options;
