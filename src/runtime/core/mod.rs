//! The core language: panda assembly.

pub mod core_class_linker_extension;
