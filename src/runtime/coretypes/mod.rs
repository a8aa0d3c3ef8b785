//! Layouts of the core managed objects.

pub mod array;
pub mod class;
pub mod string;
pub mod string_helpers;
