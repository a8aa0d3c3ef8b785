//! Utilities used by other modules, including address types, constants, options and logging.

/// Address and object reference types.
pub mod address;
/// Sizes and defaults shared by the whole runtime.
pub mod constants;
/// Alignment and unit conversions.
pub mod conversions;
/// Logger initialization
pub mod logger;
/// Runtime options.
pub mod options;

#[cfg(test)]
pub mod test_util;

pub use self::address::Address;
pub use self::address::ObjectReference;
