/// log2 of the number of bytes in a byte
pub const LOG_BYTES_IN_BYTE: u8 = 0;
/// The number of bytes in a byte
pub const BYTES_IN_BYTE: usize = 1;
/// log2 of the number of bits in a byte
pub const LOG_BITS_IN_BYTE: u8 = 3;
/// The number of bits in a byte
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

/// log2 of the number of bytes in a gigabyte
pub const LOG_BYTES_IN_GBYTE: u8 = 30;
/// The number of bytes in a gigabyte
pub const BYTES_IN_GBYTE: usize = 1 << LOG_BYTES_IN_GBYTE;

/// log2 of the number of bytes in a megabyte
pub const LOG_BYTES_IN_MBYTE: u8 = 20;
/// The number of bytes in a megabyte
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

/// log2 of the number of bytes in a kilobyte
pub const LOG_BYTES_IN_KBYTE: u8 = 10;
/// The number of bytes in a kilobyte
pub const BYTES_IN_KBYTE: usize = 1 << LOG_BYTES_IN_KBYTE;

#[cfg(target_pointer_width = "32")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 2;
#[cfg(target_pointer_width = "64")]
/// log2 of the number of bytes in an address
pub const LOG_BYTES_IN_ADDRESS: u8 = 3;
/// The number of bytes in an address
pub const BYTES_IN_ADDRESS: usize = 1 << LOG_BYTES_IN_ADDRESS;

/// log2 of the number of bytes in a word
pub const LOG_BYTES_IN_WORD: u8 = LOG_BYTES_IN_ADDRESS;
/// The number of bytes in a word
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;

/// log2 of the number of bytes in a page
pub const LOG_BYTES_IN_PAGE: u8 = 12;
/// The number of bytes in a page
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// Managed code units of an uncompressed string are 16 bits wide.
pub const BYTES_IN_UTF16_CHAR: usize = 2;

/// Every managed object starts on this boundary.
pub const DEFAULT_OBJECT_ALIGNMENT: usize = BYTES_IN_WORD;

/// Storage reserved in a class for every instance field, regardless of its type.
pub const BYTES_IN_FIELD_SLOT: usize = 8;

/// Objects at least this large are accounted as humongous.
pub const HUMONGOUS_OBJECT_THRESHOLD: usize = 256 * BYTES_IN_KBYTE;

/****************************************************************************
 * Heap defaults
 */

/// Heap size the runtime starts with unless configured otherwise.
pub const DEFAULT_INIT_HEAP_SIZE: usize = 32 * BYTES_IN_MBYTE;
/// Heap size the runtime never grows beyond unless configured otherwise.
pub const DEFAULT_HEAP_SIZE_LIMIT: usize = 512 * BYTES_IN_MBYTE;
/// Default number of GC worker threads, capped by the available CPUs.
pub const DEFAULT_GC_WORKERS_COUNT: usize = 3;
