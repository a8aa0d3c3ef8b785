use crate::util::constants::*;

/* Alignment */

pub const fn raw_align_up(val: usize, align: usize) -> usize {
    // See https://github.com/rust-lang/rust/blob/e620d0f337d0643c757bab791fc7d88d63217704/src/libcore/alloc.rs#L192
    val.wrapping_add(align).wrapping_sub(1) & !align.wrapping_sub(1)
}

pub const fn raw_align_down(val: usize, align: usize) -> usize {
    val & !align.wrapping_sub(1)
}

pub const fn raw_is_aligned(val: usize, align: usize) -> bool {
    val & align.wrapping_sub(1) == 0
}

/// Round a size up to the default object alignment.
pub const fn align_object_size(size: usize) -> usize {
    raw_align_up(size, DEFAULT_OBJECT_ALIGNMENT)
}

/* Conversion */

pub fn bytes_to_formatted_string(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut i = 0;
    let mut num = bytes;
    while i < UNITS.len() - 1 {
        let new_num = num >> 10;
        if new_num == 0 {
            return format!("{}{}", num, UNITS[i]);
        }
        num = new_num;
        i += 1;
    }
    format!("{}{}", num, UNITS[UNITS.len() - 1])
}

#[cfg(test)]
mod tests {
    use crate::util::conversions::*;

    #[test]
    fn test_align_up_down() {
        assert_eq!(raw_align_up(0, 8), 0);
        assert_eq!(raw_align_up(1, 8), 8);
        assert_eq!(raw_align_up(8, 8), 8);
        assert_eq!(raw_align_down(15, 8), 8);
        assert!(raw_is_aligned(16, 8));
        assert!(!raw_is_aligned(12, 8));
    }

    #[test]
    fn test_align_object_size() {
        assert_eq!(align_object_size(1), DEFAULT_OBJECT_ALIGNMENT);
        assert_eq!(
            align_object_size(DEFAULT_OBJECT_ALIGNMENT + 1),
            DEFAULT_OBJECT_ALIGNMENT * 2
        );
    }

    #[test]
    fn test_bytes_to_formatted_string() {
        assert_eq!(bytes_to_formatted_string(0), "0B");
        assert_eq!(bytes_to_formatted_string(1023), "1023B");
        assert_eq!(bytes_to_formatted_string(1024), "1KiB");
        assert_eq!(bytes_to_formatted_string(1025), "1KiB");
        assert_eq!(bytes_to_formatted_string(1 << 20), "1MiB");
        assert_eq!(bytes_to_formatted_string(1 << 30), "1GiB");
        assert_eq!(bytes_to_formatted_string(1 << 40), "1TiB");
    }
}
