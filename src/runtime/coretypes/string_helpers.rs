//! Algorithms on the code units of strings. Every function works on both encodings: a compressed
//! string is a slice of `u8`, a wide one a slice of `u16`, and mixed pairs compare unit values.

use bytemuck::Pod;

/// A code unit of a string: a byte of the compressed encoding or a UTF-16 code unit.
pub trait CodeUnit: Pod + Eq + Into<u16> {}

impl CodeUnit for u8 {}
impl CodeUnit for u16 {}

const BLOCK_SIZE: usize = std::mem::size_of::<u64>();

/// Can `unit` be stored in a compressed string? The zero unit cannot, since MUTF-8 encodes it with
/// two bytes.
#[inline(always)]
pub fn is_compressible_unit(unit: u16) -> bool {
    (0x01..=0x7f).contains(&unit)
}

pub fn is_compressible_utf16(utf16: &[u16]) -> bool {
    utf16.iter().all(|&unit| is_compressible_unit(unit))
}

/// Like [`is_compressible_utf16`], but `exempt` passes as well.
pub fn is_compressible_utf16_except(utf16: &[u16], exempt: u16) -> bool {
    utf16
        .iter()
        .all(|&unit| unit == exempt || is_compressible_unit(unit))
}

/// Position of the first unit where `a` and `b` differ, or the length of the shorter one. Equal
/// prefixes are skipped a machine word at a time.
pub fn first_mismatch<T: CodeUnit>(a: &[T], b: &[T]) -> usize {
    let len = a.len().min(b.len());
    let units_per_block = BLOCK_SIZE / std::mem::size_of::<T>();
    let mut i = 0;
    while i + units_per_block <= len {
        let block_a: u64 = bytemuck::pod_read_unaligned(bytemuck::cast_slice(&a[i..i + units_per_block]));
        let block_b: u64 = bytemuck::pod_read_unaligned(bytemuck::cast_slice(&b[i..i + units_per_block]));
        if block_a != block_b {
            break;
        }
        i += units_per_block;
    }
    while i < len && a[i] == b[i] {
        i += 1;
    }
    i
}

fn unit_difference<T: CodeUnit, U: CodeUnit>(a: T, b: U) -> i32 {
    let a: u16 = a.into();
    let b: u16 = b.into();
    a as i32 - b as i32
}

/// Compare two strings of the same encoding by unit values, then by length.
pub fn compare_same<T: CodeUnit>(a: &[T], b: &[T]) -> i32 {
    let i = first_mismatch(a, b);
    if i < a.len().min(b.len()) {
        return unit_difference(a[i], b[i]);
    }
    a.len() as i32 - b.len() as i32
}

/// Compare two strings of different encodings by unit values, then by length.
pub fn compare_mixed<T: CodeUnit, U: CodeUnit>(a: &[T], b: &[U]) -> i32 {
    for (&x, &y) in a.iter().zip(b) {
        let diff = unit_difference(x, y);
        if diff != 0 {
            return diff;
        }
    }
    a.len() as i32 - b.len() as i32
}

fn unit_eq<T: CodeUnit, U: CodeUnit>(a: T, b: U) -> bool {
    let a: u16 = a.into();
    let b: u16 = b.into();
    a == b
}

fn matches_at<T: CodeUnit, U: CodeUnit>(text: &[T], pattern: &[U], start: usize) -> bool {
    text[start..start + pattern.len()]
        .iter()
        .zip(pattern)
        .all(|(&t, &p)| unit_eq(t, p))
}

/// Length of the tailed substring of `pattern`: its longest suffix whose last unit occurs nowhere
/// else in the suffix.
pub fn tailed_substring_len<U: CodeUnit>(pattern: &[U]) -> usize {
    let m = pattern.len();
    let last = pattern[m - 1];
    match pattern[..m - 1].iter().rposition(|&unit| unit == last) {
        Some(k) => m - 1 - k,
        None => m,
    }
}

/// Length of the longest prefix of `pattern` whose first unit occurs nowhere else in the prefix.
pub fn headed_substring_len<U: CodeUnit>(pattern: &[U]) -> usize {
    let first = pattern[0];
    match pattern[1..].iter().position(|&unit| unit == first) {
        Some(k) => k + 1,
        None => pattern.len(),
    }
}

/// First occurrence of the non-empty `pattern` in `text` at or after `from`.
///
/// Candidates are found by the last unit of the pattern. After a failed candidate, the next
/// alignment that can match puts an earlier occurrence of that unit under the same text position,
/// which is the tailed substring length away.
pub fn index_of<T: CodeUnit, U: CodeUnit>(text: &[T], pattern: &[U], from: usize) -> Option<usize> {
    let (n, m) = (text.len(), pattern.len());
    debug_assert!(m > 0);
    if m > n || from > n - m {
        return None;
    }
    let last = pattern[m - 1];
    let skip = tailed_substring_len(pattern);
    let mut end = from + m - 1;
    while end < n {
        if !unit_eq(text[end], last) {
            end += 1;
            continue;
        }
        let start = end + 1 - m;
        if matches_at(text, pattern, start) {
            return Some(start);
        }
        end += skip;
    }
    None
}

/// Last occurrence of the non-empty `pattern` in `text` starting at or before `from`. The mirror
/// image of [`index_of`].
pub fn last_index_of<T: CodeUnit, U: CodeUnit>(text: &[T], pattern: &[U], from: usize) -> Option<usize> {
    let (n, m) = (text.len(), pattern.len());
    debug_assert!(m > 0);
    if m > n {
        return None;
    }
    let first = pattern[0];
    let skip = headed_substring_len(pattern);
    let mut start = from.min(n - m);
    loop {
        let step = if !unit_eq(text[start], first) {
            1
        } else if matches_at(text, pattern, start) {
            return Some(start);
        } else {
            skip
        };
        if start < step {
            return None;
        }
        start -= step;
    }
}

/// `31 * h + c` over the units, the hash of managed strings.
pub fn compute_hash<T: CodeUnit>(units: impl IntoIterator<Item = T>) -> u32 {
    units.into_iter().fold(0u32, |hash, unit| {
        let unit: u16 = unit.into();
        hash.wrapping_mul(31).wrapping_add(unit as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().collect()
    }

    #[test]
    fn compressible_units() {
        assert!(is_compressible_unit(b'a' as u16));
        assert!(!is_compressible_unit(0));
        assert!(!is_compressible_unit(0x80));
        assert!(is_compressible_utf16(&wide("plain")));
        assert!(!is_compressible_utf16(&wide("ça")));
        assert!(is_compressible_utf16_except(&wide("ça"), 'ç' as u16));
        assert!(!is_compressible_utf16_except(&wide("çé"), 'ç' as u16));
    }

    #[test]
    fn mismatch_across_blocks() {
        let a = b"0123456789abcdefXY";
        let b = b"0123456789abcdefXZ";
        assert_eq!(first_mismatch(&a[..], &b[..]), 17);
        assert_eq!(first_mismatch(&a[..16], &b[..]), 16);
        assert_eq!(first_mismatch(&wide("abcdefgh"), &wide("abcdXfgh")), 4);
    }

    #[test]
    fn compare_orders_by_units_then_length() {
        assert!(compare_same(b"abc", b"abd") < 0);
        assert!(compare_same(b"abd", b"abc") > 0);
        assert!(compare_same(b"abc", b"abcx") < 0);
        assert_eq!(compare_same(b"abc", b"abc"), 0);
        assert!(compare_mixed(&b"abc"[..], &wide("abd")) < 0);
        assert!(compare_mixed(&wide("\u{100}"), &b"z"[..]) > 0);
        assert_eq!(compare_mixed(&wide("abc"), &b"abc"[..]), 0);
    }

    #[test]
    fn tailed_and_headed_substrings() {
        assert_eq!(tailed_substring_len(b"aba"), 2);
        assert_eq!(tailed_substring_len(b"abc"), 3);
        assert_eq!(tailed_substring_len(b"aa"), 1);
        assert_eq!(headed_substring_len(b"aba"), 2);
        assert_eq!(headed_substring_len(b"abcd"), 4);
    }

    #[test]
    fn search() {
        let text = b"abacaba";
        assert_eq!(index_of(text, b"aba", 0), Some(0));
        assert_eq!(index_of(text, b"aba", 1), Some(4));
        assert_eq!(index_of(text, b"aba", 5), None);
        assert_eq!(index_of(text, b"abacabaa", 0), None);
        assert_eq!(last_index_of(text, b"aba", 7), Some(4));
        assert_eq!(last_index_of(text, b"aba", 3), Some(0));
        assert_eq!(last_index_of(text, b"cab", 1), None);
        assert_eq!(index_of(&wide("xxçaç"), &wide("aç"), 0), Some(3));
        assert_eq!(index_of(&wide("xxcab"), &b"ab"[..], 0), Some(3));
    }

    #[test]
    fn hash_is_the_same_for_both_encodings() {
        assert_eq!(compute_hash(b"".iter().copied()), 0);
        assert_eq!(compute_hash(b"ab".iter().copied()), 97 * 31 + 98);
        assert_eq!(
            compute_hash(b"hello".iter().copied()),
            compute_hash(wide("hello"))
        );
    }
}
