//! Modified UTF-8 (MUTF-8) and UTF-16 conversions.
//!
//! MUTF-8 differs from UTF-8 in two ways: the code unit 0 is encoded as the two bytes `C0 80`, so
//! an encoded string never contains a zero byte, and a lone surrogate is encoded as a three-byte
//! sequence of its own. A valid surrogate pair is encoded as the four-byte UTF-8 sequence of its
//! code point.

/// Code units decoded from MUTF-8 bytes. Malformed or truncated sequences decode byte by byte.
pub struct Mutf8Decoder<'a> {
    data: &'a [u8],
    pos: usize,
    pending_low: Option<u16>,
}

impl<'a> Mutf8Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Mutf8Decoder {
            data,
            pos: 0,
            pending_low: None,
        }
    }

    fn continuation(&self, offset: usize) -> Option<u32> {
        let b = *self.data.get(self.pos + offset)?;
        (b & 0xc0 == 0x80).then_some((b & 0x3f) as u32)
    }
}

impl Iterator for Mutf8Decoder<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        if let Some(low) = self.pending_low.take() {
            return Some(low);
        }
        let b = *self.data.get(self.pos)?;
        if b < 0x80 {
            self.pos += 1;
            return Some(b as u16);
        }
        if b & 0xe0 == 0xc0 {
            if let Some(c1) = self.continuation(1) {
                self.pos += 2;
                return Some(((((b & 0x1f) as u32) << 6) | c1) as u16);
            }
        } else if b & 0xf0 == 0xe0 {
            if let (Some(c1), Some(c2)) = (self.continuation(1), self.continuation(2)) {
                self.pos += 3;
                return Some(((((b & 0x0f) as u32) << 12) | (c1 << 6) | c2) as u16);
            }
        } else if b & 0xf8 == 0xf0 {
            if let (Some(c1), Some(c2), Some(c3)) =
                (self.continuation(1), self.continuation(2), self.continuation(3))
            {
                self.pos += 4;
                let code_point = (((b & 0x07) as u32) << 18) | (c1 << 12) | (c2 << 6) | c3;
                let mut pair = [0u16; 2];
                if let Some(c) = char::from_u32(code_point) {
                    let units = c.encode_utf16(&mut pair);
                    if units.len() == 2 {
                        self.pending_low = Some(pair[1]);
                    }
                    return Some(pair[0]);
                }
                return Some(0xfffd);
            }
        }
        self.pos += 1;
        Some(b as u16)
    }
}

/// Number of UTF-16 code units encoded by `mutf8`.
pub fn mutf8_to_utf16_size(mutf8: &[u8]) -> usize {
    Mutf8Decoder::new(mutf8).count()
}

/// Decode `mutf8` into `out`, which must hold [`mutf8_to_utf16_size`] units. Returns the number
/// of units written.
pub fn convert_mutf8_to_utf16(mutf8: &[u8], out: &mut [u16]) -> usize {
    let mut written = 0;
    for (slot, unit) in out.iter_mut().zip(Mutf8Decoder::new(mutf8)) {
        *slot = unit;
        written += 1;
    }
    written
}

fn is_high_surrogate(unit: u16) -> bool {
    (0xd800..0xdc00).contains(&unit)
}

fn is_low_surrogate(unit: u16) -> bool {
    (0xdc00..0xe000).contains(&unit)
}

fn encode_unit(unit: u16, out: &mut impl FnMut(u8)) {
    match unit {
        0x01..=0x7f => out(unit as u8),
        0x00 | 0x80..=0x7ff => {
            out(0xc0 | (unit >> 6) as u8);
            out(0x80 | (unit & 0x3f) as u8);
        }
        _ => {
            out(0xe0 | (unit >> 12) as u8);
            out(0x80 | ((unit >> 6) & 0x3f) as u8);
            out(0x80 | (unit & 0x3f) as u8);
        }
    }
}

fn encode_utf16(utf16: &[u16], mut out: impl FnMut(u8)) {
    let mut i = 0;
    while i < utf16.len() {
        let unit = utf16[i];
        if is_high_surrogate(unit) && i + 1 < utf16.len() && is_low_surrogate(utf16[i + 1]) {
            let code_point =
                0x10000 + (((unit as u32 - 0xd800) << 10) | (utf16[i + 1] as u32 - 0xdc00));
            out(0xf0 | (code_point >> 18) as u8);
            out(0x80 | ((code_point >> 12) & 0x3f) as u8);
            out(0x80 | ((code_point >> 6) & 0x3f) as u8);
            out(0x80 | (code_point & 0x3f) as u8);
            i += 2;
        } else {
            encode_unit(unit, &mut out);
            i += 1;
        }
    }
}

/// Number of bytes of the MUTF-8 encoding of `utf16`, without a terminator.
pub fn utf16_to_mutf8_size(utf16: &[u16]) -> usize {
    let mut size = 0;
    encode_utf16(utf16, |_| size += 1);
    size
}

/// Encode `utf16` into `out`, which must hold [`utf16_to_mutf8_size`] bytes. Returns the number of
/// bytes written.
pub fn convert_utf16_to_mutf8(utf16: &[u16], out: &mut [u8]) -> usize {
    let mut written = 0;
    encode_utf16(utf16, |b| {
        if let Some(slot) = out.get_mut(written) {
            *slot = b;
            written += 1;
        }
    });
    written
}

/// Encode `len` units of `utf16` starting at `start`. Surrogate pairs split by the region bounds
/// are encoded as lone surrogates.
pub fn convert_region_utf16_to_mutf8(utf16: &[u16], out: &mut [u8], start: usize, len: usize) -> usize {
    match start.checked_add(len).and_then(|end| utf16.get(start..end)) {
        Some(region) => convert_utf16_to_mutf8(region, out),
        None => 0,
    }
}

/// Are all bytes single-byte MUTF-8 characters, that is non-zero ASCII?
pub fn is_mutf8_only_single_bytes(mutf8: &[u8]) -> bool {
    mutf8.iter().all(|b| (0x01..=0x7f).contains(b))
}

/// Decode UTF-8 into UTF-16 code units. Malformed sequences become U+FFFD.
pub fn utf8_to_utf16(utf8: &[u8]) -> Vec<u16> {
    String::from_utf8_lossy(utf8).encode_utf16().collect()
}
