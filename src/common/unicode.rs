// Simple (1:1) uppercase folding. Characters whose uppercase form expands to
// several code points (e.g. 'ß') fold to themselves, matching how
// case-insensitive volumes compare names.

use std::hash::Hasher;

use fnv::FnvHasher;

use crate::error::LookupError;

#[inline]
pub fn fold_char(ch: char) -> char {
    if ch.is_ascii() {
        return ch.to_ascii_uppercase();
    }
    let mut upper = ch.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(single), None) => single,
        _ => ch,
    }
}

pub fn fold_key(input: &str) -> String {
    input.chars().map(fold_char).collect()
}

pub fn names_equal_folded(a: &str, b: &str) -> bool {
    if a.len() == b.len() && a.eq_ignore_ascii_case(b) {
        return true;
    }
    if a.is_ascii() && b.is_ascii() {
        return false;
    }
    let mut lhs = a.chars().map(fold_char);
    let mut rhs = b.chars().map(fold_char);
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => continue,
            _ => return false,
        }
    }
}

pub fn fold_hash(name: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    for ch in name.chars() {
        hasher.write_u32(fold_char(ch) as u32);
    }
    let value = hasher.finish();
    (value ^ (value >> 32)) as u32
}

pub fn exact_hash(name: &str) -> u32 {
    let mut hasher = FnvHasher::default();
    hasher.write(name.as_bytes());
    let value = hasher.finish();
    (value ^ (value >> 32)) as u32
}

pub fn to_wide(value: &str) -> Box<[u16]> {
    value.encode_utf16().collect::<Vec<u16>>().into_boxed_slice()
}

/// Narrow bytes that are not valid UTF-8 cannot be represented in UTF-16.
pub fn narrow_from_bytes(bytes: &[u8]) -> Result<&str, LookupError> {
    std::str::from_utf8(bytes).map_err(|_| LookupError::Utf16ConversionError)
}

/// Unpaired surrogates have no narrow representation.
pub fn narrow_from_wide(wide: &[u16]) -> Result<String, LookupError> {
    String::from_utf16(wide).map_err(|_| LookupError::AnsiConversionError)
}
