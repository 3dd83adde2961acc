//! Hex string helpers.

use crate::error::HexError;
use core::fmt::Write;

/// Decode a string of hex digit pairs.
pub fn from_hex_str(input: &str) -> Result<Vec<u8>, HexError> {
    if input.len() % 2 != 0 {
        return Err(HexError::OddLength(input.len()));
    }

    input
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            if !pair.iter().all(u8::is_ascii_hexdigit) {
                return Err(HexError::NonHex);
            }
            core::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or(HexError::NonHex)
        })
        .collect()
}

/// Lowercase, two digits per byte.
pub fn to_hex_str(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        // Writing into a String cannot fail.
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// Uppercase, zero-padded to `width` digits.
pub fn int_to_hex_str(value: u64, width: usize) -> String {
    format!("{value:0width$X}")
}
