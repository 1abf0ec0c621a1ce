use widestring::U16CString;

use crate::error::{Error, Result};

/// Encode a string as UCS-2 little-endian with a trailing nul.
///
/// EFI load option descriptions and File() device path nodes are UCS-2, not
/// UTF-16: surrogate pairs cannot be represented, so non-BMP code points are
/// rejected rather than silently mis-encoded.
pub(crate) fn utf8_to_ucs2(s: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity((s.len() + 1) * 2);
    for c in s.chars() {
        let v = u32::from(c);
        if v > 0xFFFF {
            return Err(Error::InvalidData(format!(
                "code point U+{v:X} cannot be encoded as UCS-2"
            )));
        }
        buf.extend_from_slice(&(v as u16).to_le_bytes());
    }
    buf.extend_from_slice(&0u16.to_le_bytes());
    Ok(buf)
}

/// Convert a nul-terminated UCS-2 little-endian byte buffer to a String.
/// Tolerates a trailing odd byte and missing terminator, both of which
/// appear in variables written by other firmware components.
pub(crate) fn ucs2_to_string(slice: &[u8]) -> String {
    let size = slice.len() / 2;
    let mut v: Vec<u16> = (0..size)
        .map(|i| u16::from_le_bytes([slice[2 * i], slice[2 * i + 1]]))
        .collect();
    if let Some(pos) = v.iter().position(|&c| c == 0) {
        v.truncate(pos);
    }
    match U16CString::from_vec(v) {
        Ok(s) => s.to_string_lossy(),
        Err(_) => String::new(),
    }
}
