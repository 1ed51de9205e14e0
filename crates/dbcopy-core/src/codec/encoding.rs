//! Character encoding of CSV input and output.

use encoding_rs::{Encoding, UTF_8};

use crate::error::{CopyError, Result};

pub const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Look up an encoding by its WHATWG label, e.g. `windows-1252` or `latin1`.
pub fn lookup(label: &str) -> Result<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| CopyError::Config(format!("unknown encoding: {label}")))
}

/// Decode file bytes to text.
///
/// A leading UTF-8 byte-order mark is always removed. When `encoding` is
/// set the remaining bytes are converted from that encoding, otherwise
/// they must be valid UTF-8.
pub fn decode_text(bytes: &[u8], encoding: Option<&'static Encoding>) -> Result<String> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    match encoding {
        Some(enc) if enc != UTF_8 => {
            let (text, had_errors) = enc.decode_without_bom_handling(bytes);
            if had_errors {
                return Err(CopyError::Encoding(format!(
                    "input is not valid {}",
                    enc.name()
                )));
            }
            Ok(text.into_owned())
        }
        _ => String::from_utf8(bytes.to_vec())
            .map_err(|e| CopyError::Encoding(format!("input is not valid UTF-8: {e}"))),
    }
}
