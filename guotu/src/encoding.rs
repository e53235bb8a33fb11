//! Text decoding for sources with unreliable encoding declarations.
//!
//! GuoTu TXT files in the wild are either UTF-8 (with or without BOM) or
//! GB18030. Shapefile DBF tables carry a language driver byte and sometimes
//! a `.cpg` sidecar.

use std::path::Path;

use encoding_rs::Encoding;

use crate::error::GuotuError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Decodes bytes to a string, sniffing the encoding.
///
/// UTF-8 (validated with SIMD) wins; everything else is treated as GB18030,
/// which is a superset of GBK and GB2312.
pub fn decode_text(data: &[u8]) -> (String, &'static Encoding) {
    let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
    if let Ok(text) = simdutf8::basic::from_utf8(data) {
        return (text.to_string(), encoding_rs::UTF_8);
    }
    let (decoded, _, _) = encoding_rs::GB18030.decode(data);
    (decoded.into_owned(), encoding_rs::GB18030)
}

/// Reads a file and decodes it with [`decode_text`]
pub fn read_to_string(path: &Path) -> Result<(String, &'static Encoding), GuotuError> {
    let data = std::fs::read(path)?;
    Ok(decode_text(&data))
}

/// Resolves the encoding named by a `.cpg` sidecar file
pub fn encoding_from_cpg(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    match label.to_ascii_uppercase().as_str() {
        "936" | "CP936" | "GBK" | "GB2312" | "GB18030" => Some(encoding_rs::GB18030),
        "65001" | "UTF-8" | "UTF8" => Some(encoding_rs::UTF_8),
        _ => Encoding::for_label(label.as_bytes()),
    }
}

/// Reads the DBF language driver byte (header offset 29).
///
/// 0x4D marks code page 936 (Simplified Chinese); other values are left to
/// the caller's default.
pub fn dbf_language_driver(dbf_path: &Path) -> Option<&'static Encoding> {
    let data = std::fs::read(dbf_path).ok()?;
    match data.get(29)? {
        0x4D => Some(encoding_rs::GB18030),
        _ => None,
    }
}
