use encoding_rs::Encoding;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Drop a UTF-8 byte-order mark, if present.
pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Decode one field or line. Undecodable bytes become U+FFFD.
/// For the `latin1` label this is windows-1252, so 0x80-0x9F are not C1 controls.
pub fn decode(encoding: &'static Encoding, bytes: &[u8]) -> String {
    let (text, _had_errors) = encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Decode a raw line for inspection: strip BOM, line ending and surrounding whitespace.
pub fn decode_line(encoding: &'static Encoding, raw: &[u8]) -> String {
    let text = decode(encoding, strip_bom(raw));
    text.trim().trim_start_matches('\u{feff}').trim().to_string()
}

pub fn count_delimiters(line: &str, delimiter: u8) -> usize {
    line.bytes().filter(|b| *b == delimiter).count()
}

/// Empty cells are nulls, everything else is kept verbatim.
pub fn cell(encoding: &'static Encoding, raw: &[u8]) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(decode(encoding, raw))
    }
}
