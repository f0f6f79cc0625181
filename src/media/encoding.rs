//! Encoding detection and conversion for legacy text
//!
//! Tags written by old taggers and playlists saved by old players often use
//! GBK, Shift-JIS or Windows-1252 instead of UTF-8.

use encoding_rs::{BIG5, EUC_JP, EUC_KR, Encoding, GBK, SHIFT_JIS, WINDOWS_1252};

/// Decode text of unknown encoding
///
/// A byte order mark decides the encoding outright. Otherwise UTF-8 is
/// tried, then each fallback whose output looks like text, then lossy
/// UTF-8.
pub fn decode_string(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (decoded, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return decoded.into_owned();
    }

    if let Ok(s) = std::str::from_utf8(bytes) {
        return s.to_string();
    }

    // Most specific first
    let fallbacks = [GBK, BIG5, SHIFT_JIS, EUC_JP, EUC_KR, WINDOWS_1252];
    fallbacks
        .iter()
        .find_map(|encoding| {
            let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
            (!had_errors && looks_like_text(&decoded)).then(|| decoded.into_owned())
        })
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

/// At most one in twenty characters may be control or private-use
fn looks_like_text(s: &str) -> bool {
    let suspicious = s.chars().filter(|&c| is_suspicious(c)).count();
    suspicious <= (s.len() / 20).max(1)
}

fn is_suspicious(c: char) -> bool {
    let control = c < ' ' && !matches!(c, '\t' | '\n' | '\r');
    control || ('\u{E000}'..='\u{F8FF}').contains(&c) || c == '\u{FFFD}'
}

/// Normalize whitespace and trim a string
pub fn normalize_string(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_passthrough() {
        let input = "Hello World 你好世界";
        assert_eq!(decode_string(input.as_bytes()), input);
    }

    #[test]
    fn test_bom_is_stripped() {
        assert_eq!(decode_string(b"\xEF\xBB\xBF#EXTM3U"), "#EXTM3U");
    }

    #[test]
    fn test_utf16_bom_decides_encoding() {
        let bytes = [0xFF, 0xFE, b'a', 0x00, b'.', 0x00, b'm', 0x00, b'p', 0x00, b'3', 0x00];
        assert_eq!(decode_string(&bytes), "a.mp3");
    }

    #[test]
    fn test_gbk_decode() {
        // "周杰伦" in GBK encoding
        let gbk_bytes: &[u8] = &[0xD6, 0xDC, 0xBD, 0xDC, 0xC2, 0xD7];
        assert_eq!(decode_string(gbk_bytes), "周杰伦");
    }

    #[test]
    fn test_normalize_string() {
        assert_eq!(normalize_string("  Blue   Train \t"), "Blue Train");
    }
}
