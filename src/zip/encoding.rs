//! Entry name decoding.
//!
//! Names flagged as UTF-8 (general purpose bit 11) are decoded as UTF-8.
//! Unflagged names are used as UTF-8 when they happen to be valid, and are
//! otherwise sniffed as GBK. Anything else falls back to lossy UTF-8.

use encoding_rs::GBK;

use super::structures::FLAG_UTF8;

pub fn decode_name(raw: &[u8], flags: u16) -> String {
    if flags & FLAG_UTF8 != 0 {
        return String::from_utf8_lossy(raw).into_owned();
    }
    if let Ok(name) = std::str::from_utf8(raw) {
        return name.to_owned();
    }
    if looks_like_gbk(raw) {
        let (name, _, had_errors) = GBK.decode(raw);
        if !had_errors {
            return name.into_owned();
        }
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// Checks that every non-ASCII byte starts a well-formed GBK double-byte pair.
fn looks_like_gbk(raw: &[u8]) -> bool {
    let mut i = 0;
    while i < raw.len() {
        let lead = raw[i];
        if lead < 0x80 {
            i += 1;
            continue;
        }
        let Some(&trail) = raw.get(i + 1) else {
            return false;
        };
        if !(0x81..=0xFE).contains(&lead) || !(0x40..=0xFE).contains(&trail) || trail == 0x7F {
            return false;
        }
        i += 2;
    }
    true
}
