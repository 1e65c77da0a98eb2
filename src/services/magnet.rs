//! Magnet link helpers

use once_cell::sync::Lazy;
use regex::Regex;

static BTIH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)xt=urn:btih:([a-z2-7]{32}|[a-f0-9]{40})(?:&|$)").unwrap());

/// Extract the info hash from a magnet link as 40 lowercase hex characters.
///
/// Both the hex and the 32-character base32 forms are accepted.
pub fn parse_info_hash(magnet: &str) -> Option<String> {
    let raw = BTIH_RE.captures(magnet)?.get(1)?.as_str();
    if raw.len() == 40 {
        return Some(raw.to_ascii_lowercase());
    }
    decode_base32(raw).map(|bytes| bytes.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Display name (`dn=`) of a magnet link, if present
pub fn display_name(magnet: &str) -> Option<String> {
    let query = magnet.split_once('?')?.1;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == "dn")
        .and_then(|(_, value)| {
            urlencoding::decode(&value.replace('+', " "))
                .ok()
                .map(|name| name.into_owned())
        })
        .filter(|name| !name.is_empty())
}

/// RFC 4648 base32 without padding
fn decode_base32(input: &str) -> Option<Vec<u8>> {
    let mut bits: u64 = 0;
    let mut bit_count = 0;
    let mut out = Vec::with_capacity(input.len() * 5 / 8);

    for c in input.chars() {
        let value = match c.to_ascii_uppercase() {
            c @ 'A'..='Z' => c as u64 - 'A' as u64,
            c @ '2'..='7' => c as u64 - '2' as u64 + 26,
            _ => return None,
        };
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
            bits &= (1 << bit_count) - 1;
        }
    }

    Some(out)
}
