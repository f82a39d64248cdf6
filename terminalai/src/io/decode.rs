//! Decoding of captured console output.
//!
//! Shells emit bytes in whatever encoding the console happens to use. Each
//! shell adapter carries an ordered fallback chain; the first encoding that
//! decodes the bytes cleanly wins, and lossy UTF-8 is the last resort.

use std::env;

/// An encoding attempted while decoding captured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    /// UTF-8 with a leading byte-order mark, which is stripped.
    Utf8Bom,
    /// UTF-16 (little or big endian), detected by BOM or by NUL-byte layout.
    Utf16,
    /// The codeset named by `LC_ALL`/`LC_CTYPE`/`LANG`, when it is one we can decode.
    Locale,
    Windows1252,
}

/// Chain used by POSIX shells.
pub const POSIX_CHAIN: &[Encoding] = &[
    Encoding::Utf8,
    Encoding::Utf8Bom,
    Encoding::Locale,
    Encoding::Windows1252,
];

/// Chain used by Windows shells, where legacy code pages are common.
pub const WINDOWS_CHAIN: &[Encoding] = &[
    Encoding::Utf8,
    Encoding::Utf8Bom,
    Encoding::Utf16,
    Encoding::Locale,
    Encoding::Windows1252,
];

/// Decode `bytes` with the first encoding in `chain` that accepts them.
pub fn decode_output(bytes: &[u8], chain: &[Encoding]) -> String {
    let codeset = if chain.contains(&Encoding::Locale) {
        locale_codeset_from(|key| env::var(key).ok())
    } else {
        None
    };
    decode_with_codeset(bytes, chain, codeset.as_deref())
}

fn decode_with_codeset(bytes: &[u8], chain: &[Encoding], codeset: Option<&str>) -> String {
    if bytes.is_empty() {
        return String::new();
    }
    chain
        .iter()
        .find_map(|encoding| try_decode(bytes, *encoding, codeset))
        .unwrap_or_else(|| String::from_utf8_lossy(bytes).into_owned())
}

fn try_decode(bytes: &[u8], encoding: Encoding, codeset: Option<&str>) -> Option<String> {
    match encoding {
        Encoding::Utf8 => {
            // NUL-laned bytes are valid UTF-8 but almost certainly UTF-16.
            if bytes.starts_with(UTF8_BOM) || looks_like_utf16le(bytes).is_some() {
                return None;
            }
            std::str::from_utf8(bytes).ok().map(str::to_string)
        }
        Encoding::Utf8Bom => {
            let rest = bytes.strip_prefix(UTF8_BOM)?;
            std::str::from_utf8(rest).ok().map(str::to_string)
        }
        Encoding::Utf16 => decode_utf16(bytes),
        Encoding::Locale => decode_locale(bytes, codeset?),
        Encoding::Windows1252 => decode_windows_1252(bytes),
    }
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

fn decode_utf16(bytes: &[u8]) -> Option<String> {
    let (body, little_endian) = match bytes {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => (bytes, looks_like_utf16le(bytes)?),
    };
    if body.len() % 2 != 0 {
        return None;
    }
    let units = body.chunks_exact(2).map(|pair| {
        if little_endian {
            u16::from_le_bytes([pair[0], pair[1]])
        } else {
            u16::from_be_bytes([pair[0], pair[1]])
        }
    });
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .ok()
}

/// BOM-less UTF-16 is only assumed when NUL bytes dominate one byte lane.
fn looks_like_utf16le(bytes: &[u8]) -> Option<bool> {
    if bytes.len() < 2 || bytes.len() % 2 != 0 {
        return None;
    }
    let pairs = bytes.len() / 2;
    let odd_nuls = bytes.iter().skip(1).step_by(2).filter(|b| **b == 0).count();
    let even_nuls = bytes.iter().step_by(2).filter(|b| **b == 0).count();
    if odd_nuls * 2 > pairs && even_nuls == 0 {
        Some(true)
    } else if even_nuls * 2 > pairs && odd_nuls == 0 {
        Some(false)
    } else {
        None
    }
}

/// Codeset of the first non-empty `LC_ALL`/`LC_CTYPE`/`LANG`, normalized.
///
/// Windows consoles rarely set these, so a Windows chain usually skips this
/// step and lands on Windows-1252. The active console code page is not read.
fn locale_codeset_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    ["LC_ALL", "LC_CTYPE", "LANG"]
        .into_iter()
        .filter_map(|key| lookup(key))
        .find(|value| !value.is_empty())
        .and_then(|value| {
            let codeset = value.split_once('.')?.1;
            let codeset = codeset.split('@').next().unwrap_or(codeset);
            Some(codeset.to_ascii_lowercase().replace(['-', '_'], ""))
        })
}

fn decode_locale(bytes: &[u8], codeset: &str) -> Option<String> {
    match codeset {
        "utf8" => std::str::from_utf8(bytes).ok().map(str::to_string),
        "iso88591" | "latin1" => Some(bytes.iter().map(|b| char::from(*b)).collect()),
        "cp1252" | "windows1252" | "1252" => decode_windows_1252(bytes),
        _ => None,
    }
}

/// Code points for bytes 0x80..=0x9F; `None` marks bytes undefined in Windows-1252.
const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

fn decode_windows_1252(bytes: &[u8]) -> Option<String> {
    bytes
        .iter()
        .map(|byte| match byte {
            0x80..=0x9F => CP1252_HIGH[usize::from(byte - 0x80)],
            _ => Some(char::from(*byte)),
        })
        .collect()
}
