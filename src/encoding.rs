//! Encoding descriptors and code-range classification
//!
//! An [`Encoding`] is an immutable, shared handle owned by a catalog. The
//! engine only ever clones handles; it never mutates a descriptor.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::multibyte::{self, Decoded};

/// Byte structure of an encoding
///
/// The kind is what the engine needs to split a byte run into characters. It
/// says nothing about which characters an encoding can represent beyond what
/// falls out of the structure (US-ASCII stops at 0x7F, ISO-8859-1 at 0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EncodingKind {
    /// 7-bit US-ASCII
    Ascii,
    /// Opaque 8-bit bytes (ASCII-8BIT)
    Binary,
    /// ISO-8859-1, one byte per code point
    Latin1,
    /// UTF-8
    Utf8,
    /// UTF-16 little endian
    Utf16Le,
    /// UTF-16 big endian
    Utf16Be,
    /// UTF-32 little endian
    Utf32Le,
    /// UTF-32 big endian
    Utf32Be,
    /// Shift_JIS family (lead/trail byte structure only)
    ShiftJis,
    /// EUC-JP (lead/trail byte structure only)
    EucJp,
}

impl EncodingKind {
    /// Minimum number of bytes per code point
    pub fn min_length(self) -> usize {
        match self {
            EncodingKind::Utf16Le | EncodingKind::Utf16Be => 2,
            EncodingKind::Utf32Le | EncodingKind::Utf32Be => 4,
            _ => 1,
        }
    }

    /// Maximum number of bytes per code point
    pub fn max_length(self) -> usize {
        match self {
            EncodingKind::Ascii | EncodingKind::Binary | EncodingKind::Latin1 => 1,
            EncodingKind::ShiftJis => 2,
            EncodingKind::EucJp => 3,
            EncodingKind::Utf8
            | EncodingKind::Utf16Le
            | EncodingKind::Utf16Be
            | EncodingKind::Utf32Le
            | EncodingKind::Utf32Be => 4,
        }
    }

    /// Whether this is one of the Unicode transformation formats
    pub fn is_unicode(self) -> bool {
        matches!(
            self,
            EncodingKind::Utf8
                | EncodingKind::Utf16Le
                | EncodingKind::Utf16Be
                | EncodingKind::Utf32Le
                | EncodingKind::Utf32Be
        )
    }
}

#[derive(Debug, Serialize)]
struct Descriptor {
    name: String,
    kind: EncodingKind,
    min_length: usize,
    max_length: usize,
    dummy: bool,
}

/// Shared handle to an encoding descriptor
///
/// Two handles are equal when their canonical names match, ignoring ASCII case.
#[derive(Clone)]
pub struct Encoding(Arc<Descriptor>);

impl Encoding {
    /// Create a descriptor for a real (non-dummy) encoding
    pub fn new(name: impl Into<String>, kind: EncodingKind) -> Self {
        Self::build(name.into(), kind, false)
    }

    /// Create a dummy descriptor: a name the catalog knows but cannot treat as text
    pub fn dummy(name: impl Into<String>, kind: EncodingKind) -> Self {
        Self::build(name.into(), kind, true)
    }

    fn build(name: String, kind: EncodingKind, dummy: bool) -> Self {
        Self(Arc::new(Descriptor {
            name,
            kind,
            min_length: kind.min_length(),
            max_length: kind.max_length(),
            dummy,
        }))
    }

    /// A new descriptor with the same structure under another name
    pub fn replicate(&self, name: impl Into<String>) -> Self {
        Self::build(name.into(), self.kind(), self.is_dummy())
    }

    /// Canonical name
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Byte structure
    pub fn kind(&self) -> EncodingKind {
        self.0.kind
    }

    /// Minimum bytes per code point
    pub fn min_length(&self) -> usize {
        self.0.min_length
    }

    /// Maximum bytes per code point
    pub fn max_length(&self) -> usize {
        self.0.max_length
    }

    /// Whether this is a dummy encoding
    pub fn is_dummy(&self) -> bool {
        self.0.dummy
    }

    /// ASCII bytes mean ASCII characters: single-byte minimum and not a dummy
    pub fn is_ascii_compatible(&self) -> bool {
        self.min_length() == 1 && !self.is_dummy()
    }

    /// Whether this is the opaque ASCII-8BIT encoding
    pub fn is_binary(&self) -> bool {
        self.kind() == EncodingKind::Binary
    }

    /// Get the byte order mark (BOM) for this encoding if it has one
    pub fn bom(&self) -> Option<&'static [u8]> {
        if self.is_dummy() {
            return None;
        }
        match self.kind() {
            EncodingKind::Utf8 => Some(&[0xEF, 0xBB, 0xBF]),
            EncodingKind::Utf16Le => Some(&[0xFF, 0xFE]),
            EncodingKind::Utf16Be => Some(&[0xFE, 0xFF]),
            EncodingKind::Utf32Le => Some(&[0xFF, 0xFE, 0x00, 0x00]),
            EncodingKind::Utf32Be => Some(&[0x00, 0x00, 0xFE, 0xFF]),
            _ => None,
        }
    }
}

impl PartialEq for Encoding {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.name().eq_ignore_ascii_case(other.name())
    }
}

impl Eq for Encoding {}

impl Hash for Encoding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.name().bytes() {
            state.write_u8(b.to_ascii_uppercase());
        }
    }
}

impl fmt::Debug for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Encoding").field(&self.name()).finish()
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Encoding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

/// Result of measuring one character at the front of a byte run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CharLength {
    /// A complete, valid character of this many bytes
    Found(usize),
    /// Structurally invalid lead sequence of this many bytes
    Invalid(usize),
    /// The run ends inside a character
    NeedMore,
}

pub(crate) fn char_length(kind: EncodingKind, bytes: &[u8]) -> CharLength {
    match kind {
        EncodingKind::Binary | EncodingKind::Latin1 => CharLength::Found(1),
        EncodingKind::ShiftJis => shift_jis_length(bytes),
        EncodingKind::EucJp => euc_jp_length(bytes),
        _ => match multibyte::decode(kind, bytes) {
            Decoded::Char { len, .. } => CharLength::Found(len),
            Decoded::Invalid { error_len, .. } => CharLength::Invalid(error_len.max(1)),
            Decoded::Incomplete => CharLength::NeedMore,
        },
    }
}

fn shift_jis_length(bytes: &[u8]) -> CharLength {
    let lead = bytes[0];
    match lead {
        0x00..=0x80 | 0xA0..=0xDF => CharLength::Found(1),
        0x81..=0x9F | 0xE0..=0xFC => match bytes.get(1) {
            None => CharLength::NeedMore,
            Some(0x40..=0x7E | 0x80..=0xFC) => CharLength::Found(2),
            Some(_) => CharLength::Invalid(1),
        },
        _ => CharLength::Invalid(1),
    }
}

fn euc_jp_length(bytes: &[u8]) -> CharLength {
    let trail = |i: usize, lo: u8, hi: u8| match bytes.get(i) {
        None => Err(CharLength::NeedMore),
        Some(b) if (lo..=hi).contains(b) => Ok(()),
        Some(_) => Err(CharLength::Invalid(i)),
    };
    match bytes[0] {
        0x00..=0x7F => CharLength::Found(1),
        0x8E => trail(1, 0xA1, 0xDF).map_or_else(|e| e, |()| CharLength::Found(2)),
        0x8F => trail(1, 0xA1, 0xFE)
            .and_then(|()| trail(2, 0xA1, 0xFE))
            .map_or_else(|e| e, |()| CharLength::Found(3)),
        0xA1..=0xFE => trail(1, 0xA1, 0xFE).map_or_else(|e| e, |()| CharLength::Found(2)),
        _ => CharLength::Invalid(1),
    }
}

/// Classification of a byte run under an encoding
///
/// Merge ordering: `Broken` dominates, then `Unknown`, then `Valid` over `SevenBit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeRange {
    /// Not yet classified
    #[default]
    Unknown,
    /// Only ASCII bytes in an ASCII-compatible encoding
    SevenBit,
    /// Valid, with at least one non-ASCII character
    Valid,
    /// Structurally invalid somewhere
    Broken,
}

impl CodeRange {
    /// Classify `bytes` under `encoding`
    pub fn scan(bytes: &[u8], encoding: &Encoding) -> CodeRange {
        if encoding.is_ascii_compatible() && bytes.is_ascii() {
            return CodeRange::SevenBit;
        }
        if encoding.is_dummy() {
            return CodeRange::Valid;
        }

        let kind = encoding.kind();
        let mut p = 0;
        while p < bytes.len() {
            match char_length(kind, &bytes[p..]) {
                CharLength::Found(len) => p += len,
                CharLength::Invalid(_) | CharLength::NeedMore => return CodeRange::Broken,
            }
        }
        CodeRange::Valid
    }

    /// Whether the run is known to be pure ASCII
    pub fn is_seven_bit(self) -> bool {
        self == CodeRange::SevenBit
    }

    /// Whether the run is known to be well-formed
    pub fn is_valid(self) -> bool {
        matches!(self, CodeRange::SevenBit | CodeRange::Valid)
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CodeRange::Unknown => "unknown",
            CodeRange::SevenBit => "7bit",
            CodeRange::Valid => "valid",
            CodeRange::Broken => "broken",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf8() -> Encoding {
        Encoding::new("UTF-8", EncodingKind::Utf8)
    }

    #[test]
    fn test_ascii_compatibility_follows_min_length_and_dummy() {
        assert!(utf8().is_ascii_compatible());
        assert!(!Encoding::new("UTF-16LE", EncodingKind::Utf16Le).is_ascii_compatible());
        assert!(!Encoding::dummy("UTF-16", EncodingKind::Utf16Be).is_ascii_compatible());
        assert!(Encoding::new("Shift_JIS", EncodingKind::ShiftJis).is_ascii_compatible());
    }

    #[test]
    fn test_equality_ignores_case() {
        let a = utf8();
        let b = Encoding::new("utf-8", EncodingKind::Utf8);
        assert_eq!(a, b);
        assert_ne!(a, Encoding::new("US-ASCII", EncodingKind::Ascii));
    }

    #[test]
    fn test_scan_utf8() {
        let enc = utf8();
        assert_eq!(CodeRange::scan(b"hello", &enc), CodeRange::SevenBit);
        assert_eq!(CodeRange::scan("caf\u{e9}".as_bytes(), &enc), CodeRange::Valid);
        assert_eq!(CodeRange::scan(b"caf\xC3", &enc), CodeRange::Broken);
        assert_eq!(CodeRange::scan(b"\xFFabc", &enc), CodeRange::Broken);
    }

    #[test]
    fn test_scan_ascii_and_binary() {
        let ascii = Encoding::new("US-ASCII", EncodingKind::Ascii);
        assert_eq!(CodeRange::scan(b"\x80", &ascii), CodeRange::Broken);

        let binary = Encoding::new("ASCII-8BIT", EncodingKind::Binary);
        assert_eq!(CodeRange::scan(b"\x80\xFF", &binary), CodeRange::Valid);
    }

    #[test]
    fn test_scan_utf16_never_seven_bit() {
        let enc = Encoding::new("UTF-16LE", EncodingKind::Utf16Le);
        assert_eq!(CodeRange::scan(&[b'h', 0, b'i', 0], &enc), CodeRange::Valid);
        assert_eq!(CodeRange::scan(&[b'h'], &enc), CodeRange::Broken);
        // lone low surrogate
        assert_eq!(CodeRange::scan(&[0x00, 0xDC], &enc), CodeRange::Broken);
    }

    #[test]
    fn test_scan_shift_jis_structure() {
        let enc = Encoding::new("Shift_JIS", EncodingKind::ShiftJis);
        // "あ" in Shift_JIS
        assert_eq!(CodeRange::scan(&[0x82, 0xA0], &enc), CodeRange::Valid);
        assert_eq!(CodeRange::scan(&[0x82], &enc), CodeRange::Broken);
        assert_eq!(CodeRange::scan(&[0xB1], &enc), CodeRange::Valid);
    }

    #[test]
    fn test_scan_euc_jp_structure() {
        let enc = Encoding::new("EUC-JP", EncodingKind::EucJp);
        assert_eq!(CodeRange::scan(&[0xA4, 0xA2], &enc), CodeRange::Valid);
        assert_eq!(CodeRange::scan(&[0x8F, 0xA1, 0xA1], &enc), CodeRange::Valid);
        assert_eq!(CodeRange::scan(&[0xA4, 0x41], &enc), CodeRange::Broken);
    }

    #[test]
    fn test_bom_for_unicode_only() {
        assert_eq!(utf8().bom(), Some([0xEF, 0xBB, 0xBF].as_slice()));
        assert_eq!(
            Encoding::new("UTF-32LE", EncodingKind::Utf32Le).bom(),
            Some([0xFF, 0xFE, 0x00, 0x00].as_slice())
        );
        assert_eq!(Encoding::new("ISO-8859-1", EncodingKind::Latin1).bom(), None);
    }
}
