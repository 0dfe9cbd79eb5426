//! Code-point codecs for the Unicode family and the built-in transcoders
//!
//! Every built-in conversion goes through UTF-8: each transcoder here either
//! decodes some encoding into UTF-8 or encodes UTF-8 into it. The conversions
//! are pure code-point arithmetic, there are no character tables.

use crate::encoding::EncodingKind;
use crate::transcoder::{Transcoder, TranscoderEntry, Unit};

/// Outcome of decoding one character at the front of a byte run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Decoded {
    /// A scalar value spanning `len` bytes
    Char { code_point: u32, len: usize },
    /// `error_len` bytes form an invalid sequence; the following
    /// `readagain_len` bytes were looked at but must be read again
    Invalid { error_len: usize, readagain_len: usize },
    /// The run ends inside a character
    Incomplete,
}

pub(crate) fn decode(kind: EncodingKind, input: &[u8]) -> Decoded {
    match kind {
        EncodingKind::Ascii => match input[0] {
            b @ 0x00..=0x7F => Decoded::Char {
                code_point: u32::from(b),
                len: 1,
            },
            _ => Decoded::Invalid {
                error_len: 1,
                readagain_len: 0,
            },
        },
        EncodingKind::Latin1 | EncodingKind::Binary => Decoded::Char {
            code_point: u32::from(input[0]),
            len: 1,
        },
        EncodingKind::Utf8 => decode_utf8(input),
        EncodingKind::Utf16Le => decode_utf16(input, u16::from_le_bytes),
        EncodingKind::Utf16Be => decode_utf16(input, u16::from_be_bytes),
        EncodingKind::Utf32Le => decode_utf32(input, u32::from_le_bytes),
        EncodingKind::Utf32Be => decode_utf32(input, u32::from_be_bytes),
        // Structure-only encodings have no code-point mapping here.
        EncodingKind::ShiftJis | EncodingKind::EucJp => Decoded::Invalid {
            error_len: 1,
            readagain_len: 0,
        },
    }
}

fn decode_utf8(input: &[u8]) -> Decoded {
    let lead = input[0];
    let (len, second) = match lead {
        0x00..=0x7F => {
            return Decoded::Char {
                code_point: u32::from(lead),
                len: 1,
            };
        }
        0xC2..=0xDF => (2, 0x80..=0xBF),
        0xE0 => (3, 0xA0..=0xBF),
        0xE1..=0xEC | 0xEE..=0xEF => (3, 0x80..=0xBF),
        0xED => (3, 0x80..=0x9F),
        0xF0 => (4, 0x90..=0xBF),
        0xF1..=0xF3 => (4, 0x80..=0xBF),
        0xF4 => (4, 0x80..=0x8F),
        _ => {
            return Decoded::Invalid {
                error_len: 1,
                readagain_len: 0,
            };
        }
    };

    let mut code_point = u32::from(lead) & (0x7F >> len);
    for i in 1..len {
        let Some(&b) = input.get(i) else {
            return Decoded::Incomplete;
        };
        let ok = if i == 1 {
            second.contains(&b)
        } else {
            (0x80..=0xBF).contains(&b)
        };
        if !ok {
            return Decoded::Invalid {
                error_len: i,
                readagain_len: 1,
            };
        }
        code_point = (code_point << 6) | u32::from(b & 0x3F);
    }
    Decoded::Char { code_point, len }
}

fn decode_utf16(input: &[u8], unit: fn([u8; 2]) -> u16) -> Decoded {
    let Some(first) = input.get(..2) else {
        return Decoded::Incomplete;
    };
    let hi = unit([first[0], first[1]]);
    match hi {
        0xD800..=0xDBFF => {
            let Some(second) = input.get(2..4) else {
                return Decoded::Incomplete;
            };
            let lo = unit([second[0], second[1]]);
            if !(0xDC00..=0xDFFF).contains(&lo) {
                return Decoded::Invalid {
                    error_len: 2,
                    readagain_len: 2,
                };
            }
            let code_point = 0x10000 + ((u32::from(hi) - 0xD800) << 10) + (u32::from(lo) - 0xDC00);
            Decoded::Char { code_point, len: 4 }
        }
        0xDC00..=0xDFFF => Decoded::Invalid {
            error_len: 2,
            readagain_len: 0,
        },
        _ => Decoded::Char {
            code_point: u32::from(hi),
            len: 2,
        },
    }
}

fn decode_utf32(input: &[u8], unit: fn([u8; 4]) -> u32) -> Decoded {
    let Some(bytes) = input.get(..4) else {
        return Decoded::Incomplete;
    };
    let code_point = unit([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if char::from_u32(code_point).is_none() {
        return Decoded::Invalid {
            error_len: 4,
            readagain_len: 0,
        };
    }
    Decoded::Char { code_point, len: 4 }
}

/// Append `code_point` encoded as `kind`; false when `kind` cannot represent it
pub(crate) fn encode_char(kind: EncodingKind, code_point: u32, out: &mut Vec<u8>) -> bool {
    let Some(ch) = char::from_u32(code_point) else {
        return false;
    };
    match kind {
        EncodingKind::Ascii if ch.is_ascii() => out.push(ch as u8),
        EncodingKind::Latin1 if code_point <= 0xFF => out.push(ch as u8),
        EncodingKind::Utf8 => {
            let mut buf = [0u8; 4];
            out.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
        }
        EncodingKind::Utf16Le | EncodingKind::Utf16Be => {
            let mut buf = [0u16; 2];
            for unit in ch.encode_utf16(&mut buf) {
                if kind == EncodingKind::Utf16Le {
                    out.extend_from_slice(&unit.to_le_bytes());
                } else {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
        EncodingKind::Utf32Le => out.extend_from_slice(&code_point.to_le_bytes()),
        EncodingKind::Utf32Be => out.extend_from_slice(&code_point.to_be_bytes()),
        _ => return false,
    }
    true
}

/// Encode a whole string as `kind`, or `None` if any character is unrepresentable
pub(crate) fn encode_str(kind: EncodingKind, text: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(text.len());
    for ch in text.chars() {
        if !encode_char(kind, u32::from(ch), &mut out) {
            return None;
        }
    }
    Some(out)
}

/// Decode a whole byte run of `kind` into code points
pub(crate) fn decode_all(kind: EncodingKind, mut bytes: &[u8]) -> Option<Vec<u32>> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        match decode(kind, bytes) {
            Decoded::Char { code_point, len } => {
                out.push(code_point);
                bytes = &bytes[len..];
            }
            _ => return None,
        }
    }
    Some(out)
}

/// Single-step converter between two Unicode-capable encodings
#[derive(Debug)]
pub struct UnicodeTranscoder {
    source: &'static str,
    destination: &'static str,
    from: EncodingKind,
    to: EncodingKind,
}

impl UnicodeTranscoder {
    /// Create a transcoder decoding `from` and encoding `to`
    pub fn new(
        source: &'static str,
        from: EncodingKind,
        destination: &'static str,
        to: EncodingKind,
    ) -> Self {
        Self {
            source,
            destination,
            from,
            to,
        }
    }
}

impl Transcoder for UnicodeTranscoder {
    fn source(&self) -> &str {
        self.source
    }

    fn destination(&self) -> &str {
        self.destination
    }

    fn max_output(&self) -> usize {
        self.to.max_length()
    }

    fn convert_unit(&mut self, input: &[u8], partial: bool, out: &mut Vec<u8>) -> Unit {
        match decode(self.from, input) {
            Decoded::Char { code_point, len } => {
                if encode_char(self.to, code_point, out) {
                    Unit::Converted(len)
                } else {
                    Unit::Undefined { error_len: len }
                }
            }
            Decoded::Invalid {
                error_len,
                readagain_len,
            } => Unit::Invalid {
                error_len,
                readagain_len,
            },
            Decoded::Incomplete if partial => Unit::NeedMore,
            Decoded::Incomplete => Unit::Incomplete {
                error_len: input.len(),
            },
        }
    }
}

const UNICODE_PEERS: [(&str, EncodingKind); 6] = [
    ("US-ASCII", EncodingKind::Ascii),
    ("ISO-8859-1", EncodingKind::Latin1),
    ("UTF-16LE", EncodingKind::Utf16Le),
    ("UTF-16BE", EncodingKind::Utf16Be),
    ("UTF-32LE", EncodingKind::Utf32Le),
    ("UTF-32BE", EncodingKind::Utf32Be),
];

/// Transcoders between UTF-8 and each built-in peer, in both directions
pub fn builtin_transcoders() -> Vec<TranscoderEntry> {
    let mut entries = Vec::with_capacity(UNICODE_PEERS.len() * 2);
    for (name, kind) in UNICODE_PEERS {
        entries.push(TranscoderEntry::new(name, "UTF-8", move || {
            Box::new(UnicodeTranscoder::new(name, kind, "UTF-8", EncodingKind::Utf8))
        }));
        entries.push(TranscoderEntry::new("UTF-8", name, move || {
            Box::new(UnicodeTranscoder::new("UTF-8", EncodingKind::Utf8, name, kind))
        }));
    }
    entries
}
