//! Encoding-aware concatenation of byte runs

use crate::encoding::{CodeRange, Encoding};
use crate::{Error, Result};

/// Bytes tagged with an encoding and a cached code range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBuf {
    bytes: Vec<u8>,
    encoding: Encoding,
    code_range: CodeRange,
}

impl EncodedBuf {
    /// Wrap `bytes`, classifying them under `encoding`
    pub fn new(bytes: Vec<u8>, encoding: Encoding) -> Self {
        let code_range = CodeRange::scan(&bytes, &encoding);
        Self {
            bytes,
            encoding,
            code_range,
        }
    }

    /// Wrap `bytes` with a code range the caller already knows
    pub fn with_code_range(bytes: Vec<u8>, encoding: Encoding, code_range: CodeRange) -> Self {
        Self {
            bytes,
            encoding,
            code_range,
        }
    }

    /// Empty buffer in `encoding`
    pub fn empty(encoding: Encoding) -> Self {
        Self::with_code_range(Vec::new(), encoding, CodeRange::SevenBit)
    }

    /// The bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// The encoding
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Cached code range, possibly `Unknown`
    pub fn code_range(&self) -> CodeRange {
        self.code_range
    }

    /// Code range, scanning when the cache is `Unknown`
    pub fn scanned_code_range(&self) -> CodeRange {
        match self.code_range {
            CodeRange::Unknown => CodeRange::scan(&self.bytes, &self.encoding),
            known => known,
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether there are no bytes
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append `src` (encoded as `src_encoding`, classified as `src_range`)
    ///
    /// Returns the resulting encoding and code range, which are also stored
    /// on the buffer. On error the buffer is unchanged.
    pub fn append(
        &mut self,
        src: &[u8],
        src_encoding: &Encoding,
        src_range: CodeRange,
    ) -> Result<(Encoding, CodeRange)> {
        if src.is_empty() {
            return Ok((self.encoding.clone(), self.code_range));
        }

        let mut dest_range = if self.bytes.is_empty() {
            CodeRange::SevenBit
        } else {
            self.code_range
        };
        let mut src_range = src_range;

        if self.encoding == *src_encoding {
            if dest_range == CodeRange::Unknown {
                src_range = CodeRange::Unknown;
            } else if src_range == CodeRange::Unknown {
                src_range = CodeRange::scan(src, src_encoding);
            }
        } else {
            if !self.encoding.is_ascii_compatible() || !src_encoding.is_ascii_compatible() {
                if self.bytes.is_empty() {
                    self.bytes.extend_from_slice(src);
                    self.encoding = src_encoding.clone();
                    self.code_range = src_range;
                    return Ok((self.encoding.clone(), self.code_range));
                }
                return Err(self.incompatible(src_encoding));
            }

            if src_range == CodeRange::Unknown {
                src_range = CodeRange::scan(src, src_encoding);
            }
            if dest_range == CodeRange::Unknown {
                dest_range = CodeRange::scan(&self.bytes, &self.encoding);
            }
            let broken = dest_range == CodeRange::Broken || src_range == CodeRange::Broken;
            if broken || (!dest_range.is_seven_bit() && !src_range.is_seven_bit()) {
                return Err(self.incompatible(src_encoding));
            }
        }

        let (encoding, code_range) = match dest_range {
            CodeRange::Unknown => (self.encoding.clone(), CodeRange::Unknown),
            CodeRange::SevenBit if src_range == CodeRange::SevenBit => {
                (self.encoding.clone(), CodeRange::SevenBit)
            }
            CodeRange::SevenBit => (src_encoding.clone(), src_range),
            CodeRange::Valid => match src_range {
                CodeRange::SevenBit | CodeRange::Valid => (self.encoding.clone(), CodeRange::Valid),
                other => (self.encoding.clone(), other),
            },
            CodeRange::Broken => (self.encoding.clone(), CodeRange::Unknown),
        };

        self.bytes.extend_from_slice(src);
        self.encoding = encoding.clone();
        self.code_range = code_range;
        Ok((encoding, code_range))
    }

    fn incompatible(&self, other: &Encoding) -> Error {
        Error::IncompatibleEncodings(self.encoding.name().to_string(), other.name().to_string())
    }

    /// Append another buffer
    pub fn append_buf(&mut self, other: &EncodedBuf) -> Result<(Encoding, CodeRange)> {
        self.append(&other.bytes, &other.encoding, other.code_range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingKind;

    fn utf8() -> Encoding {
        Encoding::new("UTF-8", EncodingKind::Utf8)
    }

    fn sjis() -> Encoding {
        Encoding::new("Shift_JIS", EncodingKind::ShiftJis)
    }

    #[test]
    fn test_ascii_onto_empty_utf8() {
        let mut buf = EncodedBuf::empty(utf8());
        let result = buf.append(b"abc", &utf8(), CodeRange::Unknown).unwrap();
        assert_eq!(result, (utf8(), CodeRange::SevenBit));
        assert_eq!(buf.bytes(), b"abc");
    }

    #[test]
    fn test_empty_source_is_noop() {
        let mut buf = EncodedBuf::with_code_range(b"x".to_vec(), sjis(), CodeRange::Unknown);
        let result = buf.append(b"", &utf8(), CodeRange::Broken).unwrap();
        assert_eq!(result, (sjis(), CodeRange::Unknown));
        assert_eq!(buf.code_range(), CodeRange::Unknown);
    }

    #[test]
    fn test_seven_bit_destination_adopts_source_encoding() {
        let mut buf = EncodedBuf::new(b"abc".to_vec(), sjis());
        let (encoding, range) = buf
            .append("\u{e9}".as_bytes(), &utf8(), CodeRange::Unknown)
            .unwrap();
        assert_eq!(encoding, utf8());
        assert_eq!(range, CodeRange::Valid);
    }

    #[test]
    fn test_both_non_ascii_incompatible() {
        let mut buf = EncodedBuf::new(vec![0x82, 0xA0], sjis());
        assert_eq!(buf.code_range(), CodeRange::Valid);
        let err = buf
            .append("\u{e9}".as_bytes(), &utf8(), CodeRange::Valid)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "incompatible character encodings: Shift_JIS and UTF-8"
        );
        assert_eq!(buf.bytes(), &[0x82, 0xA0]);
    }

    #[test]
    fn test_broken_side_incompatible_across_encodings() {
        let mut buf = EncodedBuf::new(b"ok".to_vec(), sjis());
        assert!(buf.append(b"\xFF", &utf8(), CodeRange::Unknown).is_err());
    }

    #[test]
    fn test_same_encoding_lattice() {
        let mut buf = EncodedBuf::new("\u{e9}".as_bytes().to_vec(), utf8());
        let (_, range) = buf.append(b"\xFF", &utf8(), CodeRange::Unknown).unwrap();
        assert_eq!(range, CodeRange::Broken);
        let (_, range) = buf.append(b"ok", &utf8(), CodeRange::SevenBit).unwrap();
        assert_eq!(range, CodeRange::Unknown);
        let (_, range) = buf.append(b"ok", &utf8(), CodeRange::SevenBit).unwrap();
        assert_eq!(range, CodeRange::Unknown);
    }

    #[test]
    fn test_ascii_incompatible_needs_empty_destination() {
        let utf16 = Encoding::new("UTF-16LE", EncodingKind::Utf16Le);
        let mut empty = EncodedBuf::empty(utf8());
        let (encoding, _) = empty.append(&[b'a', 0], &utf16, CodeRange::Valid).unwrap();
        assert_eq!(encoding, utf16);

        let mut full = EncodedBuf::new(b"a".to_vec(), utf8());
        assert!(matches!(
            full.append(&[b'a', 0], &utf16, CodeRange::Valid),
            Err(Error::IncompatibleEncodings(_, _))
        ));
    }
}
