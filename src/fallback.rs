//! Fallback substitution for undefined conversions
//!
//! A resolver gets the source character that could not be converted and
//! may hand back text to use instead. The session encodes that text into the
//! failing step's destination encoding; text the destination cannot
//! represent leaves the original error standing.

use std::collections::HashMap;
use std::fmt;

use crate::encoding::Encoding;
use crate::multibyte;

/// A character that could not be converted
#[derive(Debug, Clone, Copy)]
pub struct Character<'a> {
    bytes: &'a [u8],
    encoding: Option<&'a Encoding>,
}

impl<'a> Character<'a> {
    /// Wrap the raw bytes of one character in `encoding`
    pub fn new(bytes: &'a [u8], encoding: Option<&'a Encoding>) -> Self {
        Self { bytes, encoding }
    }

    /// Raw bytes in the step's source encoding
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Encoding of the bytes, when the catalog knows it
    pub fn encoding(&self) -> Option<&'a Encoding> {
        self.encoding
    }

    /// Unicode scalar value, for Unicode-family encodings
    pub fn code_point(&self) -> Option<u32> {
        let kind = self.encoding?.kind();
        match multibyte::decode_all(kind, self.bytes)?.as_slice() {
            [cp] => Some(*cp),
            _ => None,
        }
    }

    /// The character as text, when it decodes
    pub fn as_str(&self) -> Option<String> {
        self.code_point()
            .and_then(char::from_u32)
            .map(String::from)
    }
}

/// Supplies replacement text for an undefined character
pub trait FallbackResolver: fmt::Debug + Send + Sync {
    /// Text to emit instead of `ch`, or `None` to report the error
    fn resolve(&self, ch: &Character<'_>) -> Option<String>;
}

/// Table lookup keyed by the source character
///
/// Keys match the raw source bytes first, then the decoded character, so a
/// text-keyed table also serves UTF-16 and UTF-32 sources.
#[derive(Debug, Clone, Default)]
pub struct MappingFallback {
    table: HashMap<Vec<u8>, String>,
}

impl MappingFallback {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table built from text pairs
    pub fn from_pairs<'s>(pairs: impl IntoIterator<Item = (&'s str, &'s str)>) -> Self {
        let table = pairs
            .into_iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.to_string()))
            .collect();
        Self { table }
    }

    /// Add one entry keyed by raw source bytes
    pub fn insert(&mut self, from: impl Into<Vec<u8>>, to: impl Into<String>) {
        self.table.insert(from.into(), to.into());
    }
}

impl FallbackResolver for MappingFallback {
    fn resolve(&self, ch: &Character<'_>) -> Option<String> {
        self.table
            .get(ch.bytes())
            .or_else(|| self.table.get(ch.as_str()?.as_bytes()))
            .cloned()
    }
}

/// Arbitrary closure
pub struct CallableFallback<F> {
    f: F,
}

impl<F> CallableFallback<F>
where
    F: Fn(&Character<'_>) -> Option<String> + Send + Sync,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for CallableFallback<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableFallback").finish_non_exhaustive()
    }
}

impl<F> FallbackResolver for CallableFallback<F>
where
    F: Fn(&Character<'_>) -> Option<String> + Send + Sync,
{
    fn resolve(&self, ch: &Character<'_>) -> Option<String> {
        (self.f)(ch)
    }
}

/// Table lookup keyed by code point
#[derive(Debug, Clone, Default)]
pub struct IndexFallback {
    table: HashMap<u32, String>,
}

impl IndexFallback {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry
    pub fn insert(&mut self, code_point: u32, to: impl Into<String>) {
        self.table.insert(code_point, to.into());
    }
}

impl FromIterator<(char, String)> for IndexFallback {
    fn from_iter<I: IntoIterator<Item = (char, String)>>(iter: I) -> Self {
        let table = iter
            .into_iter()
            .map(|(c, s)| (u32::from(c), s))
            .collect();
        Self { table }
    }
}

impl FallbackResolver for IndexFallback {
    fn resolve(&self, ch: &Character<'_>) -> Option<String> {
        self.table.get(&ch.code_point()?).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::EncodingKind;

    #[test]
    fn test_character_decodes() {
        let utf8 = Encoding::new("UTF-8", EncodingKind::Utf8);
        let ch = Character::new("\u{e9}".as_bytes(), Some(&utf8));
        assert_eq!(ch.code_point(), Some(0xE9));
        assert_eq!(ch.as_str().as_deref(), Some("\u{e9}"));

        let unknown = Character::new(&[0xE9], None);
        assert_eq!(unknown.code_point(), None);
    }

    #[test]
    fn test_mapping_fallback() {
        let fallback = MappingFallback::from_pairs([("\u{e9}", "e")]);
        let ch = Character::new("\u{e9}".as_bytes(), None);
        assert_eq!(fallback.resolve(&ch).as_deref(), Some("e"));
        assert_eq!(fallback.resolve(&Character::new(b"x", None)), None);
    }

    #[test]
    fn test_mapping_fallback_matches_decoded_character() {
        let fallback = MappingFallback::from_pairs([("\u{2603}", "snowman")]);
        let utf16 = Encoding::new("UTF-16BE", EncodingKind::Utf16Be);
        let ch = Character::new(&[0x26, 0x03], Some(&utf16));
        assert_eq!(fallback.resolve(&ch).as_deref(), Some("snowman"));
    }

    #[test]
    fn test_callable_fallback() {
        let fallback = CallableFallback::new(|ch: &Character<'_>| {
            ch.code_point().map(|cp| format!("[{cp:X}]"))
        });
        let utf8 = Encoding::new("UTF-8", EncodingKind::Utf8);
        let ch = Character::new("\u{2603}".as_bytes(), Some(&utf8));
        assert_eq!(fallback.resolve(&ch).as_deref(), Some("[2603]"));
    }

    #[test]
    fn test_index_fallback() {
        let fallback: IndexFallback = [('\u{e9}', "e".to_string())].into_iter().collect();
        let utf16 = Encoding::new("UTF-16LE", EncodingKind::Utf16Le);
        let ch = Character::new(&[0xE9, 0x00], Some(&utf16));
        assert_eq!(fallback.resolve(&ch).as_deref(), Some("e"));
    }
}
