//! Byte-order-mark sniffing
//!
//! The sniffer walks a small trie of BOM prefixes over a pushback-capable
//! byte source. Whatever it reads and does not recognise goes back into the
//! source in reverse order, so a miss leaves the source exactly as found.

use std::collections::VecDeque;
use std::io::{self, Read};

use tracing::debug;

use crate::encoding::Encoding;
use crate::registry::EncodingCatalog;

/// A byte stream that can take bytes back
pub trait ByteSource {
    /// Next byte, or `None` at end of input
    fn next_byte(&mut self) -> Option<u8>;

    /// Make `byte` the next byte returned
    fn pushback(&mut self, byte: u8);
}

impl ByteSource for VecDeque<u8> {
    fn next_byte(&mut self) -> Option<u8> {
        self.pop_front()
    }

    fn pushback(&mut self, byte: u8) {
        self.push_front(byte);
    }
}

/// [`ByteSource`] over any reader
///
/// Pushed-back bytes are served before the reader is touched again, both by
/// [`ByteSource::next_byte`] and by [`Read::read`]. An I/O error ends the
/// byte stream and is kept for [`take_error`](Self::take_error).
#[derive(Debug)]
pub struct PushbackReader<R> {
    inner: R,
    pushed: Vec<u8>,
    error: Option<io::Error>,
}

impl<R: Read> PushbackReader<R> {
    /// Wrap a reader
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pushed: Vec::new(),
            error: None,
        }
    }

    /// The I/O error that ended the byte stream, if any
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Unwrap, dropping any pushed-back bytes
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for PushbackReader<R> {
    fn next_byte(&mut self) -> Option<u8> {
        if let Some(b) = self.pushed.pop() {
            return Some(b);
        }
        let mut buf = [0u8; 1];
        loop {
            match self.inner.read(&mut buf) {
                Ok(0) => return None,
                Ok(_) => return Some(buf[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.error = Some(e);
                    return None;
                }
            }
        }
    }

    fn pushback(&mut self, byte: u8) {
        self.pushed.push(byte);
    }
}

impl<R: Read> Read for PushbackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if !self.pushed.is_empty() {
            let mut n = 0;
            while n < buf.len() {
                let Some(b) = self.pushed.pop() else { break };
                buf[n] = b;
                n += 1;
            }
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// BOM detector backed by a catalog
#[derive(Clone, Copy)]
pub struct BomSniffer<'a> {
    catalog: &'a dyn EncodingCatalog,
}

impl<'a> BomSniffer<'a> {
    /// Sniffer resolving BOM encodings through `catalog`
    pub fn new(catalog: &'a dyn EncodingCatalog) -> Self {
        Self { catalog }
    }

    /// Consume a BOM from `source` and return its encoding
    ///
    /// If the catalog does not know the encoding, the BOM is put back and
    /// nothing is reported.
    pub fn sniff(&self, source: &mut dyn ByteSource) -> Option<Encoding> {
        let name = sniff_name(source)?;
        match self.catalog.resolve(name) {
            Some(encoding) => {
                debug!(encoding = name, "byte order mark detected");
                Some(encoding)
            }
            None => {
                if let Some((_, bom)) = BOMS.iter().find(|(n, _)| *n == name) {
                    for &b in bom.iter().rev() {
                        source.pushback(b);
                    }
                }
                None
            }
        }
    }
}

const BOMS: [(&str, &[u8]); 5] = [
    ("UTF-8", &[0xEF, 0xBB, 0xBF]),
    ("UTF-32LE", &[0xFF, 0xFE, 0x00, 0x00]),
    ("UTF-32BE", &[0x00, 0x00, 0xFE, 0xFF]),
    ("UTF-16LE", &[0xFF, 0xFE]),
    ("UTF-16BE", &[0xFE, 0xFF]),
];

/// Read bytes from `source` while they follow the BOM trie
///
/// Returns the encoding name with the BOM consumed, or `None` with every
/// read byte pushed back.
pub fn sniff_name(source: &mut dyn ByteSource) -> Option<&'static str> {
    let mut taken: Vec<u8> = Vec::with_capacity(4);
    let found = walk(source, &mut taken);
    if found.is_none() {
        for &b in taken.iter().rev() {
            source.pushback(b);
        }
    }
    found
}

fn walk(source: &mut dyn ByteSource, taken: &mut Vec<u8>) -> Option<&'static str> {
    let mut next = |taken: &mut Vec<u8>| {
        let b = source.next_byte()?;
        taken.push(b);
        Some(b)
    };

    match next(taken)? {
        0xEF => {
            if next(taken)? == 0xBB && next(taken)? == 0xBF {
                return Some("UTF-8");
            }
            None
        }
        0xFE => (next(taken)? == 0xFF).then_some("UTF-16BE"),
        0xFF => {
            if next(taken)? != 0xFE {
                return None;
            }
            // FF FE alone is UTF-16LE; look two bytes ahead for UTF-32LE.
            let mut lookahead = Vec::with_capacity(2);
            if let Some(b3) = source.next_byte() {
                lookahead.push(b3);
                if b3 == 0 {
                    if let Some(b4) = source.next_byte() {
                        lookahead.push(b4);
                        if b4 == 0 {
                            taken.extend_from_slice(&lookahead);
                            return Some("UTF-32LE");
                        }
                    }
                }
            }
            for &b in lookahead.iter().rev() {
                source.pushback(b);
            }
            Some("UTF-16LE")
        }
        0x00 => {
            if next(taken)? == 0x00 && next(taken)? == 0xFE && next(taken)? == 0xFF {
                return Some("UTF-32BE");
            }
            None
        }
        _ => None,
    }
}

/// Detect a BOM at the start of `data`: encoding name and BOM length
pub fn detect_bom(data: &[u8]) -> Option<(&'static str, usize)> {
    BOMS.iter()
        .find(|(_, bom)| data.starts_with(bom))
        .map(|(name, bom)| (*name, bom.len()))
}
