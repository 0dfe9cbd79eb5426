//! # transcode-engine - Character Encoding Conversion Pipelines
//!
//! Converts byte strings between named character encodings through chains of
//! single-step transcoders, with pluggable handling of invalid and
//! unmappable input, newline and XML decorators, byte-order-mark sniffing,
//! encoding-aware buffer merging and negotiation of stream open modes.
//!
//! ## Features
//!
//! - **Pipelines** found by breadth-first search over registered converters
//! - **Error policies**: raise, replace, XML character references or a fallback table
//! - **Decorators** for universal/CRLF/CR newlines and XML escaping
//! - **Mode negotiation** for `"r+b:ext:int"` strings and keyword overrides
//! - **Thread-safe** registry behind a read-mostly lock
//!
//! ## Quick Start
//!
//! ```rust
//! use transcode_engine::{ConversionFlags, ConversionOptions, Engine, Registry};
//!
//! let registry = Registry::new();
//! let engine = Engine::new(&registry);
//!
//! let utf16 = engine
//!     .transcode(
//!         "caf\u{e9}".as_bytes(),
//!         "UTF-8",
//!         "UTF-16LE",
//!         ConversionFlags::empty(),
//!         &ConversionOptions::default(),
//!     )
//!     .unwrap();
//! assert_eq!(utf16, [b'c', 0, b'a', 0, b'f', 0, 0xE9, 0]);
//!
//! // Unmappable characters raise unless a policy says otherwise
//! let err = engine
//!     .transcode(
//!         "caf\u{e9}".as_bytes(),
//!         "UTF-8",
//!         "US-ASCII",
//!         ConversionFlags::empty(),
//!         &ConversionOptions::default(),
//!     )
//!     .unwrap_err();
//! assert_eq!(err.to_string(), "U+00E9 from UTF-8 to US-ASCII");
//! ```

#![deny(missing_docs)]

pub mod config;
pub mod decorator;
pub mod detection;
pub mod econv;
pub mod encoding;
pub mod fallback;
pub mod flags;
pub mod merge;
pub mod mode;
pub mod multibyte;
pub mod registry;
pub mod transcoder;

pub use config::{EngineConfig, Platform};
pub use decorator::Decorator;
pub use detection::{BomSniffer, ByteSource, PushbackReader};
pub use econv::{
    ConvResult, ConversionError, ConversionErrorKind, ConversionOptions, ConversionSession,
    DestBuffer, Engine, Replacement, Report, SessionState,
};
pub use encoding::{CodeRange, Encoding, EncodingKind};
pub use fallback::{CallableFallback, Character, FallbackResolver, IndexFallback, MappingFallback};
pub use flags::{ConversionFlags, EconvOptions, Newline, UndefHandler};
pub use merge::EncodedBuf;
pub use mode::{
    EncodingPair, ModeArg, ModeDescriptor, ModeFlags, ModeNegotiator, Negotiated, OpenOptions,
};
pub use registry::{ConvpathElement, EncodingCatalog, Registry};
pub use transcoder::{Pipeline, Transcoder, TranscoderEntry, Unit};

/// Result type for encoding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the engine, the catalog and mode negotiation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Conversion stopped on bad or unmappable input
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    /// No path between the two encodings
    #[error("code converter not found ({from} to {to})")]
    ConverterNotFound {
        /// Source encoding name
        from: String,
        /// Destination encoding name
        to: String,
    },
    /// Name not in the catalog
    #[error("unknown encoding name - {0}")]
    UnknownEncoding(String),
    /// Name already taken
    #[error("encoding {0} is already registered")]
    DuplicateEncoding(String),
    /// Attempt to clear the default external encoding
    #[error("default external can not be nil")]
    NilDefaultExternal,
    /// Bad explicit conversion path
    #[error("{0}")]
    InvalidConvpath(String),
    /// Bad conversion option value
    #[error("{0}")]
    InvalidOption(String),
    /// Replacement bytes do not decode in their own encoding
    #[error("replacement string is broken: {0}")]
    BrokenReplacement(String),
    /// Destination buffer would exceed the configured limit
    #[error("too long string")]
    TooLongString,
    /// Both sides of an append carry non-ASCII text in different encodings
    #[error("incompatible character encodings: {0} and {1}")]
    IncompatibleEncodings(String, String),
    /// Mode letters not understood
    #[error("illegal access mode {0}")]
    IllegalAccessMode(String),
    /// Text and binary mode requested together
    #[error("both textmode and binmode specified")]
    BothTextAndBinmode,
    /// Mode given positionally and as an option
    #[error("mode specified twice")]
    ModeSpecifiedTwice,
    /// Permission given positionally and as an option
    #[error("perm specified twice")]
    PermSpecifiedTwice,
    /// Encoding given in the mode string and as an option
    #[error("encoding specified twice")]
    EncodingSpecifiedTwice,
    /// Reading text in an encoding that is not a superset of ASCII
    #[error("ASCII incompatible encoding needs binmode")]
    AsciiIncompatibleNeedsBinmode,
}

/// Convert `input` with the process-wide registry and no error handling
///
/// Shorthand for [`Engine::transcode`] on [`Registry::global`].
pub fn transcode(input: &[u8], source: &str, destination: &str) -> Result<Vec<u8>> {
    Engine::new(Registry::global()).transcode(
        input,
        source,
        destination,
        ConversionFlags::empty(),
        &ConversionOptions::default(),
    )
}
