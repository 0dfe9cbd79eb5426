//! Conversion flag bits and option parsing

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::econv::{ConversionOptions, Replacement};
use crate::fallback::{FallbackResolver, MappingFallback};
use crate::registry::EncodingCatalog;
use crate::{Error, Result};

bitflags::bitflags! {
    /// Flags steering a conversion session
    ///
    /// The bit layout is stable and matches the established converter ABI.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct ConversionFlags: u32 {
        /// Replace invalid byte sequences
        const INVALID_REPLACE = 0x0000_0002;
        /// Replace undefined conversions
        const UNDEF_REPLACE = 0x0000_0020;
        /// Replace undefined conversions with `&#xHHHH;`
        const UNDEF_HEX_CHARREF = 0x0000_0030;
        /// CR and CRLF become LF
        const UNIVERSAL_NEWLINE_DECORATOR = 0x0000_0100;
        /// LF becomes CRLF
        const CRLF_NEWLINE_DECORATOR = 0x0000_1000;
        /// LF becomes CR
        const CR_NEWLINE_DECORATOR = 0x0000_2000;
        /// XML text escaping
        const XML_TEXT_DECORATOR = 0x0000_4000;
        /// XML attribute content escaping
        const XML_ATTR_CONTENT_DECORATOR = 0x0000_8000;
        /// Surround output with double quotes
        const XML_ATTR_QUOTE_DECORATOR = 0x0010_0000;
        /// More input may follow
        const PARTIAL_INPUT = 0x0001_0000;
        /// Return to the caller each time output is written
        const AFTER_OUTPUT = 0x0002_0000;
    }
}

impl ConversionFlags {
    /// Error handler bits
    pub const ERROR_HANDLER_MASK: u32 = 0x0000_00ff;
    /// Invalid-sequence handler bits
    pub const INVALID_MASK: u32 = 0x0000_000f;
    /// Undefined-conversion handler bits
    pub const UNDEF_MASK: u32 = 0x0000_00f0;
    /// All decorator bits except the stateful ones
    pub const DECORATOR_MASK: u32 = 0x0000_ff00;
    /// Newline decorator sub-field
    pub const NEWLINE_DECORATOR_MASK: u32 = 0x0000_3f00;
    /// Newline decorators applied on read
    pub const NEWLINE_DECORATOR_READ_MASK: u32 = 0x0000_0f00;
    /// Newline decorators applied on write
    pub const NEWLINE_DECORATOR_WRITE_MASK: u32 = 0x0000_3000;
    /// Stateful decorator bits
    pub const STATEFUL_DECORATOR_MASK: u32 = 0x00f0_0000;

    /// The active newline decorator
    ///
    /// When several bits are set (possible through the boolean options)
    /// universal wins over CRLF, which wins over CR.
    pub fn newline(self) -> Newline {
        if self.contains(Self::UNIVERSAL_NEWLINE_DECORATOR) {
            Newline::Universal
        } else if self.contains(Self::CRLF_NEWLINE_DECORATOR) {
            Newline::Crlf
        } else if self.contains(Self::CR_NEWLINE_DECORATOR) {
            Newline::Cr
        } else {
            Newline::None
        }
    }

    /// Replace the newline sub-field
    pub fn with_newline(self, newline: Newline) -> Self {
        let cleared = Self::from_bits_retain(self.bits() & !Self::NEWLINE_DECORATOR_MASK);
        cleared | newline.flag()
    }

    /// The undefined-conversion handler, if any
    pub fn undef_handler(self) -> UndefHandler {
        match self.bits() & Self::UNDEF_MASK {
            0x30 => UndefHandler::HexCharref,
            0x20 => UndefHandler::Replace,
            _ => UndefHandler::Raise,
        }
    }

    /// Whether invalid sequences get replaced
    pub fn replaces_invalid(self) -> bool {
        self.bits() & Self::INVALID_MASK == Self::INVALID_REPLACE.bits()
    }

    /// Whether any decorator bit is set
    pub fn has_decorators(self) -> bool {
        self.bits() & (Self::DECORATOR_MASK | Self::STATEFUL_DECORATOR_MASK) != 0
    }

    /// Decorator bits only
    pub fn decorators(self) -> Self {
        Self::from_bits_retain(self.bits() & (Self::DECORATOR_MASK | Self::STATEFUL_DECORATOR_MASK))
    }
}

/// Newline decorator choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Newline {
    /// No newline conversion
    #[default]
    None,
    /// CR and CRLF become LF
    Universal,
    /// LF becomes CRLF
    Crlf,
    /// LF becomes CR
    Cr,
}

impl Newline {
    /// Flag bit for this choice
    pub fn flag(self) -> ConversionFlags {
        match self {
            Newline::None => ConversionFlags::empty(),
            Newline::Universal => ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
            Newline::Crlf => ConversionFlags::CRLF_NEWLINE_DECORATOR,
            Newline::Cr => ConversionFlags::CR_NEWLINE_DECORATOR,
        }
    }
}

/// What happens to an undefined conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndefHandler {
    /// Stop with an error
    Raise,
    /// Substitute the replacement
    Replace,
    /// Substitute an XML hexadecimal character reference
    HexCharref,
}

/// Keyword-style conversion options
///
/// String values mirror the symbols accepted by `String#encode`-like APIs:
/// `invalid: "replace"`, `undef: "replace"`, `xml: "text" | "attr"`,
/// `newline: "universal" | "crlf" | "cr" | "lf"`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EconvOptions {
    /// Invalid byte sequence handling
    pub invalid: Option<String>,
    /// Undefined conversion handling
    pub undef: Option<String>,
    /// Replacement string
    pub replace: Option<String>,
    /// XML escaping mode
    pub xml: Option<String>,
    /// Newline conversion
    pub newline: Option<String>,
    /// Boolean universal newline option
    pub universal_newline: Option<bool>,
    /// Boolean CRLF newline option
    pub crlf_newline: Option<bool>,
    /// Boolean CR newline option
    pub cr_newline: Option<bool>,
    /// Fallback table from source characters to replacement text
    pub fallback: Option<BTreeMap<String, String>>,
    /// Fallback resolver supplied in code; takes precedence over `fallback`
    #[serde(skip)]
    pub resolver: Option<Arc<dyn FallbackResolver>>,
}

impl EconvOptions {
    /// Whether no option is set at all
    pub fn is_empty(&self) -> bool {
        self.invalid.is_none()
            && self.undef.is_none()
            && self.replace.is_none()
            && self.xml.is_none()
            && self.newline.is_none()
            && self.universal_newline.is_none()
            && self.crlf_newline.is_none()
            && self.cr_newline.is_none()
            && self.fallback.is_none()
            && self.resolver.is_none()
    }

    /// Fold these options into `flags`
    pub fn apply(&self, mut flags: ConversionFlags) -> Result<ConversionFlags> {
        match self.invalid.as_deref() {
            None => {}
            Some("replace") => flags |= ConversionFlags::INVALID_REPLACE,
            Some(_) => {
                return Err(Error::InvalidOption(
                    "unknown value for invalid character option".into(),
                ));
            }
        }

        match self.undef.as_deref() {
            None => {}
            Some("replace") => flags |= ConversionFlags::UNDEF_REPLACE,
            Some(_) => {
                return Err(Error::InvalidOption(
                    "unknown value for undefined character option".into(),
                ));
            }
        }

        if self.replace.is_some() && flags.contains(ConversionFlags::INVALID_REPLACE) {
            flags |= ConversionFlags::UNDEF_REPLACE;
        }

        match self.xml.as_deref() {
            None => {}
            Some("text") => {
                flags |= ConversionFlags::XML_TEXT_DECORATOR | ConversionFlags::UNDEF_HEX_CHARREF;
            }
            Some("attr") => {
                flags |= ConversionFlags::XML_ATTR_CONTENT_DECORATOR
                    | ConversionFlags::XML_ATTR_QUOTE_DECORATOR
                    | ConversionFlags::UNDEF_HEX_CHARREF;
            }
            Some(other) => {
                return Err(Error::InvalidOption(format!(
                    "unexpected value for xml option: {other}"
                )));
            }
        }

        if let Some(value) = self.newline.as_deref() {
            let newline = match value {
                "universal" => Newline::Universal,
                "crlf" => Newline::Crlf,
                "cr" => Newline::Cr,
                "lf" => Newline::None,
                _ => {
                    return Err(Error::InvalidOption(
                        "unexpected value for newline option".into(),
                    ));
                }
            };
            flags = flags.with_newline(newline);
        }

        let toggles = [
            (self.universal_newline, ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR),
            (self.crlf_newline, ConversionFlags::CRLF_NEWLINE_DECORATOR),
            (self.cr_newline, ConversionFlags::CR_NEWLINE_DECORATOR),
        ];
        if toggles.iter().any(|(value, _)| value.is_some()) {
            flags = flags.with_newline(Newline::None);
            for (value, bit) in toggles {
                if value == Some(true) {
                    flags |= bit;
                }
            }
        }

        Ok(flags)
    }

    /// Parse flags and build the session options
    ///
    /// The replacement string is taken as UTF-8 text.
    pub fn prepare(
        &self,
        catalog: &dyn EncodingCatalog,
        flags: ConversionFlags,
    ) -> Result<(ConversionFlags, ConversionOptions)> {
        let flags = self.apply(flags)?;
        let mut options = ConversionOptions::default();

        if let Some(text) = &self.replace {
            let utf8 = catalog
                .resolve("UTF-8")
                .ok_or_else(|| Error::UnknownEncoding("UTF-8".into()))?;
            options.replacement = Some(Replacement::new(text.as_bytes(), utf8)?);
        }

        if let Some(resolver) = &self.resolver {
            options.fallback = Some(Arc::clone(resolver));
        } else if let Some(table) = &self.fallback {
            let mapping = MappingFallback::from_pairs(
                table.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            );
            options.fallback = Some(Arc::new(mapping));
        }

        Ok((flags, options))
    }
}
