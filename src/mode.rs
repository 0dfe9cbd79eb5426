//! Open-mode negotiation
//!
//! Turns a positional mode (open flags or a `"r+b:enc:enc2"` string), an
//! optional permission and keyword-style overrides into a normalized
//! [`ModeDescriptor`], the resolved [`EncodingPair`] and the conversion flags
//! a stream should use.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Platform;
use crate::detection::{BomSniffer, ByteSource};
use crate::econv::ConversionOptions;
use crate::encoding::Encoding;
use crate::flags::{ConversionFlags, EconvOptions, Newline};
use crate::registry::EncodingCatalog;
use crate::{Error, Result};

/// Integer open flags, Linux values
pub mod open_flags {
    /// Read only
    pub const RDONLY: u32 = 0o0;
    /// Write only
    pub const WRONLY: u32 = 0o1;
    /// Read and write
    pub const RDWR: u32 = 0o2;
    /// Access mode bits
    pub const ACCMODE: u32 = 0o3;
    /// Create if missing
    pub const CREAT: u32 = 0o100;
    /// Fail if it exists
    pub const EXCL: u32 = 0o200;
    /// Truncate on open
    pub const TRUNC: u32 = 0o1000;
    /// Append on write
    pub const APPEND: u32 = 0o2000;
}

bitflags::bitflags! {
    /// Stream mode bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    #[repr(transparent)]
    pub struct ModeFlags: u32 {
        /// Open for reading
        const READABLE = 0x0000_0001;
        /// Open for writing
        const WRITABLE = 0x0000_0002;
        /// Open for both
        const READWRITE = Self::READABLE.bits() | Self::WRITABLE.bits();
        /// No newline conversion, ASCII-8BIT by default
        const BINMODE = 0x0000_0004;
        /// Writes go to the end
        const APPEND = 0x0000_0040;
        /// Create the file if missing
        const CREATE = 0x0000_0080;
        /// Fail if the file exists
        const EXCL = 0x0000_0400;
        /// Truncate on open
        const TRUNC = 0x0000_0800;
        /// Newline conversion applies
        const TEXTMODE = 0x0000_1000;
        /// External encoding still to be taken from a BOM
        const SETENC_BY_BOM = 0x0010_0000;
        /// A `bom|` prefix was given
        const BOM_SNIFF = 0x0020_0000;
    }
}

/// Validated mode bits; binary and text never coexist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct ModeDescriptor(ModeFlags);

impl ModeDescriptor {
    /// Validate `flags`
    pub fn new(flags: ModeFlags) -> Result<Self> {
        if flags.contains(ModeFlags::BINMODE | ModeFlags::TEXTMODE) {
            return Err(Error::BothTextAndBinmode);
        }
        Ok(Self(flags))
    }

    /// Add `flags`, re-validating
    pub fn with(self, flags: ModeFlags) -> Result<Self> {
        Self::new(self.0 | flags)
    }

    /// Remove `flags`
    pub fn without(self, flags: ModeFlags) -> Self {
        Self(self.0 - flags)
    }

    /// The bits
    pub fn flags(self) -> ModeFlags {
        self.0
    }

    /// Whether all of `flags` are set
    pub fn contains(self, flags: ModeFlags) -> bool {
        self.0.contains(flags)
    }

    /// Readable stream
    pub fn is_readable(self) -> bool {
        self.contains(ModeFlags::READABLE)
    }

    /// Writable stream
    pub fn is_writable(self) -> bool {
        self.contains(ModeFlags::WRITABLE)
    }

    /// Binary stream
    pub fn is_binary(self) -> bool {
        self.contains(ModeFlags::BINMODE)
    }

    /// Text stream
    pub fn is_text(self) -> bool {
        self.contains(ModeFlags::TEXTMODE)
    }

    /// Parse mode letters such as `"r+b"` or `"wx"`
    pub fn parse(letters: &str) -> Result<Self> {
        let illegal = || Error::IllegalAccessMode(letters.to_string());
        let mut chars = letters.chars();
        let mut flags = match chars.next() {
            Some('r') => ModeFlags::READABLE,
            Some('w') => ModeFlags::WRITABLE | ModeFlags::CREATE | ModeFlags::TRUNC,
            Some('a') => ModeFlags::WRITABLE | ModeFlags::APPEND | ModeFlags::CREATE,
            _ => return Err(illegal()),
        };
        let writing = flags.contains(ModeFlags::TRUNC);
        for c in chars {
            match c {
                'b' => flags |= ModeFlags::BINMODE,
                't' => flags |= ModeFlags::TEXTMODE,
                '+' => flags |= ModeFlags::READWRITE,
                'x' if writing => flags |= ModeFlags::EXCL,
                _ => return Err(illegal()),
            }
        }
        Self::new(flags).map_err(|_| illegal())
    }

    /// Descriptor for integer open flags
    pub fn from_open_flags(oflags: u32) -> Self {
        let mut flags = match oflags & open_flags::ACCMODE {
            open_flags::WRONLY => ModeFlags::WRITABLE,
            open_flags::RDWR => ModeFlags::READWRITE,
            _ => ModeFlags::READABLE,
        };
        for (bit, flag) in [
            (open_flags::APPEND, ModeFlags::APPEND),
            (open_flags::TRUNC, ModeFlags::TRUNC),
            (open_flags::CREAT, ModeFlags::CREATE),
            (open_flags::EXCL, ModeFlags::EXCL),
        ] {
            if oflags & bit != 0 {
                flags |= flag;
            }
        }
        Self(flags)
    }

    /// Integer open flags for this descriptor
    pub fn open_flags(self) -> u32 {
        let mut oflags = match (self.is_readable(), self.is_writable()) {
            (true, true) => open_flags::RDWR,
            (false, true) => open_flags::WRONLY,
            _ => open_flags::RDONLY,
        };
        for (flag, bit) in [
            (ModeFlags::APPEND, open_flags::APPEND),
            (ModeFlags::TRUNC, open_flags::TRUNC),
            (ModeFlags::CREATE, open_flags::CREAT),
            (ModeFlags::EXCL, open_flags::EXCL),
        ] {
            if self.contains(flag) {
                oflags |= bit;
            }
        }
        oflags
    }
}

impl fmt::Display for ModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = if self.contains(ModeFlags::APPEND) {
            "a"
        } else if self.is_writable() && (!self.is_readable() || self.contains(ModeFlags::TRUNC)) {
            "w"
        } else {
            "r"
        };
        f.write_str(base)?;
        if self.is_readable() && self.is_writable() {
            f.write_str("+")?;
        }
        if self.contains(ModeFlags::EXCL) {
            f.write_str("x")?;
        }
        if self.is_binary() {
            f.write_str("b")?;
        }
        if self.is_text() {
            f.write_str("t")?;
        }
        Ok(())
    }
}

/// Positional mode: integer open flags or a mode string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeArg {
    /// Integer open flags
    Flags(u32),
    /// `letters[:ext[:int]]`
    Str(String),
}

impl From<&str> for ModeArg {
    fn from(s: &str) -> Self {
        ModeArg::Str(s.to_string())
    }
}

impl From<u32> for ModeArg {
    fn from(oflags: u32) -> Self {
        ModeArg::Flags(oflags)
    }
}

impl fmt::Display for ModeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeArg::Flags(oflags) => write!(f, "{oflags:#o}"),
            ModeArg::Str(s) => f.write_str(s),
        }
    }
}

/// Keyword-style open overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenOptions {
    /// Mode, when not given positionally
    pub mode: Option<ModeArg>,
    /// Permission, when not given positionally
    pub perm: Option<u32>,
    /// Force text mode
    pub textmode: Option<bool>,
    /// Force binary mode
    pub binmode: Option<bool>,
    /// `ext[:int]` in one string
    pub encoding: Option<String>,
    /// External encoding
    pub external_encoding: Option<String>,
    /// Internal encoding; `"-"` means none
    pub internal_encoding: Option<String>,
    /// Conversion options
    #[serde(flatten)]
    pub econv: EconvOptions,
}

/// Resolved encodings of a stream
///
/// `primary` is what text is converted to (`None`: the default external,
/// no conversion). `secondary`, when present, is the external encoding
/// bytes arrive in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EncodingPair {
    /// Internal or target encoding
    pub primary: Option<Encoding>,
    /// External or source encoding
    pub secondary: Option<Encoding>,
}

impl EncodingPair {
    /// Encoding bytes are read in; `None` means the default external
    pub fn external(&self) -> Option<&Encoding> {
        self.secondary.as_ref().or(self.primary.as_ref())
    }

    /// Encoding text is converted to, if there is a conversion
    pub fn internal(&self) -> Option<&Encoding> {
        self.secondary.as_ref().and(self.primary.as_ref())
    }
}

/// Resolve an external/internal request against the catalog defaults
pub fn ext_int_to_encs(
    catalog: &dyn EncodingCatalog,
    external: Option<Encoding>,
    internal: Option<Encoding>,
    mode: ModeFlags,
) -> EncodingPair {
    let defaulted = external.is_none();
    let external = external.or_else(|| catalog.default_external());

    let internal = if external.as_ref().is_some_and(Encoding::is_binary) {
        None
    } else {
        internal.or_else(|| catalog.default_internal())
    };

    let by_bom = mode.contains(ModeFlags::SETENC_BY_BOM);
    match internal {
        Some(internal) if by_bom || Some(&internal) != external.as_ref() => EncodingPair {
            primary: Some(internal),
            secondary: external,
        },
        internal => EncodingPair {
            primary: if defaulted && internal != external {
                None
            } else {
                external
            },
            secondary: None,
        },
    }
}

/// Outcome of a negotiation
#[derive(Debug, Clone)]
pub struct Negotiated {
    /// Mode bits
    pub mode: ModeDescriptor,
    /// Integer open flags
    pub open_flags: u32,
    /// Permission, if any was given
    pub perm: Option<u32>,
    /// Resolved encodings
    pub encodings: EncodingPair,
    /// Conversion flags
    pub flags: ConversionFlags,
    /// Replacement and fallback
    pub options: ConversionOptions,
    /// Non-fatal notes, also logged as warnings
    pub diagnostics: Vec<String>,
}

impl Negotiated {
    /// Consume a BOM from `source` if the mode asked for it
    ///
    /// A detected BOM becomes the external encoding; the internal encoding is
    /// kept. Without a BOM the encoding from the mode string stays.
    pub fn set_encoding_by_bom(
        &mut self,
        catalog: &dyn EncodingCatalog,
        source: &mut dyn ByteSource,
    ) -> Option<Encoding> {
        if !self.mode.contains(ModeFlags::SETENC_BY_BOM) {
            return None;
        }
        let found = BomSniffer::new(catalog).sniff(source);
        let external = found.clone().or_else(|| self.encodings.external().cloned());
        let internal = self.encodings.internal().cloned();
        self.mode = self.mode.without(ModeFlags::SETENC_BY_BOM);
        self.encodings = ext_int_to_encs(catalog, external, internal, self.mode.flags());
        found
    }
}

/// Negotiates stream modes against a catalog
#[derive(Clone, Copy)]
pub struct ModeNegotiator<'a> {
    catalog: &'a dyn EncodingCatalog,
    platform: Platform,
}

impl<'a> ModeNegotiator<'a> {
    /// Negotiator for the host platform
    pub fn new(catalog: &'a dyn EncodingCatalog) -> Self {
        Self::with_platform(catalog, Platform::default())
    }

    /// Negotiator with explicit newline conventions
    pub fn with_platform(catalog: &'a dyn EncodingCatalog, platform: Platform) -> Self {
        Self { catalog, platform }
    }

    /// Resolve mode, permission and overrides
    pub fn negotiate(
        &self,
        mode: Option<ModeArg>,
        perm: Option<u32>,
        options: &OpenOptions,
    ) -> Result<Negotiated> {
        if options.textmode == Some(true) && options.binmode == Some(true) {
            return Err(Error::BothTextAndBinmode);
        }
        if mode.is_some() && options.mode.is_some() {
            return Err(Error::ModeSpecifiedTwice);
        }
        if perm.is_some() && options.perm.is_some() {
            return Err(Error::PermSpecifiedTwice);
        }
        let explicit_mode = mode.is_some() || options.mode.is_some();
        let mode_arg = mode.or_else(|| options.mode.clone());
        let perm = perm.or(options.perm);

        let (mut descriptor, given_oflags, enc_part) = match &mode_arg {
            None => (ModeDescriptor::new(ModeFlags::READABLE)?, None, None),
            Some(ModeArg::Flags(oflags)) => {
                (ModeDescriptor::from_open_flags(*oflags), Some(*oflags), None)
            }
            Some(ModeArg::Str(s)) => {
                let (letters, enc_part) = match s.split_once(':') {
                    Some((letters, enc_part)) => (letters, Some(enc_part)),
                    None => (s.as_str(), None),
                };
                let descriptor = ModeDescriptor::parse(letters)
                    .map_err(|_| Error::IllegalAccessMode(s.clone()))?;
                (descriptor, None, enc_part)
            }
        };

        let has_enc_option = options.encoding.is_some()
            || options.external_encoding.is_some()
            || options.internal_encoding.is_some();
        if enc_part.is_some() && has_enc_option {
            return Err(Error::EncodingSpecifiedTwice);
        }

        if options.textmode == Some(true) {
            descriptor = descriptor.with(ModeFlags::TEXTMODE)?;
        }
        if options.binmode == Some(true) {
            descriptor = descriptor.with(ModeFlags::BINMODE)?;
        }

        let mut diagnostics = Vec::new();
        let encodings = if let Some(enc_part) = enc_part {
            self.parse_mode_encoding(enc_part, &mut descriptor, &mut diagnostics)?
        } else if has_enc_option {
            self.extract_encoding_option(options, &mut descriptor, &mut diagnostics)?
        } else {
            let binary = descriptor
                .is_binary()
                .then(|| self.resolve("ASCII-8BIT"))
                .transpose()?;
            ext_int_to_encs(self.catalog, binary, None, descriptor.flags())
        };

        if !descriptor.is_binary() && !explicit_mode && self.platform.default_textmode() {
            descriptor = descriptor.with(ModeFlags::TEXTMODE)?;
        }

        let mut flags = ConversionFlags::empty();
        if descriptor.is_readable() {
            flags |= mode_btmode(
                descriptor,
                self.platform.default_newline_decorator(),
                ConversionFlags::empty(),
                ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
            );
        }
        let write = self.platform.write_newline_decorator();
        if descriptor.is_writable() && !write.is_empty() {
            flags |= mode_btmode(descriptor, write, ConversionFlags::empty(), write);
        }
        if encodings.secondary.is_some()
            && flags.intersects(self.platform.default_newline_decorator())
        {
            flags |= ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR;
        }
        let (flags, conversion_options) = options.econv.prepare(self.catalog, flags)?;

        let descriptor = self.validate_encoding_binmode(descriptor, &encodings, flags)?;

        let open_flags = given_oflags.unwrap_or_else(|| descriptor.open_flags());
        debug!(
            mode = %descriptor,
            external = ?encodings.external().map(Encoding::name),
            internal = ?encodings.internal().map(Encoding::name),
            flags = flags.bits(),
            "negotiated stream mode"
        );

        Ok(Negotiated {
            mode: descriptor,
            open_flags,
            perm,
            encodings,
            flags,
            options: conversion_options,
            diagnostics,
        })
    }

    fn resolve(&self, name: &str) -> Result<Encoding> {
        self.catalog
            .resolve(name)
            .ok_or_else(|| Error::UnknownEncoding(name.to_string()))
    }

    fn parse_mode_encoding(
        &self,
        enc_part: &str,
        descriptor: &mut ModeDescriptor,
        diagnostics: &mut Vec<String>,
    ) -> Result<EncodingPair> {
        let (ext_str, int_str) = match enc_part.split_once(':') {
            Some((ext, int)) => (ext, Some(int)),
            None => (enc_part, None),
        };

        let bom = ext_str
            .get(..8)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("bom|utf-"));
        let ext_name = if bom {
            *descriptor = descriptor.with(ModeFlags::SETENC_BY_BOM | ModeFlags::BOM_SNIFF)?;
            &ext_str[4..]
        } else {
            ext_str
        };
        let external = self.resolve(ext_name)?;

        let internal = match int_str {
            None | Some("-") => None,
            Some(name) => {
                let internal = self.resolve(name)?;
                if internal == external {
                    note(
                        diagnostics,
                        format!(
                            "ignoring internal encoding {internal}: it is identical to external encoding {external}"
                        ),
                    );
                    None
                } else {
                    Some(internal)
                }
            }
        };

        Ok(ext_int_to_encs(
            self.catalog,
            Some(external),
            internal,
            descriptor.flags(),
        ))
    }

    fn extract_encoding_option(
        &self,
        options: &OpenOptions,
        descriptor: &mut ModeDescriptor,
        diagnostics: &mut Vec<String>,
    ) -> Result<EncodingPair> {
        let ext_opt = options.external_encoding.as_deref();
        let int_opt = options.internal_encoding.as_deref();
        let mut encoding = options.encoding.as_deref();

        if let Some(ignored) = encoding.filter(|_| ext_opt.is_some() || int_opt.is_some()) {
            let used = if ext_opt.is_some() { "external" } else { "internal" };
            note(
                diagnostics,
                format!("Ignoring encoding parameter '{ignored}': {used}_encoding is used"),
            );
            encoding = None;
        }

        if let Some(enc_part) = encoding {
            return self.parse_mode_encoding(enc_part, descriptor, diagnostics);
        }

        let external = ext_opt.map(|name| self.resolve(name)).transpose()?;
        let mut internal = match int_opt {
            None | Some("-") => None,
            Some(name) => Some(self.resolve(name)?),
        };
        if let (Some(int), Some(ext)) = (&internal, &external) {
            if int == ext {
                note(
                    diagnostics,
                    format!(
                        "ignoring internal encoding {int}: it is identical to external encoding {ext}"
                    ),
                );
                internal = None;
            }
        }

        Ok(ext_int_to_encs(
            self.catalog,
            external,
            internal,
            ModeFlags::empty(),
        ))
    }

    fn validate_encoding_binmode(
        &self,
        descriptor: ModeDescriptor,
        encodings: &EncodingPair,
        flags: ConversionFlags,
    ) -> Result<ModeDescriptor> {
        let effective = encodings
            .primary
            .clone()
            .or_else(|| self.catalog.default_external());
        if descriptor.is_readable()
            && encodings.secondary.is_none()
            && !descriptor.is_binary()
            && effective.is_some_and(|e| !e.is_ascii_compatible())
        {
            return Err(Error::AsciiIncompatibleNeedsBinmode);
        }

        if !descriptor.is_binary() && (self.platform.default_textmode() || flags.has_decorators())
        {
            descriptor.with(ModeFlags::TEXTMODE)
        } else if !self.platform.default_textmode() && flags.newline() == Newline::None {
            Ok(descriptor.without(ModeFlags::TEXTMODE))
        } else {
            Ok(descriptor)
        }
    }
}

fn mode_btmode(
    descriptor: ModeDescriptor,
    plain: ConversionFlags,
    binary: ConversionFlags,
    text: ConversionFlags,
) -> ConversionFlags {
    if descriptor.is_binary() {
        binary
    } else if descriptor.is_text() {
        text
    } else {
        plain
    }
}

fn note(diagnostics: &mut Vec<String>, message: String) {
    warn!("{message}");
    diagnostics.push(message);
}
