//! Newline and XML decorator steps
//!
//! Decorators work on ASCII-compatible byte streams one byte at a time and
//! sit inside a pipeline next to real converters.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::flags::{ConversionFlags, Newline};
use crate::transcoder::{Transcoder, Unit};

/// Kinds of decorator steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decorator {
    /// CR and CRLF become LF
    UniversalNewline,
    /// LF becomes CRLF
    CrlfNewline,
    /// LF becomes CR
    CrNewline,
    /// Escape `&`, `<` and `>`
    XmlTextEscape,
    /// Escape `&`, `<`, `>` and `"`
    XmlAttrContentEscape,
    /// Surround the whole output with double quotes
    XmlAttrQuote,
}

impl Decorator {
    /// All decorators
    pub const ALL: [Decorator; 6] = [
        Decorator::UniversalNewline,
        Decorator::CrlfNewline,
        Decorator::CrNewline,
        Decorator::XmlTextEscape,
        Decorator::XmlAttrContentEscape,
        Decorator::XmlAttrQuote,
    ];

    /// Name used in convpaths
    pub fn name(self) -> &'static str {
        match self {
            Decorator::UniversalNewline => "universal_newline",
            Decorator::CrlfNewline => "crlf_newline",
            Decorator::CrNewline => "cr_newline",
            Decorator::XmlTextEscape => "xml_text_escape",
            Decorator::XmlAttrContentEscape => "xml_attr_content_escape",
            Decorator::XmlAttrQuote => "xml_attr_quote",
        }
    }

    /// Look a decorator up by its convpath name
    pub fn from_name(name: &str) -> Option<Decorator> {
        Decorator::ALL.into_iter().find(|d| d.name() == name)
    }

    /// Decorators selected by `flags`, in pipeline order
    pub fn from_flags(flags: ConversionFlags) -> Vec<Decorator> {
        let mut out = Vec::new();
        if flags.contains(ConversionFlags::XML_TEXT_DECORATOR) {
            out.push(Decorator::XmlTextEscape);
        }
        if flags.contains(ConversionFlags::XML_ATTR_CONTENT_DECORATOR) {
            out.push(Decorator::XmlAttrContentEscape);
        }
        match flags.newline() {
            Newline::Universal => out.push(Decorator::UniversalNewline),
            Newline::Crlf => out.push(Decorator::CrlfNewline),
            Newline::Cr => out.push(Decorator::CrNewline),
            Newline::None => {}
        }
        if flags.contains(ConversionFlags::XML_ATTR_QUOTE_DECORATOR) {
            out.push(Decorator::XmlAttrQuote);
        }
        out
    }

    /// Whether this decorator runs on the decoded side of a conversion
    pub fn is_read_side(self) -> bool {
        self == Decorator::UniversalNewline
    }

    /// Instantiate the step
    pub fn build(self) -> Box<dyn Transcoder> {
        Box::new(DecoratorStep {
            kind: self,
            after_cr: false,
            opened: false,
        })
    }
}

impl fmt::Display for Decorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug)]
struct DecoratorStep {
    kind: Decorator,
    after_cr: bool,
    opened: bool,
}

impl Transcoder for DecoratorStep {
    fn source(&self) -> &str {
        ""
    }

    fn destination(&self) -> &str {
        self.kind.name()
    }

    fn max_output(&self) -> usize {
        match self.kind {
            Decorator::UniversalNewline | Decorator::CrNewline => 1,
            Decorator::CrlfNewline | Decorator::XmlAttrQuote => 2,
            Decorator::XmlTextEscape | Decorator::XmlAttrContentEscape => 6,
        }
    }

    fn convert_unit(&mut self, input: &[u8], _partial: bool, out: &mut Vec<u8>) -> Unit {
        let b = input[0];
        match self.kind {
            Decorator::UniversalNewline => {
                match b {
                    b'\r' => out.push(b'\n'),
                    b'\n' if self.after_cr => {}
                    _ => out.push(b),
                }
                self.after_cr = b == b'\r';
            }
            Decorator::CrlfNewline => match b {
                b'\n' => out.extend_from_slice(b"\r\n"),
                _ => out.push(b),
            },
            Decorator::CrNewline => match b {
                b'\n' => out.push(b'\r'),
                _ => out.push(b),
            },
            Decorator::XmlTextEscape => escape_xml(b, false, out),
            Decorator::XmlAttrContentEscape => escape_xml(b, true, out),
            Decorator::XmlAttrQuote => {
                if !self.opened {
                    out.push(b'"');
                    self.opened = true;
                }
                out.push(b);
            }
        }
        Unit::Converted(1)
    }

    fn finish(&mut self, out: &mut Vec<u8>) {
        if self.kind == Decorator::XmlAttrQuote {
            if !self.opened {
                out.push(b'"');
                self.opened = true;
            }
            out.push(b'"');
        }
    }

    fn is_decorator(&self) -> bool {
        true
    }
}

fn escape_xml(b: u8, quote: bool, out: &mut Vec<u8>) {
    match b {
        b'&' => out.extend_from_slice(b"&amp;"),
        b'<' => out.extend_from_slice(b"&lt;"),
        b'>' => out.extend_from_slice(b"&gt;"),
        b'"' if quote => out.extend_from_slice(b"&quot;"),
        _ => out.push(b),
    }
}
