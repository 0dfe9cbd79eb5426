//! Encoding catalog: names, aliases, defaults and conversion paths
//!
//! [`EncodingCatalog`] is the seam between the engine and whatever knows
//! about encodings. [`Registry`] is the in-process implementation: a
//! read-mostly table behind a `parking_lot::RwLock`, where registration is a
//! check-then-insert under the write lock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::EngineConfig;
use crate::decorator::Decorator;
use crate::encoding::{Encoding, EncodingKind};
use crate::flags::ConversionFlags;
use crate::multibyte;
use crate::transcoder::{Pipeline, Transcoder, TranscoderEntry};
use crate::{Error, Result};

/// Everything the engine needs to know about encodings
pub trait EncodingCatalog: Send + Sync {
    /// Look an encoding up by name or alias, ignoring ASCII case
    fn resolve(&self, name: &str) -> Option<Encoding>;

    /// Whether `name` is known
    fn is_registered(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Register `name`, replicating `based_on` or as a dummy encoding
    fn register(&self, name: &str, based_on: Option<&Encoding>) -> Result<Encoding>;

    /// Build the steps converting `source` to `destination`, decorated per `flags`
    fn find_path(&self, source: &str, destination: &str, flags: ConversionFlags)
    -> Result<Pipeline>;

    /// Encoding assumed for data without one
    fn default_external(&self) -> Option<Encoding>;

    /// Encoding data is converted to on read, if any
    fn default_internal(&self) -> Option<Encoding>;
}

/// One element of an explicit conversion path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvpathElement {
    /// A direct converter from the first name to the second
    Pair(String, String),
    /// A decorator step
    Decorator(Decorator),
}

impl FromStr for ConvpathElement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some((source, destination)) if !source.is_empty() && !destination.is_empty() => Ok(
                ConvpathElement::Pair(source.to_string(), destination.to_string()),
            ),
            Some(_) => Err(Error::InvalidConvpath(format!("invalid convpath element {s}"))),
            None => Decorator::from_name(s)
                .map(ConvpathElement::Decorator)
                .ok_or_else(|| Error::InvalidConvpath(format!("unknown decorator {s}"))),
        }
    }
}

impl fmt::Display for ConvpathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvpathElement::Pair(s, d) => write!(f, "{s}:{d}"),
            ConvpathElement::Decorator(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    encodings: Vec<Encoding>,
    names: HashMap<String, usize>,
    aliases: Vec<(String, String)>,
    transcoders: Vec<TranscoderEntry>,
    default_external: Option<Encoding>,
    default_internal: Option<Encoding>,
}

impl Inner {
    fn lookup(&self, name: &str) -> Option<Encoding> {
        self.names
            .get(&name.to_ascii_uppercase())
            .map(|&i| self.encodings[i].clone())
    }

    fn insert(&mut self, encoding: Encoding) -> Result<Encoding> {
        let key = encoding.name().to_ascii_uppercase();
        if self.names.contains_key(&key) {
            return Err(Error::DuplicateEncoding(encoding.name().to_string()));
        }
        self.names.insert(key, self.encodings.len());
        self.encodings.push(encoding.clone());
        Ok(encoding)
    }

    fn alias(&mut self, alias: &str, canonical: &str) -> Result<()> {
        let key = alias.to_ascii_uppercase();
        if self.names.contains_key(&key) {
            return Err(Error::DuplicateEncoding(alias.to_string()));
        }
        let index = *self
            .names
            .get(&canonical.to_ascii_uppercase())
            .ok_or_else(|| Error::UnknownEncoding(canonical.to_string()))?;
        self.names.insert(key, index);
        self.aliases
            .push((alias.to_string(), self.encodings[index].name().to_string()));
        Ok(())
    }

    fn canonical(&self, name: &str) -> String {
        self.lookup(name)
            .map_or_else(|| name.to_ascii_uppercase(), |e| e.name().to_ascii_uppercase())
    }

    /// Breadth-first search over converter entries; returns entry indices
    fn search(&self, source: &str, destination: &str) -> Option<Vec<usize>> {
        let start = self.canonical(source);
        let goal = self.canonical(destination);
        let mut previous: HashMap<String, (String, usize)> = HashMap::new();
        let mut seen = HashSet::from([start.clone()]);
        let mut queue = VecDeque::from([start.clone()]);

        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = Vec::new();
                let mut at = current;
                while let Some((from, index)) = previous.get(&at) {
                    path.push(*index);
                    at = from.clone();
                }
                path.reverse();
                return Some(path);
            }
            for (index, entry) in self.transcoders.iter().enumerate() {
                if self.canonical(entry.source()) != current {
                    continue;
                }
                let next = self.canonical(entry.destination());
                if seen.insert(next.clone()) {
                    previous.insert(next.clone(), (current.clone(), index));
                    queue.push_back(next);
                }
            }
        }
        None
    }

    fn is_ascii_compatible(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|e| e.is_ascii_compatible())
    }
}

/// In-process [`EncodingCatalog`]
pub struct Registry {
    inner: RwLock<Inner>,
}

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

impl Registry {
    /// A registry holding the built-in encodings and transcoders
    pub fn new() -> Self {
        let registry = Self::empty();
        {
            let mut inner = registry.inner.write();
            install_builtins(&mut inner);
        }
        registry
    }

    /// A registry with nothing in it
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Built-in registry with the defaults from `config`
    pub fn with_config(config: &EngineConfig) -> Result<Self> {
        let registry = Self::new();
        let external = registry
            .resolve(&config.default_external)
            .ok_or_else(|| Error::UnknownEncoding(config.default_external.clone()))?;
        registry.set_default_external(Some(external))?;
        let internal = config
            .default_internal
            .as_deref()
            .map(|name| {
                registry
                    .resolve(name)
                    .ok_or_else(|| Error::UnknownEncoding(name.to_string()))
            })
            .transpose()?;
        registry.set_default_internal(internal);
        Ok(registry)
    }

    /// Process-wide built-in registry
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Add an encoding
    pub fn define(&self, encoding: Encoding) -> Result<Encoding> {
        self.inner.write().insert(encoding)
    }

    /// Add a dummy encoding
    pub fn define_dummy(&self, name: &str) -> Result<Encoding> {
        self.define(Encoding::dummy(name, EncodingKind::Binary))
    }

    /// Make `alias` another name for `canonical`
    pub fn alias(&self, alias: &str, canonical: &str) -> Result<()> {
        self.inner.write().alias(alias, canonical)
    }

    /// Add a single-step converter
    pub fn register_transcoder(&self, entry: TranscoderEntry) {
        debug!(
            source = entry.source(),
            destination = entry.destination(),
            "registering transcoder"
        );
        self.inner.write().transcoders.push(entry);
    }

    /// Set the default external encoding; `None` is rejected
    pub fn set_default_external(&self, encoding: Option<Encoding>) -> Result<()> {
        let encoding = encoding.ok_or(Error::NilDefaultExternal)?;
        self.inner.write().default_external = Some(encoding);
        Ok(())
    }

    /// Set or clear the default internal encoding
    pub fn set_default_internal(&self, encoding: Option<Encoding>) {
        self.inner.write().default_internal = encoding;
    }

    /// All encodings in registration order
    pub fn encodings(&self) -> Vec<Encoding> {
        self.inner.read().encodings.clone()
    }

    /// All aliases as `(alias, canonical)` pairs
    pub fn aliases(&self) -> Vec<(String, String)> {
        self.inner.read().aliases.clone()
    }

    /// Aliases of one encoding
    pub fn aliases_of(&self, encoding: &Encoding) -> Vec<String> {
        self.inner
            .read()
            .aliases
            .iter()
            .filter(|(_, canonical)| canonical.eq_ignore_ascii_case(encoding.name()))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    /// All direct converters as `(source, destination)` pairs
    pub fn transcoder_pairs(&self) -> Vec<(String, String)> {
        self.inner
            .read()
            .transcoders
            .iter()
            .map(|e| (e.source().to_string(), e.destination().to_string()))
            .collect()
    }

    /// Build a pipeline from an explicit path
    ///
    /// Converter pairs must be registered directly; no search is done.
    pub fn pipeline_from_convpath(&self, path: &[ConvpathElement]) -> Result<Pipeline> {
        let inner = self.inner.read();
        let mut steps: Vec<Box<dyn Transcoder>> = Vec::with_capacity(path.len());
        let mut source = None;
        let mut destination = String::new();

        for element in path {
            match element {
                ConvpathElement::Pair(s, d) => {
                    let entry = inner
                        .transcoders
                        .iter()
                        .find(|e| {
                            inner.canonical(e.source()) == inner.canonical(s)
                                && inner.canonical(e.destination()) == inner.canonical(d)
                        })
                        .ok_or_else(|| {
                            Error::InvalidConvpath(format!("adding conversion failed: {s} to {d}"))
                        })?;
                    source.get_or_insert_with(|| s.clone());
                    destination = d.clone();
                    steps.push(entry.instantiate());
                }
                ConvpathElement::Decorator(decorator) => steps.push(decorator.build()),
            }
        }

        Ok(Pipeline::new(source.unwrap_or_default(), destination, steps))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Registry")
            .field("encodings", &inner.encodings.len())
            .field("transcoders", &inner.transcoders.len())
            .field("default_external", &inner.default_external)
            .field("default_internal", &inner.default_internal)
            .finish()
    }
}

impl EncodingCatalog for Registry {
    fn resolve(&self, name: &str) -> Option<Encoding> {
        self.inner.read().lookup(name)
    }

    fn register(&self, name: &str, based_on: Option<&Encoding>) -> Result<Encoding> {
        let encoding = match based_on {
            Some(base) => base.replicate(name),
            None => Encoding::dummy(name, EncodingKind::Binary),
        };
        self.define(encoding)
    }

    fn find_path(
        &self,
        source: &str,
        destination: &str,
        flags: ConversionFlags,
    ) -> Result<Pipeline> {
        let inner = self.inner.read();
        let decorators = Decorator::from_flags(flags);

        let same = source.eq_ignore_ascii_case(destination)
            || inner.canonical(source) == inner.canonical(destination);
        if same {
            let steps = decorators.into_iter().map(Decorator::build).collect();
            return Ok(Pipeline::new(source, destination, steps));
        }

        let path = inner.search(source, destination).ok_or_else(|| {
            Error::ConverterNotFound {
                from: source.to_string(),
                to: destination.to_string(),
            }
        })?;

        // Boundary i is the input of converter i; boundary n is the output.
        let mut boundaries = Vec::with_capacity(path.len() + 1);
        boundaries.push(source.to_string());
        for &index in &path {
            boundaries.push(inner.transcoders[index].destination().to_string());
        }
        let compatible: Vec<bool> = boundaries
            .iter()
            .map(|name| inner.is_ascii_compatible(name))
            .collect();
        let first = compatible.iter().position(|&c| c).unwrap_or(0);
        let last = compatible.iter().rposition(|&c| c).unwrap_or(path.len());

        let placed: Vec<(usize, Decorator)> = decorators
            .into_iter()
            .map(|d| (if d.is_read_side() { last } else { first }, d))
            .collect();

        let mut steps: Vec<Box<dyn Transcoder>> = Vec::with_capacity(path.len() + placed.len());
        for position in 0..=path.len() {
            for (_, decorator) in placed.iter().filter(|(at, _)| *at == position) {
                steps.push(decorator.build());
            }
            if let Some(&index) = path.get(position) {
                steps.push(inner.transcoders[index].instantiate());
            }
        }

        let pipeline = Pipeline::new(source, destination, steps);
        debug!(source, destination, steps = ?pipeline.describe(), "resolved conversion path");
        Ok(pipeline)
    }

    fn default_external(&self) -> Option<Encoding> {
        self.inner.read().default_external.clone()
    }

    fn default_internal(&self) -> Option<Encoding> {
        self.inner.read().default_internal.clone()
    }
}

const BUILTIN_ENCODINGS: [(&str, EncodingKind, bool); 12] = [
    ("ASCII-8BIT", EncodingKind::Binary, false),
    ("UTF-8", EncodingKind::Utf8, false),
    ("US-ASCII", EncodingKind::Ascii, false),
    ("ISO-8859-1", EncodingKind::Latin1, false),
    ("UTF-16LE", EncodingKind::Utf16Le, false),
    ("UTF-16BE", EncodingKind::Utf16Be, false),
    ("UTF-32LE", EncodingKind::Utf32Le, false),
    ("UTF-32BE", EncodingKind::Utf32Be, false),
    ("UTF-16", EncodingKind::Utf16Be, true),
    ("UTF-32", EncodingKind::Utf32Be, true),
    ("Shift_JIS", EncodingKind::ShiftJis, false),
    ("EUC-JP", EncodingKind::EucJp, false),
];

const BUILTIN_ALIASES: [(&str, &str); 10] = [
    ("BINARY", "ASCII-8BIT"),
    ("CP65001", "UTF-8"),
    ("ASCII", "US-ASCII"),
    ("ANSI_X3.4-1968", "US-ASCII"),
    ("646", "US-ASCII"),
    ("ISO8859-1", "ISO-8859-1"),
    ("UCS-2BE", "UTF-16BE"),
    ("UCS-4LE", "UTF-32LE"),
    ("UCS-4BE", "UTF-32BE"),
    ("eucJP", "EUC-JP"),
];

fn install_builtins(inner: &mut Inner) {
    for (name, kind, dummy) in BUILTIN_ENCODINGS {
        let encoding = if dummy {
            Encoding::dummy(name, kind)
        } else {
            Encoding::new(name, kind)
        };
        // Built-in names are distinct, so insertion cannot collide.
        let _ = inner.insert(encoding);
    }
    if let Some(sjis) = inner.lookup("Shift_JIS") {
        let _ = inner.insert(sjis.replicate("Windows-31J"));
    }
    for (alias, canonical) in BUILTIN_ALIASES.into_iter().chain([("CP932", "Windows-31J")]) {
        let _ = inner.alias(alias, canonical);
    }
    inner.transcoders.extend(multibyte::builtin_transcoders());
    inner.default_external = inner.lookup("UTF-8");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_ignores_case_and_follows_aliases() {
        let registry = Registry::new();
        assert_eq!(registry.resolve("utf-8").unwrap().name(), "UTF-8");
        assert_eq!(registry.resolve("binary").unwrap().name(), "ASCII-8BIT");
        assert_eq!(registry.resolve("cp932").unwrap().name(), "Windows-31J");
        assert!(registry.resolve("UTF-16").unwrap().is_dummy());
        assert!(!registry.is_registered("KOI8-R"));
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = Registry::new();
        let err = registry.register("utf-8", None).unwrap_err();
        assert_eq!(err.to_string(), "encoding utf-8 is already registered");

        let base = registry.resolve("UTF-8").unwrap();
        let custom = registry.register("X-MY-UTF8", Some(&base)).unwrap();
        assert!(custom.is_ascii_compatible());
        assert_eq!(registry.resolve("x-my-utf8").unwrap(), custom);
    }

    #[test]
    fn test_default_external_cannot_be_nil() {
        let registry = Registry::new();
        assert_eq!(
            registry.set_default_external(None).unwrap_err().to_string(),
            "default external can not be nil"
        );
        assert_eq!(registry.default_external().unwrap().name(), "UTF-8");
    }

    #[test]
    fn test_with_config() {
        let config = EngineConfig {
            default_external: "ISO-8859-1".into(),
            default_internal: Some("UTF-8".into()),
            ..EngineConfig::default()
        };
        let registry = Registry::with_config(&config).unwrap();
        assert_eq!(registry.default_external().unwrap().name(), "ISO-8859-1");
        assert_eq!(registry.default_internal().unwrap().name(), "UTF-8");

        let bad = EngineConfig {
            default_external: "NOPE".into(),
            ..EngineConfig::default()
        };
        assert!(matches!(
            Registry::with_config(&bad),
            Err(Error::UnknownEncoding(_))
        ));
    }

    #[test]
    fn test_two_step_path() {
        let registry = Registry::new();
        let pipeline = registry
            .find_path("UTF-16LE", "ISO-8859-1", ConversionFlags::empty())
            .unwrap();
        assert_eq!(
            pipeline.describe(),
            vec!["UTF-16LE:UTF-8".to_string(), "UTF-8:ISO-8859-1".to_string()]
        );
    }

    #[test]
    fn test_converter_not_found() {
        let registry = Registry::new();
        let err = registry
            .find_path("UTF-8", "Shift_JIS", ConversionFlags::empty())
            .unwrap_err();
        assert_eq!(err.to_string(), "code converter not found (UTF-8 to Shift_JIS)");
    }

    #[test]
    fn test_decorator_placement() {
        let registry = Registry::new();
        let flags = ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR;
        let read = registry.find_path("UTF-16LE", "UTF-8", flags).unwrap();
        assert_eq!(
            read.describe(),
            vec!["UTF-16LE:UTF-8".to_string(), "universal_newline".to_string()]
        );

        let flags = ConversionFlags::CRLF_NEWLINE_DECORATOR;
        let write = registry.find_path("UTF-8", "UTF-16BE", flags).unwrap();
        assert_eq!(
            write.describe(),
            vec!["crlf_newline".to_string(), "UTF-8:UTF-16BE".to_string()]
        );

        let write = registry.find_path("UTF-16LE", "UTF-16BE", flags).unwrap();
        assert_eq!(
            write.describe(),
            vec![
                "UTF-16LE:UTF-8".to_string(),
                "crlf_newline".to_string(),
                "UTF-8:UTF-16BE".to_string()
            ]
        );
    }

    #[test]
    fn test_same_encoding_decorators_only() {
        let registry = Registry::new();
        let plain = registry
            .find_path("UTF-8", "utf-8", ConversionFlags::empty())
            .unwrap();
        assert!(plain.is_empty());

        let xml = registry
            .find_path("UTF-8", "UTF-8", ConversionFlags::XML_TEXT_DECORATOR)
            .unwrap();
        assert_eq!(xml.describe(), vec!["xml_text_escape".to_string()]);
    }

    #[test]
    fn test_convpath() {
        let registry = Registry::new();
        let path: Vec<ConvpathElement> = ["UTF-8:UTF-16LE", "universal_newline"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        let pipeline = registry.pipeline_from_convpath(&path).unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.source(), "UTF-8");
        assert_eq!(pipeline.destination(), "UTF-16LE");

        let bad = [ConvpathElement::Pair("UTF-16LE".into(), "ISO-8859-1".into())];
        assert_eq!(
            registry.pipeline_from_convpath(&bad).unwrap_err().to_string(),
            "adding conversion failed: UTF-16LE to ISO-8859-1"
        );
        assert!("bogus_decorator".parse::<ConvpathElement>().is_err());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(std::ptr::eq(Registry::global(), Registry::global()));
        assert!(Registry::global().is_registered("UTF-8"));
    }
}
