//! Conversion sessions and the transcode loop
//!
//! A [`ConversionSession`] pushes bytes unit by unit through the steps of a
//! [`Pipeline`] into a [`DestBuffer`]. The [`Engine`] owns the outer loop:
//! it grows the buffer when the session reports it full, consults the
//! fallback resolver on undefined conversions, and turns everything else
//! into a [`ConversionError`].

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::encoding::{CodeRange, Encoding, EncodingKind};
use crate::fallback::{Character, FallbackResolver};
use crate::flags::{ConversionFlags, UndefHandler};
use crate::merge::EncodedBuf;
use crate::multibyte;
use crate::registry::EncodingCatalog;
use crate::transcoder::{Pipeline, Transcoder, Unit};
use crate::{Error, Result};

/// Why a conversion stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionErrorKind {
    /// The input is not valid in the source encoding
    InvalidByteSequence,
    /// The input ends inside a character
    IncompleteInput,
    /// A valid character has no mapping in the destination
    UndefinedConversion,
}

impl fmt::Display for ConversionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversionErrorKind::InvalidByteSequence => "invalid byte sequence",
            ConversionErrorKind::IncompleteInput => "incomplete input",
            ConversionErrorKind::UndefinedConversion => "undefined conversion",
        };
        f.write_str(label)
    }
}

/// A failed conversion, with the bytes that caused it
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConversionError {
    /// What went wrong
    pub kind: ConversionErrorKind,
    /// The offending bytes
    pub error_bytes: Vec<u8>,
    /// Bytes after the error that belong to the next unit
    pub readagain_bytes: Vec<u8>,
    /// Source encoding of the failing step
    pub source_encoding: String,
    /// Destination encoding of the failing step
    pub destination_encoding: String,
    /// Offset in the caller's input of the unit being converted
    pub position: usize,
    /// Source encoding of the whole conversion
    pub session_source: String,
    /// Destination encoding of the whole conversion
    pub session_destination: String,
    /// Destinations of the converter steps, in order
    pub step_destinations: Vec<String>,
    message: String,
}

impl ConversionError {
    #[allow(clippy::too_many_arguments)]
    fn new(
        kind: ConversionErrorKind,
        error_bytes: &[u8],
        readagain_bytes: &[u8],
        source_encoding: &str,
        destination_encoding: &str,
        position: usize,
        session_source: &str,
        session_destination: &str,
        step_destinations: Vec<String>,
    ) -> Self {
        let mut error = Self {
            kind,
            error_bytes: error_bytes.to_vec(),
            readagain_bytes: readagain_bytes.to_vec(),
            source_encoding: source_encoding.to_string(),
            destination_encoding: destination_encoding.to_string(),
            position,
            session_source: session_source.to_string(),
            session_destination: session_destination.to_string(),
            step_destinations,
            message: String::new(),
        };
        error.message = error.describe();
        error
    }

    fn describe(&self) -> String {
        let dumped = dump(&self.error_bytes);
        match self.kind {
            ConversionErrorKind::IncompleteInput => {
                format!("incomplete {dumped} on {}", self.source_encoding)
            }
            ConversionErrorKind::InvalidByteSequence if !self.readagain_bytes.is_empty() => {
                format!(
                    "{dumped} followed by {} on {}",
                    dump(&self.readagain_bytes),
                    self.source_encoding
                )
            }
            ConversionErrorKind::InvalidByteSequence => {
                format!("{dumped} on {}", self.source_encoding)
            }
            ConversionErrorKind::UndefinedConversion => {
                let shown = if self.source_encoding.eq_ignore_ascii_case("UTF-8") {
                    std::str::from_utf8(&self.error_bytes)
                        .ok()
                        .and_then(|s| s.chars().next())
                        .map_or(dumped, |c| format!("U+{:04X}", u32::from(c)))
                } else {
                    dumped
                };
                if self.source_encoding.eq_ignore_ascii_case(&self.session_source)
                    && self
                        .destination_encoding
                        .eq_ignore_ascii_case(&self.session_destination)
                {
                    format!(
                        "{shown} from {} to {}",
                        self.source_encoding, self.destination_encoding
                    )
                } else {
                    let mut message = format!(
                        "{shown} to {} in conversion from {}",
                        self.destination_encoding, self.session_source
                    );
                    for step in &self.step_destinations {
                        message.push_str(" to ");
                        message.push_str(step);
                    }
                    message
                }
            }
        }
    }
}

/// Quote bytes the way diagnostics show them: printable ASCII as is,
/// everything else as `\xHH`
pub(crate) fn dump(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 4 + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x1B => out.push_str("\\e"),
            0x20..=0x7E => out.push(char::from(b)),
            _ => out.push_str(&format!("\\x{b:02X}")),
        }
    }
    out.push('"');
    out
}

/// Replacement text for invalid and undefined units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    bytes: Vec<u8>,
    encoding: Encoding,
}

impl Replacement {
    /// Wrap `bytes` in `encoding`; broken byte runs are rejected
    pub fn new(bytes: impl Into<Vec<u8>>, encoding: Encoding) -> Result<Self> {
        let bytes = bytes.into();
        if CodeRange::scan(&bytes, &encoding) == CodeRange::Broken {
            return Err(Error::BrokenReplacement(dump(&bytes)));
        }
        Ok(Self { bytes, encoding })
    }

    /// Raw bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Encoding of the bytes
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// The replacement re-encoded for `target`, if representable
    fn encode_for(&self, target: Option<&Encoding>) -> Option<Vec<u8>> {
        reencode(&self.bytes, self.encoding.kind(), target)
    }

    /// U+FFFD for Unicode destinations, `?` otherwise
    fn default_for(target: Option<&Encoding>) -> Vec<u8> {
        match target {
            Some(enc) if enc.kind().is_unicode() => {
                multibyte::encode_str(enc.kind(), "\u{FFFD}").unwrap_or_else(|| b"?".to_vec())
            }
            Some(enc) if !enc.is_ascii_compatible() => {
                multibyte::encode_str(enc.kind(), "?").unwrap_or_else(|| b"?".to_vec())
            }
            _ => b"?".to_vec(),
        }
    }
}

/// `bytes` of `from` re-encoded for `target`, or `None` when some character
/// has no mapping there; an unknown target takes the bytes as they are
fn reencode(bytes: &[u8], from: EncodingKind, target: Option<&Encoding>) -> Option<Vec<u8>> {
    let Some(target) = target else {
        return Some(bytes.to_vec());
    };
    let ascii_both =
        target.is_ascii_compatible() && from.min_length() == 1 && bytes.is_ascii();
    if target.kind() == from || ascii_both {
        return Some(bytes.to_vec());
    }
    let mut out = Vec::with_capacity(bytes.len());
    for cp in multibyte::decode_all(from, bytes)? {
        if !multibyte::encode_char(target.kind(), cp, &mut out) {
            return None;
        }
    }
    Some(out)
}

/// Per-call conversion options
#[derive(Debug, Clone, Default)]
pub struct ConversionOptions {
    /// Used for every replaced unit
    pub replacement: Option<Replacement>,
    /// Consulted on undefined conversions the flags do not handle
    pub fallback: Option<Arc<dyn FallbackResolver>>,
}

impl ConversionOptions {
    /// Options with just a fallback resolver
    pub fn with_fallback(fallback: impl FallbackResolver + 'static) -> Self {
        Self {
            replacement: None,
            fallback: Some(Arc::new(fallback)),
        }
    }
}

/// Growable output buffer with an explicit logical capacity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestBuffer {
    bytes: Vec<u8>,
    capacity: usize,
}

impl DestBuffer {
    /// Empty buffer accepting `capacity` bytes before it reports full
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Buffer that already holds output; appending will need growth
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let capacity = bytes.len();
        Self { bytes, capacity }
    }

    /// Bytes written
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Logical capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Written bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Take the written bytes
    pub fn into_vec(self) -> Vec<u8> {
        self.bytes
    }

    /// Append as much of `data` as fits; returns the number of bytes taken
    pub fn push_within_capacity(&mut self, data: &[u8]) -> usize {
        let room = self.capacity.saturating_sub(self.bytes.len());
        let n = room.min(data.len());
        self.bytes.extend_from_slice(&data[..n]);
        n
    }

    /// Grow to `2 * (len + max_output)`, never past `limit`
    pub fn grow(&mut self, max_output: usize, limit: usize) -> Result<usize> {
        let len = self.bytes.len();
        if len.saturating_add(max_output) > limit {
            return Err(Error::TooLongString);
        }
        let wanted = len.saturating_add(max_output).saturating_mul(2).min(limit);
        let capacity = wanted.max(self.capacity);
        self.bytes.reserve(capacity - len);
        self.capacity = capacity;
        Ok(capacity)
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing converted yet
    Open,
    /// At least one `convert` call made
    Converting,
    /// Closed; further calls do nothing
    Closed,
}

/// Why [`ConversionSession::convert`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvResult {
    /// All input converted and flushed
    Finished,
    /// Partial input exhausted; feed more
    SourceBufferEmpty,
    /// The destination is full; grow it and call again
    DestinationBufferFull,
    /// Output was written under [`ConversionFlags::AFTER_OUTPUT`]; call again
    AfterOutput,
    /// See [`ConversionSession::last_error`]
    InvalidByteSequence,
    /// See [`ConversionSession::last_error`]
    IncompleteInput,
    /// See [`ConversionSession::last_error`]
    UndefinedConversion,
}

impl From<ConversionErrorKind> for ConvResult {
    fn from(kind: ConversionErrorKind) -> Self {
        match kind {
            ConversionErrorKind::InvalidByteSequence => ConvResult::InvalidByteSequence,
            ConversionErrorKind::IncompleteInput => ConvResult::IncompleteInput,
            ConversionErrorKind::UndefinedConversion => ConvResult::UndefinedConversion,
        }
    }
}

#[derive(Debug)]
struct Stage {
    step: Box<dyn Transcoder>,
    source: String,
    destination: String,
    source_encoding: Option<Encoding>,
    destination_encoding: Option<Encoding>,
    pending: Vec<u8>,
}

enum UnitStep {
    Consumed(usize),
    NeedMore,
    Failed { consumed: usize, result: ConvResult },
}

/// One conversion in progress
///
/// Call [`convert`](Self::convert) with the same input until it returns
/// something other than [`ConvResult::DestinationBufferFull`]. Dropping the
/// session closes it.
#[derive(Debug)]
pub struct ConversionSession {
    source: String,
    destination: String,
    stages: Vec<Stage>,
    flags: ConversionFlags,
    replacement: Option<Replacement>,
    max_output: usize,
    output: Vec<u8>,
    flushed: bool,
    consumed: usize,
    unit_start: usize,
    finish_cursor: usize,
    state: SessionState,
    last_error: Option<ConversionError>,
    failed_stage: Option<usize>,
}

impl ConversionSession {
    /// Bind `pipeline` for one conversion
    pub fn open(
        catalog: &dyn EncodingCatalog,
        pipeline: Pipeline,
        flags: ConversionFlags,
        replacement: Option<Replacement>,
    ) -> Self {
        let max_output = pipeline.max_output();
        let (source, destination, steps) = pipeline.into_steps();

        let mut flowing_name = source.clone();
        let mut flowing = catalog.resolve(&source);
        let mut stages = Vec::with_capacity(steps.len());
        for step in steps {
            let stage = if step.is_decorator() {
                Stage {
                    source: flowing_name.clone(),
                    destination: flowing_name.clone(),
                    source_encoding: flowing.clone(),
                    destination_encoding: flowing.clone(),
                    step,
                    pending: Vec::new(),
                }
            } else {
                let source = step.source().to_string();
                let destination = step.destination().to_string();
                let source_encoding = catalog.resolve(&source);
                flowing = catalog.resolve(&destination);
                flowing_name = destination.clone();
                Stage {
                    source,
                    destination,
                    source_encoding,
                    destination_encoding: flowing.clone(),
                    step,
                    pending: Vec::new(),
                }
            };
            stages.push(stage);
        }

        debug!(%source, %destination, steps = stages.len(), "conversion session opened");
        Self {
            source,
            destination,
            stages,
            flags,
            replacement,
            max_output,
            output: Vec::new(),
            flushed: false,
            consumed: 0,
            unit_start: 0,
            finish_cursor: 0,
            state: SessionState::Open,
            last_error: None,
            failed_stage: None,
        }
    }

    /// Overall source name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Overall destination name
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Input bytes consumed so far
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Largest output of one unit in any step
    pub fn max_output(&self) -> usize {
        self.max_output
    }

    /// Details of the last failure
    pub fn last_error(&self) -> Option<&ConversionError> {
        self.last_error.as_ref()
    }

    /// Run the pipeline over `input`, writing into `dest`
    pub fn convert(&mut self, input: &[u8], dest: &mut DestBuffer) -> ConvResult {
        if self.state == SessionState::Closed {
            return ConvResult::Finished;
        }
        self.state = SessionState::Converting;
        let partial = self.flags.contains(ConversionFlags::PARTIAL_INPUT);
        let after_output = self.flags.contains(ConversionFlags::AFTER_OUTPUT);

        loop {
            for index in 1..self.stages.len() {
                if let Some(result) = self.drain_stage(index, true) {
                    return result;
                }
            }
            if !self.flush(dest) {
                return ConvResult::DestinationBufferFull;
            }
            if after_output && std::mem::take(&mut self.flushed) {
                return ConvResult::AfterOutput;
            }

            if self.consumed < input.len() {
                self.unit_start = self.consumed;
                if self.stages.is_empty() {
                    self.output.extend_from_slice(&input[self.consumed..]);
                    self.consumed = input.len();
                    continue;
                }
                match self.run_unit(0, &input[self.consumed..], partial) {
                    UnitStep::Consumed(n) => self.consumed += n,
                    UnitStep::NeedMore => return ConvResult::SourceBufferEmpty,
                    UnitStep::Failed { consumed, result } => {
                        self.consumed += consumed;
                        return result;
                    }
                }
                continue;
            }

            if partial {
                return ConvResult::SourceBufferEmpty;
            }

            self.unit_start = input.len();
            if self.finish_cursor < self.stages.len() {
                let index = self.finish_cursor;
                if let Some(result) = self.drain_stage(index, false) {
                    return result;
                }
                let mut out = Vec::new();
                self.stages[index].step.finish(&mut out);
                self.emit(index, out);
                self.finish_cursor += 1;
                continue;
            }

            return ConvResult::Finished;
        }
    }

    /// Splice `bytes` of `encoding` in as output of the step that failed
    /// last, converted to that step's destination encoding
    ///
    /// Returns false, inserting nothing, when a character has no mapping in
    /// the destination.
    pub fn insert_output(&mut self, bytes: &[u8], encoding: &Encoding) -> bool {
        self.insert_encoded(bytes, encoding.kind())
    }

    /// [`insert_output`](Self::insert_output) for UTF-8 text
    pub fn insert_text(&mut self, text: &str) -> bool {
        self.insert_encoded(text.as_bytes(), EncodingKind::Utf8)
    }

    fn insert_encoded(&mut self, bytes: &[u8], from: EncodingKind) -> bool {
        let index = self
            .failed_stage
            .unwrap_or_else(|| self.stages.len().saturating_sub(1));
        let target = self
            .stages
            .get(index)
            .and_then(|stage| stage.destination_encoding.as_ref());
        match reencode(bytes, from, target) {
            Some(out) => {
                self.emit(index, out);
                true
            }
            None => false,
        }
    }

    /// Close the session; idempotent
    pub fn close(&mut self) {
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            self.output.clear();
            for stage in &mut self.stages {
                stage.pending.clear();
            }
            trace!(source = %self.source, destination = %self.destination, "conversion session closed");
        }
    }

    /// Error describing an unfinished tail left by partial input
    pub fn incomplete_tail(&self, input: &[u8]) -> Option<ConversionError> {
        let tail = input.get(self.consumed..).filter(|t| !t.is_empty())?;
        let (source, destination) = self
            .stages
            .first()
            .map_or((self.source.as_str(), self.destination.as_str()), |s| {
                (s.source.as_str(), s.destination.as_str())
            });
        Some(ConversionError::new(
            ConversionErrorKind::IncompleteInput,
            tail,
            tail,
            source,
            destination,
            self.consumed,
            &self.source,
            &self.destination,
            self.step_destinations(),
        ))
    }

    fn step_destinations(&self) -> Vec<String> {
        self.stages
            .iter()
            .filter(|s| !s.step.is_decorator())
            .map(|s| s.destination.clone())
            .collect()
    }

    fn flush(&mut self, dest: &mut DestBuffer) -> bool {
        let n = dest.push_within_capacity(&self.output);
        self.output.drain(..n);
        self.flushed |= n > 0;
        self.output.is_empty()
    }

    fn emit(&mut self, index: usize, out: Vec<u8>) {
        if out.is_empty() {
            return;
        }
        match self.stages.get_mut(index + 1) {
            Some(next) => next.pending.extend_from_slice(&out),
            None => self.output.extend_from_slice(&out),
        }
    }

    fn drain_stage(&mut self, index: usize, partial: bool) -> Option<ConvResult> {
        let pending = std::mem::take(&mut self.stages[index].pending);
        let mut offset = 0;
        let mut result = None;
        while offset < pending.len() {
            match self.run_unit(index, &pending[offset..], partial) {
                UnitStep::Consumed(n) => offset += n,
                UnitStep::NeedMore => break,
                UnitStep::Failed { consumed, result: r } => {
                    offset += consumed;
                    result = Some(r);
                    break;
                }
            }
        }
        let stage = &mut self.stages[index];
        let mut rest = pending[offset..].to_vec();
        rest.append(&mut stage.pending);
        stage.pending = rest;
        result
    }

    fn run_unit(&mut self, index: usize, input: &[u8], partial: bool) -> UnitStep {
        let mut out = Vec::new();
        let unit = self.stages[index].step.convert_unit(input, partial, &mut out);
        match unit {
            Unit::Converted(n) => {
                self.emit(index, out);
                UnitStep::Consumed(n.max(1))
            }
            Unit::NeedMore => UnitStep::NeedMore,
            Unit::Invalid {
                error_len,
                readagain_len,
            } => {
                let error_end = error_len.clamp(1, input.len());
                let readagain_end = (error_end + readagain_len).min(input.len());
                self.fail(
                    index,
                    ConversionErrorKind::InvalidByteSequence,
                    &input[..error_end],
                    &input[error_end..readagain_end],
                )
            }
            Unit::Incomplete { error_len } => {
                let error_end = error_len.clamp(1, input.len());
                self.fail(
                    index,
                    ConversionErrorKind::IncompleteInput,
                    &input[..error_end],
                    &[],
                )
            }
            Unit::Undefined { error_len } => {
                let error_end = error_len.clamp(1, input.len());
                self.fail(
                    index,
                    ConversionErrorKind::UndefinedConversion,
                    &input[..error_end],
                    &[],
                )
            }
        }
    }

    fn fail(
        &mut self,
        index: usize,
        kind: ConversionErrorKind,
        error: &[u8],
        readagain: &[u8],
    ) -> UnitStep {
        if let Some(bytes) = self.substitute(index, kind, error) {
            trace!(%kind, bytes = error.len(), "replaced unit in session");
            self.emit(index, bytes);
            return UnitStep::Consumed(error.len());
        }

        let stage = &self.stages[index];
        self.last_error = Some(ConversionError::new(
            kind,
            error,
            readagain,
            &stage.source,
            &stage.destination,
            self.unit_start,
            &self.source,
            &self.destination,
            self.step_destinations(),
        ));
        self.failed_stage = Some(index);
        UnitStep::Failed {
            consumed: error.len(),
            result: kind.into(),
        }
    }

    fn substitute(&self, index: usize, kind: ConversionErrorKind, error: &[u8]) -> Option<Vec<u8>> {
        let stage = &self.stages[index];
        let target = stage.destination_encoding.as_ref();
        let replacement = || match &self.replacement {
            Some(r) => r.encode_for(target),
            None => Some(Replacement::default_for(target)),
        };
        match kind {
            ConversionErrorKind::InvalidByteSequence | ConversionErrorKind::IncompleteInput => {
                if self.flags.replaces_invalid() {
                    replacement()
                } else {
                    None
                }
            }
            ConversionErrorKind::UndefinedConversion => match self.flags.undef_handler() {
                UndefHandler::Raise => None,
                UndefHandler::Replace => replacement(),
                UndefHandler::HexCharref => {
                    let ch = Character::new(error, stage.source_encoding.as_ref());
                    let text = format!("&#x{:X};", ch.code_point()?);
                    match target {
                        Some(enc) if !enc.is_ascii_compatible() => {
                            multibyte::encode_str(enc.kind(), &text)
                        }
                        _ => Some(text.into_bytes()),
                    }
                }
            },
        }
    }
}

impl Drop for ConversionSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counters from one transcode call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Input bytes consumed
    pub consumed: usize,
    /// Times the destination buffer was grown
    pub grow_count: usize,
    /// Undefined characters resolved by the fallback
    pub fallback_count: usize,
}

/// Drives conversion sessions against a catalog
#[derive(Clone, Copy)]
pub struct Engine<'a> {
    catalog: &'a dyn EncodingCatalog,
    max_buffer_len: usize,
    initial_slack: usize,
}

impl fmt::Debug for Engine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("max_buffer_len", &self.max_buffer_len)
            .field("initial_slack", &self.initial_slack)
            .finish_non_exhaustive()
    }
}

impl<'a> Engine<'a> {
    /// Engine with default limits
    pub fn new(catalog: &'a dyn EncodingCatalog) -> Self {
        Self::with_config(catalog, &EngineConfig::default())
    }

    /// Engine with the limits from `config`
    pub fn with_config(catalog: &'a dyn EncodingCatalog, config: &EngineConfig) -> Self {
        Self {
            catalog,
            max_buffer_len: config.max_buffer_len,
            initial_slack: config.initial_slack,
        }
    }

    /// The catalog conversions are resolved against
    pub fn catalog(&self) -> &'a dyn EncodingCatalog {
        self.catalog
    }

    /// Convert `input` from `source` to `destination`
    pub fn transcode(
        &self,
        input: &[u8],
        source: &str,
        destination: &str,
        flags: ConversionFlags,
        options: &ConversionOptions,
    ) -> Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        let capacity = input
            .len()
            .saturating_add(self.initial_slack)
            .min(self.max_buffer_len);
        let mut dest = DestBuffer::new(capacity);
        self.transcode_into(input, source, destination, flags, options, &mut dest)?;
        Ok(dest.into_vec())
    }

    /// Convert into a caller-supplied buffer; output produced before a
    /// failure stays in `dest`
    pub fn transcode_into(
        &self,
        input: &[u8],
        source: &str,
        destination: &str,
        flags: ConversionFlags,
        options: &ConversionOptions,
        dest: &mut DestBuffer,
    ) -> Result<Report> {
        if input.is_empty() {
            return Ok(Report::default());
        }
        let pipeline = self.catalog.find_path(source, destination, flags)?;
        self.run_pipeline(pipeline, input, flags, options, dest)
    }

    /// Convert input arriving in pieces, as a stream reader sees it
    ///
    /// Every piece but the last runs under [`ConversionFlags::PARTIAL_INPUT`].
    /// A character split across pieces and, under universal newline, a
    /// trailing CR are carried into the next piece, so the output matches a
    /// one-shot [`transcode_into`](Self::transcode_into).
    pub fn transcode_chunks<'c>(
        &self,
        chunks: impl IntoIterator<Item = &'c [u8]>,
        source: &str,
        destination: &str,
        flags: ConversionFlags,
        options: &ConversionOptions,
        dest: &mut DestBuffer,
    ) -> Result<Report> {
        if flags.contains(ConversionFlags::XML_ATTR_QUOTE_DECORATOR) {
            return Err(Error::InvalidOption(
                "xml attribute quoting cannot span chunks".into(),
            ));
        }
        let source_encoding = self.catalog.resolve(source);
        let unit = source_encoding.as_ref().map_or(1, Encoding::min_length);
        let cr = source_encoding
            .as_ref()
            .filter(|_| flags.contains(ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR))
            .and_then(|enc| multibyte::encode_str(enc.kind(), "\r"));

        let mut total = Report::default();
        let mut carry = Vec::new();
        let mut chunks = chunks.into_iter().peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            let mut piece = std::mem::take(&mut carry);
            piece.extend_from_slice(chunk);

            let held = match &cr {
                Some(cr) if !last && piece.len() % unit == 0 && piece.ends_with(cr) => cr.len(),
                _ => 0,
            };
            let (body, tail) = piece.split_at(piece.len() - held);
            let piece_flags = if last {
                flags
            } else {
                flags | ConversionFlags::PARTIAL_INPUT
            };

            match self.transcode_into(body, source, destination, piece_flags, options, dest) {
                Ok(report) => {
                    total.consumed += report.consumed;
                    total.grow_count += report.grow_count;
                    total.fallback_count += report.fallback_count;
                    carry = tail.to_vec();
                }
                Err(Error::Conversion(err))
                    if !last && err.kind == ConversionErrorKind::IncompleteInput =>
                {
                    trace!(carried = err.readagain_bytes.len(), "character split across chunks");
                    total.consumed += body.len() - err.readagain_bytes.len();
                    carry = err.readagain_bytes;
                    carry.extend_from_slice(tail);
                }
                Err(err) => return Err(err),
            }
            if held > 0 {
                trace!("carried CR into the next chunk");
            }
        }

        Ok(total)
    }

    /// Convert through an already built pipeline
    pub fn run_pipeline(
        &self,
        pipeline: Pipeline,
        input: &[u8],
        flags: ConversionFlags,
        options: &ConversionOptions,
        dest: &mut DestBuffer,
    ) -> Result<Report> {
        let mut report = Report::default();
        if input.is_empty() {
            return Ok(report);
        }

        let mut session =
            ConversionSession::open(self.catalog, pipeline, flags, options.replacement.clone());
        let max_output = session.max_output();

        loop {
            match session.convert(input, dest) {
                ConvResult::Finished => {
                    report.consumed = session.consumed();
                    session.close();
                    return Ok(report);
                }
                ConvResult::SourceBufferEmpty => {
                    report.consumed = session.consumed();
                    let tail = session.incomplete_tail(input);
                    session.close();
                    return match tail {
                        Some(error) => Err(error.into()),
                        None => Ok(report),
                    };
                }
                ConvResult::DestinationBufferFull => {
                    if let Err(error) = dest.grow(max_output, self.max_buffer_len) {
                        session.close();
                        return Err(error);
                    }
                    report.grow_count += 1;
                    trace!(capacity = dest.capacity(), "destination buffer grown");
                }
                ConvResult::AfterOutput => {}
                ConvResult::UndefinedConversion if options.fallback.is_some() => {
                    match self.resolve_fallback(&session, options) {
                        Some(text) if session.insert_text(&text) => {
                            trace!(bytes = text.len(), "fallback substituted");
                            report.fallback_count += 1;
                        }
                        _ => return Err(Self::fail(&mut session)),
                    }
                }
                ConvResult::InvalidByteSequence
                | ConvResult::IncompleteInput
                | ConvResult::UndefinedConversion => return Err(Self::fail(&mut session)),
            }
        }
    }

    fn resolve_fallback(
        &self,
        session: &ConversionSession,
        options: &ConversionOptions,
    ) -> Option<String> {
        let fallback = options.fallback.as_ref()?;
        let error = session.last_error()?;
        let encoding = self.catalog.resolve(&error.source_encoding);
        let ch = Character::new(&error.error_bytes, encoding.as_ref());
        fallback.resolve(&ch)
    }

    fn fail(session: &mut ConversionSession) -> Error {
        let error = session.last_error().cloned();
        session.close();
        match error {
            Some(error) => error.into(),
            None => Error::ConverterNotFound {
                from: session.source().to_string(),
                to: session.destination().to_string(),
            },
        }
    }

    /// Convert an encoded buffer, skipping the conversion when the bytes
    /// can be reused as they are
    pub fn encode(
        &self,
        buf: &EncodedBuf,
        destination: &Encoding,
        flags: ConversionFlags,
        options: &ConversionOptions,
    ) -> Result<EncodedBuf> {
        if !flags.has_decorators() {
            if buf.encoding() == destination {
                return Ok(buf.clone());
            }
            if buf.encoding().is_ascii_compatible()
                && destination.is_ascii_compatible()
                && buf.scanned_code_range() == CodeRange::SevenBit
            {
                return Ok(EncodedBuf::with_code_range(
                    buf.bytes().to_vec(),
                    destination.clone(),
                    CodeRange::SevenBit,
                ));
            }
        }

        let bytes = self.transcode(
            buf.bytes(),
            buf.encoding().name(),
            destination.name(),
            flags,
            options,
        )?;
        Ok(EncodedBuf::new(bytes, destination.clone()))
    }
}
