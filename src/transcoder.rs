//! Single-step transcoders and the pipelines built from them

use std::fmt;
use std::sync::Arc;

/// Outcome of converting one unit at the front of the input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    /// The unit was converted; this many input bytes were consumed
    Converted(usize),
    /// Partial input ends inside a unit; feed more bytes and retry
    NeedMore,
    /// `error_len` bytes are invalid, then `readagain_len` bytes must be read again
    Invalid {
        /// Bytes forming the invalid sequence
        error_len: usize,
        /// Bytes examined after the error that are still input
        readagain_len: usize,
    },
    /// Final input ends inside a unit
    Incomplete {
        /// Length of the unfinished tail
        error_len: usize,
    },
    /// A valid character with no mapping in the destination
    Undefined {
        /// Length of the character in the source
        error_len: usize,
    },
}

/// One conversion step between two named encodings
///
/// Decorators are steps too: their source name is empty and their
/// destination name is the decorator name.
pub trait Transcoder: fmt::Debug + Send {
    /// Source encoding name
    fn source(&self) -> &str;

    /// Destination encoding name
    fn destination(&self) -> &str;

    /// Largest output a single unit can produce
    fn max_output(&self) -> usize;

    /// Convert the unit at the front of `input`, appending to `out`
    ///
    /// `partial` means more input may follow, so a truncated unit is
    /// [`Unit::NeedMore`] instead of [`Unit::Incomplete`].
    fn convert_unit(&mut self, input: &[u8], partial: bool, out: &mut Vec<u8>) -> Unit;

    /// Flush any held state once the input is exhausted
    fn finish(&mut self, _out: &mut Vec<u8>) {}

    /// Whether this step is a decorator
    fn is_decorator(&self) -> bool {
        false
    }
}

type Factory = dyn Fn() -> Box<dyn Transcoder> + Send + Sync;

/// A registered single-step converter, instantiated per session
#[derive(Clone)]
pub struct TranscoderEntry {
    source: String,
    destination: String,
    build: Arc<Factory>,
}

impl TranscoderEntry {
    /// Register a factory for `source` to `destination`
    pub fn new<F>(source: impl Into<String>, destination: impl Into<String>, build: F) -> Self
    where
        F: Fn() -> Box<dyn Transcoder> + Send + Sync + 'static,
    {
        Self {
            source: source.into(),
            destination: destination.into(),
            build: Arc::new(build),
        }
    }

    /// Source encoding name
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination encoding name
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Whether this entry converts `source` to `destination`, ignoring case
    pub fn matches(&self, source: &str, destination: &str) -> bool {
        self.source.eq_ignore_ascii_case(source) && self.destination.eq_ignore_ascii_case(destination)
    }

    /// Instantiate a fresh transcoder
    pub fn instantiate(&self) -> Box<dyn Transcoder> {
        (self.build)()
    }
}

impl fmt::Debug for TranscoderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranscoderEntry")
            .field("source", &self.source)
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

/// Ordered conversion steps from `source` to `destination`
///
/// An empty pipeline copies its input unchanged.
#[derive(Debug)]
pub struct Pipeline {
    source: String,
    destination: String,
    steps: Vec<Box<dyn Transcoder>>,
}

impl Pipeline {
    /// Build a pipeline from its steps
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        steps: Vec<Box<dyn Transcoder>>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            steps,
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

    /// Number of steps, decorators included
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline is a pass-through
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in order, `source:destination` for converters and the
    /// decorator name for decorators
    pub fn describe(&self) -> Vec<String> {
        self.steps
            .iter()
            .map(|step| {
                if step.is_decorator() {
                    step.destination().to_string()
                } else {
                    format!("{}:{}", step.source(), step.destination())
                }
            })
            .collect()
    }

    /// Largest output any single step can produce for one unit
    pub fn max_output(&self) -> usize {
        self.steps
            .iter()
            .map(|step| step.max_output())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    pub(crate) fn into_steps(self) -> (String, String, Vec<Box<dyn Transcoder>>) {
        (self.source, self.destination, self.steps)
    }
}
