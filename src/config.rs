//! Engine configuration and platform newline conventions

use serde::{Deserialize, Serialize};

use crate::flags::ConversionFlags;

/// Newline conventions of the host platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// LF line endings, no implicit text mode
    Unix,
    /// CRLF line endings written in text mode, text mode by default
    Windows,
}

impl Default for Platform {
    fn default() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

impl Platform {
    /// Decorator applied when reading in text mode
    pub fn default_newline_decorator(self) -> ConversionFlags {
        match self {
            Platform::Unix => ConversionFlags::empty(),
            Platform::Windows => ConversionFlags::UNIVERSAL_NEWLINE_DECORATOR,
        }
    }

    /// Decorator applied when writing in text mode
    pub fn write_newline_decorator(self) -> ConversionFlags {
        match self {
            Platform::Unix => ConversionFlags::empty(),
            Platform::Windows => ConversionFlags::CRLF_NEWLINE_DECORATOR,
        }
    }

    /// Whether streams are text mode unless opened binary
    pub fn default_textmode(self) -> bool {
        self == Platform::Windows
    }
}

/// Tunables shared by the registry, the engine and the negotiator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Encoding assumed for streams without one
    pub default_external: String,
    /// Encoding text is converted to on read, if any
    pub default_internal: Option<String>,
    /// Newline conventions
    pub platform: Platform,
    /// Largest destination buffer the engine may grow to
    pub max_buffer_len: usize,
    /// Extra bytes reserved on the first destination allocation
    pub initial_slack: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_external: "UTF-8".to_string(),
            default_internal: None,
            platform: Platform::default(),
            max_buffer_len: isize::MAX as usize,
            initial_slack: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.default_external, "UTF-8");
        assert_eq!(config.default_internal, None);
        assert_eq!(config.initial_slack, 30);
    }

    #[test]
    fn test_partial_json() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"platform":"windows","max_buffer_len":64}"#).unwrap();
        assert_eq!(config.platform, Platform::Windows);
        assert_eq!(config.max_buffer_len, 64);
        assert_eq!(config.default_external, "UTF-8");
    }

    #[test]
    fn test_windows_newlines() {
        assert!(Platform::Windows.default_textmode());
        assert_eq!(
            Platform::Windows.write_newline_decorator(),
            ConversionFlags::CRLF_NEWLINE_DECORATOR
        );
        assert!(Platform::Unix.default_newline_decorator().is_empty());
    }
}
