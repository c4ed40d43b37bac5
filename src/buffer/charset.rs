use encoding_rs::Encoding;
use tracing::warn;

use crate::error::EncodingError;

/// Encoding used when none is declared or the declared one is unusable.
pub const DEFAULT_ENCODING: &str = "ISO-8859-1";

/// Character-set lookup keyed by encoding label.
///
/// Labels are resolved with the WHATWG rules implemented by `encoding_rs`,
/// so `ISO-8859-1` maps onto `windows-1252`.
#[derive(Debug, Clone)]
pub struct CharsetRegistry {
    default: String,
}

impl Default for CharsetRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_ENCODING)
    }
}

impl CharsetRegistry {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    pub fn lookup(&self, label: &str) -> Result<&'static Encoding, EncodingError> {
        Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| EncodingError::Unsupported(label.to_string()))
    }

    /// Resolves `declared`, falling back to the default once.
    ///
    /// Fails only when the default itself cannot be resolved.
    pub fn resolve(&self, declared: Option<&str>) -> Result<&'static Encoding, EncodingError> {
        if let Some(name) = declared {
            match self.lookup(name) {
                Ok(enc) => return Ok(enc),
                Err(e) => warn!(error = %e, fallback = %self.default, "Falling back to default encoding"),
            }
        }
        self.lookup(&self.default)
    }
}

/// Extracts the `charset` parameter of a content type.
pub fn charset_of(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"'))
        } else {
            None
        }
    })
}
