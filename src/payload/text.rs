//! Multilingual text and timestamps used by message metadata.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};

/// Timestamp carried in `DateTime` headers.
pub type Timestamp = DateTime<FixedOffset>;

/// Current time as a [`Timestamp`].
pub fn now() -> Timestamp {
    Utc::now().fixed_offset()
}

/// Format a timestamp as ISO-8601 with offset.
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parse an ISO-8601 timestamp (`Z` or numeric offset).
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
    DateTime::parse_from_rfc3339(value.trim()).ok()
}

/// Text with an optional language-less default and per-language translations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultilingualText {
    /// Default text (no language tag)
    pub default: Option<String>,
    /// Language tag -> translation
    pub translations: BTreeMap<String, String>,
}

impl MultilingualText {
    /// Create text with only a default value.
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: Some(default.into()),
            translations: BTreeMap::new(),
        }
    }

    /// Add a translation.
    pub fn with_translation(mut self, lang: impl Into<String>, text: impl Into<String>) -> Self {
        self.translations.insert(lang.into(), text.into());
        self
    }

    /// Translation for `lang`, falling back to the default text.
    pub fn get(&self, lang: &str) -> Option<&str> {
        self.translations
            .get(lang)
            .or(self.default.as_ref())
            .map(|s| s.as_str())
    }

    /// True when neither a default nor any translation is present.
    pub fn is_empty(&self) -> bool {
        self.default.is_none() && self.translations.is_empty()
    }
}

impl From<&str> for MultilingualText {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for MultilingualText {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for MultilingualText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.default.as_deref().unwrap_or(""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multilingual_fallback() {
        let text = MultilingualText::new("Hello").with_translation("fr", "Bonjour");
        assert_eq!(text.get("fr"), Some("Bonjour"));
        assert_eq!(text.get("de"), Some("Hello"));
        assert_eq!(text.to_string(), "Hello");
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = parse_timestamp("2024-03-01T10:15:30.250+02:00").unwrap();
        assert_eq!(parse_timestamp(&format_timestamp(&ts)), Some(ts));
        assert!(parse_timestamp("yesterday").is_none());
    }
}
