//! `application/im-iscomposing+xml` documents.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <isComposing xmlns="urn:ietf:params:xml:ns:im-iscomposing">
//!   <state>active</state>
//!   <lastactive>2024-03-01T10:15:30Z</lastactive>
//!   <contenttype>text</contenttype>
//!   <refresh>60</refresh>
//! </isComposing>
//! ```

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use thiserror::Error;

use super::text::{format_timestamp, parse_timestamp, Timestamp};

/// Content-Type of composing indications.
pub const COMPOSING_CONTENT_TYPE: &str = "application/im-iscomposing+xml";

/// Refresh interval assumed when a document carries none.
pub const DEFAULT_REFRESH: u32 = 120;

const NAMESPACE: &str = "urn:ietf:params:xml:ns:im-iscomposing";

lazy_static! {
    static ref ROOT_RE: Regex =
        Regex::new(r"(?s)<(?:\w+:)?isComposing\b[^>]*>(.*)</(?:\w+:)?isComposing\s*>").expect("root pattern is valid");
    static ref ELEMENT_RE: Regex =
        Regex::new(r"(?s)<(?:\w+:)?(state|lastactive|contenttype|refresh)\s*>\s*(.*?)\s*</").expect("element pattern is valid");
}

/// Composing document errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComposingParseError {
    /// No `isComposing` root element.
    #[error("Not an isComposing document")]
    MissingRoot,

    /// The mandatory `state` element is absent.
    #[error("isComposing document has no state")]
    MissingState,

    /// An element has a value outside its grammar.
    #[error("Invalid {element} value: {value:?}")]
    InvalidValue {
        /// Element name
        element: &'static str,
        /// Offending text
        value: String,
    },
}

/// Composing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComposingState {
    /// User is typing
    Active,
    /// User stopped typing
    Idle,
}

impl ComposingState {
    /// Wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            ComposingState::Active => "active",
            ComposingState::Idle => "idle",
        }
    }
}

impl fmt::Display for ComposingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComposingState {
    type Err = ComposingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ComposingState::Active),
            "idle" => Ok(ComposingState::Idle),
            other => Err(ComposingParseError::InvalidValue {
                element: "state",
                value: other.to_string(),
            }),
        }
    }
}

/// A composing indication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsComposingDocument {
    /// Active or idle
    pub state: ComposingState,
    /// When the user was last active
    pub last_active: Option<Timestamp>,
    /// Kind of content being composed (`text`, `audio`, ...)
    pub content_type: Option<String>,
    /// Seconds until the indication expires
    pub refresh: Option<u32>,
}

impl IsComposingDocument {
    /// Build a document.
    pub fn new(state: ComposingState) -> Self {
        Self {
            state,
            last_active: None,
            content_type: None,
            refresh: None,
        }
    }

    /// Refresh interval, defaulting to [`DEFAULT_REFRESH`].
    pub fn refresh_or_default(&self) -> u32 {
        self.refresh.unwrap_or(DEFAULT_REFRESH)
    }

    /// Serialize to XML.
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!("<isComposing xmlns=\"{}\">\n", NAMESPACE));
        xml.push_str(&format!("  <state>{}</state>\n", self.state));
        if let Some(last_active) = &self.last_active {
            xml.push_str(&format!("  <lastactive>{}</lastactive>\n", format_timestamp(last_active)));
        }
        if let Some(content_type) = &self.content_type {
            xml.push_str(&format!("  <contenttype>{}</contenttype>\n", xml_escape(content_type)));
        }
        if let Some(refresh) = self.refresh {
            xml.push_str(&format!("  <refresh>{}</refresh>\n", refresh));
        }
        xml.push_str("</isComposing>\n");
        xml
    }

    /// Parse an XML document.
    pub fn parse(xml: &str) -> Result<Self, ComposingParseError> {
        let body = ROOT_RE
            .captures(xml)
            .and_then(|caps| caps.get(1))
            .ok_or(ComposingParseError::MissingRoot)?
            .as_str();

        let mut state = None;
        let mut document = Self::new(ComposingState::Idle);

        for caps in ELEMENT_RE.captures_iter(body) {
            let value = &caps[2];
            match &caps[1] {
                "state" => state = Some(value.parse::<ComposingState>()?),
                "lastactive" => {
                    document.last_active = Some(parse_timestamp(value).ok_or_else(|| {
                        ComposingParseError::InvalidValue {
                            element: "lastactive",
                            value: value.to_string(),
                        }
                    })?);
                },
                "contenttype" => document.content_type = Some(xml_unescape(value)),
                "refresh" => {
                    let refresh = value
                        .parse::<u32>()
                        .ok()
                        .filter(|r| *r > 0)
                        .ok_or_else(|| ComposingParseError::InvalidValue {
                            element: "refresh",
                            value: value.to_string(),
                        })?;
                    document.refresh = Some(refresh);
                },
                _ => {},
            }
        }

        document.state = state.ok_or(ComposingParseError::MissingState)?;
        Ok(document)
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
