//! MIME type matching and Content-Type parsing.

/// Check whether `mime_type` is covered by any entry of `list`.
///
/// Entries may be exact types, `type/*` wildcards or a bare `*`.
/// Matching is case-insensitive.
pub fn contains_mime_type<S: AsRef<str>>(list: &[S], mime_type: &str) -> bool {
    let mime_type = mime_type.to_ascii_lowercase();
    list.iter().any(|item| {
        let item = item.as_ref().to_ascii_lowercase();
        if item == "*" || item == mime_type {
            return true;
        }
        match item.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') => mime_type.starts_with(prefix),
            _ => false,
        }
    })
}

/// A parsed Content-Type header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Lowercased `type/subtype`
    pub mime_type: String,
    /// Parameters in the order they appeared, names lowercased
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a header value such as `text/plain; charset="utf-8"`.
    ///
    /// A value without a `/` falls back to `text/plain`, like mail parsers do.
    pub fn parse(value: &str) -> Self {
        let mut parts = value.split(';');
        let raw_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let mime_type = if raw_type.split('/').count() == 2 && !raw_type.starts_with('/') && !raw_type.ends_with('/') {
            raw_type
        } else {
            "text/plain".to_string()
        };

        let params = parts
            .filter_map(|param| {
                let (name, value) = param.split_once('=')?;
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() {
                    return None;
                }
                let value = value.trim().trim_matches('"').to_string();
                Some((name, value))
            })
            .collect();

        Self { mime_type, params }
    }

    /// Look up a parameter by (case-insensitive) name.
    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    /// The lowercased charset parameter, if any.
    pub fn charset(&self) -> Option<String> {
        self.param("charset").map(|c| c.to_ascii_lowercase())
    }

    /// Whether this is a `text/*` type.
    pub fn is_text(&self) -> bool {
        self.mime_type.starts_with("text/")
    }
}

/// Decode `content` using a declared charset.
///
/// Recognises UTF-8, US-ASCII and ISO-8859-1; anything else is decoded as
/// UTF-8 with replacement characters.
pub fn decode_charset(content: &[u8], charset: &str) -> String {
    match charset.to_ascii_lowercase().as_str() {
        "iso-8859-1" | "iso8859-1" | "latin1" | "latin-1" => {
            content.iter().map(|&b| char::from(b)).collect()
        },
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(content).into_owned(),
        other => {
            tracing::warn!("Unknown charset {:?}, decoding as UTF-8", other);
            String::from_utf8_lossy(content).into_owned()
        },
    }
}
