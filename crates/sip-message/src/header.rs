//! SIP header representation and name matching
//!
//! Header names are compared case-insensitively, and the single-letter compact
//! forms defined by RFC 3261 section 7.3.3 are treated as aliases of their long
//! names, so `i` and `Call-ID` address the same header.

/// A single SIP header line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Header name as it appeared on the wire (or as set by the caller)
    pub name: String,
    /// Raw header value, trimmed of surrounding whitespace
    pub value: String,
}

impl Header {
    /// Create a new header
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Whether this header has the given name (compact forms included)
    pub fn is(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

/// Expand a compact header name to its long form, lower-cased
pub(crate) fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let expanded = match lower.as_str() {
        "i" => "call-id",
        "m" => "contact",
        "e" => "content-encoding",
        "l" => "content-length",
        "c" => "content-type",
        "f" => "from",
        "s" => "subject",
        "k" => "supported",
        "t" => "to",
        "v" => "via",
        "r" => "refer-to",
        "b" => "referred-by",
        "o" => "event",
        "u" => "allow-events",
        _ => return lower,
    };
    expanded.to_string()
}

/// Compare two header names, honouring compact forms
pub(crate) fn names_match(a: &str, b: &str) -> bool {
    canonical_name(a) == canonical_name(b)
}
