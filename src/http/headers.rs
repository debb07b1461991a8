//! HTTP header list with case-insensitive name lookup.

/// A case-insensitive, order-preserving list of HTTP header fields.
///
/// Duplicate names are kept. Lookups return the first match, which is enough
/// for the framing headers the decoder inspects.
///
/// # Examples
///
/// ```
/// use business_processor::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Connection", "keep-alive, Upgrade");
/// headers.insert("Content-Length", "12");
///
/// assert!(headers.has_token("connection", "upgrade"));
/// assert_eq!(headers.get("content-length"), Some("12"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header list with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Returns the first value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns `true` if any entry named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns `true` if any `name` entry lists `token` in its comma-separated value.
    ///
    /// Used for `Connection` and `Transfer-Encoding`, whose values are token lists.
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.inner
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(name))
            .flat_map(|(_, v)| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
