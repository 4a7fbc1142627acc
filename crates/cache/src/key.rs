use std::fmt;

/// Builds colon-separated cache keys such as
/// `books:list:author=3:page=2`.
///
/// Keys for one resource share the `<resource>:` prefix, which is what
/// [`Cache::invalidate_pattern`](crate::Cache::invalidate_pattern) matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    raw: String,
}

impl CacheKey {
    pub fn new(resource: &str) -> Self {
        Self {
            raw: resource.to_string(),
        }
    }

    /// Append a bare segment.
    pub fn push(mut self, segment: impl fmt::Display) -> Self {
        self.raw.push(':');
        self.raw.push_str(&segment.to_string());
        self
    }

    /// Append `name=value`, skipping absent values so that an unset filter
    /// and a missing one share the same key.
    pub fn param<V: fmt::Display>(mut self, name: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.raw.push(':');
            self.raw.push_str(name);
            self.raw.push('=');
            self.raw.push_str(&value.to_string());
        }
        self
    }

    /// Prefix matching every key of `resource`.
    pub fn prefix(resource: &str) -> String {
        format!("{resource}:")
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}
