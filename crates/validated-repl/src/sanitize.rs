use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::error::SanitizeError;

// Leading whitespace/backticks, then an optional `python` marker and the
// whitespace after it. \x1c-\x1f count as whitespace, as in `str.isspace`.
static LEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[\s\x1c-\x1f`]*(?i:python)?[\s\x1c-\x1f]*").expect("leading pattern is valid")
});
static TRAILING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s\x1c-\x1f`]*$").expect("trailing pattern is valid"));

/// Example sanitizer: trims the markdown fence debris agents tend to wrap
/// code in.
///
/// Removes surrounding whitespace and backticks plus a leading,
/// case-insensitive `python` marker. This is cosmetic cleanup, not input
/// validation; it does nothing about what the code actually does.
pub fn default_sanitize_input(query: &str) -> String {
    let query = LEADING.replace(query, "");
    TRAILING.replace(&query, "").into_owned()
}

type SanitizeFn = dyn Fn(&str) -> Result<String, SanitizeError> + Send + Sync;

/// Pluggable input transformation applied before execution.
#[derive(Clone)]
pub struct Sanitizer {
    inner: Arc<SanitizeFn>,
}

impl Sanitizer {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&str) -> Result<String, SanitizeError> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }

    /// Wraps an infallible transformation.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::new(move |query| Ok(f(query)))
    }

    pub fn apply(&self, query: &str) -> Result<String, SanitizeError> {
        (self.inner)(query)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::infallible(default_sanitize_input)
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sanitizer").finish_non_exhaustive()
    }
}
