use std::fmt;

/// A wrapper that keeps credentials out of logs.
///
/// [`crate::Request`]'s `Debug` output wraps `Authorization` header values
/// in it, so logging a request never prints a bearer token. Debug and
/// Display always print `[REDACTED]`; the value is reachable only through
/// [`expose_secret`](Self::expose_secret).
///
/// # Examples
///
/// ```
/// use policy_gate::Secret;
///
/// let token = Secret::new("eyJhbGciOiJub25lIn0.e30.".to_string());
/// assert_eq!(format!("{:?}", token), "[REDACTED]");
/// assert!(token.expose_secret().starts_with("eyJ"));
/// ```
// Do NOT derive Clone, Copy, or Default: duplicating a secret must be explicit.
pub struct Secret<T> {
    inner: T,
}

impl<T> Secret<T> {
    /// Wraps a sensitive value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Explicitly exposes the secret value.
    ///
    /// Never pass the result to a logging macro.
    pub fn expose_secret(&self) -> &T {
        &self.inner
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
