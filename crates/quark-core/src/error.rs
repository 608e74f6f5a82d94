//! Error model shared by every Quark crate.
//!
//! Each layer wraps the error it receives with its own context message
//! while the kind of the innermost failure is carried upward unchanged,
//! so callers can branch on [`ErrorKind`] no matter how deep the cause.

use std::fmt;

/// Boxed cause attached to an [`Error`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for Quark operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or missing user-supplied configuration.
    Validation,
    /// A profile, member or instance lookup missed.
    NotFound,
    /// A cloud backend call failed.
    Provider,
    /// A DNS backend call failed.
    Dns,
    /// A remote command failed (network, auth, non-zero exit).
    Remote,
    /// The operation was cancelled.
    Cancelled,
    /// A single call exceeded its deadline.
    Timeout,
    /// Local I/O failed.
    Io,
    /// A document could not be parsed.
    Parse,
    /// A task panicked or an invariant was broken.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::NotFound => "not found",
            ErrorKind::Provider => "provider",
            ErrorKind::Dns => "dns",
            ErrorKind::Remote => "remote",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Io => "io",
            ErrorKind::Parse => "parse",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Quark error: kind, contextual message and optional cause.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Provider, message)
    }

    pub fn dns(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Dns, message)
    }

    pub fn remote(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Remote, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Wrap this error with a context message, keeping its kind.
    pub fn context(self, message: impl Into<String>) -> Self {
        let kind = self.kind;
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(self)),
        }
    }

    /// Kinds survive `context`, so this matches the root cause too.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// The full chain rendered as `outer: inner: root`.
    pub fn chain(&self) -> String {
        let mut out = self.message.clone();
        let mut cur: Option<&(dyn std::error::Error + 'static)> =
            self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static));
        while let Some(err) = cur {
            out.push_str(": ");
            match err.downcast_ref::<Error>() {
                Some(inner) => out.push_str(&inner.message),
                None => out.push_str(&err.to_string()),
            }
            cur = err.source();
        }
        out
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::with_source(ErrorKind::Io, "i/o failure", err)
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::with_source(ErrorKind::Parse, "invalid TOML document", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::with_source(ErrorKind::Parse, "invalid JSON document", err)
    }
}

/// Adds context to `Result`s at layer boundaries.
pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().context(message))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.into().context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn context_keeps_kind() {
        let err = Error::not_found("profile 'x' not found").context("resolving options");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "resolving options");
        assert!(err.source().is_some());
    }

    #[test]
    fn chain_renders_all_layers() {
        let r: Result<()> = Err(Error::remote("exit status 1"));
        let err = r
            .context("reading machine id")
            .with_context(|| format!("instance {}", "abc.alpha.pulcy.com"))
            .unwrap_err();
        assert_eq!(
            err.chain(),
            "instance abc.alpha.pulcy.com: reading machine id: exit status 1"
        );
        assert!(err.is(ErrorKind::Remote));
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.chain().ends_with("gone"));
    }
}
