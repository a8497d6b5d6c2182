use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;

use content::Digest;
use tracing_error::SpanTrace;

/// What went wrong with an artifact, independent of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactErrorKind {
    /// No artifact is stored under the digest.
    NotFound,

    /// Reading or writing the backing store failed.
    ///
    /// May be transient.
    Io,

    /// The bytes offered for storage do not hash to the expected digest.
    DigestMismatch,
}

impl ArtifactErrorKind {
    /// Whether retrying the operation might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ArtifactErrorKind::Io)
    }
}

impl fmt::Display for ArtifactErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactErrorKind::NotFound => write!(f, "not found"),
            ArtifactErrorKind::Io => write!(f, "I/O error"),
            ArtifactErrorKind::DigestMismatch => write!(f, "digest mismatch"),
        }
    }
}

#[derive(Debug)]
struct ErrorTrace {
    backtrace: Backtrace,
    span_trace: SpanTrace,
}

impl ErrorTrace {
    #[track_caller]
    fn capture() -> Self {
        ErrorTrace {
            backtrace: Backtrace::capture(),
            span_trace: SpanTrace::capture(),
        }
    }
}

/// An artifact store operation failed.
///
/// Carries the driver name, the digest involved (when there is one), and the
/// span trace at the point of failure.
///
/// ```rust
/// use artifacts::{ArtifactError, ArtifactErrorKind};
///
/// let error = ArtifactError::builder(
///     "local",
///     ArtifactErrorKind::NotFound,
///     std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
/// )
/// .context("open artifact")
/// .build();
/// assert_eq!(error.kind(), ArtifactErrorKind::NotFound);
/// ```
#[derive(Debug)]
pub struct ArtifactError {
    kind: ArtifactErrorKind,
    engine: &'static str,
    digest: Option<Digest>,
    context: Option<String>,
    source: Box<dyn StdError + Send + Sync + 'static>,
    traces: Box<ErrorTrace>,
}

impl StdError for ArtifactError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

impl ArtifactError {
    /// Create an error with no extra context.
    pub fn new<E>(engine: &'static str, kind: ArtifactErrorKind, error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::builder(engine, kind, error).build()
    }

    /// Start building an error with optional context.
    pub fn builder<E>(
        engine: &'static str,
        kind: ArtifactErrorKind,
        error: E,
    ) -> ArtifactErrorBuilder
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        ArtifactErrorBuilder {
            engine,
            kind,
            source: error.into(),
            digest: None,
            context: None,
        }
    }

    /// Convert an I/O error, mapping `NotFound` to [`ArtifactErrorKind::NotFound`].
    pub fn io(engine: &'static str, digest: &Digest, error: std::io::Error) -> Self {
        let kind = match error.kind() {
            std::io::ErrorKind::NotFound => ArtifactErrorKind::NotFound,
            _ => ArtifactErrorKind::Io,
        };
        Self::builder(engine, kind, error)
            .digest(digest.clone())
            .build()
    }

    /// No artifact with this digest.
    pub fn not_found(engine: &'static str, digest: &Digest) -> Self {
        Self::builder(
            engine,
            ArtifactErrorKind::NotFound,
            format!("no artifact {digest}"),
        )
        .digest(digest.clone())
        .build()
    }

    /// The error category.
    pub fn kind(&self) -> ArtifactErrorKind {
        self.kind
    }

    /// The driver which produced the error.
    pub fn engine(&self) -> &'static str {
        self.engine
    }

    /// The digest involved, if any.
    pub fn digest(&self) -> Option<&Digest> {
        self.digest.as_ref()
    }

    /// Extra context, if any.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Whether retrying the operation might succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Backtrace captured at construction.
    pub fn backtrace(&self) -> &Backtrace {
        &self.traces.backtrace
    }

    /// Span trace captured at construction.
    pub fn span_trace(&self) -> &SpanTrace {
        &self.traces.span_trace
    }
}

impl fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "artifact error [{}] from {}", self.kind, self.engine)?;

        if let Some(digest) = &self.digest {
            write!(f, " (digest: {digest})")?;
        }

        if let Some(context) = &self.context {
            write!(f, " ({context})")?;
        }

        write!(f, ": {}", self.source)
    }
}

/// Builder for [`ArtifactError`].
#[derive(Debug)]
pub struct ArtifactErrorBuilder {
    kind: ArtifactErrorKind,
    engine: &'static str,
    source: Box<dyn StdError + Send + Sync + 'static>,
    digest: Option<Digest>,
    context: Option<String>,
}

impl ArtifactErrorBuilder {
    /// Set the digest involved.
    pub fn digest(mut self, digest: Digest) -> Self {
        self.digest = Some(digest);
        self
    }

    /// Set extra context.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Build the error, capturing traces.
    #[track_caller]
    pub fn build(self) -> ArtifactError {
        ArtifactError {
            kind: self.kind,
            engine: self.engine,
            digest: self.digest,
            context: self.context,
            source: self.source,
            traces: Box::new(ErrorTrace::capture()),
        }
    }
}
