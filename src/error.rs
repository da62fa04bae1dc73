//! Error types for framework operations.

use std::fmt;

use thiserror::Error;

/// Result type alias using [`FrameworkError`].
pub type Result<T> = std::result::Result<T, FrameworkError>;

/// Errors that can occur while routing and serving backend requests.
///
/// All errors implement `std::error::Error` and can be chained with `source()`.
#[derive(Debug, Error)]
pub enum FrameworkError {
    /// No path pattern matched the request path.
    #[error("unsupported path")]
    UnsupportedPath,

    /// The path matched but has no handler for the operation.
    #[error("unsupported operation")]
    UnsupportedOperation,

    /// Storage is read-only on this node.
    ///
    /// Also returned when an operation must be forwarded to the active node of
    /// a replicated cluster; hosts treat it as the forwarding signal.
    #[error("cannot write to readonly storage")]
    ReadOnly,

    /// Error with an explicit HTTP-like status code.
    #[error("{message}")]
    Coded {
        /// Status code surfaced to the host
        code: u16,
        /// Human-readable message
        message: String,
    },

    /// User-facing failure, e.g. bad input.
    #[error("{0}")]
    User(String),

    /// The request is malformed for the operation it carries.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The secret named by a renew/revoke request is not registered.
    #[error("secret is unsupported by this backend")]
    UnsupportedSecret,

    /// A raw input value could not be coerced to its field kind.
    #[error("error converting input {value} for field {field:?}: {reason}")]
    FieldConversion {
        /// Field name
        field: String,
        /// Offending input, rendered
        value: String,
        /// Underlying coercion failure
        reason: String,
    },

    /// A field was requested that the schema does not declare.
    #[error("field {0:?} not in the schema")]
    UnknownField(String),

    /// The backend definition itself is invalid (bad pattern, missing
    /// existence check, mistyped default).
    #[error("invalid backend definition: {0}")]
    InvalidBackend(String),

    /// The request context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// Storage capability failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// A WAL entry could not be rolled back.
    #[error("error rolling back {kind:?} entry: {source}")]
    Rollback {
        /// WAL entry kind
        kind: String,
        /// Underlying error
        #[source]
        source: Box<FrameworkError>,
    },

    /// Identity template failure.
    #[error(transparent)]
    Template(#[from] crate::identity_template::TemplateError),

    /// OpenAPI generation failure.
    #[error(transparent)]
    OpenApi(#[from] crate::openapi::OpenApiError),

    /// Several independent failures, e.g. from a rollback sweep.
    #[error(transparent)]
    Multiple(MultiError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other error (catch-all).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FrameworkError {
    /// Creates an error carrying an explicit status code.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultframe::FrameworkError;
    ///
    /// let err = FrameworkError::coded(401, "Feature Not Enabled");
    /// assert_eq!(err.code(), 401);
    /// assert_eq!(err.to_string(), "Feature Not Enabled");
    /// ```
    pub fn coded(code: u16, message: impl Into<String>) -> Self {
        Self::Coded {
            code,
            message: message.into(),
        }
    }

    /// Wraps the failure of a WAL rollback with the entry kind.
    pub fn rollback(kind: impl Into<String>, err: FrameworkError) -> Self {
        Self::Rollback {
            kind: kind.into(),
            source: Box::new(err),
        }
    }

    /// HTTP-like status code for this error.
    pub fn code(&self) -> u16 {
        match self {
            Self::UnsupportedPath => 404,
            Self::UnsupportedOperation => 405,
            Self::ReadOnly => 503,
            Self::Coded { code, .. } => *code,
            Self::User(_)
            | Self::InvalidRequest(_)
            | Self::UnsupportedSecret
            | Self::FieldConversion { .. } => 400,
            _ => 500,
        }
    }
}

/// An aggregate of independent errors.
///
/// Sweeps that must not stop at the first failure collect into this.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<FrameworkError>,
}

impl MultiError {
    /// Creates an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an error.
    pub fn push(&mut self, err: FrameworkError) {
        self.errors.push(err);
    }

    /// Number of collected errors.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns true when nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Collected errors in insertion order.
    pub fn errors(&self) -> &[FrameworkError] {
        &self.errors
    }

    /// `Ok(())` when empty, otherwise the aggregate as an error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FrameworkError::Multiple(self))
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.errors.len() == 1 {
            "error"
        } else {
            "errors"
        };
        writeln!(f, "{} {} occurred:", self.errors.len(), noun)?;
        for err in &self.errors {
            writeln!(f, "\t* {}", err)?;
        }
        writeln!(f)
    }
}

impl std::error::Error for MultiError {}
