//! Error types for the Hemmer Provider Framework.
//!
//! Errors inside the framework are typed values from this module. They are
//! converted into [`Diagnostics`](crate::diag::Diagnostics) at the RPC
//! boundary by [`ProviderServer`](crate::server::ProviderServer).

use thiserror::Error;

use crate::diag::Diagnostic;
use crate::path::Path;

/// Errors returned by provider implementations from lifecycle handlers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested resource was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal framework error occurred.
    #[error("Framework error: {0}")]
    Framework(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The request was cancelled by a Stop call.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl ProviderError {
    /// Get the error message as a string.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) => msg,
            Self::Validation(msg) => msg,
            Self::Framework(msg) => msg,
            Self::Configuration(msg) => msg,
            Self::UnknownResource(msg) => msg,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::AlreadyExists(msg) => msg,
            Self::PermissionDenied(msg) => msg,
            Self::ResourceExhausted(msg) => msg,
            Self::Unavailable(msg) => msg,
            Self::DeadlineExceeded(msg) => msg,
            Self::FailedPrecondition(msg) => msg,
            Self::Unimplemented(msg) => msg,
            Self::InvalidRequest(msg) => msg,
            Self::Cancelled(msg) => msg,
        }
    }

    /// Convert into an error diagnostic using the display form as summary.
    pub fn to_diagnostic(&self) -> Diagnostic {
        Diagnostic::error(self.to_string())
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Framework(msg) => tonic::Status::internal(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            ProviderError::Unavailable(msg) => tonic::Status::unavailable(msg),
            ProviderError::DeadlineExceeded(msg) => tonic::Status::deadline_exceeded(msg),
            ProviderError::FailedPrecondition(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
            ProviderError::InvalidRequest(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Cancelled(msg) => tonic::Status::cancelled(msg),
        }
    }
}

/// A single path step could not be applied to a type, value or schema node.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathStepError {
    /// The kind of step does not apply to this node at all.
    #[error("cannot apply AttributePathStep {step} to {target}")]
    Inapplicable {
        /// Kind of step, e.g. `ElementKeyInt`.
        step: &'static str,
        /// What the step was applied to.
        target: String,
    },

    /// An attribute name step named an attribute that does not exist.
    #[error("could not find attribute {name:?} in {target}")]
    AttributeNotFound {
        /// The missing attribute name.
        name: String,
        /// What was searched.
        target: String,
    },

    /// An element step addressed an element that does not exist.
    #[error("no element {step} in {target}")]
    ElementNotFound {
        /// The rendered step.
        step: String,
        /// What was searched.
        target: String,
    },

    /// Steps cannot descend into null or unknown values.
    #[error("cannot apply {step} to a {state} value")]
    NotKnown {
        /// The rendered step.
        step: String,
        /// `null` or `unknown`.
        state: &'static str,
    },
}

/// Walking a path stopped before all steps were consumed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{} still remains in the path: {source}", .remaining.step_list())]
pub struct WalkError {
    /// The steps that were not consumed, starting with the failing one.
    pub remaining: Path,
    /// Why the first remaining step failed.
    pub source: PathStepError,
}

/// Errors resolving a schema path to an attribute or type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaPathError {
    /// The path could not be walked.
    #[error(transparent)]
    Walk(#[from] WalkError),

    /// The path continues into an attribute that has no nested schema.
    #[error(
        "path leads to element or attribute of an attribute that has no schema associated with it"
    )]
    InsideAtomicAttribute,

    /// The path ended on something that is not an attribute.
    #[error("got unexpected type {0}")]
    NotAnAttribute(&'static str),
}

impl SchemaPathError {
    /// Convert into the boundary diagnostic for a failed schema lookup.
    pub fn to_diagnostic(&self, path: &Path) -> Diagnostic {
        Diagnostic::error("Invalid Schema Path")
            .with_detail(format!(
                "When attempting to get the framework attribute associated with a schema path, \
                 an unexpected error was returned. This is always an issue with the provider. \
                 Please report this to the provider developers.\n\nPath: {}\nOriginal Error: {}",
                path, self
            ))
            .with_path(path.clone())
    }
}

/// A value could not be converted between representations.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionError {
    /// Where in the value the problem occurred, if known.
    pub path: Option<Path>,
    /// What went wrong.
    pub message: String,
}

impl ConversionError {
    /// Create an error without a location.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            path: None,
            message: message.into(),
        }
    }

    /// Create an error at a location.
    pub fn at(path: Path, message: impl Into<String>) -> Self {
        Self {
            path: Some(path),
            message: message.into(),
        }
    }

    /// Attach a location unless one is already present.
    pub fn or_at(mut self, path: &Path) -> Self {
        if self.path.is_none() {
            self.path = Some(path.clone());
        }
        self
    }

    /// Convert into an error diagnostic with the given summary.
    pub fn to_diagnostic(&self, summary: &str) -> Diagnostic {
        let diag = Diagnostic::error(summary).with_detail(self.to_string());
        match &self.path {
            Some(path) => diag.with_path(path.clone()),
            None => diag,
        }
    }
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.path {
            Some(path) if !path.is_empty() => write!(f, "{}: {}", path, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for ConversionError {}

impl From<serde_json::Error> for ConversionError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("error decoding JSON: {}", err))
    }
}

/// An apply request matched zero or several lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error(
    "Request matched unexpected number of methods: (create: {create}, update: {update}, delete: {delete})"
)]
pub struct ClassificationError {
    /// Prior state was null.
    pub create: bool,
    /// Neither state was null.
    pub update: bool,
    /// Planned state was null.
    pub delete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProviderError::NotFound("resource-123".to_string());
        assert_eq!(err.to_string(), "Resource not found: resource-123");

        let err = ProviderError::Cancelled("stop requested".to_string());
        assert_eq!(err.to_string(), "Cancelled: stop requested");
        assert_eq!(err.message(), "stop requested");
    }

    #[test]
    fn test_error_to_status() {
        let status: tonic::Status = ProviderError::NotFound("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::NotFound);

        let status: tonic::Status = ProviderError::Validation("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status: tonic::Status = ProviderError::Framework("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Internal);

        let status: tonic::Status = ProviderError::Cancelled("test".to_string()).into();
        assert_eq!(status.code(), tonic::Code::Cancelled);
    }

    #[test]
    fn test_walk_error_display() {
        let err = WalkError {
            remaining: Path::empty().at_list_index(1).at_name("name"),
            source: PathStepError::Inapplicable {
                step: "ElementKeyInt",
                target: "schema".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "ElementKeyInt(1).AttributeName(\"name\") still remains in the path: \
             cannot apply AttributePathStep ElementKeyInt to schema"
        );
    }

    #[test]
    fn test_classification_error_display() {
        let err = ClassificationError {
            create: true,
            update: false,
            delete: true,
        };
        assert_eq!(
            err.to_string(),
            "Request matched unexpected number of methods: (create: true, update: false, delete: true)"
        );
    }

    #[test]
    fn test_conversion_error_location() {
        let err = ConversionError::new("expected string").or_at(&Path::root("name"));
        assert_eq!(err.to_string(), "name: expected string");

        let err = ConversionError::new("bad root");
        assert_eq!(err.to_string(), "bad root");
    }
}
