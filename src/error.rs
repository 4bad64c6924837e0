//! Closed error taxonomy shared by both sessions.
//!
//! Every public operation either completes or fails with one of the
//! [`Error`] variants below, without mutating the session.

use thiserror::Error;

/// Failure raised by a [`crate::DataSession`] or [`crate::ModelSession`].
#[derive(Debug, Error)]
pub enum Error {
    /// A CSV buffer or a serialized model failed parsing or validation.
    #[error("upload failed: {0}")]
    Upload(#[from] IngestError),

    /// The model could not be assembled from its inputs and outputs.
    #[error("cannot create model: {0}")]
    Create(String),

    /// An operation was invoked in a forbidden state, required configuration
    /// is missing, or the backend failed a compile/fit/evaluate/predict call.
    #[error("model error: {0}")]
    Model(String),

    /// Layer construction was rejected (connection arity, backend refusal).
    #[error("layer error: {0}")]
    Layer(String),

    /// A setter rejected its argument.
    #[error("invalid setting: {0}")]
    Set(String),

    /// Nothing to delete.
    #[error("cannot delete: {0}")]
    Delete(String),

    /// Chart inputs are invalid.
    #[error("cannot plot: {0}")]
    Plot(String),
}

/// Underlying cause of an [`Error::Upload`].
#[derive(Debug, Error)]
pub enum IngestError {
    /// The buffer could not be read as CSV.
    #[error("could not parse CSV: {0}")]
    ParseCsv(String),

    /// The CSV parsed but does not describe a usable table.
    #[error("invalid data: {0}")]
    ValidateData(String),

    /// A serialized model could not be loaded or has unsupported shapes.
    #[error("invalid model: {0}")]
    Model(String),
}

/// Message-only failure reported by a [`crate::backend::ModelBackend`].
///
/// Sessions translate it into the [`Error`] variant matching the operation.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendError(pub String);

impl BackendError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse_csv<S: Into<String>>(message: S) -> Self {
        Self::Upload(IngestError::ParseCsv(message.into()))
    }

    pub(crate) fn validate_data<S: Into<String>>(message: S) -> Self {
        Self::Upload(IngestError::ValidateData(message.into()))
    }

    pub(crate) fn bad_model<S: Into<String>>(message: S) -> Self {
        Self::Upload(IngestError::Model(message.into()))
    }

    /// Stable name of the variant, used by the UI layer to pick an affordance.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Upload(_) => "UploadError",
            Self::Create(_) => "CreateError",
            Self::Model(_) => "ModelError",
            Self::Layer(_) => "LayerError",
            Self::Set(_) => "SetError",
            Self::Delete(_) => "DeleteError",
            Self::Plot(_) => "PlotError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn upload_keeps_its_cause() {
        let err = Error::parse_csv("unterminated quote");
        assert_eq!(err.kind(), "UploadError");
        assert!(err.to_string().contains("unterminated quote"));
        assert!(matches!(err.source(), Some(_)));
    }

    #[test]
    fn kinds_are_distinct() {
        let all = [
            Error::validate_data("x"),
            Error::Create("x".into()),
            Error::Model("x".into()),
            Error::Layer("x".into()),
            Error::Set("x".into()),
            Error::Delete("x".into()),
            Error::Plot("x".into()),
        ];
        let mut kinds: Vec<_> = all.iter().map(Error::kind).collect();
        kinds.dedup();
        assert_eq!(kinds.len(), all.len());
    }
}
