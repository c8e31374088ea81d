//! Error taxonomy for the generation pipeline.
//!
//! Every pipeline stage returns `Result<_, PipelineError>`. Each variant belongs to
//! exactly one [`ErrorKind`], and each kind maps to a fixed HTTP status and client-facing
//! detail message. Internal error detail is logged server-side and never leaves the process.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use std::io;
use thiserror::Error;

// =============================================================================
// ERROR KINDS
// =============================================================================

/// Classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing filename or not an `.xmi` upload
    InvalidInputFormat,
    /// Upload bytes could not be read or persisted
    IngestFailure,
    /// The generator rejected the interchange file
    IncompatibleInput,
    /// The generator failed unexpectedly (fault, panic, timeout)
    GenerationFailure,
    /// The output tree could not be zipped
    PackagingFailure,
    /// The archive could not be copied out of the workspace
    MaterializationFailure,
    /// Deleting a workspace or artifact failed. Logged only.
    CleanupFailure,
}

impl ErrorKind {
    /// HTTP status returned for this kind.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidInputFormat
            | ErrorKind::IngestFailure
            | ErrorKind::IncompatibleInput => StatusCode::BAD_REQUEST,
            ErrorKind::GenerationFailure
            | ErrorKind::PackagingFailure
            | ErrorKind::MaterializationFailure
            | ErrorKind::CleanupFailure => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Fixed `detail` message shown to the client.
    pub fn detail(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInputFormat => "Expected .xmi file!",
            ErrorKind::IngestFailure => "File upload failed",
            ErrorKind::IncompatibleInput => "Not compatible XMI format",
            ErrorKind::GenerationFailure => "Unexpected project generation failed",
            ErrorKind::PackagingFailure => "Zip creation failed",
            ErrorKind::MaterializationFailure | ErrorKind::CleanupFailure => {
                "Internal server error"
            }
        }
    }

    /// Stable label used for metrics and structured logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInputFormat => "invalid_input_format",
            ErrorKind::IngestFailure => "ingest_failure",
            ErrorKind::IncompatibleInput => "incompatible_input",
            ErrorKind::GenerationFailure => "generation_failure",
            ErrorKind::PackagingFailure => "packaging_failure",
            ErrorKind::MaterializationFailure => "materialization_failure",
            ErrorKind::CleanupFailure => "cleanup_failure",
        }
    }

    /// Whether the failure is attributable to the uploaded data rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// PIPELINE ERROR
// =============================================================================

/// Failure of one request's trip through the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("expected an .xmi upload, got filename {filename:?}")]
    InvalidInputFormat { filename: Option<String> },

    #[error("failed to persist upload: {0}")]
    IngestFailure(#[source] io::Error),

    #[error("generator rejected input: {0}")]
    IncompatibleInput(String),

    #[error("project generation failed: {0}")]
    GenerationFailure(String),

    #[error("failed to create archive: {0}")]
    PackagingFailure(#[source] zip::result::ZipError),

    #[error("failed to materialize archive: {0}")]
    MaterializationFailure(#[source] io::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInputFormat { .. } => ErrorKind::InvalidInputFormat,
            PipelineError::IngestFailure(_) => ErrorKind::IngestFailure,
            PipelineError::IncompatibleInput(_) => ErrorKind::IncompatibleInput,
            PipelineError::GenerationFailure(_) => ErrorKind::GenerationFailure,
            PipelineError::PackagingFailure(_) => ErrorKind::PackagingFailure,
            PipelineError::MaterializationFailure(_) => ErrorKind::MaterializationFailure,
        }
    }
}

/// JSON body for every error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub detail: &'static str,
}

impl IntoResponse for ErrorKind {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorBody {
                detail: self.detail(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        self.kind().into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(
            ErrorKind::InvalidInputFormat.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ErrorKind::IngestFailure.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ErrorKind::IncompatibleInput.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ErrorKind::GenerationFailure.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::PackagingFailure.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ErrorKind::MaterializationFailure.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn details_are_fixed_strings() {
        assert_eq!(ErrorKind::InvalidInputFormat.detail(), "Expected .xmi file!");
        assert_eq!(ErrorKind::IngestFailure.detail(), "File upload failed");
        assert_eq!(
            ErrorKind::IncompatibleInput.detail(),
            "Not compatible XMI format"
        );
        assert_eq!(
            ErrorKind::GenerationFailure.detail(),
            "Unexpected project generation failed"
        );
        assert_eq!(ErrorKind::PackagingFailure.detail(), "Zip creation failed");
        assert_eq!(
            ErrorKind::MaterializationFailure.detail(),
            "Internal server error"
        );
    }

    #[test]
    fn variants_map_to_kinds() {
        let err = PipelineError::InvalidInputFormat {
            filename: Some("notes.txt".into()),
        };
        assert_eq!(err.kind(), ErrorKind::InvalidInputFormat);
        assert!(err.kind().is_client_error());

        let err = PipelineError::IngestFailure(io::Error::other("boom"));
        assert_eq!(err.kind(), ErrorKind::IngestFailure);

        let err = PipelineError::GenerationFailure("exit status 1".into());
        assert_eq!(err.kind(), ErrorKind::GenerationFailure);
        assert!(!err.kind().is_client_error());

        let err = PipelineError::PackagingFailure(zip::result::ZipError::FileNotFound);
        assert_eq!(err.kind(), ErrorKind::PackagingFailure);
    }

    #[test]
    fn display_keeps_internal_detail() {
        let err = PipelineError::IncompatibleInput("missing uml:Model root".into());
        assert!(err.to_string().contains("missing uml:Model root"));
        assert_eq!(err.kind().detail(), "Not compatible XMI format");
    }
}
