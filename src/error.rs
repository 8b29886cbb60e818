use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::expression::EvalError;

/// Failures raised by an OCR engine
#[derive(Error, Debug)]
pub enum OcrError {
    #[error("Failed to initialize OCR engine: {0}")]
    InitializationError(String),

    #[error("Failed to recognize image: {0}")]
    ProcessingError(String),

    #[error("OCR did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Unknown OCR engine: {0}")]
    UnknownEngine(String),
}

/// Failures of a single solve invocation.
///
/// A missing expression is not an error: it is reported as a normal
/// `not_found` outcome by the solver.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Failed to download image: {0}")]
    Download(String),

    #[error(transparent)]
    Ocr(#[from] OcrError),

    #[error("Failed to evaluate expression: {0}")]
    Evaluation(#[from] EvalError),
}

impl PipelineError {
    /// Short machine-readable kind used in the result body
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Download(_) => "download",
            PipelineError::Ocr(_) => "ocr",
            PipelineError::Evaluation(_) => "evaluation",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Download(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Ocr(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Evaluation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

/// Request-level failures, raised before the pipeline runs
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing file in request")]
    MissingFile,

    #[error("Image too large (max: {max} bytes)")]
    ImageTooLarge { max: usize },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Target {target} has no submit endpoint configured")]
    SubmitNotConfigured { target: String },

    #[error("Missing identity field: {0}")]
    MissingField(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            ApiError::ImageTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "IMAGE_TOO_LARGE"),
            ApiError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            ApiError::UnknownTarget(_) => (StatusCode::NOT_FOUND, "UNKNOWN_TARGET"),
            ApiError::SubmitNotConfigured { .. } => {
                (StatusCode::NOT_FOUND, "SUBMIT_NOT_CONFIGURED")
            }
            ApiError::MissingField(_) => (StatusCode::BAD_REQUEST, "MISSING_FIELD"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
