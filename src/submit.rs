//! Form submission of a solved code to a target's endpoint

use crate::acquire::FormReply;
use crate::error::ApiError;
use crate::target::{ResponseKind, SubmitConfig};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

/// Message used when the portal rejects a submission without saying why
const DEFAULT_FAIL_MESSAGE: &str = "Submission rejected";

/// Attachment name for PDF replies of targets that do not set one
const DEFAULT_PDF_FILENAME: &str = "result.pdf";

/// Outcome of posting a form to a target
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Success(Value),
    Fail { message: String, code: Value },
    Pdf { bytes: Vec<u8>, filename: String },
    TransportError(String),
}

impl IntoResponse for Submission {
    fn into_response(self) -> Response {
        match self {
            Submission::Success(data) => (
                StatusCode::OK,
                Json(json!({ "status": "success", "data": data })),
            )
                .into_response(),
            Submission::Fail { message, code } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "status": "fail", "message": message, "code": code })),
            )
                .into_response(),
            Submission::Pdf { bytes, filename } => (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/pdf".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename.replace('"', "")),
                    ),
                ],
                bytes,
            )
                .into_response(),
            Submission::TransportError(message) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "message": message })),
            )
                .into_response(),
        }
    }
}

/// Map the caller's identity onto the target's form fields.
///
/// Runs before the CAPTCHA is fetched, so a bad request never costs one.
pub fn check_identity(
    submit: &SubmitConfig,
    identity: &Map<String, Value>,
) -> Result<Vec<(String, String)>, ApiError> {
    submit
        .fields
        .iter()
        .map(|(key, field)| {
            identity
                .get(key)
                .and_then(form_value)
                .map(|value| (field.clone(), value))
                .ok_or_else(|| ApiError::MissingField(key.clone()))
        })
        .collect()
}

/// Build the urlencoded form: code, identity fields, static fields and the
/// scraped CSRF token
pub fn build_form(
    submit: &SubmitConfig,
    code: &str,
    identity_fields: Vec<(String, String)>,
    csrf: Option<(&str, &str)>,
) -> Vec<(String, String)> {
    let mut form = vec![(submit.code_field.clone(), code.to_string())];
    form.extend(identity_fields);

    for (field, value) in &submit.static_fields {
        form.push((field.clone(), value.clone()));
    }

    if let Some((field, token)) = csrf {
        form.push((field.to_string(), token.to_string()));
    }

    form
}

/// Identity values are posted as text; null and nested values are rejected
fn form_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Map the portal's raw reply onto a submission outcome
pub fn interpret(submit: &SubmitConfig, reply: FormReply) -> Submission {
    tracing::debug!(
        "Submit endpoint replied HTTP {} ({:?}, {} bytes)",
        reply.status,
        reply.content_type,
        reply.body.len()
    );

    match submit.response {
        ResponseKind::Json => interpret_json(reply),
        ResponseKind::Pdf => {
            let filename = submit.filename.as_deref().unwrap_or(DEFAULT_PDF_FILENAME);
            interpret_pdf(reply, filename)
        }
    }
}

fn interpret_json(reply: FormReply) -> Submission {
    let data: Value = match serde_json::from_slice(&reply.body) {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!("Submit endpoint returned non-JSON reply: {}", e);
            return Submission::Fail {
                message: format!("Unreadable reply (HTTP {})", reply.status),
                code: Value::from(reply.status),
            };
        }
    };

    if data.get("status") == Some(&Value::Bool(true)) {
        return Submission::Success(data.get("result").cloned().unwrap_or(Value::Null));
    }

    Submission::Fail {
        message: data
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FAIL_MESSAGE)
            .to_string(),
        code: data
            .get("code")
            .cloned()
            .unwrap_or_else(|| Value::from(StatusCode::UNPROCESSABLE_ENTITY.as_u16())),
    }
}

fn interpret_pdf(reply: FormReply, filename: &str) -> Submission {
    let is_pdf = reply
        .content_type
        .as_deref()
        .map(|ct| ct.starts_with("application/pdf"))
        .unwrap_or(false);

    if is_pdf && (200..300).contains(&reply.status) {
        Submission::Pdf {
            bytes: reply.body,
            filename: filename.to_string(),
        }
    } else {
        Submission::Fail {
            message: "No PDF returned, the code was probably rejected".to_string(),
            code: Value::from(reply.status),
        }
    }
}
