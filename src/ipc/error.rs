use serde_json::json;

use crate::auth::AuthError;
use crate::backend::BackendError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

pub fn backend_code(e: &BackendError) -> &'static str {
    match e {
        BackendError::InvalidCredentials => "invalid_credentials",
        BackendError::NotFound { .. } => "not_found",
        BackendError::UnknownTable(_) => "bad_params",
        _ => "backend_failed",
    }
}

pub fn backend_err(id: &str, e: &BackendError) -> serde_json::Value {
    err(id, backend_code(e), e.to_string(), None)
}

pub fn auth_err(id: &str, e: &AuthError, details: Option<serde_json::Value>) -> serde_json::Value {
    err(id, e.code(), e.to_string(), details)
}
