use serde_json::json;

use crate::auth::AuthError;
use crate::ipc::error::{auth_err, err, ok};
use crate::ipc::helpers::{param_str, require_backend};
use crate::ipc::types::{AppState, Request};
use crate::panel::{self, PanelError};
use crate::reconcile::EditableField;
use crate::render::{self, Notice, RenderState, Tone};

const GRADES_SAVE_MAX_FIELDS: usize = 5000;

/// Blocks the panel and answers with the authorization failure. The blocking
/// markup travels in `details.render`.
fn blocked(state: &mut AppState, req: &Request, e: &AuthError) -> serde_json::Value {
    let prev = std::mem::take(&mut state.render);
    state.render = render::render_blocked(prev, e);
    auth_err(&req.id, e, Some(json!({ "render": state.render })))
}

/// Re-queries the collaborator and renders the panel with `message` and the
/// given invalid inputs.
async fn refresh_panel(
    state: &mut AppState,
    req: &Request,
    message: Option<Notice>,
    invalid_ids: Vec<String>,
) -> Result<serde_json::Value, serde_json::Value> {
    let backend = require_backend(state, req)?;
    let view = match panel::open_admin(backend.as_ref(), &state.authorizer).await {
        Ok(v) => v,
        Err(e) => return Err(blocked(state, req, &e)),
    };
    let prev = std::mem::take(&mut state.render);
    let next = RenderState {
        message,
        invalid_ids,
        ..prev
    };
    state.render = render::render_admin(next, &view, state.config.grade_bounds());
    Ok(json!({
        "students": view.students,
        "activities": view.activities,
        "render": state.render,
    }))
}

async fn handle_admin_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    match refresh_panel(state, req, None, Vec::new()).await {
        Ok(result) => ok(&req.id, result),
        Err(resp) => resp,
    }
}

async fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let Some(id) = param_str(req, "id") else {
        return err(&req.id, "bad_params", "missing id", None);
    };

    match panel::delete_student(backend.as_ref(), &state.authorizer, id).await {
        Ok(notice) => match refresh_panel(state, req, Some(notice), Vec::new()).await {
            Ok(mut result) => {
                result["deleted"] = json!(true);
                ok(&req.id, result)
            }
            Err(resp) => resp,
        },
        Err(PanelError::Auth(e)) => blocked(state, req, &e),
        Err(e @ PanelError::Delete(_)) => {
            let prev = std::mem::take(&mut state.render);
            state.render = render::render_notice(prev, Notice::new(Tone::Error, e.to_string()));
            err(
                &req.id,
                "backend_failed",
                e.to_string(),
                Some(json!({ "render": state.render })),
            )
        }
    }
}

fn parse_fields(req: &Request) -> Result<Vec<EditableField>, serde_json::Value> {
    let Some(raw) = req.params.get("fields").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing fields[]", None));
    };
    if raw.len() > GRADES_SAVE_MAX_FIELDS {
        return Err(err(
            &req.id,
            "bad_params",
            format!(
                "too many fields: {} > {}",
                raw.len(),
                GRADES_SAVE_MAX_FIELDS
            ),
            None,
        ));
    }

    let mut fields = Vec::with_capacity(raw.len());
    for (i, v) in raw.iter().enumerate() {
        let field: EditableField = match serde_json::from_value(v.clone()) {
            Ok(f) => f,
            Err(e) => {
                return Err(err(
                    &req.id,
                    "bad_params",
                    format!("field at index {i} is malformed: {e}"),
                    None,
                ))
            }
        };
        // Ids come from the rendered rows; never fill one in.
        if field.id.trim().is_empty() {
            return Err(err(
                &req.id,
                "bad_params",
                format!("field at index {i} has an empty id"),
                None,
            ));
        }
        fields.push(field);
    }
    Ok(fields)
}

async fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let fields = match parse_fields(req) {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    let bounds = state.config.grade_bounds();
    let (outcome, notice) =
        match panel::save_grades(backend.as_ref(), &state.authorizer, &fields, bounds).await {
            Ok(v) => v,
            Err(e) => return blocked(state, req, &e),
        };

    let message = notice.text.clone();
    let tone = notice.tone;
    match refresh_panel(state, req, Some(notice), outcome.invalid_ids.clone()).await {
        Ok(mut result) => {
            result["updatedCount"] = json!(outcome.updated_count);
            result["errorCount"] = json!(outcome.error_count);
            result["invalidIds"] = json!(outcome.invalid_ids);
            result["failedIds"] = json!(outcome.failed_ids);
            result["message"] = json!({ "text": message, "tone": tone });
            ok(&req.id, result)
        }
        Err(resp) => resp,
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.open" => Some(handle_admin_open(state, req).await),
        "students.delete" => Some(handle_students_delete(state, req).await),
        "grades.save" => Some(handle_grades_save(state, req).await),
        _ => None,
    }
}
