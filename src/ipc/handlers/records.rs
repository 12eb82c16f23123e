use serde_json::{json, Map, Value};

use crate::ipc::error::{auth_err, backend_err, err, ok};
use crate::ipc::helpers::{param_str, require_backend};
use crate::ipc::types::{AppState, Request};
use crate::panel::{ACTIVITIES, COURSES, STUDENTS};

/// Copies the listed params into a row, renaming camelCase keys to columns.
/// Missing optional params are left out so the store applies its defaults.
fn row_from_params(
    req: &Request,
    required: &[(&str, &str)],
    optional: &[(&str, &str)],
) -> Result<Map<String, Value>, serde_json::Value> {
    let mut row = Map::new();
    for (param, column) in required {
        let Some(v) = param_str(req, param) else {
            return Err(err(&req.id, "bad_params", format!("missing {param}"), None));
        };
        row.insert(column.to_string(), Value::String(v.to_string()));
    }
    for (param, column) in optional {
        if let Some(v) = param_str(req, param) {
            row.insert(column.to_string(), Value::String(v.to_string()));
        }
    }
    Ok(row)
}

async fn insert(
    state: &mut AppState,
    req: &Request,
    table: &str,
    row: Map<String, Value>,
) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    if let Err(e) = state.authorizer.require_user() {
        return auth_err(&req.id, &e, None);
    }
    match backend.insert_row(table, row).await {
        Ok(rec) => ok(&req.id, json!({ "row": rec })),
        Err(e) => backend_err(&req.id, &e),
    }
}

async fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let row = match row_from_params(
        req,
        &[("name", "name"), ("email", "email")],
        &[("phone", "phone")],
    ) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    insert(state, req, STUDENTS, row).await
}

async fn handle_courses_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let row = match row_from_params(req, &[("name", "name")], &[]) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    insert(state, req, COURSES, row).await
}

async fn handle_activities_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mut row = match row_from_params(
        req,
        &[("title", "title"), ("kind", "kind"), ("studentId", "student_id")],
        &[
            ("courseId", "course_id"),
            ("description", "description"),
            ("image", "image"),
            ("createdAt", "created_at"),
        ],
    ) {
        Ok(r) => r,
        Err(resp) => return resp,
    };

    match req.params.get("grade") {
        None | Some(Value::Null) => {}
        Some(v) => {
            let bounds = state.config.grade_bounds();
            match v.as_f64() {
                Some(g) if bounds.contains(g) => {
                    row.insert("grade".into(), json!(g));
                }
                _ => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("grade must be a number in [{}, {}]", bounds.min, bounds.max),
                        Some(json!({ "grade": v })),
                    )
                }
            }
        }
    }
    insert(state, req, ACTIVITIES, row).await
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req).await),
        "courses.create" => Some(handle_courses_create(state, req).await),
        "activities.create" => Some(handle_activities_create(state, req).await),
        _ => None,
    }
}
