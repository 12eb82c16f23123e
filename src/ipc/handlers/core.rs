use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::backend::{Backend, RestBackend, SqliteBackend};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{apply_session, menu_json, param_str};
use crate::ipc::types::{AppState, Request};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "backend": state.backend.as_ref().map(|b| b.kind()),
            "role": state.authorizer.role(),
        }),
    )
}

async fn attach(state: &mut AppState, backend: Arc<dyn Backend>) {
    // A fresh backend may already carry a session (hosted services persist
    // them); anything else starts anonymous.
    let user = backend.current_user().await.ok().flatten();
    state.backend = Some(backend);
    apply_session(state, user);
}

async fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(path) = param_str(req, "path").map(PathBuf::from) else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match SqliteBackend::open(&path) {
        Ok(backend) => {
            info!(workspace = %path.display(), "workspace selected");
            attach(state, Arc::new(backend)).await;
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "menu": menu_json(state),
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:#}"), None),
    }
}

async fn handle_backend_connect(state: &mut AppState, req: &Request) -> serde_json::Value {
    let url = param_str(req, "url")
        .map(str::to_string)
        .or_else(|| state.config.backend.url.clone());
    let api_key = param_str(req, "apiKey")
        .map(str::to_string)
        .or_else(|| state.config.backend.api_key.clone());
    let (Some(url), Some(api_key)) = (url, api_key) else {
        return err(
            &req.id,
            "bad_params",
            "missing url/apiKey (params or backend config)",
            None,
        );
    };

    match RestBackend::new(&url, &api_key, state.config.backend.timeout()) {
        Ok(backend) => {
            info!(url = %url, "backend connected");
            attach(state, Arc::new(backend)).await;
            ok(&req.id, json!({ "url": url, "menu": menu_json(state) }))
        }
        Err(e) => err(&req.id, "backend_failed", e.to_string(), None),
    }
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req).await),
        "backend.connect" => Some(handle_backend_connect(state, req).await),
        _ => None,
    }
}
