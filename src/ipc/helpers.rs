use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::auth::Authorizer;
use crate::backend::{Backend, User};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::render;

/// Trimmed, non-empty string param.
pub fn param_str<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn require_backend(
    state: &AppState,
    req: &Request,
) -> Result<Arc<dyn Backend>, serde_json::Value> {
    state.backend.clone().ok_or_else(|| {
        err(
            &req.id,
            "no_backend",
            "select a workspace or connect a backend first",
            None,
        )
    })
}

/// Decides the role for `user` and re-renders the menu for it.
pub fn apply_session(state: &mut AppState, user: Option<User>) {
    state.authorizer = Authorizer::decide(user, &state.policy);
    info!(role = state.authorizer.role(), "session changed");
    let prev = std::mem::take(&mut state.render);
    state.render = render::render_menu(prev, &state.authorizer);
}

pub fn menu_json(state: &AppState) -> serde_json::Value {
    let items: Vec<serde_json::Value> = state
        .authorizer
        .menu()
        .into_iter()
        .map(|a| json!({ "action": a, "label": a.label() }))
        .collect();
    json!({
        "role": state.authorizer.role(),
        "user": state.authorizer.user(),
        "items": items,
        "html": state.render.menu,
    })
}
