use serde_json::json;
use tracing::warn;

use crate::ipc::error::{backend_err, err, ok};
use crate::ipc::helpers::{apply_session, menu_json, param_str, require_backend};
use crate::ipc::types::{AppState, Request};

fn credentials(req: &Request) -> Result<(&str, &str), serde_json::Value> {
    let Some(email) = param_str(req, "email") else {
        return Err(err(&req.id, "bad_params", "missing email", None));
    };
    // Passwords are taken verbatim, surrounding spaces included.
    let Some(password) = req.params.get("password").and_then(|v| v.as_str()) else {
        return Err(err(&req.id, "bad_params", "missing password", None));
    };
    Ok((email, password))
}

async fn handle_sign_in(state: &mut AppState, req: &Request, register: bool) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let (email, password) = match credentials(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let result = if register {
        backend.sign_up(email, password).await
    } else {
        backend.sign_in(email, password).await
    };
    match result {
        Ok(user) => {
            let current = if register {
                // Signup may leave the user unconfirmed and without a session.
                match backend.current_user().await {
                    Ok(u) => u,
                    Err(e) => {
                        warn!(error = %e, "session check after signup failed");
                        None
                    }
                }
            } else {
                Some(user.clone())
            };
            apply_session(state, current);
            ok(
                &req.id,
                json!({
                    "user": user,
                    "signedIn": state.authorizer.user().is_some(),
                    "menu": menu_json(state),
                }),
            )
        }
        Err(e) => backend_err(&req.id, &e),
    }
}

async fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    match backend.current_user().await {
        Ok(user) => {
            apply_session(state, user);
            ok(&req.id, json!({ "menu": menu_json(state) }))
        }
        Err(e) => backend_err(&req.id, &e),
    }
}

async fn handle_sign_out(state: &mut AppState, req: &Request) -> serde_json::Value {
    let backend = match require_backend(state, req) {
        Ok(b) => b,
        Err(resp) => return resp,
    };
    let result = backend.sign_out().await;
    // The local role is dropped even if the collaborator could not be told.
    apply_session(state, None);
    match result {
        Ok(()) => ok(&req.id, json!({ "menu": menu_json(state) })),
        Err(e) => {
            warn!(error = %e, "remote sign out failed");
            backend_err(&req.id, &e)
        }
    }
}

fn handle_menu_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, menu_json(state))
}

pub async fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "session.signIn" => Some(handle_sign_in(state, req, false).await),
        "session.signUp" => Some(handle_sign_in(state, req, true).await),
        "session.refresh" => Some(handle_refresh(state, req).await),
        "session.signOut" => Some(handle_sign_out(state, req).await),
        "menu.get" => Some(handle_menu_get(state, req)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::backend::testing::RecordingBackend;
    use crate::config::{env_source, AppConfig};

    fn state_with(backend: RecordingBackend) -> AppState {
        let env = HashMap::from([(
            "ACTIVITYD_ADMIN_EMAILS".to_string(),
            "admin@example.com".to_string(),
        )]);
        let config = AppConfig::build(None, env_source().source(Some(env))).expect("config");
        let mut state = AppState::new(config);
        state.backend = Some(Arc::new(backend));
        state
    }

    fn req(method: &str, params: serde_json::Value) -> Request {
        Request {
            id: "1".into(),
            method: method.into(),
            params,
        }
    }

    fn credentials_for(email: &str) -> serde_json::Value {
        json!({ "email": email, "password": "secret1" })
    }

    #[tokio::test]
    async fn sign_in_role_comes_from_the_signed_in_user() {
        let mut state = state_with(RecordingBackend::new().failing_session_check());
        let sign_in = req("session.signIn", credentials_for("admin@example.com"));
        let resp = try_handle(&mut state, &sign_in).await.expect("handled");
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["signedIn"], json!(true));
        assert_eq!(resp["result"]["menu"]["role"], json!("admin"));
        assert_eq!(state.authorizer.role(), "admin");
    }

    #[tokio::test]
    async fn sign_up_without_a_confirmed_session_stays_anonymous() {
        let mut state = state_with(RecordingBackend::new().failing_session_check());
        let sign_up = req("session.signUp", credentials_for("new@example.com"));
        let resp = try_handle(&mut state, &sign_up).await.expect("handled");
        assert_eq!(resp["ok"], json!(true));
        assert_eq!(resp["result"]["signedIn"], json!(false));
        assert_eq!(state.authorizer.role(), "anonymous");
    }

    #[tokio::test]
    async fn failed_remote_sign_out_still_drops_the_role() {
        let mut state = state_with(RecordingBackend::new().failing_sign_out());
        let sign_in = req("session.signIn", credentials_for("admin@example.com"));
        let _ = try_handle(&mut state, &sign_in).await.expect("handled");
        assert_eq!(state.authorizer.role(), "admin");

        let resp = try_handle(&mut state, &req("session.signOut", json!({})))
            .await
            .expect("handled");
        assert_eq!(resp["ok"], json!(false));
        assert_eq!(resp["error"]["code"], json!("backend_failed"));
        assert_eq!(state.authorizer.role(), "anonymous");
        assert!(state.render.menu.contains("data-action=\"login\""));
        assert!(!state.render.menu.contains("data-action=\"admin\""));
    }
}
