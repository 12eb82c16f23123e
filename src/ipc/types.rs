use std::sync::Arc;

use serde::Deserialize;

use crate::auth::{AdminPolicy, Authorizer};
use crate::backend::Backend;
use crate::config::AppConfig;
use crate::render::{self, RenderState};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: AppConfig,
    pub policy: AdminPolicy,
    pub backend: Option<Arc<dyn Backend>>,
    pub authorizer: Authorizer,
    pub render: RenderState,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let policy = AdminPolicy::new(&config.admin_emails);
        let authorizer = Authorizer::Anonymous;
        let render = render::render_menu(RenderState::default(), &authorizer);
        Self {
            config,
            policy,
            backend: None,
            authorizer,
            render,
        }
    }
}
