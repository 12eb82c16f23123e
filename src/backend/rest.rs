use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{Backend, BackendError, BackendResult, Filter, Query, User};
use crate::relation::Record;

/// Client for a hosted PostgREST + GoTrue service.
pub struct RestBackend {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    session: Mutex<Option<Session>>,
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    user: User,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

impl From<AuthUser> for User {
    fn from(u: AuthUser) -> Self {
        User {
            id: u.id,
            email: u.email.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    user: AuthUser,
}

/// Signup answers with a session when email confirmation is off, and with the
/// bare user otherwise.
#[derive(Debug, Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

fn select_expr(query: &Query) -> String {
    let mut parts: Vec<String> = if query.select.is_empty() {
        vec!["*".to_string()]
    } else {
        query.select.clone()
    };
    for e in &query.embeds {
        let cols = if e.columns.is_empty() {
            "*".to_string()
        } else {
            e.columns.join(",")
        };
        parts.push(format!("{}:{}({})", e.alias, e.table, cols));
    }
    parts.join(",")
}

fn filter_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), select_expr(query))];
    for f in &query.filters {
        let Filter::Eq(column, value) = f;
        params.push((column.clone(), format!("eq.{}", filter_text(value))));
    }
    if let Some(o) = &query.order {
        let dir = if o.ascending { "asc" } else { "desc" };
        params.push(("order".to_string(), format!("{}.{}", o.column, dir)));
    }
    params
}

/// Pulls the human readable message out of a PostgREST or GoTrue error body.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let from_body = parsed.as_ref().and_then(|v| {
        ["message", "msg", "error_description", "error"]
            .iter()
            .find_map(|k| v.get(*k).and_then(|m| m.as_str()))
            .map(str::to_string)
    });
    from_body.unwrap_or_else(|| {
        if body.trim().is_empty() {
            format!("request failed with status {status}")
        } else {
            body.trim().to_string()
        }
    })
}

async fn check(resp: Response) -> BackendResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(BackendError::Rejected(error_message(status, &body)))
}

impl RestBackend {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Option<Duration>,
    ) -> BackendResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder.build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
            session: Mutex::new(None),
        })
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn auth_url(&self, endpoint: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, endpoint)
    }

    fn session(&self) -> BackendResult<Option<Session>> {
        self.session
            .lock()
            .map(|s| s.clone())
            .map_err(|_| BackendError::Storage("session lock poisoned".into()))
    }

    fn set_session(&self, session: Option<Session>) -> BackendResult<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| BackendError::Storage("session lock poisoned".into()))?;
        *guard = session;
        Ok(())
    }

    /// Row requests carry the user's token when signed in, else the API key.
    fn authed(&self, rb: RequestBuilder) -> BackendResult<RequestBuilder> {
        let token = self
            .session()?
            .map(|s| s.access_token)
            .unwrap_or_else(|| self.api_key.clone());
        Ok(rb.header("apikey", &self.api_key).bearer_auth(token))
    }

    fn by_id(id: &str) -> [(&'static str, String); 2] {
        [("id", format!("eq.{id}")), ("select", "id".to_string())]
    }
}

/// PostgREST answers a PATCH or DELETE that matched nothing (or only rows
/// hidden by row level security) with success and an empty representation.
async fn expect_affected(resp: Response, table: &str, id: &str) -> BackendResult<()> {
    let rows: Vec<Value> = check(resp).await?.json().await?;
    if rows.is_empty() {
        return Err(BackendError::NotFound {
            table: table.to_string(),
            id: id.to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl Backend for RestBackend {
    fn kind(&self) -> &'static str {
        "rest"
    }

    async fn current_user(&self) -> BackendResult<Option<User>> {
        let Some(session) = self.session()? else {
            return Ok(None);
        };
        let resp = self
            .client
            .get(self.auth_url("user"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            warn!(email = %session.user.email, "session expired");
            self.set_session(None)?;
            return Ok(None);
        }
        let user: AuthUser = check(resp).await?.json().await?;
        Ok(Some(user.into()))
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<User> {
        let resp = self
            .client
            .post(self.auth_url("token"))
            .query(&[("grant_type", "password")])
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        if resp.status() == StatusCode::BAD_REQUEST || resp.status() == StatusCode::UNAUTHORIZED {
            return Err(BackendError::InvalidCredentials);
        }
        let token: TokenResponse = check(resp).await?.json().await?;
        let user: User = token.user.into();
        self.set_session(Some(Session {
            access_token: token.access_token,
            user: user.clone(),
        }))?;
        info!(email = %user.email, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<User> {
        let resp = self
            .client
            .post(self.auth_url("signup"))
            .header("apikey", &self.api_key)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: SignUpResponse = check(resp).await?.json().await?;
        let user: User = match (body.user, body.id) {
            (Some(u), _) => u.into(),
            (None, Some(id)) => User {
                id,
                email: body.email.unwrap_or_else(|| email.to_string()),
            },
            (None, None) => {
                return Err(BackendError::Decode("signup response without user".into()))
            }
        };
        if let Some(access_token) = body.access_token {
            self.set_session(Some(Session {
                access_token,
                user: user.clone(),
            }))?;
        }
        info!(email = %user.email, "registered");
        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let Some(session) = self.session()? else {
            return Ok(());
        };
        self.set_session(None)?;
        let resp = self
            .client
            .post(self.auth_url("logout"))
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        check(resp).await?;
        Ok(())
    }

    async fn query_rows(&self, table: &str, query: &Query) -> BackendResult<Vec<Record>> {
        let params = query_params(query);
        debug!(table, ?params, "rest query");
        let rb = self.client.get(self.rest_url(table)).query(&params);
        let resp = self.authed(rb)?.send().await?;
        let rows: Vec<Record> = check(resp).await?.json().await?;
        Ok(rows)
    }

    async fn insert_row(&self, table: &str, fields: Map<String, Value>) -> BackendResult<Record> {
        let rb = self
            .client
            .post(self.rest_url(table))
            .header("Prefer", "return=representation")
            .json(&fields);
        let resp = self.authed(rb)?.send().await?;
        let rows: Vec<Record> = check(resp).await?.json().await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("insert into {table} returned no row")))
    }

    async fn update_row(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<()> {
        debug!(table, id, "rest update");
        let rb = self
            .client
            .patch(self.rest_url(table))
            .query(&Self::by_id(id))
            .header("Prefer", "return=representation")
            .json(&fields);
        let resp = self.authed(rb)?.send().await?;
        expect_affected(resp, table, id).await
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let rb = self
            .client
            .delete(self.rest_url(table))
            .query(&Self::by_id(id))
            .header("Prefer", "return=representation");
        let resp = self.authed(rb)?.send().await?;
        expect_affected(resp, table, id).await
    }
}
