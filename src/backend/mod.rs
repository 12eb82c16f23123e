//! Row storage and authentication collaborator.
//!
//! The admin console never talks to storage directly; everything goes through
//! [`Backend`]. `RestBackend` speaks to a hosted PostgREST/GoTrue service and
//! `SqliteBackend` keeps the same contract inside a local workspace.

mod rest;
mod sqlite;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use rest::RestBackend;
pub use sqlite::SqliteBackend;

use crate::relation::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("{0}")]
    Rejected(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("row not found: {table}/{id}")]
    NotFound { table: String, id: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl From<rusqlite::Error> for BackendError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Related table joined into a query, exposed under `alias` in each row.
#[derive(Debug, Clone, PartialEq)]
pub struct Embed {
    pub alias: String,
    pub table: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub select: Vec<String>,
    pub embeds: Vec<Embed>,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
}

impl Query {
    pub fn select(columns: &[&str]) -> Self {
        Self {
            select: columns.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn embed(mut self, alias: &str, table: &str, columns: &[&str]) -> Self {
        self.embeds.push(Embed {
            alias: alias.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Short label reported by `health`.
    fn kind(&self) -> &'static str;

    async fn current_user(&self) -> BackendResult<Option<User>>;

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<User>;

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<User>;

    async fn sign_out(&self) -> BackendResult<()>;

    async fn query_rows(&self, table: &str, query: &Query) -> BackendResult<Vec<Record>>;

    async fn insert_row(&self, table: &str, fields: Map<String, Value>) -> BackendResult<Record>;

    async fn update_row(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<()>;

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()>;
}
