use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::{Backend, BackendError, BackendResult, Query, User};
use crate::relation::Record;

/// In-memory collaborator that records every mutation and can be told to
/// fail specific rows or tables.
#[derive(Default)]
pub struct RecordingBackend {
    pub user: Mutex<Option<User>>,
    pub tables: Mutex<HashMap<String, Vec<Record>>>,
    pub updates: Mutex<Vec<(String, String, Map<String, Value>)>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    pub failing_ids: HashSet<String>,
    pub failing_tables: HashSet<String>,
    pub update_delay: Option<Duration>,
    pub session_check_fails: bool,
    pub sign_out_fails: bool,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(email: &str) -> Self {
        let backend = Self::default();
        *backend.user.lock().expect("user lock") = Some(User {
            id: format!("user-{email}"),
            email: email.to_string(),
        });
        backend
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing_ids.insert(id.to_string());
        self
    }

    pub fn failing_table(mut self, table: &str) -> Self {
        self.failing_tables.insert(table.to_string());
        self
    }

    /// `current_user` errors, as a dropped connection would.
    pub fn failing_session_check(mut self) -> Self {
        self.session_check_fails = true;
        self
    }

    /// `sign_out` forgets the local session but reports a remote failure.
    pub fn failing_sign_out(mut self) -> Self {
        self.sign_out_fails = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.update_delay = Some(delay);
        self
    }

    pub fn with_rows(self, table: &str, rows: Vec<Value>) -> Self {
        let rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self.tables
            .lock()
            .expect("tables lock")
            .insert(table.to_string(), rows);
        self
    }

    pub fn update_count(&self) -> usize {
        self.updates.lock().expect("updates lock").len()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn current_user(&self) -> BackendResult<Option<User>> {
        if self.session_check_fails {
            return Err(BackendError::Network("connection reset".into()));
        }
        Ok(self.user.lock().expect("user lock").clone())
    }

    async fn sign_in(&self, email: &str, _password: &str) -> BackendResult<User> {
        let user = User {
            id: format!("user-{email}"),
            email: email.to_string(),
        };
        *self.user.lock().expect("user lock") = Some(user.clone());
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<User> {
        self.sign_in(email, password).await
    }

    async fn sign_out(&self) -> BackendResult<()> {
        *self.user.lock().expect("user lock") = None;
        if self.sign_out_fails {
            return Err(BackendError::Rejected("logout failed upstream".into()));
        }
        Ok(())
    }

    async fn query_rows(&self, table: &str, _query: &Query) -> BackendResult<Vec<Record>> {
        if self.failing_tables.contains(table) {
            return Err(BackendError::Rejected(format!("permission denied for {table}")));
        }
        Ok(self
            .tables
            .lock()
            .expect("tables lock")
            .get(table)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_row(&self, table: &str, fields: Map<String, Value>) -> BackendResult<Record> {
        self.tables
            .lock()
            .expect("tables lock")
            .entry(table.to_string())
            .or_default()
            .push(fields.clone());
        Ok(fields)
    }

    async fn update_row(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.update_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.updates
            .lock()
            .expect("updates lock")
            .push((table.to_string(), id.to_string(), fields));
        if self.failing_ids.contains(id) {
            return Err(BackendError::Rejected(format!("update rejected for {id}")));
        }
        Ok(())
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        if self.failing_ids.contains(id) {
            return Err(BackendError::Rejected(format!("delete rejected for {id}")));
        }
        self.deletes
            .lock()
            .expect("deletes lock")
            .push((table.to_string(), id.to_string()));
        Ok(())
    }
}
