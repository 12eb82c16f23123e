use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;

use super::{Backend, BackendError, BackendResult, Filter, Order, Query, User};
use crate::db::{self, table_def, TableDef};
use crate::relation::Record;

const MIN_PASSWORD_LEN: usize = 6;

/// Local workspace store implementing the collaborator contract on SQLite.
///
/// Statements run on the blocking pool; the connection is shared behind a
/// mutex so concurrent updates from the reconciler serialize here.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    session: Mutex<Option<User>>,
}

impl SqliteBackend {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        let conn = db::open_db(workspace)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            session: Mutex::new(None),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> BackendResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> BackendResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BackendError::Storage("connection lock poisoned".into()))?;
            f(&guard)
        })
        .await
        .map_err(|e| BackendError::Storage(e.to_string()))?
    }

    fn set_session(&self, user: Option<User>) -> BackendResult<()> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| BackendError::Storage("session lock poisoned".into()))?;
        *session = user;
        Ok(())
    }
}

fn lookup_table(name: &str) -> BackendResult<&'static TableDef> {
    table_def(name).ok_or_else(|| BackendError::UnknownTable(name.to_string()))
}

fn check_column(def: &TableDef, column: &str) -> BackendResult<()> {
    if def.has_column(column) {
        Ok(())
    } else {
        Err(BackendError::Rejected(format!(
            "column {}.{} does not exist",
            def.name, column
        )))
    }
}

fn resolve_columns(def: &TableDef, requested: &[String]) -> BackendResult<Vec<String>> {
    if requested.is_empty() || requested.iter().any(|c| c == "*") {
        return Ok(def.columns.iter().map(|c| c.to_string()).collect());
    }
    for c in requested {
        check_column(def, c)?;
    }
    Ok(requested.to_vec())
}

fn to_json(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null | ValueRef::Blob(_) => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
    }
}

fn to_sql(v: &Value) -> SqlValue {
    match v {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn select_rows(
    conn: &Connection,
    def: &TableDef,
    columns: &[String],
    filters: &[Filter],
    order: Option<&Order>,
) -> BackendResult<Vec<Record>> {
    let mut sql = format!("SELECT {} FROM {}", columns.join(", "), def.name);
    let mut binds: Vec<SqlValue> = Vec::with_capacity(filters.len());
    for (i, f) in filters.iter().enumerate() {
        let Filter::Eq(column, value) = f;
        check_column(def, column)?;
        sql.push_str(if i == 0 { " WHERE " } else { " AND " });
        sql.push_str(column);
        sql.push_str(" = ?");
        binds.push(to_sql(value));
    }
    if let Some(o) = order {
        check_column(def, &o.column)?;
        sql.push_str(&format!(
            " ORDER BY {} {}",
            o.column,
            if o.ascending { "ASC" } else { "DESC" }
        ));
    }

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            let mut rec = Map::new();
            for (i, c) in columns.iter().enumerate() {
                rec.insert(c.clone(), to_json(row.get_ref(i)?));
            }
            Ok(rec)
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

enum Join {
    /// The row holds a foreign key to the embedded table.
    ManyToOne { fk: &'static str },
    /// The embedded table holds a foreign key back to the row.
    OneToMany { back_fk: &'static str },
}

fn run_query(conn: &Connection, table: &str, query: &Query) -> BackendResult<Vec<Record>> {
    let def = lookup_table(table)?;
    let visible = resolve_columns(def, &query.select)?;
    let mut fetched = visible.clone();

    let mut joins = Vec::with_capacity(query.embeds.len());
    for embed in &query.embeds {
        let target = lookup_table(&embed.table)?;
        let columns = resolve_columns(target, &embed.columns)?;
        let join = if let Some(fk) = def.fk_to(target.name) {
            if !fetched.iter().any(|c| c == fk) {
                fetched.push(fk.to_string());
            }
            Join::ManyToOne { fk }
        } else if let Some(back_fk) = target.fk_to(def.name) {
            if !fetched.iter().any(|c| c == "id") {
                fetched.push("id".to_string());
            }
            Join::OneToMany { back_fk }
        } else {
            return Err(BackendError::Rejected(format!(
                "no relationship between {} and {}",
                def.name, target.name
            )));
        };
        joins.push((embed, target, columns, join));
    }

    let mut rows = select_rows(conn, def, &fetched, &query.filters, query.order.as_ref())?;

    for row in &mut rows {
        for (embed, target, columns, join) in &joins {
            let embedded = match join {
                Join::ManyToOne { fk } => match row.get(*fk) {
                    Some(key) if !key.is_null() => {
                        let filters = [Filter::Eq("id".into(), key.clone())];
                        select_rows(conn, target, columns, &filters, None)?
                            .into_iter()
                            .next()
                            .map(Value::Object)
                            .unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                },
                Join::OneToMany { back_fk } => {
                    let key = row.get("id").cloned().unwrap_or(Value::Null);
                    let filters = [Filter::Eq((*back_fk).into(), key)];
                    let children = select_rows(conn, target, columns, &filters, None)?;
                    Value::Array(children.into_iter().map(Value::Object).collect())
                }
            };
            row.insert(embed.alias.clone(), embedded);
        }
        row.retain(|k, _| {
            visible.iter().any(|c| c == k) || joins.iter().any(|(e, ..)| &e.alias == k)
        });
    }
    Ok(rows)
}

fn password_digest(salt: &str, password: &str) -> String {
    format!("{:x}", Sha256::digest(format!("{salt}:{password}").as_bytes()))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
impl Backend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    async fn current_user(&self) -> BackendResult<Option<User>> {
        let session = self
            .session
            .lock()
            .map_err(|_| BackendError::Storage("session lock poisoned".into()))?;
        Ok(session.clone())
    }

    async fn sign_in(&self, email: &str, password: &str) -> BackendResult<User> {
        let email = normalize_email(email);
        let password = password.to_string();
        let user = self
            .with_conn(move |conn| {
                let found: Option<(String, String, String)> = conn
                    .query_row(
                        "SELECT id, salt, password_sha256 FROM users WHERE email = ?",
                        [&email],
                        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
                    )
                    .optional()?;
                match found {
                    Some((id, salt, digest)) if password_digest(&salt, &password) == digest => {
                        Ok(User { id, email })
                    }
                    _ => Err(BackendError::InvalidCredentials),
                }
            })
            .await?;
        self.set_session(Some(user.clone()))?;
        info!(email = %user.email, "signed in to local workspace");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str) -> BackendResult<User> {
        let email = normalize_email(email);
        if email.is_empty() || !email.contains('@') {
            return Err(BackendError::Rejected("invalid email address".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(BackendError::Rejected(format!(
                "password should be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let password = password.to_string();
        let user = self
            .with_conn(move |conn| {
                let exists: Option<i64> = conn
                    .query_row("SELECT 1 FROM users WHERE email = ?", [&email], |r| r.get(0))
                    .optional()?;
                if exists.is_some() {
                    return Err(BackendError::Rejected("user already registered".into()));
                }
                let id = Uuid::new_v4().to_string();
                let salt = Uuid::new_v4().simple().to_string();
                conn.execute(
                    "INSERT INTO users(id, email, salt, password_sha256, created_at)
                     VALUES(?, ?, ?, ?, ?)",
                    (
                        &id,
                        &email,
                        &salt,
                        password_digest(&salt, &password),
                        chrono::Utc::now().to_rfc3339(),
                    ),
                )?;
                Ok(User { id, email })
            })
            .await?;
        self.set_session(Some(user.clone()))?;
        info!(email = %user.email, "registered local user");
        Ok(user)
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.set_session(None)
    }

    async fn query_rows(&self, table: &str, query: &Query) -> BackendResult<Vec<Record>> {
        debug!(table, "local query");
        let table = table.to_string();
        let query = query.clone();
        self.with_conn(move |conn| run_query(conn, &table, &query))
            .await
    }

    async fn insert_row(&self, table: &str, fields: Map<String, Value>) -> BackendResult<Record> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let def = lookup_table(&table)?;
            let mut fields = fields;
            for k in fields.keys() {
                check_column(def, k)?;
            }
            let id = match fields.get("id") {
                Some(Value::String(s)) if !s.is_empty() => s.clone(),
                _ => Uuid::new_v4().to_string(),
            };
            fields.insert("id".into(), Value::String(id.clone()));
            if def.has_column("created_at") && !fields.contains_key("created_at") {
                fields.insert(
                    "created_at".into(),
                    Value::String(chrono::Utc::now().to_rfc3339()),
                );
            }

            let columns: Vec<&String> = fields.keys().collect();
            let placeholders = std::iter::repeat("?")
                .take(columns.len())
                .collect::<Vec<_>>()
                .join(", ");
            let sql = format!(
                "INSERT INTO {}({}) VALUES({})",
                def.name,
                columns
                    .iter()
                    .map(|c| c.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                placeholders
            );
            conn.execute(&sql, params_from_iter(fields.values().map(to_sql)))?;

            run_query(conn, def.name, &Query::default().eq("id", id.clone()))?
                .into_iter()
                .next()
                .ok_or(BackendError::NotFound {
                    table: def.name.to_string(),
                    id,
                })
        })
        .await
    }

    async fn update_row(
        &self,
        table: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> BackendResult<()> {
        if fields.is_empty() {
            return Err(BackendError::Rejected("nothing to update".into()));
        }
        debug!(table, id, "local update");
        let table = table.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let def = lookup_table(&table)?;
            let mut assignments = Vec::with_capacity(fields.len());
            let mut binds: Vec<SqlValue> = Vec::with_capacity(fields.len() + 1);
            for (k, v) in &fields {
                check_column(def, k)?;
                assignments.push(format!("{k} = ?"));
                binds.push(to_sql(v));
            }
            binds.push(SqlValue::Text(id.clone()));
            let sql = format!(
                "UPDATE {} SET {} WHERE id = ?",
                def.name,
                assignments.join(", ")
            );
            let changed = conn.execute(&sql, params_from_iter(binds))?;
            if changed == 0 {
                return Err(BackendError::NotFound {
                    table: def.name.to_string(),
                    id,
                });
            }
            Ok(())
        })
        .await
    }

    async fn delete_row(&self, table: &str, id: &str) -> BackendResult<()> {
        let table = table.to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            let def = lookup_table(&table)?;
            let changed = conn.execute(&format!("DELETE FROM {} WHERE id = ?", def.name), [&id])?;
            if changed == 0 {
                return Err(BackendError::NotFound {
                    table: def.name.to_string(),
                    id,
                });
            }
            Ok(())
        })
        .await
    }
}
