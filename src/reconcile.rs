use futures::future::join_all;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::backend::Backend;

/// A grade as the shell rendered it and as the user left it.
///
/// Inputs arrive as whatever the shell read from the page: `current` may be
/// a string, a number or null, and a blank `original` means no grade yet.
#[derive(Debug, Clone, Deserialize)]
pub struct EditableField {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub original: Option<f64>,
    #[serde(default)]
    pub current: Value,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && v >= self.min && v <= self.max
    }
}

/// Where accepted values are written: `table.column`, keyed by row id.
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    pub table: &'a str,
    pub column: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub updated_count: usize,
    pub error_count: usize,
    /// Rows whose input failed validation; the shell marks these inputs.
    pub invalid_ids: Vec<String>,
    /// Rows whose update the collaborator rejected.
    pub failed_ids: Vec<String>,
}

enum Decision {
    Skip,
    Invalid,
    Persist(f64),
}

fn decide(field: &EditableField, bounds: Bounds) -> Decision {
    let value = match &field.current {
        Value::Null => return Decision::Skip,
        Value::String(s) => {
            let raw = s.trim();
            if raw.is_empty() {
                return Decision::Skip;
            }
            match raw.parse::<f64>() {
                Ok(v) => v,
                Err(_) => return Decision::Invalid,
            }
        }
        Value::Number(n) => match n.as_f64() {
            Some(v) => v,
            None => return Decision::Invalid,
        },
        _ => return Decision::Invalid,
    };
    if field.original == Some(value) {
        return Decision::Skip;
    }
    if !bounds.contains(value) {
        return Decision::Invalid;
    }
    Decision::Persist(value)
}

/// Validates every changed field and writes the valid ones concurrently.
///
/// Fields are independent: there is no ordering between them, no retry and
/// no rollback, so a partial failure leaves the successful writes in place.
/// Callers must re-query afterwards since `original` values are now stale.
pub async fn reconcile(
    backend: &dyn Backend,
    target: Target<'_>,
    fields: &[EditableField],
    bounds: Bounds,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    let mut pending = Vec::new();

    for field in fields {
        match decide(field, bounds) {
            Decision::Skip => {}
            Decision::Invalid => {
                outcome.error_count += 1;
                outcome.invalid_ids.push(field.id.clone());
            }
            Decision::Persist(value) => pending.push((field.id.as_str(), value)),
        }
    }

    debug!(
        table = target.table,
        scheduled = pending.len(),
        invalid = outcome.invalid_ids.len(),
        "dispatching updates"
    );

    let requests = pending.iter().map(|(id, value)| {
        let mut row = Map::new();
        row.insert(target.column.to_string(), Value::from(*value));
        async move { (*id, backend.update_row(target.table, id, row).await) }
    });

    for (id, result) in join_all(requests).await {
        match result {
            Ok(()) => outcome.updated_count += 1,
            Err(e) => {
                warn!(table = target.table, id, error = %e, "update failed");
                outcome.error_count += 1;
                outcome.failed_ids.push(id.to_string());
            }
        }
    }

    outcome
}
