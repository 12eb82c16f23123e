//! Admin console operations: load, delete, save grades.

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::{AuthError, Authorizer};
use crate::backend::{Backend, BackendError, Query};
use crate::reconcile::{self, Bounds, EditableField, ReconcileOutcome, Target};
use crate::relation::{resolve_related, Record, COURSE_ALIASES, STUDENT_ALIASES};
use crate::render::{Notice, Tone};

pub const STUDENTS: &str = "students";
pub const COURSES: &str = "courses";
pub const ACTIVITIES: &str = "activities";

pub const GRADE_TARGET: Target<'static> = Target {
    table: ACTIVITIES,
    column: "grade",
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub kind: String,
    pub grade: Option<f64>,
    pub image: Option<String>,
    pub created_at: Option<String>,
    pub student_name: Option<String>,
    pub course_name: Option<String>,
}

/// One block of the panel. A query failure is kept local to its section.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum Section<T> {
    Loaded { rows: Vec<T> },
    Failed { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminView {
    pub students: Section<StudentRow>,
    pub activities: Section<ActivityRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum PanelError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Error deleting student: {0}")]
    Delete(#[source] BackendError),
}

/// Text form of a scalar; numeric ids are common on hosted tables.
fn text(rec: &Record, key: &str) -> Option<String> {
    match rec.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn number(rec: &Record, key: &str) -> Option<f64> {
    match rec.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn student_row(rec: &Record) -> Option<StudentRow> {
    Some(StudentRow {
        id: text(rec, "id")?,
        name: text(rec, "name").unwrap_or_default(),
        email: text(rec, "email").unwrap_or_default(),
        phone: text(rec, "phone").filter(|p| !p.is_empty()),
    })
}

fn activity_row(rec: &Record) -> Option<ActivityRow> {
    Some(ActivityRow {
        id: text(rec, "id")?,
        title: text(rec, "title").unwrap_or_default(),
        description: text(rec, "description").filter(|d| !d.is_empty()),
        kind: text(rec, "kind").unwrap_or_default(),
        grade: number(rec, "grade"),
        image: text(rec, "image").filter(|i| !i.is_empty()),
        created_at: text(rec, "created_at"),
        student_name: resolve_related(rec, STUDENT_ALIASES).and_then(|s| text(s, "name")),
        course_name: resolve_related(rec, COURSE_ALIASES).and_then(|c| text(c, "name")),
    })
}

/// Rows without an id cannot be edited or deleted and are left out.
fn collect_rows<T>(table: &str, records: Vec<Record>, convert: fn(&Record) -> Option<T>) -> Vec<T> {
    let total = records.len();
    let rows: Vec<T> = records.iter().filter_map(convert).collect();
    if rows.len() < total {
        warn!(table, dropped = total - rows.len(), "rows without id");
    }
    rows
}

pub fn students_query() -> Query {
    Query::select(&["id", "name", "email", "phone"]).order("name", true)
}

pub fn activities_query() -> Query {
    Query::select(&[
        "id",
        "title",
        "description",
        "kind",
        "grade",
        "image",
        "created_at",
    ])
    .embed("student", STUDENTS, &["id", "name", "email"])
    .embed("course", COURSES, &["id", "name"])
    .order("created_at", false)
}

pub async fn load_view(backend: &dyn Backend) -> AdminView {
    let students = match backend.query_rows(STUDENTS, &students_query()).await {
        Ok(records) => Section::Loaded {
            rows: collect_rows(STUDENTS, records, student_row),
        },
        Err(e) => {
            warn!(error = %e, "failed to load students");
            Section::Failed {
                message: e.to_string(),
            }
        }
    };
    let activities = match backend.query_rows(ACTIVITIES, &activities_query()).await {
        Ok(records) => Section::Loaded {
            rows: collect_rows(ACTIVITIES, records, activity_row),
        },
        Err(e) => {
            warn!(error = %e, "failed to load activities");
            Section::Failed {
                message: e.to_string(),
            }
        }
    };
    AdminView {
        students,
        activities,
    }
}

pub async fn open_admin(
    backend: &dyn Backend,
    authorizer: &Authorizer,
) -> Result<AdminView, AuthError> {
    authorizer.require_admin()?;
    Ok(load_view(backend).await)
}

/// Removes a student. Whether their activities go with them is up to the
/// collaborator's foreign keys.
pub async fn delete_student(
    backend: &dyn Backend,
    authorizer: &Authorizer,
    id: &str,
) -> Result<Notice, PanelError> {
    let admin = authorizer.require_admin()?;
    backend
        .delete_row(STUDENTS, id)
        .await
        .map_err(PanelError::Delete)?;
    info!(id, by = %admin.email, "student deleted");
    Ok(Notice::new(Tone::Success, "Student deleted successfully."))
}

pub fn outcome_notice(outcome: &ReconcileOutcome) -> Notice {
    if outcome.error_count > 0 {
        Notice::new(
            Tone::Warning,
            format!(
                "Found {} errors. Some grades were not updated.",
                outcome.error_count
            ),
        )
    } else {
        Notice::new(Tone::Success, "Grades updated successfully.")
    }
}

pub async fn save_grades(
    backend: &dyn Backend,
    authorizer: &Authorizer,
    fields: &[EditableField],
    bounds: Bounds,
) -> Result<(ReconcileOutcome, Notice), AuthError> {
    let admin = authorizer.require_admin()?;
    let outcome = reconcile::reconcile(backend, GRADE_TARGET, fields, bounds).await;
    info!(
        by = %admin.email,
        updated = outcome.updated_count,
        errors = outcome.error_count,
        "grades saved"
    );
    let notice = outcome_notice(&outcome);
    Ok((outcome, notice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingBackend;
    use crate::backend::User;
    use serde_json::json;

    fn admin() -> Authorizer {
        Authorizer::AdminUser(User {
            id: "u-1".into(),
            email: "admin@example.com".into(),
        })
    }

    fn teacher() -> Authorizer {
        Authorizer::AuthenticatedUser(User {
            id: "u-2".into(),
            email: "teacher@example.com".into(),
        })
    }

    #[tokio::test]
    async fn open_admin_requires_admin_role() {
        let backend = RecordingBackend::new();
        assert_eq!(
            open_admin(&backend, &Authorizer::Anonymous).await,
            Err(AuthError::Unauthenticated)
        );
        assert_eq!(
            open_admin(&backend, &teacher()).await,
            Err(AuthError::Forbidden)
        );
    }

    #[tokio::test]
    async fn open_admin_normalizes_relations_under_any_alias() {
        let backend = RecordingBackend::new()
            .with_rows(
                STUDENTS,
                vec![
                    json!({ "id": 1, "name": "Ana", "email": "ana@example.com", "phone": "" }),
                    json!({ "name": "No id" }),
                ],
            )
            .with_rows(
                ACTIVITIES,
                vec![
                    json!({
                        "id": 10, "title": "Essay", "kind": "homework", "grade": "4.5",
                        "students": [{ "name": "Ana" }],
                        "course": { "name": "Physics" }
                    }),
                    json!({ "id": "a-2", "title": "Quiz", "kind": "quiz", "grade": null,
                            "student": null, "courses": [] }),
                ],
            );

        let view = open_admin(&backend, &admin()).await.expect("view");
        let Section::Loaded { rows: students } = &view.students else {
            panic!("students failed: {:?}", view.students);
        };
        assert_eq!(students.len(), 1);
        assert_eq!(students[0].id, "1");
        assert_eq!(students[0].phone, None);

        let Section::Loaded { rows: acts } = &view.activities else {
            panic!("activities failed: {:?}", view.activities);
        };
        assert_eq!(acts[0].id, "10");
        assert_eq!(acts[0].grade, Some(4.5));
        assert_eq!(acts[0].student_name.as_deref(), Some("Ana"));
        assert_eq!(acts[0].course_name.as_deref(), Some("Physics"));
        assert_eq!(acts[1].student_name, None);
        assert_eq!(acts[1].course_name, None);
    }

    #[tokio::test]
    async fn query_failure_is_confined_to_its_section() {
        let backend = RecordingBackend::new()
            .failing_table(STUDENTS)
            .with_rows(ACTIVITIES, vec![json!({ "id": "a-1", "title": "Essay" })]);
        let view = open_admin(&backend, &admin()).await.expect("view");
        assert!(matches!(view.students, Section::Failed { ref message } if message.contains("permission denied")));
        assert!(matches!(view.activities, Section::Loaded { ref rows } if rows.len() == 1));
    }

    #[tokio::test]
    async fn delete_student_reports_success_and_failure() {
        let backend = RecordingBackend::new().failing("s-bad");
        let notice = delete_student(&backend, &admin(), "s-1").await.expect("deleted");
        assert_eq!(notice.tone, Tone::Success);
        assert_eq!(
            backend.deletes.lock().expect("deletes").as_slice(),
            &[(STUDENTS.to_string(), "s-1".to_string())]
        );

        let err = delete_student(&backend, &admin(), "s-bad")
            .await
            .expect_err("rejected");
        assert_eq!(err.to_string(), "Error deleting student: delete rejected for s-bad");

        let err = delete_student(&backend, &teacher(), "s-1")
            .await
            .expect_err("forbidden");
        assert!(matches!(err, PanelError::Auth(AuthError::Forbidden)));
    }

    #[tokio::test]
    async fn save_grades_writes_grade_column_and_summarizes() {
        let backend = RecordingBackend::new().failing("a-2");
        let fields = vec![
            EditableField { id: "a-1".into(), original: Some(3.0), current: "4".into() },
            EditableField { id: "a-2".into(), original: Some(3.0), current: "2".into() },
        ];
        let bounds = Bounds { min: 0.0, max: 5.0 };
        let (outcome, notice) = save_grades(&backend, &admin(), &fields, bounds)
            .await
            .expect("saved");
        assert_eq!((outcome.updated_count, outcome.error_count), (1, 1));
        assert_eq!(notice.tone, Tone::Warning);
        assert_eq!(notice.text, "Found 1 errors. Some grades were not updated.");

        let updates = backend.updates.lock().expect("updates");
        assert!(updates.iter().all(|(t, _, f)| t == ACTIVITIES && f.contains_key("grade")));

        assert_eq!(
            save_grades(&backend, &Authorizer::Anonymous, &fields, bounds)
                .await
                .map(|_| ()),
            Err(AuthError::Unauthenticated)
        );
    }

    #[test]
    fn clean_outcome_reads_as_success() {
        let n = outcome_notice(&ReconcileOutcome::default());
        assert_eq!(n, Notice::new(Tone::Success, "Grades updated successfully."));
    }
}
