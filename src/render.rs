//! HTML fragments for the shell.
//!
//! Nothing here touches a document. Each function takes the previous
//! [`RenderState`] and returns the next one; the shell swaps the fragments in.

use serde::Serialize;

use crate::auth::{AuthError, Authorizer};
use crate::panel::{ActivityRow, AdminView, Section, StudentRow};
use crate::reconcile::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub text: String,
    pub tone: Tone,
}

impl Notice {
    pub fn new(tone: Tone, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tone,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderState {
    pub menu: String,
    /// Whole admin page: heading, both sections and the message line.
    pub panel: String,
    pub students: String,
    pub activities: String,
    pub message: Option<Notice>,
    /// Grade inputs to outline as invalid.
    pub invalid_ids: Vec<String>,
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_attr(s: &str) -> String {
    s.replace('"', "&quot;").replace('\'', "&#039;")
}

pub fn render_menu(state: RenderState, authorizer: &Authorizer) -> RenderState {
    let buttons: String = authorizer
        .menu()
        .into_iter()
        .map(|a| {
            format!(
                "<button data-action=\"{}\">{}</button>",
                a.as_str(),
                escape_html(a.label())
            )
        })
        .collect();
    RenderState {
        menu: format!("<div>{buttons}</div>"),
        ..state
    }
}

/// Replaces the panel with a blocking message; no data is shown.
pub fn render_blocked(state: RenderState, err: &AuthError) -> RenderState {
    RenderState {
        panel: format!("<p>{}</p>", escape_html(&err.to_string())),
        students: String::new(),
        activities: String::new(),
        invalid_ids: Vec::new(),
        ..state
    }
}

pub fn render_notice(state: RenderState, notice: Notice) -> RenderState {
    let state = RenderState {
        message: Some(notice),
        ..state
    };
    assemble(state)
}

pub fn render_admin(state: RenderState, view: &AdminView, bounds: Bounds) -> RenderState {
    let students = students_section(&view.students);
    let activities = activities_section(&view.activities, bounds, &state.invalid_ids);
    assemble(RenderState {
        students,
        activities,
        ..state
    })
}

fn assemble(state: RenderState) -> RenderState {
    let message = match &state.message {
        Some(n) => format!(
            "<p id=\"message\" class=\"{}\">{}</p>",
            tone_class(n.tone),
            escape_html(&n.text)
        ),
        None => "<p id=\"message\"></p>".to_string(),
    };
    let panel = format!(
        "<h2>Admin Panel</h2>\
         <section id=\"panel\">\
         <div id=\"students\">{}</div>\
         <div id=\"activities\">{}</div>\
         {}\
         </section>",
        state.students, state.activities, message
    );
    RenderState { panel, ..state }
}

fn tone_class(tone: Tone) -> &'static str {
    match tone {
        Tone::Success => "success",
        Tone::Warning => "warning",
        Tone::Error => "error",
    }
}

fn students_section(section: &Section<StudentRow>) -> String {
    let rows = match section {
        Section::Failed { message } => {
            return format!(
                "<p class=\"error\">Error loading students: {}</p>",
                escape_html(message)
            )
        }
        Section::Loaded { rows } => rows,
    };
    if rows.is_empty() {
        return "<h3>Students</h3><p>No students registered.</p>".to_string();
    }
    let items: String = rows
        .iter()
        .map(|s| {
            format!(
                "<li><strong>{}</strong> ({}) - {} \
                 <button data-id=\"{}\" class=\"delete-student\">Delete</button></li>",
                escape_html(&s.name),
                escape_html(&s.email),
                escape_html(s.phone.as_deref().unwrap_or("No phone")),
                escape_attr(&s.id)
            )
        })
        .collect();
    format!("<h3>Students</h3><ul>{items}</ul>")
}

fn activities_section(
    section: &Section<ActivityRow>,
    bounds: Bounds,
    invalid_ids: &[String],
) -> String {
    let rows = match section {
        Section::Failed { message } => {
            return format!(
                "<p class=\"error\">Error loading activities: {}</p>",
                escape_html(message)
            )
        }
        Section::Loaded { rows } => rows,
    };
    if rows.is_empty() {
        return "<h3>Activities</h3><p>No activities registered.</p>".to_string();
    }
    let items: String = rows
        .iter()
        .map(|a| activity_item(a, bounds, invalid_ids.contains(&a.id)))
        .collect();
    format!(
        "<h3>Activities</h3><ul>{items}</ul>\
         <button id=\"save-grades\">Save changes</button>"
    )
}

fn activity_item(a: &ActivityRow, bounds: Bounds, invalid: bool) -> String {
    let student = a.student_name.as_deref().unwrap_or("Student not found");
    let course = a.course_name.as_deref().unwrap_or("Course not found");
    let image = match &a.image {
        Some(src) => format!(
            "<div><img src=\"{}\" alt=\"{}\"></div>",
            escape_attr(src),
            escape_attr(&a.title)
        ),
        None => String::new(),
    };
    let grade = a.grade.map(|g| g.to_string()).unwrap_or_default();
    let (class, style) = if invalid {
        ("grade-input invalid", " style=\"border:1px solid red\"")
    } else {
        ("grade-input", "")
    };
    format!(
        "<li>\
         <div><strong>{}</strong> ({})</div>\
         <div class=\"meta\">Student: {} - Course: {}</div>\
         <div>{}</div>\
         {}\
         <div>Grade: <input type=\"number\" min=\"{}\" max=\"{}\" step=\"0.1\" \
         value=\"{}\" data-id=\"{}\" class=\"{}\"{}></div>\
         </li>",
        escape_html(&a.title),
        escape_html(&a.kind),
        escape_html(student),
        escape_html(course),
        escape_html(a.description.as_deref().unwrap_or("")),
        image,
        bounds.min,
        bounds.max,
        grade,
        escape_attr(&a.id),
        class,
        style
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::User;

    const BOUNDS: Bounds = Bounds { min: 0.0, max: 5.0 };

    fn activity(id: &str, grade: Option<f64>) -> ActivityRow {
        ActivityRow {
            id: id.into(),
            title: "Lab <1>".into(),
            description: None,
            kind: "homework".into(),
            grade,
            image: Some("http://img/\"x\".png".into()),
            created_at: None,
            student_name: Some("Ana & Luis".into()),
            course_name: None,
        }
    }

    #[test]
    fn escaping_matches_shell_expectations() {
        assert_eq!(
            escape_html(r#"<a href="x">O'Neil & co</a>"#),
            "&lt;a href=&quot;x&quot;&gt;O&#039;Neil &amp; co&lt;/a&gt;"
        );
        assert_eq!(escape_attr(r#"a"b'c<d>"#), "a&quot;b&#039;c<d>");
    }

    #[test]
    fn menu_lists_actions_for_role() {
        let state = render_menu(RenderState::default(), &Authorizer::Anonymous);
        assert!(state.menu.contains("data-action=\"login\""));
        assert!(!state.menu.contains("data-action=\"admin\""));

        let admin = Authorizer::AdminUser(User {
            id: "u".into(),
            email: "a@example.com".into(),
        });
        let state = render_menu(state, &admin);
        assert!(state.menu.contains("data-action=\"admin\""));
        assert!(state.menu.contains("data-action=\"logout\""));
    }

    #[test]
    fn admin_sections_escape_text_and_mark_invalid_inputs() {
        let view = AdminView {
            students: Section::Loaded {
                rows: vec![StudentRow {
                    id: "s-1".into(),
                    name: "<script>".into(),
                    email: "ana@example.com".into(),
                    phone: None,
                }],
            },
            activities: Section::Loaded {
                rows: vec![activity("a-1", Some(4.5)), activity("a-2", None)],
            },
        };
        let state = RenderState {
            invalid_ids: vec!["a-2".into()],
            ..RenderState::default()
        };
        let state = render_admin(state, &view, BOUNDS);

        assert!(state.students.contains("&lt;script&gt;"));
        assert!(state.students.contains("No phone"));
        assert!(state.activities.contains("Lab &lt;1&gt;"));
        assert!(state.activities.contains("Ana &amp; Luis"));
        assert!(state.activities.contains("Course not found"));
        assert!(state.activities.contains("src=\"http://img/&quot;x&quot;.png\""));
        assert!(state.activities.contains("value=\"4.5\" data-id=\"a-1\" class=\"grade-input\""));
        assert!(state
            .activities
            .contains("data-id=\"a-2\" class=\"grade-input invalid\" style=\"border:1px solid red\">"));
        assert!(state.activities.contains("data-id=\"a-1\" class=\"grade-input\"></div>"));
        assert!(state.panel.contains("id=\"save-grades\""));
    }

    #[test]
    fn failed_section_does_not_hide_the_other() {
        let view = AdminView {
            students: Section::Failed {
                message: "permission denied".into(),
            },
            activities: Section::Loaded { rows: vec![] },
        };
        let state = render_admin(RenderState::default(), &view, BOUNDS);
        assert!(state.students.contains("Error loading students: permission denied"));
        assert!(state.activities.contains("No activities registered."));
        assert!(!state.panel.contains("save-grades"));
    }

    #[test]
    fn notices_and_blocking_messages() {
        let state = render_notice(
            RenderState::default(),
            Notice::new(Tone::Warning, "Found 1 errors."),
        );
        assert!(state.panel.contains("class=\"warning\">Found 1 errors.</p>"));

        let state = render_blocked(state, &AuthError::Forbidden);
        assert_eq!(
            state.panel,
            "<p>You do not have permission to access the admin panel.</p>"
        );
        assert!(state.activities.is_empty());
    }
}
