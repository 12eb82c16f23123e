use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "activity.sqlite3";

/// Columns and foreign keys of a workspace table. Queries against the local
/// store are checked against these before any SQL is built.
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    /// `(column, referenced table)`
    pub foreign_keys: &'static [(&'static str, &'static str)],
}

pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "courses",
        columns: &["id", "name", "created_at"],
        foreign_keys: &[],
    },
    TableDef {
        name: "students",
        columns: &["id", "name", "email", "phone", "created_at"],
        foreign_keys: &[],
    },
    TableDef {
        name: "activities",
        columns: &[
            "id",
            "title",
            "description",
            "kind",
            "grade",
            "image",
            "created_at",
            "student_id",
            "course_id",
        ],
        foreign_keys: &[("student_id", "students"), ("course_id", "courses")],
    },
];

pub fn table_def(name: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| t.name == name)
}

impl TableDef {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains(&column)
    }

    /// Foreign key in `self` pointing at `target`.
    pub fn fk_to(&self, target: &str) -> Option<&'static str> {
        self.foreign_keys
            .iter()
            .find(|(_, t)| *t == target)
            .map(|(c, _)| *c)
    }
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            salt TEXT NOT NULL,
            password_sha256 TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            phone TEXT,
            created_at TEXT
        )",
        [],
    )?;

    // Deleting a student removes their activities; deleting a course only
    // detaches it.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS activities(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            description TEXT,
            kind TEXT NOT NULL,
            grade REAL,
            image TEXT,
            created_at TEXT NOT NULL,
            student_id TEXT,
            course_id TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_student ON activities(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_activities_created ON activities(created_at)",
        [],
    )?;

    Ok(conn)
}
