use crate::rotation::{self, Pick, Roster, RosterStudent, SelectError};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "rollcall.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Another sidecar may hold the write lock while it commits a pick.
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            name TEXT NOT NULL,
            rotation TEXT NOT NULL DEFAULT 'A',
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            exclude INTEGER NOT NULL DEFAULT 0,
            rotation TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id)",
        [],
    )?;

    Ok(conn)
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("you are not the teacher of this class")]
    Forbidden,
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl AccessError {
    pub fn code(&self) -> &'static str {
        match self {
            AccessError::NotFound(_) => "not_found",
            AccessError::Forbidden => "forbidden",
            AccessError::Select(e) => e.code(),
            AccessError::Db(_) => "db_query_failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassRow {
    pub id: String,
    pub teacher_id: String,
    pub name: String,
    pub rotation: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub name: String,
    pub exclude: bool,
    pub rotation: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

impl From<StudentRow> for RosterStudent {
    fn from(s: StudentRow) -> Self {
        RosterStudent {
            id: s.id,
            name: s.name,
            exclude: s.exclude,
            rotation: s.rotation,
        }
    }
}

fn class_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRow> {
    Ok(ClassRow {
        id: row.get(0)?,
        teacher_id: row.get(1)?,
        name: row.get(2)?,
        rotation: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    let exclude: i64 = row.get(3)?;
    Ok(StudentRow {
        id: row.get(0)?,
        class_id: row.get(1)?,
        name: row.get(2)?,
        exclude: exclude != 0,
        rotation: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Loads a class and checks it belongs to `teacher_id`.
pub fn owned_class(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
) -> Result<ClassRow, AccessError> {
    let class = conn
        .query_row(
            "SELECT id, teacher_id, name, rotation, created_at FROM classes WHERE id = ?",
            [class_id],
            class_from_row,
        )
        .optional()?
        .ok_or(AccessError::NotFound("class"))?;
    if class.teacher_id != teacher_id {
        return Err(AccessError::Forbidden);
    }
    Ok(class)
}

/// Loads a student together with its class, checking the class owner.
pub fn owned_student(
    conn: &Connection,
    teacher_id: &str,
    student_id: &str,
) -> Result<(StudentRow, ClassRow), AccessError> {
    let student = conn
        .query_row(
            "SELECT id, class_id, name, exclude, rotation, created_at, updated_at
             FROM students
             WHERE id = ?",
            [student_id],
            student_from_row,
        )
        .optional()?
        .ok_or(AccessError::NotFound("student"))?;
    let class = owned_class(conn, teacher_id, &student.class_id)?;
    Ok((student, class))
}

/// All students of a class in insertion order.
pub fn class_students(conn: &Connection, class_id: &str) -> rusqlite::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, class_id, name, exclude, rotation, created_at, updated_at
         FROM students
         WHERE class_id = ?
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map([class_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Reads one consistent roster snapshot for the engine.
pub fn load_roster(
    conn: &Connection,
    teacher_id: &str,
    class_id: &str,
) -> Result<Roster, AccessError> {
    let class = owned_class(conn, teacher_id, class_id)?;
    let students = class_students(conn, class_id)?
        .into_iter()
        .map(RosterStudent::from)
        .collect();
    Ok(Roster::new(class.id, &class.rotation, students)?)
}

/// Writes the token flips a successful pick produced.
pub fn commit_pick(conn: &Connection, class_id: &str, pick: &Pick) -> rusqlite::Result<()> {
    let ts = now_ts();
    conn.execute(
        "UPDATE students SET rotation = ?, updated_at = ? WHERE id = ? AND class_id = ?",
        (
            pick.student.rotation.as_str(),
            &ts,
            &pick.student.id,
            class_id,
        ),
    )?;
    if pick.class_flipped {
        conn.execute(
            "UPDATE classes SET rotation = ? WHERE id = ?",
            (pick.class_rotation.as_str(), class_id),
        )?;
    }
    Ok(())
}

/// Read, pick and commit as one unit under SQLite's write lock.
///
/// `BEGIN IMMEDIATE` takes the lock before the roster is read, so two
/// processes picking from the same workspace cannot both select from the
/// same pre-flip roster. Any error drops the transaction, which rolls back.
pub fn pick_for_class<R: Rng + ?Sized>(
    conn: &mut Connection,
    teacher_id: &str,
    class_id: &str,
    rng: &mut R,
) -> Result<Pick, AccessError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let roster = load_roster(&tx, teacher_id, class_id)?;
    let pick = rotation::pick_one(&roster, rng)?;
    commit_pick(&tx, class_id, &pick)?;
    tx.commit()?;
    Ok(pick)
}
