use crate::calc::Category;
use crate::reconcile::Directory;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

pub const DB_FILE: &str = "rollbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            teacher TEXT,
            subject TEXT,
            grade_level TEXT,
            exam_type TEXT
        )",
        [],
    )?;
    ensure_courses_profile_columns(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS staff(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(course_id, student_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_course_sort ON enrollments(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            date TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_course ON assessments(course_id)",
        [],
    )?;

    Ok(conn)
}

// Registries written before course profiles only have name and teacher.
fn ensure_courses_profile_columns(conn: &Connection) -> anyhow::Result<()> {
    for column in ["subject", "grade_level", "exam_type"] {
        if !table_has_column(conn, "courses", column)? {
            conn.execute(&format!("ALTER TABLE courses ADD COLUMN {} TEXT", column), [])?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Descriptive fields of a course; everything except the ID.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProfile {
    pub name: String,
    pub teacher: Option<String>,
    pub subject: Option<String>,
    pub grade_level: Option<String>,
    pub exam_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRow {
    pub id: String,
    #[serde(flatten)]
    pub profile: CourseProfile,
    pub student_count: i64,
    pub assessment_count: i64,
}

const COURSE_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.teacher,
       c.subject,
       c.grade_level,
       c.exam_type,
       (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id),
       (SELECT COUNT(*) FROM assessments a WHERE a.course_id = c.id)
     FROM courses c";

fn course_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<CourseRow> {
    Ok(CourseRow {
        id: r.get(0)?,
        profile: CourseProfile {
            name: r.get(1)?,
            teacher: r.get(2)?,
            subject: r.get(3)?,
            grade_level: r.get(4)?,
            exam_type: r.get(5)?,
        },
        student_count: r.get(6)?,
        assessment_count: r.get(7)?,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
}

impl StudentRow {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffRow {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentRow {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub category: Category,
    pub date: Option<String>,
}

fn category_from_tag(tag: &str) -> Category {
    if tag.eq_ignore_ascii_case("E") {
        Category::Exam
    } else {
        Category::Test
    }
}

pub fn courses_list(conn: &Connection) -> anyhow::Result<Vec<CourseRow>> {
    // Correlated subqueries avoid double-counting from joins.
    let mut stmt = conn.prepare(&format!("{} ORDER BY c.id", COURSE_SELECT))?;
    let rows = stmt
        .query_map([], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn course_get(conn: &Connection, course_id: &str) -> anyhow::Result<Option<CourseRow>> {
    let row = conn
        .query_row(
            &format!("{} WHERE c.id = ?", COURSE_SELECT),
            [course_id],
            course_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn course_insert(
    conn: &Connection,
    course_id: &str,
    profile: &CourseProfile,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO courses(id, name, teacher, subject, grade_level, exam_type)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            course_id,
            &profile.name,
            &profile.teacher,
            &profile.subject,
            &profile.grade_level,
            &profile.exam_type,
        ),
    )?;
    Ok(())
}

/// Rewrites a course's profile and, when `new_id` differs, moves the course
/// with its enrollments and assessments to the new ID in one transaction.
pub fn course_update(
    conn: &Connection,
    course_id: &str,
    new_id: &str,
    profile: &CourseProfile,
) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let changed = if new_id == course_id {
        tx.execute(
            "UPDATE courses SET name = ?, teacher = ?, subject = ?, grade_level = ?, exam_type = ?
             WHERE id = ?",
            (
                &profile.name,
                &profile.teacher,
                &profile.subject,
                &profile.grade_level,
                &profile.exam_type,
                course_id,
            ),
        )?
    } else {
        // Children reference courses(id) without ON UPDATE CASCADE.
        course_insert(&tx, new_id, profile)?;
        tx.execute(
            "UPDATE enrollments SET course_id = ? WHERE course_id = ?",
            (new_id, course_id),
        )?;
        tx.execute(
            "UPDATE assessments SET course_id = ? WHERE course_id = ?",
            (new_id, course_id),
        )?;
        tx.execute("DELETE FROM courses WHERE id = ?", [course_id])?
    };
    if changed == 0 {
        // Dropping the transaction rolls back the inserted row.
        return Ok(false);
    }
    tx.commit()?;
    Ok(true)
}

/// Deletes a course and everything that references it.
pub fn course_delete(conn: &Connection, course_id: &str) -> anyhow::Result<bool> {
    let tx = conn.unchecked_transaction()?;
    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute("DELETE FROM assessments WHERE course_id = ?", [course_id])?;
    tx.execute("DELETE FROM enrollments WHERE course_id = ?", [course_id])?;
    let changed = tx.execute("DELETE FROM courses WHERE id = ?", [course_id])?;
    tx.commit()?;
    Ok(changed > 0)
}

pub fn student_insert(
    conn: &Connection,
    student_id: &str,
    first_name: &str,
    last_name: &str,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(id, first_name, last_name) VALUES(?, ?, ?)",
        (student_id, first_name, last_name),
    )?;
    Ok(())
}

pub fn students_list(conn: &Connection) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt =
        conn.prepare("SELECT id, first_name, last_name FROM students ORDER BY last_name, first_name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_get(conn: &Connection, student_id: &str) -> anyhow::Result<Option<StudentRow>> {
    let row = conn
        .query_row(
            "SELECT id, first_name, last_name FROM students WHERE id = ?",
            [student_id],
            |r| {
                Ok(StudentRow {
                    id: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn staff_insert(conn: &Connection, staff_id: &str, name: &str) -> anyhow::Result<()> {
    conn.execute("INSERT INTO staff(id, name) VALUES(?, ?)", (staff_id, name))?;
    Ok(())
}

pub fn staff_list(conn: &Connection) -> anyhow::Result<Vec<StaffRow>> {
    let mut stmt = conn.prepare("SELECT id, name FROM staff ORDER BY name, id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(StaffRow {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn id_set(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> anyhow::Result<HashSet<String>> {
    let mut stmt = conn.prepare(sql)?;
    let ids = stmt
        .query_map(params, |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub fn student_ids(conn: &Connection) -> anyhow::Result<HashSet<String>> {
    id_set(conn, "SELECT id FROM students", &[])
}

pub fn staff_ids(conn: &Connection) -> anyhow::Result<HashSet<String>> {
    id_set(conn, "SELECT id FROM staff", &[])
}

/// Every assessment ID of one category, across all courses.
pub fn assessment_ids(conn: &Connection, category: Category) -> anyhow::Result<HashSet<String>> {
    let tag = category.tag().to_string();
    id_set(conn, "SELECT id FROM assessments WHERE category = ?", &[&tag])
}

/// Enrolls students in order, skipping ones already enrolled. Returns the
/// newly enrolled `(id, display name)` pairs and the IDs that are not known students.
pub fn enroll(
    conn: &Connection,
    course_id: &str,
    student_ids: &[String],
) -> anyhow::Result<(Vec<(String, String)>, Vec<String>)> {
    let tx = conn.unchecked_transaction()?;
    let mut next: i64 = tx.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM enrollments WHERE course_id = ?",
        [course_id],
        |r| r.get(0),
    )?;
    let mut added = Vec::new();
    let mut unknown = Vec::new();
    for sid in student_ids {
        let Some(student) = student_get(&tx, sid)? else {
            unknown.push(sid.clone());
            continue;
        };
        let changed = tx.execute(
            "INSERT OR IGNORE INTO enrollments(course_id, student_id, sort_order) VALUES(?, ?, ?)",
            (course_id, sid, next),
        )?;
        if changed > 0 {
            next += 1;
            added.push((student.id.clone(), student.display_name()));
        }
    }
    tx.commit()?;
    Ok((added, unknown))
}

pub fn unenroll(conn: &Connection, course_id: &str, student_ids: &[String]) -> anyhow::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut removed = 0;
    for sid in student_ids {
        removed += tx.execute(
            "DELETE FROM enrollments WHERE course_id = ? AND student_id = ?",
            (course_id, sid),
        )?;
    }
    tx.commit()?;
    Ok(removed)
}

pub fn roster(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<StudentRow>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.first_name, s.last_name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY e.sort_order",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(StudentRow {
                id: r.get(0)?,
                first_name: r.get(1)?,
                last_name: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn assessment_insert(conn: &Connection, a: &AssessmentRow) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO assessments(id, course_id, name, category, date) VALUES(?, ?, ?, ?, ?)",
        (
            &a.id,
            &a.course_id,
            &a.name,
            a.category.tag().to_string(),
            &a.date,
        ),
    )?;
    Ok(())
}

fn assessment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AssessmentRow> {
    let tag: String = r.get(3)?;
    Ok(AssessmentRow {
        id: r.get(0)?,
        course_id: r.get(1)?,
        name: r.get(2)?,
        category: category_from_tag(&tag),
        date: r.get(4)?,
    })
}

pub fn assessment_get(conn: &Connection, assessment_id: &str) -> anyhow::Result<Option<AssessmentRow>> {
    let row = conn
        .query_row(
            "SELECT id, course_id, name, category, date FROM assessments WHERE id = ?",
            [assessment_id],
            assessment_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn assessments_for_course(conn: &Connection, course_id: &str) -> anyhow::Result<Vec<AssessmentRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, course_id, name, category, date FROM assessments
         WHERE course_id = ?
         ORDER BY COALESCE(date, ''), id",
    )?;
    let rows = stmt
        .query_map([course_id], assessment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn assessment_update(
    conn: &Connection,
    assessment_id: &str,
    name: &str,
    date: Option<&str>,
) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE assessments SET name = ?, date = ? WHERE id = ?",
        (name, date, assessment_id),
    )?;
    Ok(changed > 0)
}

pub fn assessment_delete(conn: &Connection, assessment_id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM assessments WHERE id = ?", [assessment_id])?;
    Ok(changed > 0)
}

/// Student display names for rows invented during reconciliation.
pub struct StudentDirectory<'a>(pub &'a Connection);

impl Directory for StudentDirectory<'_> {
    fn display_name(&self, id: &str) -> Option<String> {
        match student_get(self.0, id) {
            Ok(found) => found.map(|s| s.display_name()),
            Err(e) => {
                warn!(student_id = id, error = %e, "student lookup failed; row keeps an empty name");
                None
            }
        }
    }
}
