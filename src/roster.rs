//! Roster resolution: the student population an assessment is graded
//! against. Courses are often created before enrollment is finalized, so an
//! empty course roster falls back to the campus-wide directory. Strategies
//! are evaluated in order; the first one that yields students wins, and an
//! empty result after all of them is valid ("no students yet").

use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub campus_id: String,
}

impl Student {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "phone": self.phone,
            "campusId": self.campus_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterSource {
    Course,
    Campus,
    Empty,
}

impl RosterSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RosterSource::Course => "course",
            RosterSource::Campus => "campus",
            RosterSource::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedRoster {
    pub students: Vec<Student>,
    pub source: RosterSource,
}

/// One fallback step. Returns Ok(None) to mean "try the next strategy".
type Strategy = fn(&Connection, &str, &str) -> anyhow::Result<Option<ResolvedRoster>>;

const STRATEGIES: &[Strategy] = &[course_roster, campus_directory];

/// Resolve the grading population for a course. The caller has already
/// verified the course exists and supplies its campus id.
pub fn resolve(conn: &Connection, course_id: &str, campus_id: &str) -> anyhow::Result<ResolvedRoster> {
    for strategy in STRATEGIES {
        if let Some(found) = strategy(conn, course_id, campus_id)? {
            return Ok(found);
        }
    }
    Ok(ResolvedRoster {
        students: Vec::new(),
        source: RosterSource::Empty,
    })
}

fn course_roster(
    conn: &Connection,
    course_id: &str,
    _campus_id: &str,
) -> anyhow::Result<Option<ResolvedRoster>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.email, s.phone, s.campus_id
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.course_id = ?
         ORDER BY s.name, s.id",
    )?;
    let students = stmt
        .query_map([course_id], row_to_student)?
        .collect::<Result<Vec<_>, _>>()?;

    if students.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResolvedRoster {
        students,
        source: RosterSource::Course,
    }))
}

fn campus_directory(
    conn: &Connection,
    _course_id: &str,
    campus_id: &str,
) -> anyhow::Result<Option<ResolvedRoster>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone, campus_id
         FROM students
         WHERE campus_id = ?
         ORDER BY name, id",
    )?;
    let students = stmt
        .query_map([campus_id], row_to_student)?
        .collect::<Result<Vec<_>, _>>()?;

    if students.is_empty() {
        return Ok(None);
    }
    Ok(Some(ResolvedRoster {
        students,
        source: RosterSource::Campus,
    }))
}

fn row_to_student(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        phone: row.get(3)?,
        campus_id: row.get(4)?,
    })
}

/// Per-session memo, keyed by course id. Any write to the directory or the
/// enrollments table must clear it; there is no cross-session cache.
#[derive(Default)]
pub struct RosterCache {
    by_course: HashMap<String, ResolvedRoster>,
}

impl RosterCache {
    pub fn resolve(
        &mut self,
        conn: &Connection,
        course_id: &str,
        campus_id: &str,
    ) -> anyhow::Result<ResolvedRoster> {
        if let Some(hit) = self.by_course.get(course_id) {
            return Ok(hit.clone());
        }
        let resolved = resolve(conn, course_id, campus_id)?;
        self.by_course
            .insert(course_id.to_string(), resolved.clone());
        Ok(resolved)
    }

    pub fn invalidate(&mut self) {
        self.by_course.clear();
    }
}
