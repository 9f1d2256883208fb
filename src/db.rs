use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("gradebook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS campuses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            email TEXT,
            phone TEXT,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_campus ON students(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            campus_id TEXT NOT NULL,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            teacher_name TEXT,
            FOREIGN KEY(campus_id) REFERENCES campuses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_campus ON courses(campus_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            course_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(course_id, student_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student ON enrollments(student_id)",
        [],
    )?;

    // title_norm (trim + lowercase) carries the uniqueness invariant; the
    // UNIQUE constraint is the compare-and-swap that arbitrates concurrent
    // creates.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            title_norm TEXT NOT NULL,
            kind TEXT NOT NULL,
            total_marks REAL NOT NULL,
            date TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            created_by TEXT,
            created_by_role TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, title_norm, kind)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_course ON assessments(course_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assessments_course_date ON assessments(course_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS result_entries(
            assessment_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            marks REAL NOT NULL,
            remarks TEXT NOT NULL DEFAULT '',
            PRIMARY KEY(assessment_id, student_id),
            FOREIGN KEY(assessment_id) REFERENCES assessments(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_result_entries_student ON result_entries(student_id)",
        [],
    )?;

    Ok(conn)
}

/// Trim + case-fold; the normalized form feeds the uniqueness constraint.
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_normalization_trims_and_case_folds() {
        assert_eq!(normalize_title("  Midterm Exam "), "midterm exam");
        assert_eq!(normalize_title("QUIZ 1"), normalize_title("quiz 1"));
        assert_ne!(normalize_title("Quiz 1"), normalize_title("Quiz 2"));
    }

    #[test]
    fn open_db_is_idempotent_and_enforces_unique_assessment_key() {
        let dir = std::env::temp_dir().join(format!(
            "gradebook-db-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        let conn = open_db(&dir).expect("open");
        drop(conn);
        let conn = open_db(&dir).expect("reopen");

        conn.execute("INSERT INTO campuses(id, name) VALUES('cp', 'Main')", [])
            .expect("campus");
        conn.execute(
            "INSERT INTO courses(id, campus_id, name, code) VALUES('co', 'cp', 'Maths', 'MA1')",
            [],
        )
        .expect("course");
        conn.execute(
            "INSERT INTO assessments(id, course_id, title, title_norm, kind, total_marks, date, created_at)
             VALUES('a1', 'co', 'Quiz 1', 'quiz 1', 'quiz', 10, '2025-09-01', '2025-08-01T00:00:00Z')",
            [],
        )
        .expect("first insert");

        let dup = conn.execute(
            "INSERT INTO assessments(id, course_id, title, title_norm, kind, total_marks, date, created_at)
             VALUES('a2', 'co', 'quiz 1', 'quiz 1', 'quiz', 20, '2025-09-02', '2025-08-02T00:00:00Z')",
            [],
        );
        assert!(dup.is_err(), "duplicate (course, title_norm, kind) must fail");
    }
}
