use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

pub fn course_campus(conn: &Connection, course_id: &str) -> Result<String, HandlerErr> {
    let campus: Option<String> = conn
        .query_row(
            "SELECT campus_id FROM courses WHERE id = ?",
            [course_id],
            |r| r.get(0),
        )
        .optional()?;
    campus.ok_or_else(|| {
        HandlerErr::not_found("course not found", Some(json!({ "courseId": course_id })))
    })
}

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn handle_resolve(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let course_id = require_str(&req.params, "courseId")?;
    let campus_id = course_campus(conn, &course_id)?;

    let resolved = state.roster_cache.resolve(conn, &course_id, &campus_id)?;
    let students: Vec<serde_json::Value> = resolved.students.iter().map(|s| s.to_json()).collect();

    Ok(json!({
        "students": students,
        "source": resolved.source.as_str(),
    }))
}

fn handle_enroll(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let course_id = require_str(&req.params, "courseId")?;
    let student_id = require_str(&req.params, "studentId")?;

    course_campus(conn, &course_id)?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found(
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    }

    // Enrolling twice is a no-op; the course roster is a set.
    conn.execute(
        "INSERT OR IGNORE INTO enrollments(course_id, student_id) VALUES(?, ?)",
        (&course_id, &student_id),
    )?;
    state.roster_cache.invalidate();

    Ok(json!({ "ok": true }))
}

fn handle_withdraw(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let course_id = require_str(&req.params, "courseId")?;
    let student_id = require_str(&req.params, "studentId")?;

    course_campus(conn, &course_id)?;

    let removed = conn.execute(
        "DELETE FROM enrollments WHERE course_id = ? AND student_id = ?",
        (&course_id, &student_id),
    )?;
    if removed == 0 {
        return Err(HandlerErr::not_found(
            "student is not enrolled in this course",
            Some(json!({ "courseId": course_id, "studentId": student_id })),
        ));
    }
    state.roster_cache.invalidate();

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "roster.resolve" => handle_resolve(state, req),
        "roster.enroll" => handle_enroll(state, req),
        "roster.withdraw" => handle_withdraw(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
