//! Campus, student, and course administration. These entities are owned by
//! the wider school system; the engine exposes plain CRUD so a workspace can
//! be populated, and otherwise treats them as read-only inputs.

use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::paging::PageParams;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn campus_exists(conn: &Connection, campus_id: &str) -> Result<bool, HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM campuses WHERE id = ?", [campus_id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn handle_campuses_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let name = require_str(&req.params, "name")?;

    let campus_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO campuses(id, name) VALUES(?, ?)",
        (&campus_id, &name),
    )?;

    Ok(json!({ "campusId": campus_id, "name": name }))
}

fn handle_add_student(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let campus_id = require_str(&req.params, "campusId")?;
    let name = require_str(&req.params, "name")?;
    let email = optional_str(&req.params, "email");
    let phone = optional_str(&req.params, "phone");

    if !campus_exists(conn, &campus_id)? {
        return Err(HandlerErr::not_found(
            "campus not found",
            Some(json!({ "campusId": campus_id })),
        ));
    }

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, campus_id, name, email, phone) VALUES(?, ?, ?, ?, ?)",
        (&student_id, &campus_id, &name, email.as_deref(), phone.as_deref()),
    )?;
    state.roster_cache.invalidate();

    Ok(json!({
        "student": {
            "id": student_id,
            "campusId": campus_id,
            "name": name,
            "email": email,
            "phone": phone,
        }
    }))
}

fn handle_list_students(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let campus_id = require_str(&req.params, "campusId")?;
    let page = PageParams::from_request(&req.params).map_err(HandlerErr::bad_params)?;

    if !campus_exists(conn, &campus_id)? {
        return Err(HandlerErr::not_found(
            "campus not found",
            Some(json!({ "campusId": campus_id })),
        ));
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, email, phone FROM students
         WHERE campus_id = ?
         ORDER BY name, id
         LIMIT ? OFFSET ?",
    )?;
    let items = stmt
        .query_map((&campus_id, page.limit(), page.offset()), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "email": row.get::<_, Option<String>>(2)?,
                "phone": row.get::<_, Option<String>>(3)?,
                "campusId": campus_id,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let has_more = page.has_more(items.len());
    Ok(json!({ "items": items, "hasMore": has_more }))
}

fn handle_courses_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let campus_id = require_str(&req.params, "campusId")?;
    let name = require_str(&req.params, "name")?;
    let code = require_str(&req.params, "code")?;
    let teacher_name = optional_str(&req.params, "teacherName");

    if !campus_exists(conn, &campus_id)? {
        return Err(HandlerErr::not_found(
            "campus not found",
            Some(json!({ "campusId": campus_id })),
        ));
    }

    let course_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, campus_id, name, code, teacher_name) VALUES(?, ?, ?, ?, ?)",
        (
            &course_id,
            &campus_id,
            &name,
            &code,
            teacher_name.as_deref(),
        ),
    )?;
    state.roster_cache.invalidate();

    Ok(json!({
        "course": {
            "id": course_id,
            "campusId": campus_id,
            "name": name,
            "code": code,
            "teacherName": teacher_name,
        }
    }))
}

fn handle_courses_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let campus_id = optional_str(&req.params, "campusId");
    let page = PageParams::from_request(&req.params).map_err(HandlerErr::bad_params)?;

    let row_to_json = |row: &rusqlite::Row<'_>| -> rusqlite::Result<serde_json::Value> {
        Ok(json!({
            "id": row.get::<_, String>(0)?,
            "campusId": row.get::<_, String>(1)?,
            "name": row.get::<_, String>(2)?,
            "code": row.get::<_, String>(3)?,
            "teacherName": row.get::<_, Option<String>>(4)?,
        }))
    };

    let items = match campus_id {
        Some(cid) => {
            let mut stmt = conn.prepare(
                "SELECT id, campus_id, name, code, teacher_name FROM courses
                 WHERE campus_id = ?
                 ORDER BY name, id
                 LIMIT ? OFFSET ?",
            )?;
            let rows = stmt
                .query_map((&cid, page.limit(), page.offset()), row_to_json)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, campus_id, name, code, teacher_name FROM courses
                 ORDER BY name, id
                 LIMIT ? OFFSET ?",
            )?;
            let rows = stmt
                .query_map((page.limit(), page.offset()), row_to_json)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };

    let has_more = page.has_more(items.len());
    Ok(json!({ "items": items, "hasMore": has_more }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "campuses.create" => handle_campuses_create(state, req),
        "directory.addStudent" => handle_add_student(state, req),
        "directory.listStudents" => handle_list_students(state, req),
        "courses.create" => handle_courses_create(state, req),
        "courses.list" => handle_courses_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
