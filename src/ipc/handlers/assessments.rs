//! Assessment registry: idempotent creation arbitrated by the storage-level
//! uniqueness constraint on (course, normalized title, kind), metadata
//! updates, paginated course listings, and atomic cascading delete.

use crate::db;
use crate::ipc::error::{is_constraint_violation, ok, HandlerErr};
use crate::ipc::handlers::roster::course_campus;
use crate::ipc::types::{Actor, AppState, Request};
use crate::paging::PageParams;
use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub const KINDS: &[&str] = &[
    "quiz",
    "assignment",
    "midterm",
    "final",
    "project",
    "practical",
    "viva",
];

fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn validate_kind(kind: &str) -> Result<(), HandlerErr> {
    if KINDS.contains(&kind) {
        return Ok(());
    }
    Err(HandlerErr::validation(
        format!("kind must be one of: {}", KINDS.join(", ")),
        Some(json!({ "kind": kind })),
    ))
}

fn validate_date(date: &str) -> Result<(), HandlerErr> {
    if NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok() {
        return Ok(());
    }
    Err(HandlerErr::validation(
        "date must be YYYY-MM-DD",
        Some(json!({ "date": date })),
    ))
}

fn validate_total_marks(total: f64) -> Result<(), HandlerErr> {
    if total.is_finite() && total > 0.0 {
        return Ok(());
    }
    Err(HandlerErr::validation(
        "totalMarks must be a finite number > 0",
        Some(json!({ "totalMarks": total })),
    ))
}

#[derive(Debug, Clone)]
pub struct AssessmentRow {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub title_norm: String,
    pub kind: String,
    pub total_marks: f64,
    pub date: String,
    pub description: Option<String>,
    pub created_at: String,
    pub created_by: Option<String>,
    pub created_by_role: Option<String>,
}

impl AssessmentRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "courseId": self.course_id,
            "title": self.title,
            "kind": self.kind,
            "totalMarks": self.total_marks,
            "date": self.date,
            "description": self.description,
            "createdAt": self.created_at,
            "createdBy": self.created_by,
            "createdByRole": self.created_by_role,
        })
    }
}

const ASSESSMENT_COLS: &str = "id, course_id, title, title_norm, kind, total_marks, date, \
     description, created_at, created_by, created_by_role";

fn row_to_assessment(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssessmentRow> {
    Ok(AssessmentRow {
        id: row.get(0)?,
        course_id: row.get(1)?,
        title: row.get(2)?,
        title_norm: row.get(3)?,
        kind: row.get(4)?,
        total_marks: row.get(5)?,
        date: row.get(6)?,
        description: row.get(7)?,
        created_at: row.get(8)?,
        created_by: row.get(9)?,
        created_by_role: row.get(10)?,
    })
}

pub fn load_assessment(
    conn: &Connection,
    assessment_id: &str,
) -> Result<Option<AssessmentRow>, HandlerErr> {
    let sql = format!("SELECT {} FROM assessments WHERE id = ?", ASSESSMENT_COLS);
    let row = conn
        .query_row(&sql, [assessment_id], row_to_assessment)
        .optional()?;
    Ok(row)
}

fn find_by_unique_key(
    conn: &Connection,
    course_id: &str,
    title_norm: &str,
    kind: &str,
) -> Result<Option<String>, HandlerErr> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM assessments WHERE course_id = ? AND title_norm = ? AND kind = ?",
            (course_id, title_norm, kind),
            |r| r.get(0),
        )
        .optional()?;
    Ok(id)
}

fn list_page(
    conn: &Connection,
    course_id: &str,
    page: PageParams,
) -> Result<Vec<AssessmentRow>, HandlerErr> {
    let sql = format!(
        "SELECT {} FROM assessments
         WHERE course_id = ?
         ORDER BY date DESC, created_at DESC
         LIMIT ? OFFSET ?",
        ASSESSMENT_COLS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map((course_id, page.limit(), page.offset()), row_to_assessment)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

struct CreateSpec {
    course_id: String,
    title: String,
    kind: String,
    total_marks: f64,
    date: String,
    description: Option<String>,
}

fn parse_create(params: &serde_json::Value) -> Result<CreateSpec, HandlerErr> {
    let course_id = require_str(params, "courseId")?;
    let title = require_str(params, "title")?;
    let kind = require_str(params, "kind")?;
    validate_kind(&kind)?;

    let total_marks = params
        .get("totalMarks")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::validation("totalMarks must be a number", None))?;
    validate_total_marks(total_marks)?;

    let date = require_str(params, "date")?;
    validate_date(&date)?;

    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(CreateSpec {
        course_id,
        title,
        kind,
        total_marks,
        date,
        description,
    })
}

/// Insert-and-seed in one transaction. The UNIQUE constraint on
/// (course_id, title_norm, kind) is the compare-and-swap: the loser of a
/// concurrent duplicate create gets `conflict` carrying the winner's id,
/// which also makes a timed-out create safe to retry.
fn try_create(
    state: &mut AppState,
    spec: &CreateSpec,
    actor: &Actor,
) -> Result<(AssessmentRow, usize), HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };

    let campus_id = course_campus(conn, &spec.course_id)?;
    actor.authorize_campus(&campus_id)?;

    let roster = state
        .roster_cache
        .resolve(conn, &spec.course_id, &campus_id)?;

    let title_norm = db::normalize_title(&spec.title);
    let assessment_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        "INSERT INTO assessments(
           id, course_id, title, title_norm, kind, total_marks, date,
           description, created_at, created_by, created_by_role
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &assessment_id,
            &spec.course_id,
            &spec.title,
            &title_norm,
            &spec.kind,
            spec.total_marks,
            &spec.date,
            spec.description.as_deref(),
            &created_at,
            &actor.id,
            &actor.role,
        ),
    );
    if let Err(e) = inserted {
        drop(tx); // roll back before re-querying the winner
        if is_constraint_violation(&e) {
            if let Some(existing) = find_by_unique_key(conn, &spec.course_id, &title_norm, &spec.kind)? {
                return Err(HandlerErr::conflict(
                    "an assessment with this title and kind already exists for the course",
                    &existing,
                ));
            }
        }
        return Err(e.into());
    }

    {
        let mut seed = tx.prepare(
            "INSERT INTO result_entries(assessment_id, student_id, marks, remarks)
             VALUES(?, ?, 0, '')",
        )?;
        for student in &roster.students {
            seed.execute((&assessment_id, &student.id))?;
        }
    }

    tx.commit()?;

    let row = AssessmentRow {
        id: assessment_id,
        course_id: spec.course_id.clone(),
        title: spec.title.clone(),
        title_norm,
        kind: spec.kind.clone(),
        total_marks: spec.total_marks,
        date: spec.date.clone(),
        description: spec.description.clone(),
        created_at,
        created_by: Some(actor.id.clone()),
        created_by_role: Some(actor.role.clone()),
    };
    Ok((row, roster.students.len()))
}

fn handle_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let actor = Actor::from_params(&req.params)?;
    let spec = parse_create(&req.params)?;
    let (row, seeded) = try_create(state, &spec, &actor)?;
    Ok(json!({ "assessment": row.to_json(), "seeded": seeded }))
}

/// Create-or-open reconciliation: the registry never duplicates, so on
/// conflict we walk the course listing and open the assessment that holds
/// the same normalized (title, kind) instead of surfacing a hard failure.
fn handle_create_or_open(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let actor = Actor::from_params(&req.params)?;
    let spec = parse_create(&req.params)?;

    let conflict = match try_create(state, &spec, &actor) {
        Ok((row, seeded)) => {
            return Ok(json!({
                "assessment": row.to_json(),
                "created": true,
                "seeded": seeded,
            }));
        }
        Err(e) if e.code == "conflict" => e,
        Err(e) => return Err(e),
    };

    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let title_norm = db::normalize_title(&spec.title);

    let mut page = PageParams {
        page: 1,
        page_size: 50,
    };
    loop {
        let items = list_page(conn, &spec.course_id, page)?;
        if let Some(row) = items
            .iter()
            .find(|a| a.title_norm == title_norm && a.kind == spec.kind)
        {
            return Ok(json!({ "assessment": row.to_json(), "created": false }));
        }
        if !page.has_more(items.len()) {
            // The winner vanished between the failed insert and the scan;
            // report the original conflict so the caller retries.
            return Err(conflict);
        }
        page.page += 1;
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let assessment_id = require_str(&req.params, "assessmentId")?;
    let row = load_assessment(conn, &assessment_id)?.ok_or_else(|| {
        HandlerErr::not_found(
            "assessment not found",
            Some(json!({ "assessmentId": assessment_id })),
        )
    })?;
    Ok(json!({ "assessment": row.to_json() }))
}

fn handle_list_by_course(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let course_id = require_str(&req.params, "courseId")?;
    course_campus(conn, &course_id)?;
    let page = PageParams::from_request(&req.params).map_err(HandlerErr::bad_params)?;

    let items = list_page(conn, &course_id, page)?;
    let has_more = page.has_more(items.len());
    let items: Vec<serde_json::Value> = items.iter().map(|a| a.to_json()).collect();

    Ok(json!({ "items": items, "hasMore": has_more }))
}

fn handle_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let actor = Actor::from_params(&req.params)?;
    let assessment_id = require_str(&req.params, "assessmentId")?;

    let existing = load_assessment(conn, &assessment_id)?.ok_or_else(|| {
        HandlerErr::not_found(
            "assessment not found",
            Some(json!({ "assessmentId": assessment_id })),
        )
    })?;
    let campus_id = course_campus(conn, &existing.course_id)?;
    actor.authorize_campus(&campus_id)?;

    // Partial metadata update: absent keys keep their current value, present
    // keys are validated as on create.
    let title = match req.params.get("title") {
        None => existing.title.clone(),
        Some(v) => match v.as_str().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(HandlerErr::validation("title must not be empty", None)),
        },
    };
    let kind = match req.params.get("kind") {
        None => existing.kind.clone(),
        Some(v) => match v.as_str().map(str::trim) {
            Some(k) if !k.is_empty() => {
                validate_kind(k)?;
                k.to_string()
            }
            _ => return Err(HandlerErr::validation("kind must not be empty", None)),
        },
    };
    let total_marks = match req.params.get("totalMarks") {
        None => existing.total_marks,
        Some(v) => {
            let t = v
                .as_f64()
                .ok_or_else(|| HandlerErr::validation("totalMarks must be a number", None))?;
            validate_total_marks(t)?;
            t
        }
    };
    let date = match req.params.get("date") {
        None => existing.date.clone(),
        Some(v) => match v.as_str().map(str::trim) {
            Some(d) if !d.is_empty() => {
                validate_date(d)?;
                d.to_string()
            }
            _ => return Err(HandlerErr::validation("date must not be empty", None)),
        },
    };
    let description = match req.params.get("description") {
        None => existing.description.clone(),
        Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_str() {
            Some(d) => Some(d.trim().to_string()).filter(|s| !s.is_empty()),
            None => return Err(HandlerErr::validation("description must be a string", None)),
        },
    };

    // totalMarks may never drop below an already recorded mark.
    if total_marks < existing.total_marks {
        let max_marks: f64 = conn.query_row(
            "SELECT COALESCE(MAX(marks), 0) FROM result_entries WHERE assessment_id = ?",
            [&assessment_id],
            |r| r.get(0),
        )?;
        if max_marks > total_marks {
            return Err(HandlerErr::validation(
                "totalMarks is below an already recorded mark",
                Some(json!({ "totalMarks": total_marks, "maxRecorded": max_marks })),
            ));
        }
    }

    let title_norm = db::normalize_title(&title);
    if title_norm != existing.title_norm || kind != existing.kind {
        if let Some(other) = find_by_unique_key(conn, &existing.course_id, &title_norm, &kind)? {
            if other != assessment_id {
                return Err(HandlerErr::conflict(
                    "another assessment with this title and kind already exists for the course",
                    &other,
                ));
            }
        }
    }

    let updated = conn.execute(
        "UPDATE assessments
         SET title = ?, title_norm = ?, kind = ?, total_marks = ?, date = ?, description = ?
         WHERE id = ?",
        (
            &title,
            &title_norm,
            &kind,
            total_marks,
            &date,
            description.as_deref(),
            &assessment_id,
        ),
    );
    if let Err(e) = updated {
        // The pre-check races with concurrent renames; the constraint is
        // authoritative.
        if is_constraint_violation(&e) {
            if let Some(other) = find_by_unique_key(conn, &existing.course_id, &title_norm, &kind)? {
                return Err(HandlerErr::conflict(
                    "another assessment with this title and kind already exists for the course",
                    &other,
                ));
            }
        }
        return Err(e.into());
    }

    let row = AssessmentRow {
        title,
        title_norm,
        kind,
        total_marks,
        date,
        description,
        ..existing
    };
    Ok(json!({ "assessment": row.to_json() }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let actor = Actor::from_params(&req.params)?;
    let assessment_id = require_str(&req.params, "assessmentId")?;

    let existing = load_assessment(conn, &assessment_id)?.ok_or_else(|| {
        HandlerErr::not_found(
            "assessment not found",
            Some(json!({ "assessmentId": assessment_id })),
        )
    })?;
    let campus_id = course_campus(conn, &existing.course_id)?;
    actor.authorize_campus(&campus_id)?;

    // Entries and the assessment go together or not at all; a failure here
    // rolls back and surfaces as `transient` for retry.
    let tx = conn.unchecked_transaction()?;
    let removed_entries = tx.execute(
        "DELETE FROM result_entries WHERE assessment_id = ?",
        [&assessment_id],
    )?;
    tx.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id])?;
    tx.commit()?;

    Ok(json!({ "ok": true, "removedEntries": removed_entries }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "assessments.create" => handle_create(state, req),
        "assessments.createOrOpen" => handle_create_or_open(state, req),
        "assessments.get" => handle_get(state, req),
        "assessments.listByCourse" => handle_list_by_course(state, req),
        "assessments.update" => handle_update(state, req),
        "assessments.delete" => handle_delete(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
