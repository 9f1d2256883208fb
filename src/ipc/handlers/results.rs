//! Entry ledger: the result entries recorded against one assessment. The
//! entry set is a snapshot seeded at create time; membership changes only
//! through addStudent/removeStudent, never by reconciling against the
//! current course roster.

use crate::ipc::error::{is_constraint_violation, ok, HandlerErr};
use crate::ipc::handlers::assessments::{load_assessment, AssessmentRow};
use crate::ipc::handlers::roster::course_campus;
use crate::ipc::types::{Actor, AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn require_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    match params.get(key).and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(HandlerErr::bad_params(format!("missing {}", key))),
    }
}

fn load_or_not_found(
    conn: &Connection,
    assessment_id: &str,
) -> Result<AssessmentRow, HandlerErr> {
    load_assessment(conn, assessment_id)?.ok_or_else(|| {
        HandlerErr::not_found(
            "assessment not found",
            Some(json!({ "assessmentId": assessment_id })),
        )
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let assessment_id = require_str(&req.params, "assessmentId")?;
    let assessment = load_or_not_found(conn, &assessment_id)?;

    // LEFT JOIN keeps history visible: entries whose student left the course
    // roster, or whose student row was removed out-of-band, still list.
    let mut stmt = conn.prepare(
        "SELECT e.student_id, e.marks, e.remarks, s.name, s.email
         FROM result_entries e
         LEFT JOIN students s ON s.id = e.student_id
         WHERE e.assessment_id = ?
         ORDER BY s.name IS NULL, s.name, e.student_id",
    )?;
    let entries = stmt
        .query_map([&assessment_id], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "marks": row.get::<_, f64>(1)?,
                "remarks": row.get::<_, String>(2)?,
                "studentName": row.get::<_, Option<String>>(3)?,
                "studentEmail": row.get::<_, Option<String>>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "assessment": assessment.to_json(),
        "entries": entries,
    }))
}

/// Per-row validation outcome for one bulk payload row.
struct AcceptedRow {
    student_id: String,
    marks: f64,
    remarks: String,
}

fn handle_bulk_upsert(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let actor = Actor::from_params(&req.params)?;
    let assessment_id = require_str(&req.params, "assessmentId")?;

    let assessment = load_or_not_found(conn, &assessment_id)?;
    let campus_id = course_campus(conn, &assessment.course_id)?;
    actor.authorize_campus(&campus_id)?;

    let Some(rows) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing entries[]"));
    };

    let mut existing_remarks = conn.prepare(
        "SELECT remarks FROM result_entries WHERE assessment_id = ? AND student_id = ?",
    )?;

    let mut accepted: Vec<AcceptedRow> = Vec::new();
    let mut rejected: Vec<serde_json::Value> = Vec::new();
    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();

    for (i, row) in rows.iter().enumerate() {
        let Some(obj) = row.as_object() else {
            rejected.push(json!({
                "studentId": serde_json::Value::Null,
                "reason": format!("entry at index {} must be an object", i),
            }));
            continue;
        };

        let student_id = match obj.get("studentId").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => {
                rejected.push(json!({
                    "studentId": serde_json::Value::Null,
                    "reason": format!("entry at index {} missing studentId", i),
                }));
                continue;
            }
        };

        if !seen.insert(student_id.clone()) {
            // First occurrence wins.
            rejected.push(json!({
                "studentId": student_id,
                "reason": "duplicate studentId in payload",
            }));
            continue;
        }

        let marks = match obj.get("marks").and_then(|v| v.as_f64()) {
            Some(v) if v.is_finite() => v,
            _ => {
                rejected.push(json!({
                    "studentId": student_id,
                    "reason": "marks must be numeric",
                }));
                continue;
            }
        };
        if marks < 0.0 {
            rejected.push(json!({
                "studentId": student_id,
                "reason": "marks must be >= 0",
            }));
            continue;
        }
        if marks > assessment.total_marks {
            // Strict bound; out-of-range marks are rejected, never clamped.
            rejected.push(json!({
                "studentId": student_id,
                "reason": "marks exceeds totalMarks",
            }));
            continue;
        }

        let current: Option<String> = existing_remarks
            .query_row((&assessment_id, &student_id), |r| r.get(0))
            .optional()?;
        let Some(current_remarks) = current else {
            rejected.push(json!({
                "studentId": student_id,
                "reason": "no entry for student on this assessment",
            }));
            continue;
        };

        let remarks = match obj.get("remarks") {
            None | Some(serde_json::Value::Null) => current_remarks,
            Some(v) => match v.as_str() {
                Some(s) => s.to_string(),
                None => {
                    rejected.push(json!({
                        "studentId": student_id,
                        "reason": "remarks must be a string",
                    }));
                    continue;
                }
            },
        };

        accepted.push(AcceptedRow {
            student_id,
            marks,
            remarks,
        });
    }
    drop(existing_remarks);

    // All accepted rows commit in one transaction.
    let tx = conn.unchecked_transaction()?;
    {
        let mut update = tx.prepare(
            "UPDATE result_entries SET marks = ?, remarks = ?
             WHERE assessment_id = ? AND student_id = ?",
        )?;
        for row in &accepted {
            update.execute((row.marks, &row.remarks, &assessment_id, &row.student_id))?;
        }
    }
    tx.commit()?;

    let updated: Vec<serde_json::Value> = accepted
        .iter()
        .map(|r| {
            json!({
                "studentId": r.student_id,
                "marks": r.marks,
                "remarks": r.remarks,
            })
        })
        .collect();

    Ok(json!({ "updated": updated, "rejected": rejected }))
}

fn handle_add_student(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let actor = Actor::from_params(&req.params)?;
    let assessment_id = require_str(&req.params, "assessmentId")?;
    let student_id = require_str(&req.params, "studentId")?;

    let assessment = load_or_not_found(conn, &assessment_id)?;
    let campus_id = course_campus(conn, &assessment.course_id)?;
    actor.authorize_campus(&campus_id)?;

    let known: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()?;
    if known.is_none() {
        return Err(HandlerErr::not_found(
            "student not found",
            Some(json!({ "studentId": student_id })),
        ));
    }

    let inserted = conn.execute(
        "INSERT INTO result_entries(assessment_id, student_id, marks, remarks)
         VALUES(?, ?, 0, '')",
        (&assessment_id, &student_id),
    );
    if let Err(e) = inserted {
        if is_constraint_violation(&e) {
            return Err(HandlerErr::conflict_with(
                "student already has an entry on this assessment",
                json!({ "assessmentId": assessment_id, "studentId": student_id }),
            ));
        }
        return Err(e.into());
    }

    Ok(json!({
        "entry": {
            "assessmentId": assessment_id,
            "studentId": student_id,
            "marks": 0.0,
            "remarks": "",
        }
    }))
}

fn handle_remove_student(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::no_workspace());
    };
    let actor = Actor::from_params(&req.params)?;
    let assessment_id = require_str(&req.params, "assessmentId")?;
    let student_id = require_str(&req.params, "studentId")?;

    let assessment = load_or_not_found(conn, &assessment_id)?;
    let campus_id = course_campus(conn, &assessment.course_id)?;
    actor.authorize_campus(&campus_id)?;

    let removed = conn.execute(
        "DELETE FROM result_entries WHERE assessment_id = ? AND student_id = ?",
        (&assessment_id, &student_id),
    )?;
    if removed == 0 {
        return Err(HandlerErr::not_found(
            "no entry for student on this assessment",
            Some(json!({ "assessmentId": assessment_id, "studentId": student_id })),
        ));
    }

    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "results.list" => handle_list(state, req),
        "results.bulkUpsert" => handle_bulk_upsert(state, req),
        "results.addStudent" => handle_add_student(state, req),
        "results.removeStudent" => handle_remove_student(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
