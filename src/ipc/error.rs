use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Typed failure carried through handler internals, rendered to an error
/// response at the boundary.
///
/// Codes: `validation` (bad field/row values), `conflict` (uniqueness
/// violation, details carry `existingId`), `not_found`, `unauthorized`
/// (campus scope), `transient` (storage failure, safe to retry),
/// `bad_params` (malformed request shape), `no_workspace`.
#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn validation(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "validation",
            message: message.into(),
            details,
        }
    }

    pub fn conflict(message: impl Into<String>, existing_id: &str) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: Some(json!({ "existingId": existing_id })),
        }
    }

    pub fn conflict_with(message: impl Into<String>, details: serde_json::Value) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details,
        }
    }

    pub fn unauthorized(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "unauthorized",
            message: message.into(),
            details,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "transient",
            message: message.into(),
            details: None,
        }
    }

    pub fn no_workspace() -> Self {
        HandlerErr {
            code: "no_workspace",
            message: "select a workspace first".into(),
            details: None,
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        HandlerErr::transient(e.to_string())
    }
}

impl From<anyhow::Error> for HandlerErr {
    fn from(e: anyhow::Error) -> Self {
        HandlerErr::transient(format!("{e:#}"))
    }
}

/// Constraint failures on UNIQUE keys are how concurrent duplicate writes
/// lose the race; callers re-query and report `conflict`.
pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
