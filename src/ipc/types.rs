use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::ipc::error::HandlerErr;
use crate::roster::RosterCache;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub roster_cache: RosterCache,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
            roster_cache: RosterCache::default(),
        }
    }
}

/// Caller identity stamped on writes and used for campus-scope checks.
#[derive(Debug, Clone)]
pub struct Actor {
    pub id: String,
    pub role: String,
    pub campus_id: Option<String>,
}

impl Actor {
    pub fn from_params(params: &serde_json::Value) -> Result<Actor, HandlerErr> {
        let Some(obj) = params.get("actor").and_then(|v| v.as_object()) else {
            return Err(HandlerErr::bad_params("missing actor"));
        };
        let id = match obj.get("id").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.to_string(),
            _ => return Err(HandlerErr::bad_params("missing actor.id")),
        };
        let role = match obj.get("role").and_then(|v| v.as_str()) {
            Some(v) if !v.trim().is_empty() => v.to_string(),
            _ => return Err(HandlerErr::bad_params("missing actor.role")),
        };
        let campus_id = obj
            .get("campusId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Ok(Actor {
            id,
            role,
            campus_id,
        })
    }

    /// Admins are institution-wide; everyone else is bound to one campus.
    pub fn authorize_campus(&self, campus_id: &str) -> Result<(), HandlerErr> {
        if self.role == "admin" {
            return Ok(());
        }
        match self.campus_id.as_deref() {
            Some(own) if own == campus_id => Ok(()),
            _ => Err(HandlerErr::unauthorized(
                "actor campus scope does not cover this course",
                Some(serde_json::json!({
                    "actorCampusId": self.campus_id,
                    "resourceCampusId": campus_id,
                })),
            )),
        }
    }
}
