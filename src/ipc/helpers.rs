use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::RowLabel;
use crate::records::RecordError;
use crate::store::{FileStore, StoreError};
use crate::table::is_storable;
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    /// Wraps a registry error under the given code.
    pub fn db(code: &'static str) -> impl FnOnce(anyhow::Error) -> Self {
        move |e| Self::new(code, format!("{e:#}"))
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<RecordError> for HandlerErr {
    fn from(e: RecordError) -> Self {
        let code = match &e {
            RecordError::Store(StoreError::InvalidKey(_)) | RecordError::Reconcile(_) => {
                "bad_params"
            }
            RecordError::Store(StoreError::Read { .. } | StoreError::Write { .. }) => "io_failed",
        };
        HandlerErr::new(code, e.to_string())
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        RecordError::Store(e).into()
    }
}

/// The open registry and table store, or `no_workspace`.
pub fn workspace(state: &AppState) -> Result<(&Connection, &FileStore), HandlerErr> {
    match (state.db.as_ref(), state.store.as_ref()) {
        (Some(conn), Some(store)) => Ok((conn, store)),
        _ => Err(HandlerErr::new("no_workspace", "select a workspace first")),
    }
}

pub type WorkspaceOp =
    fn(&Connection, &FileStore, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

/// Runs `op` against the open workspace and wraps the outcome in the envelope.
pub fn with_workspace(state: &AppState, req: &Request, op: WorkspaceOp) -> serde_json::Value {
    let result = workspace(state).and_then(|(conn, store)| op(conn, store, &req.params));
    match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => {
            let s = s.trim();
            Ok((!s.is_empty()).then(|| s.to_string()))
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}

/// An object of label → value. Numbers are accepted and kept in their JSON form.
pub fn get_value_map(
    params: &serde_json::Value,
    key: &str,
) -> Result<BTreeMap<String, String>, HandlerErr> {
    let Some(obj) = params.get(key).and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    let mut out = BTreeMap::new();
    for (label, v) in obj {
        let value = match v {
            serde_json::Value::String(s) => s.trim().to_string(),
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Null => String::new(),
            _ => {
                return Err(HandlerErr::bad_params(format!(
                    "{}.{} must be a string or number",
                    key, label
                )))
            }
        };
        out.insert(label.clone(), value);
    }
    Ok(out)
}

/// Rejects values that would break the text framing of a table file.
pub fn ensure_storable<'a>(
    what: &str,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<(), HandlerErr> {
    for v in values {
        if !is_storable(v) {
            return Err(HandlerErr::bad_params(format!(
                "{} must not contain commas or line breaks",
                what
            ))
            .with_details(json!({ "value": v })));
        }
    }
    Ok(())
}

/// Validated `(label, value)` pairs from a label → value map.
pub fn labelled_values(
    values: BTreeMap<String, String>,
    mut check: impl FnMut(&str, &str) -> Result<String, HandlerErr>,
) -> Result<Vec<(RowLabel, String)>, HandlerErr> {
    values
        .into_iter()
        .map(|(label, value)| {
            ensure_storable("row label", [label.as_str()])?;
            let value = check(&label, &value)?;
            Ok((RowLabel::parse(&label), value))
        })
        .collect()
}

pub fn require_course(conn: &Connection, course_id: &str) -> Result<db::CourseRow, HandlerErr> {
    db::course_get(conn, course_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::new("not_found", format!("course not found: {}", course_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_maps_accept_numbers_and_nulls() {
        let params = json!({ "grades": { "S1": 80, "S2": "  75.5 ", "S3": null } });
        let m = get_value_map(&params, "grades").ok().expect("map");
        assert_eq!(m["S1"], "80");
        assert_eq!(m["S2"], "75.5");
        assert_eq!(m["S3"], "");
        assert!(get_value_map(&json!({ "grades": { "S1": [1] } }), "grades").is_err());
    }

    #[test]
    fn blank_required_strings_are_missing() {
        let params = json!({ "courseId": "  ", "name": 3 });
        assert_eq!(
            get_required_str(&params, "courseId").err().map(|e| e.code),
            Some("bad_params")
        );
        assert!(get_optional_str(&params, "name").is_err());
        assert_eq!(get_optional_str(&params, "teacher").ok(), Some(None));
    }

    #[test]
    fn framing_characters_are_rejected() {
        assert!(ensure_storable("status", ["Present", ""]).is_ok());
        let e = ensure_storable("name", ["Lee, Ann"]).err().expect("rejected");
        assert_eq!(e.details, Some(json!({ "value": "Lee, Ann" })));
    }
}
