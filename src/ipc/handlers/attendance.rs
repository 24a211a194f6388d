use crate::db::StudentDirectory;
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_value_map, labelled_values, require_course,
    with_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::FileStore;
use crate::table::TableKind;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::json;

pub const STATUSES: [&str; 4] = ["Present", "Absent", "Late", "Joined Late"];

pub(super) fn parse_date(key: &str, raw: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| {
            HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))
                .with_details(json!({ "param": key, "value": raw }))
        })
}

/// Canonical spelling of a status, matched case-insensitively. Empty means unrecorded.
fn parse_status(raw: &str) -> Option<&'static str> {
    if raw.is_empty() {
        return Some("");
    }
    STATUSES.iter().copied().find(|s| s.eq_ignore_ascii_case(raw))
}

fn attendance_open(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_course(conn, &course_id)?;
    let table = records::open(store, &course_id, TableKind::Attendance)?;
    Ok(json!({ "courseId": course_id, "table": table.view() }))
}

fn attendance_record(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date = parse_date("date", &get_required_str(params, "date")?)?;
    let previous_date = get_optional_str(params, "previousDate")?
        .map(|p| parse_date("previousDate", &p))
        .transpose()?;
    let statuses = labelled_values(get_value_map(params, "statuses")?, |label, raw| {
        parse_status(raw).map(str::to_string).ok_or_else(|| {
            HandlerErr::bad_params(format!("unknown attendance status: {}", raw))
                .with_details(json!({ "label": label, "allowed": STATUSES }))
        })
    })?;
    require_course(conn, &course_id)?;

    let (event, table) = records::record_attendance(
        store,
        &StudentDirectory(conn),
        &course_id,
        &date,
        &statuses,
        previous_date.as_deref(),
    )?;
    Ok(json!({ "event": event, "table": table.view() }))
}

fn attendance_delete_date(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let date = get_required_str(params, "date")?;
    require_course(conn, &course_id)?;
    let (event, table) = records::delete_attendance_date(store, &course_id, &date)?;
    Ok(json!({ "event": event, "table": table.view() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.open" => Some(with_workspace(state, req, attendance_open)),
        "attendance.record" => Some(with_workspace(state, req, attendance_record)),
        "attendance.deleteDate" => Some(with_workspace(state, req, attendance_delete_date)),
        _ => None,
    }
}
