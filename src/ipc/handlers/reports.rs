use super::core::REPORTS_DIR;
use crate::ipc::helpers::{get_required_str, require_course, with_workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::report::{course_report, CourseReport};
use crate::store::FileStore;
use crate::table::TableKind;
use chrono::{DateTime, Local};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

fn build_report(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
    at: DateTime<Local>,
) -> Result<CourseReport, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let course = require_course(conn, &course_id)?;
    let gradebook = records::open(store, &course_id, TableKind::Gradebook)?;
    Ok(course_report(&course.id, &course.profile, &gradebook, at))
}

fn reports_course(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let report = build_report(conn, store, params, Local::now())?;
    Ok(json!({ "report": report }))
}

fn reports_course_save(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let at = Local::now();
    let report = build_report(conn, store, params, at)?;
    let dir = store.root().join(REPORTS_DIR);
    let path = dir.join(report.file_name(at));
    std::fs::create_dir_all(&dir)
        .and_then(|_| std::fs::write(&path, report.to_text()))
        .map_err(|e| {
            HandlerErr::new("io_failed", format!("failed to write report: {e}"))
                .with_details(json!({ "path": path.to_string_lossy() }))
        })?;
    info!(course_id = %report.course_id, path = %path.to_string_lossy(), "saved course report");
    Ok(json!({ "path": path.to_string_lossy(), "report": report }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.course" => Some(with_workspace(state, req, reports_course)),
        "reports.courseSave" => Some(with_workspace(state, req, reports_course_save)),
        _ => None,
    }
}
