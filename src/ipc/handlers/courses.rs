use crate::db::{self, CourseProfile};
use crate::ipc::helpers::{
    ensure_storable, get_optional_str, get_required_str, get_str_array, require_course,
    with_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records;
use crate::store::{validate_key, FileStore};
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

fn courses_list(
    conn: &Connection,
    _store: &FileStore,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let courses = db::courses_list(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "courses": courses }))
}

/// Optional profile fields read the same way for create and update.
fn profile_field(
    params: &serde_json::Value,
    key: &str,
    current: Option<String>,
) -> Result<Option<String>, HandlerErr> {
    if params.get(key).is_none() {
        return Ok(current);
    }
    get_optional_str(params, key)
}

fn read_profile(params: &serde_json::Value, current: CourseProfile) -> Result<CourseProfile, HandlerErr> {
    let name = match params.get("name") {
        None => current.name,
        Some(_) => get_required_str(params, "name")?,
    };
    let profile = CourseProfile {
        name,
        teacher: profile_field(params, "teacher", current.teacher)?,
        subject: profile_field(params, "subject", current.subject)?,
        grade_level: profile_field(params, "gradeLevel", current.grade_level)?,
        exam_type: profile_field(params, "examType", current.exam_type)?,
    };
    Ok(profile)
}

fn course_conflict(conn: &Connection, course_id: &str) -> Result<(), HandlerErr> {
    if db::course_get(conn, course_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .is_some()
    {
        return Err(
            HandlerErr::new("conflict", format!("course already exists: {}", course_id))
                .with_details(json!({ "courseId": course_id })),
        );
    }
    Ok(())
}

fn courses_create(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    get_required_str(params, "name")?;
    let profile = read_profile(params, CourseProfile::default())?;
    validate_key(&course_id)?;
    course_conflict(conn, &course_id)?;

    db::course_insert(conn, &course_id, &profile).map_err(HandlerErr::db("db_insert_failed"))?;
    let event = match records::create_tables(store, &course_id) {
        Ok(ev) => ev,
        Err(e) => {
            // Undo the registry insert.
            if let Err(undo) = db::course_delete(conn, &course_id) {
                warn!(course_id = %course_id, error = %undo, "failed to roll back course row");
            }
            return Err(e.into());
        }
    };
    info!(course_id = %course_id, "course created");
    Ok(json!({ "courseId": course_id, "event": event }))
}

fn courses_delete(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_course(conn, &course_id)?;
    // The registry row outlives the tables.
    let event = records::destroy_tables(store, &course_id)?;
    db::course_delete(conn, &course_id).map_err(HandlerErr::db("db_delete_failed"))?;
    Ok(json!({ "ok": true, "event": event }))
}

fn courses_update(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let existing = require_course(conn, &course_id)?;
    let profile = read_profile(params, existing.profile)?;
    let new_id = get_optional_str(params, "newCourseId")?.unwrap_or_else(|| course_id.clone());
    validate_key(&new_id)?;

    if new_id == course_id {
        db::course_update(conn, &course_id, &new_id, &profile)
            .map_err(HandlerErr::db("db_update_failed"))?;
        let course = require_course(conn, &course_id)?;
        return Ok(json!({ "course": course }));
    }

    course_conflict(conn, &new_id)?;
    let event = records::rename_tables(store, &course_id, &new_id)?;
    if let Err(e) = db::course_update(conn, &course_id, &new_id, &profile) {
        if let Err(undo) = records::rename_tables(store, &new_id, &course_id) {
            warn!(course_id = %course_id, new_id = %new_id, error = %undo, "failed to move tables back");
        }
        return Err(HandlerErr::db("db_update_failed")(e));
    }
    info!(from = %course_id, to = %new_id, "course renamed");
    let course = require_course(conn, &new_id)?;
    Ok(json!({ "course": course, "event": event }))
}

fn courses_assign_students(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let student_ids = get_str_array(params, "studentIds")?;
    require_course(conn, &course_id)?;

    let (added, unknown) =
        db::enroll(conn, &course_id, &student_ids).map_err(HandlerErr::db("db_insert_failed"))?;
    // Seeds every enrolled student, not only the new ids.
    let roster: Vec<(String, String)> = db::roster(conn, &course_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .into_iter()
        .map(|s| {
            let name = s.display_name();
            (s.id, name)
        })
        .collect();
    ensure_storable("student name", roster.iter().map(|(_, name)| name.as_str()))?;
    let event = records::seed_rows(store, &course_id, &roster)?;
    Ok(json!({
        "enrolled": added.iter().map(|(id, _)| id).collect::<Vec<_>>(),
        "unknown": unknown,
        "event": event,
    }))
}

fn courses_remove_students(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let student_ids = get_str_array(params, "studentIds")?;
    require_course(conn, &course_id)?;

    let unenrolled = db::unenroll(conn, &course_id, &student_ids)
        .map_err(HandlerErr::db("db_delete_failed"))?;
    let event = records::drop_rows(store, &course_id, &student_ids)?;
    Ok(json!({ "unenrolled": unenrolled, "event": event }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(with_workspace(state, req, courses_list)),
        "courses.create" => Some(with_workspace(state, req, courses_create)),
        "courses.update" => Some(with_workspace(state, req, courses_update)),
        "courses.delete" => Some(with_workspace(state, req, courses_delete)),
        "courses.assignStudents" => Some(with_workspace(state, req, courses_assign_students)),
        "courses.removeStudents" => Some(with_workspace(state, req, courses_remove_students)),
        _ => None,
    }
}
