use crate::calc::Category;
use crate::db;
use crate::ids::{self, IdScope};
use crate::ipc::helpers::{
    ensure_storable, get_optional_str, get_required_str, with_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::FileStore;
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashSet;

fn existing_ids(conn: &Connection, scope: IdScope) -> Result<HashSet<String>, HandlerErr> {
    let ids = match scope {
        IdScope::Assessment(category) => db::assessment_ids(conn, category),
        IdScope::Staff => db::staff_ids(conn),
        IdScope::Student => db::student_ids(conn),
    };
    ids.map_err(HandlerErr::db("db_query_failed"))
}

/// A fresh ID for `scope`, or `conflict` once all ten thousand codes are taken.
pub fn fresh_id(conn: &Connection, scope: IdScope) -> Result<String, HandlerErr> {
    let existing = existing_ids(conn, scope)?;
    if ids::is_saturated(&existing, scope.prefix()) {
        return Err(HandlerErr::new(
            "conflict",
            format!("no free {} IDs remain", scope.prefix()),
        ));
    }
    Ok(ids::generate(
        &mut rand::thread_rng(),
        &existing,
        scope.prefix(),
    ))
}

/// Uses the caller's ID when given, checking it against the scope; otherwise generates one.
fn claim_id(
    conn: &Connection,
    scope: IdScope,
    requested: Option<String>,
) -> Result<String, HandlerErr> {
    let Some(id) = requested else {
        return fresh_id(conn, scope);
    };
    ensure_storable("id", [id.as_str()])?;
    if existing_ids(conn, scope)?.contains(&id) {
        return Err(HandlerErr::new("conflict", format!("id already in use: {}", id))
            .with_details(json!({ "id": id })));
    }
    Ok(id)
}

fn students_list(
    conn: &Connection,
    _store: &FileStore,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let students = db::students_list(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    _store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?;
    let last_name = get_required_str(params, "lastName")?;
    ensure_storable("student name", [first_name.as_str(), last_name.as_str()])?;
    let student_id = claim_id(conn, IdScope::Student, get_optional_str(params, "studentId")?)?;

    db::student_insert(conn, &student_id, &first_name, &last_name)
        .map_err(HandlerErr::db("db_insert_failed"))?;
    Ok(json!({ "studentId": student_id }))
}

fn staff_list(
    conn: &Connection,
    _store: &FileStore,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let staff = db::staff_list(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "staff": staff }))
}

fn staff_create(
    conn: &Connection,
    _store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let staff_id = claim_id(conn, IdScope::Staff, get_optional_str(params, "staffId")?)?;
    db::staff_insert(conn, &staff_id, &name).map_err(HandlerErr::db("db_insert_failed"))?;
    Ok(json!({ "staffId": staff_id }))
}

fn ids_generate(
    conn: &Connection,
    _store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let raw = get_required_str(params, "scope")?;
    let Some(scope) = IdScope::parse(&raw) else {
        return Err(HandlerErr::bad_params(format!(
            "scope must be test, exam, staff or student: {}",
            raw
        )));
    };
    let id = fresh_id(conn, scope)?;
    let category = match scope {
        IdScope::Assessment(c) => Some(c),
        _ => None::<Category>,
    };
    Ok(json!({ "id": id, "prefix": scope.prefix(), "category": category }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(with_workspace(state, req, students_list)),
        "students.create" => Some(with_workspace(state, req, students_create)),
        "staff.list" => Some(with_workspace(state, req, staff_list)),
        "staff.create" => Some(with_workspace(state, req, staff_create)),
        "ids.generate" => Some(with_workspace(state, req, ids_generate)),
        _ => None,
    }
}
