use super::attendance::parse_date;
use super::people::fresh_id;
use crate::calc::{parse_score, Category};
use crate::db::{self, AssessmentRow, StudentDirectory};
use crate::ids::IdScope;
use crate::ipc::helpers::{
    ensure_storable, get_optional_str, get_required_str, get_value_map, labelled_values,
    require_course, with_workspace, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::records::{self, assessment_column, assessment_header};
use crate::store::FileStore;
use crate::table::TableKind;
use rusqlite::Connection;
use serde_json::json;
use tracing::{info, warn};

fn require_assessment(
    conn: &Connection,
    course_id: Option<&str>,
    assessment_id: &str,
) -> Result<AssessmentRow, HandlerErr> {
    let found = db::assessment_get(conn, assessment_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .filter(|a| course_id.map_or(true, |c| a.course_id == c));
    found.ok_or_else(|| {
        HandlerErr::new("not_found", format!("assessment not found: {}", assessment_id))
    })
}

fn assessments_list(
    conn: &Connection,
    _store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_course(conn, &course_id)?;
    let assessments =
        db::assessments_for_course(conn, &course_id).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(json!({ "assessments": assessments }))
}

fn assessments_create(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let name = get_required_str(params, "name")?;
    let raw_type = get_required_str(params, "type")?;
    let Some(category) = Category::from_type_name(&raw_type) else {
        return Err(HandlerErr::bad_params(format!(
            "type must be Test or Exam: {}",
            raw_type
        )));
    };
    let date = get_optional_str(params, "date")?
        .map(|d| parse_date("date", &d))
        .transpose()?;
    ensure_storable("assessment name", [name.as_str()])?;
    require_course(conn, &course_id)?;

    let assessment = AssessmentRow {
        id: fresh_id(conn, IdScope::Assessment(category))?,
        course_id: course_id.clone(),
        name,
        category,
        date,
    };
    db::assessment_insert(conn, &assessment).map_err(HandlerErr::db("db_insert_failed"))?;

    let column = assessment_header(&assessment.id, &assessment.name);
    let (event, table) = match records::add_assessment_column(store, &course_id, &column) {
        Ok(v) => v,
        Err(e) => {
            if let Err(undo) = db::assessment_delete(conn, &assessment.id) {
                warn!(assessment_id = %assessment.id, error = %undo, "failed to roll back assessment row");
            }
            return Err(e.into());
        }
    };
    info!(course_id = %course_id, assessment_id = %assessment.id, "assessment created");
    Ok(json!({ "assessment": assessment, "event": event, "table": table.view() }))
}

fn assessments_update(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let assessment_id = get_required_str(params, "assessmentId")?;
    let existing = require_assessment(conn, None, &assessment_id)?;
    let name = get_optional_str(params, "name")?.unwrap_or_else(|| existing.name.clone());
    let date = match get_optional_str(params, "date")? {
        Some(d) => Some(parse_date("date", &d)?),
        None => existing.date.clone(),
    };
    ensure_storable("assessment name", [name.as_str()])?;

    db::assessment_update(conn, &assessment_id, &name, date.as_deref())
        .map_err(HandlerErr::db("db_update_failed"))?;
    // `None` when the gradebook has no column for this assessment.
    let event = records::rename_assessment(
        store,
        &existing.course_id,
        &assessment_id,
        &assessment_header(&assessment_id, &name),
    )?;
    Ok(json!({
        "assessment": AssessmentRow { name, date, ..existing },
        "event": event,
    }))
}

fn assessments_delete(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let assessment_id = get_required_str(params, "assessmentId")?;
    require_assessment(conn, Some(&course_id), &assessment_id)?;

    // The registry row outlives the column.
    let (event, table) = records::remove_assessment(store, &course_id, &assessment_id)?;
    db::assessment_delete(conn, &assessment_id).map_err(HandlerErr::db("db_delete_failed"))?;
    Ok(json!({ "event": event, "table": table.view() }))
}

fn gradebook_open(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    require_course(conn, &course_id)?;
    let table = records::open(store, &course_id, TableKind::Gradebook)?;
    Ok(json!({ "courseId": course_id, "table": table.view() }))
}

fn gradebook_record_grades(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let assessment_id = get_required_str(params, "assessmentId")?;
    let grades = labelled_values(get_value_map(params, "grades")?, |label, raw| {
        if raw.is_empty() || parse_score(raw).is_some() {
            Ok(raw.to_string())
        } else {
            Err(HandlerErr::bad_params(format!("grade must be a number: {}", raw))
                .with_details(json!({ "label": label, "value": raw })))
        }
    })?;
    let assessment = require_assessment(conn, Some(&course_id), &assessment_id)?;

    // An existing column keeps its label even if the registry name has drifted.
    let current = records::open(store, &course_id, TableKind::Gradebook)?;
    let column = assessment_column(&current, &assessment_id)
        .map(|i| current.header()[i].clone())
        .unwrap_or_else(|| assessment_header(&assessment.id, &assessment.name));

    let (event, table) =
        records::record_grades(store, &StudentDirectory(conn), &course_id, &column, &grades)?;
    Ok(json!({ "event": event, "table": table.view() }))
}

fn gradebook_grades(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let assessment_id = get_required_str(params, "assessmentId")?;
    require_course(conn, &course_id)?;
    let grades: serde_json::Map<String, serde_json::Value> =
        records::grades_for(store, &course_id, &assessment_id)?
            .into_iter()
            .map(|(sid, v)| (sid, serde_json::Value::String(v)))
            .collect();
    Ok(json!({ "assessmentId": assessment_id, "grades": grades }))
}

fn gradebook_save(
    conn: &Connection,
    store: &FileStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let rows: Vec<Vec<String>> = params
        .get("rows")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing rows"))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| HandlerErr::bad_params(format!("rows must be arrays of strings: {e}")))
        })?;
    for row in &rows {
        ensure_storable("cell", row.iter().map(String::as_str))?;
    }
    require_course(conn, &course_id)?;
    let (event, table) = records::replace_gradebook(store, &course_id, rows)?;
    Ok(json!({ "event": event, "table": table.view() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.list" => Some(with_workspace(state, req, assessments_list)),
        "assessments.create" => Some(with_workspace(state, req, assessments_create)),
        "assessments.update" => Some(with_workspace(state, req, assessments_update)),
        "assessments.delete" => Some(with_workspace(state, req, assessments_delete)),
        "gradebook.open" => Some(with_workspace(state, req, gradebook_open)),
        "gradebook.recordGrades" => Some(with_workspace(state, req, gradebook_record_grades)),
        "gradebook.grades" => Some(with_workspace(state, req, gradebook_grades)),
        "gradebook.save" => Some(with_workspace(state, req, gradebook_save)),
        _ => None,
    }
}
