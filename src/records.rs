use crate::reconcile::{reconcile, Directory, ReconcileError, RowLabel};
use crate::store::{StoreError, TableStore};
use crate::table::{cell_at, Table, TableKind};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// What a mutating operation changed, returned to the caller instead of a refresh callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TableEvent {
    TablesCreated {
        course_id: String,
    },
    TablesDestroyed {
        course_id: String,
        removed: usize,
    },
    TablesRenamed {
        from: String,
        to: String,
        moved: usize,
    },
    RowsSeeded {
        course_id: String,
        added: usize,
    },
    RowsDropped {
        course_id: String,
        removed: usize,
    },
    ColumnRecorded {
        course_id: String,
        kind: TableKind,
        column: String,
        column_added: bool,
        rows_added: usize,
        rows_updated: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        replaced: Option<String>,
    },
    ColumnAdded {
        course_id: String,
        kind: TableKind,
        column: String,
        added: bool,
    },
    ColumnRemoved {
        course_id: String,
        kind: TableKind,
        column: String,
        removed: bool,
    },
    ColumnRenamed {
        course_id: String,
        kind: TableKind,
        from: String,
        to: String,
    },
    TableReplaced {
        course_id: String,
        kind: TableKind,
        rows: usize,
    },
}

pub fn assessment_header(assessment_id: &str, name: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        assessment_id.to_string()
    } else {
        format!("{assessment_id} - {name}")
    }
}

/// Assessment columns are addressed by ID; the label after it may change.
pub fn column_is_assessment(column: &str, assessment_id: &str) -> bool {
    column == assessment_id
        || column
            .strip_prefix(assessment_id)
            .is_some_and(|rest| rest.starts_with(" - "))
}

/// Index of the scored column holding `assessment_id`.
pub fn assessment_column(table: &Table, assessment_id: &str) -> Option<usize> {
    table
        .header()
        .iter()
        .enumerate()
        .skip(table.fixed_width())
        .find(|(_, h)| column_is_assessment(h, assessment_id))
        .map(|(i, _)| i)
}

pub fn create_tables(store: &dyn TableStore, course_id: &str) -> Result<TableEvent, RecordError> {
    for kind in [TableKind::Attendance, TableKind::Gradebook] {
        store.save(course_id, &Table::empty(kind))?;
    }
    Ok(TableEvent::TablesCreated {
        course_id: course_id.to_string(),
    })
}

pub fn destroy_tables(store: &dyn TableStore, course_id: &str) -> Result<TableEvent, RecordError> {
    let mut removed = 0;
    for kind in [TableKind::Attendance, TableKind::Gradebook] {
        if store.delete(course_id, kind)? {
            removed += 1;
        }
    }
    info!(course_id, removed, "destroyed course tables");
    Ok(TableEvent::TablesDestroyed {
        course_id: course_id.to_string(),
        removed,
    })
}

/// Moves both course tables to a new course key. If the second move fails
/// the first is moved back before the error is returned.
pub fn rename_tables(store: &dyn TableStore, from: &str, to: &str) -> Result<TableEvent, RecordError> {
    let mut moved = Vec::new();
    for kind in [TableKind::Attendance, TableKind::Gradebook] {
        match store.rename(from, to, kind) {
            Ok(true) => moved.push(kind),
            Ok(false) => {}
            Err(e) => {
                for done in moved {
                    if let Err(undo) = store.rename(to, from, done) {
                        warn!(from, to, kind = ?done, error = %undo, "failed to move table back");
                    }
                }
                return Err(e.into());
            }
        }
    }
    info!(from, to, moved = moved.len(), "renamed course tables");
    Ok(TableEvent::TablesRenamed {
        from: from.to_string(),
        to: to.to_string(),
        moved: moved.len(),
    })
}

/// Adds one empty row per newly enrolled student to both course tables.
pub fn seed_rows(
    store: &dyn TableStore,
    course_id: &str,
    students: &[(String, String)],
) -> Result<TableEvent, RecordError> {
    let mut added = 0;
    for kind in [TableKind::Attendance, TableKind::Gradebook] {
        let mut table = store.load(course_id, kind)?;
        table.normalize();
        let n = students
            .iter()
            .filter(|(id, name)| table.push_row(id, name))
            .count();
        table.recompute();
        store.save(course_id, &table)?;
        added = added.max(n);
    }
    Ok(TableEvent::RowsSeeded {
        course_id: course_id.to_string(),
        added,
    })
}

pub fn drop_rows(
    store: &dyn TableStore,
    course_id: &str,
    student_ids: &[String],
) -> Result<TableEvent, RecordError> {
    let mut removed = 0;
    for kind in [TableKind::Attendance, TableKind::Gradebook] {
        let mut table = store.load(course_id, kind)?;
        removed = removed.max(table.remove_rows(student_ids));
        store.save(course_id, &table)?;
    }
    Ok(TableEvent::RowsDropped {
        course_id: course_id.to_string(),
        removed,
    })
}

pub fn open(store: &dyn TableStore, course_id: &str, kind: TableKind) -> Result<Table, RecordError> {
    Ok(store.load(course_id, kind)?)
}

/// Records one attendance date. When `previous_date` names a different
/// column, that column is dropped after the merge so the date moves.
pub fn record_attendance(
    store: &dyn TableStore,
    directory: &dyn Directory,
    course_id: &str,
    date: &str,
    statuses: &[(RowLabel, String)],
    previous_date: Option<&str>,
) -> Result<(TableEvent, Table), RecordError> {
    let existing = store.load(course_id, TableKind::Attendance)?;
    let merged = reconcile(&existing, date, statuses, directory)?;
    let mut table = merged.table;

    let replaced = previous_date
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != date.trim())
        .and_then(|p| table.remove_column(p).map(|_| p.to_string()));

    store.save(course_id, &table)?;
    info!(
        course_id,
        date,
        rows_added = merged.rows_added,
        replaced = replaced.as_deref().unwrap_or(""),
        "recorded attendance"
    );
    Ok((
        TableEvent::ColumnRecorded {
            course_id: course_id.to_string(),
            kind: TableKind::Attendance,
            column: date.trim().to_string(),
            column_added: merged.column_added,
            rows_added: merged.rows_added,
            rows_updated: merged.rows_updated,
            replaced,
        },
        table,
    ))
}

pub fn delete_attendance_date(
    store: &dyn TableStore,
    course_id: &str,
    date: &str,
) -> Result<(TableEvent, Table), RecordError> {
    let mut table = store.load(course_id, TableKind::Attendance)?;
    let removed = table.remove_column(date.trim()).is_some();
    if removed {
        store.save(course_id, &table)?;
    }
    Ok((
        TableEvent::ColumnRemoved {
            course_id: course_id.to_string(),
            kind: TableKind::Attendance,
            column: date.trim().to_string(),
            removed,
        },
        table,
    ))
}

pub fn add_assessment_column(
    store: &dyn TableStore,
    course_id: &str,
    column: &str,
) -> Result<(TableEvent, Table), RecordError> {
    let mut table = store.load(course_id, TableKind::Gradebook)?;
    let added = table.add_column(column, "");
    table.recompute();
    store.save(course_id, &table)?;
    Ok((
        TableEvent::ColumnAdded {
            course_id: course_id.to_string(),
            kind: TableKind::Gradebook,
            column: column.to_string(),
            added,
        },
        table,
    ))
}

/// Merges one assessment's grades and recomputes every average.
pub fn record_grades(
    store: &dyn TableStore,
    directory: &dyn Directory,
    course_id: &str,
    column: &str,
    grades: &[(RowLabel, String)],
) -> Result<(TableEvent, Table), RecordError> {
    let existing = store.load(course_id, TableKind::Gradebook)?;
    let merged = reconcile(&existing, column, grades, directory)?;
    let mut table = merged.table;
    table.recompute();
    store.save(course_id, &table)?;
    info!(course_id, column, rows = table.rows().len(), "recorded grades");
    Ok((
        TableEvent::ColumnRecorded {
            course_id: course_id.to_string(),
            kind: TableKind::Gradebook,
            column: column.to_string(),
            column_added: merged.column_added,
            rows_added: merged.rows_added,
            rows_updated: merged.rows_updated,
            replaced: None,
        },
        table,
    ))
}

/// Drops an assessment column and recomputes the averages it fed.
pub fn remove_assessment(
    store: &dyn TableStore,
    course_id: &str,
    assessment_id: &str,
) -> Result<(TableEvent, Table), RecordError> {
    let mut table = store.load(course_id, TableKind::Gradebook)?;
    let removed = table.remove_column_where(|h| column_is_assessment(h, assessment_id));
    if removed.is_some() {
        table.recompute();
        store.save(course_id, &table)?;
    }
    let event = TableEvent::ColumnRemoved {
        course_id: course_id.to_string(),
        kind: TableKind::Gradebook,
        removed: removed.is_some(),
        column: removed
            .map(|(_, name)| name)
            .unwrap_or_else(|| assessment_id.to_string()),
    };
    Ok((event, table))
}

pub fn rename_assessment(
    store: &dyn TableStore,
    course_id: &str,
    assessment_id: &str,
    new_column: &str,
) -> Result<Option<TableEvent>, RecordError> {
    let mut table = store.load(course_id, TableKind::Gradebook)?;
    let Some(from) =
        table.rename_column_where(|h| column_is_assessment(h, assessment_id), new_column)
    else {
        return Ok(None);
    };
    if from != new_column {
        store.save(course_id, &table)?;
    }
    Ok(Some(TableEvent::ColumnRenamed {
        course_id: course_id.to_string(),
        kind: TableKind::Gradebook,
        from,
        to: new_column.to_string(),
    }))
}

/// Grades for one assessment keyed by student ID, in row order.
pub fn grades_for(
    store: &dyn TableStore,
    course_id: &str,
    assessment_id: &str,
) -> Result<Vec<(String, String)>, RecordError> {
    let table = store.load(course_id, TableKind::Gradebook)?;
    let Some(idx) = assessment_column(&table, assessment_id) else {
        return Ok(Vec::new());
    };
    Ok(table
        .rows()
        .iter()
        .map(|r| (cell_at(r, 0).to_string(), cell_at(r, idx).to_string()))
        .collect())
}

/// Replaces every gradebook row from a full grid edit; averages are recomputed,
/// whatever the grid held in the derived column.
pub fn replace_gradebook(
    store: &dyn TableStore,
    course_id: &str,
    rows: Vec<Vec<String>>,
) -> Result<(TableEvent, Table), RecordError> {
    let mut table = store.load(course_id, TableKind::Gradebook)?;
    let n = table.replace_rows(rows);
    table.recompute();
    store.save(course_id, &table)?;
    Ok((
        TableEvent::TableReplaced {
            course_id: course_id.to_string(),
            kind: TableKind::Gradebook,
            rows: n,
        },
        table,
    ))
}
