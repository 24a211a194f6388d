use crate::table::{cell_at, Table};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

/// Maps an entity ID to the display name used when a row has to be invented.
pub trait Directory {
    fn display_name(&self, id: &str) -> Option<String>;
}

impl Directory for HashMap<String, String> {
    fn display_name(&self, id: &str) -> Option<String> {
        self.get(id).cloned()
    }
}

/// Row label as sent by entry forms: `"<ID> - <Name>"` or a bare ID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLabel {
    pub id: String,
    pub name: Option<String>,
}

impl RowLabel {
    pub fn parse(label: &str) -> Self {
        match label.split_once(" - ") {
            Some((id, name)) => Self {
                id: id.trim().to_string(),
                name: Some(name.trim().to_string()).filter(|n| !n.is_empty()),
            },
            None => Self {
                id: label.trim().to_string(),
                name: None,
            },
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("column name must not be empty")]
    EmptyColumn,
    #[error("column {0:?} is fixed and cannot be edited")]
    FixedColumn(String),
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub table: Table,
    pub column_added: bool,
    pub rows_added: usize,
    pub rows_updated: usize,
}

/// Merges a complete value-set for one column into `existing`.
///
/// Dynamic columns come out sorted ascending. Rows first seen in `incoming`
/// get the layout back-fill for every other known column.
pub fn reconcile(
    existing: &Table,
    column: &str,
    incoming: &[(RowLabel, String)],
    directory: &dyn Directory,
) -> Result<Reconciled, ReconcileError> {
    let column = column.trim();
    if column.is_empty() {
        return Err(ReconcileError::EmptyColumn);
    }
    let fixed = existing.fixed_width();
    if existing.header[..fixed].iter().any(|h| h == column) {
        return Err(ReconcileError::FixedColumn(column.to_string()));
    }

    let mut known: BTreeSet<String> = existing.dynamic_columns().iter().cloned().collect();
    let column_added = known.insert(column.to_string());
    let known: Vec<String> = known.into_iter().collect();

    let mut header: Vec<String> = existing.header[..fixed].to_vec();
    header.extend(known.iter().cloned());
    let edit_idx = header
        .iter()
        .position(|h| h == column)
        .unwrap_or(header.len() - 1);

    let old_index: HashMap<&str, usize> = existing
        .header
        .iter()
        .enumerate()
        .map(|(i, h)| (h.as_str(), i))
        .collect();

    let mut rows: Vec<Vec<String>> = Vec::with_capacity(existing.rows.len() + incoming.len());
    let mut by_key: HashMap<String, usize> = HashMap::new();
    for old in &existing.rows {
        let mut row: Vec<String> = (0..fixed).map(|i| cell_at(old, i).to_string()).collect();
        for name in &known {
            let v = old_index
                .get(name.as_str())
                .map(|&i| cell_at(old, i))
                .unwrap_or("");
            row.push(v.to_string());
        }
        by_key.insert(row[0].clone(), rows.len());
        rows.push(row);
    }

    let backfill = existing.layout().backfill;
    let mut rows_added = 0;
    let mut rows_updated = 0;
    for (label, value) in incoming {
        if label.id.is_empty() {
            warn!(column, "ignoring value without a row key");
            continue;
        }
        let at = match by_key.get(&label.id) {
            Some(&i) => {
                rows_updated += 1;
                i
            }
            None => {
                let name = label
                    .name
                    .clone()
                    .or_else(|| directory.display_name(&label.id))
                    .unwrap_or_default();
                let mut row = vec![label.id.clone(), name];
                row.resize(fixed, String::new());
                for c in &known {
                    row.push(if c == column {
                        String::new()
                    } else {
                        backfill.to_string()
                    });
                }
                by_key.insert(label.id.clone(), rows.len());
                rows.push(row);
                rows_added += 1;
                rows.len() - 1
            }
        };
        rows[at][edit_idx] = value.trim().to_string();
    }

    debug!(
        column,
        column_added, rows_added, rows_updated, "reconciled column edit"
    );

    Ok(Reconciled {
        table: Table {
            kind: existing.kind,
            header,
            rows,
        },
        column_added,
        rows_added,
        rows_updated,
    })
}
