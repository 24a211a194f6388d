use crate::calc::{Aggregate, WeightedAverage};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

pub const DELIMITER: char = ',';

/// Derived column placed right after the identity pair and recomputed from
/// every column to its right.
#[derive(Debug, Clone, Copy)]
pub struct Derived {
    pub name: &'static str,
    pub policy: &'static dyn Aggregate,
}

/// Static shape shared by every table of one kind.
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub identity: [&'static str; 2],
    pub derived: Option<Derived>,
    /// Value given to already-known columns of a row that first appears in an edit.
    pub backfill: &'static str,
}

impl Layout {
    pub fn fixed_width(&self) -> usize {
        self.identity.len() + usize::from(self.derived.is_some())
    }

    pub fn fixed_header(&self) -> Vec<String> {
        let mut out: Vec<String> = self.identity.iter().map(|s| s.to_string()).collect();
        if let Some(d) = self.derived {
            out.push(d.name.to_string());
        }
        out
    }
}

pub static ATTENDANCE: Layout = Layout {
    identity: ["Student ID", "Student Name"],
    derived: None,
    backfill: "Joined Late",
};

pub static GRADEBOOK: Layout = Layout {
    identity: ["Student ID", "Student Name"],
    derived: Some(Derived {
        name: "Average",
        policy: &WeightedAverage,
    }),
    backfill: "",
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TableKind {
    Attendance,
    Gradebook,
}

impl TableKind {
    pub fn layout(self) -> &'static Layout {
        match self {
            TableKind::Attendance => &ATTENDANCE,
            TableKind::Gradebook => &GRADEBOOK,
        }
    }

    pub fn dir_name(self) -> &'static str {
        match self {
            TableKind::Attendance => "attendance",
            TableKind::Gradebook => "grades",
        }
    }

    pub fn file_name(self, course_id: &str) -> String {
        match self {
            TableKind::Attendance => format!("{course_id}_attendance.txt"),
            TableKind::Gradebook => format!("{course_id}_gradebook.txt"),
        }
    }
}

/// Header plus keyed rows. Cell 0 of each row is its key.
#[derive(Debug, Clone)]
pub struct Table {
    pub(crate) kind: TableKind,
    pub(crate) header: Vec<String>,
    pub(crate) rows: Vec<Vec<String>>,
}

/// Shape handed to grid widgets and report consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub fn cell_at(row: &[String], idx: usize) -> &str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

/// A value can be stored when it does not break the line/cell framing.
pub fn is_storable(value: &str) -> bool {
    !value.contains([DELIMITER, '\r', '\n'])
}

fn split_line(line: &str) -> Vec<String> {
    line.split(DELIMITER).map(|c| c.trim().to_string()).collect()
}

impl Table {
    pub fn empty(kind: TableKind) -> Self {
        Self {
            kind,
            header: kind.layout().fixed_header(),
            rows: Vec::new(),
        }
    }

    pub fn parse(kind: TableKind, text: &str) -> Self {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return Self::empty(kind);
        };

        let layout = kind.layout();
        let mut header = split_line(first);
        let fixed = layout.fixed_header();
        if header.len() < fixed.len() {
            header.extend(fixed[header.len()..].iter().cloned());
        }

        let mut table = Self {
            kind,
            header,
            rows: Vec::new(),
        };
        let mut seen: HashSet<String> = HashSet::new();
        for (n, line) in lines.enumerate() {
            let cells = split_line(line);
            let key = cell_at(&cells, 0);
            if key.is_empty() {
                warn!(kind = ?kind, line = n + 2, "skipping row without a key");
                continue;
            }
            if !seen.insert(key.to_string()) {
                warn!(kind = ?kind, key, "dropping duplicate row");
                continue;
            }
            table.rows.push(cells);
        }
        table
    }

    pub fn to_text(&self) -> String {
        let width = self.width();
        let mut out = String::new();
        out.push_str(&self.header.join(","));
        out.push('\n');
        for row in &self.rows {
            let cells: Vec<&str> = (0..width).map(|i| cell_at(row, i).trim()).collect();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    pub fn kind(&self) -> TableKind {
        self.kind
    }

    pub fn layout(&self) -> &'static Layout {
        self.kind.layout()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn fixed_width(&self) -> usize {
        self.layout().fixed_width()
    }

    pub fn dynamic_columns(&self) -> &[String] {
        &self.header[self.fixed_width().min(self.header.len())..]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    pub fn row_index(&self, key: &str) -> Option<usize> {
        self.rows.iter().position(|r| cell_at(r, 0) == key)
    }

    #[cfg(test)]
    pub fn row(&self, key: &str) -> Option<&[String]> {
        self.row_index(key).map(|i| self.rows[i].as_slice())
    }

    /// Appends a row with empty cells for every column. Returns false when the key exists.
    pub fn push_row(&mut self, id: &str, name: &str) -> bool {
        if id.is_empty() || self.row_index(id).is_some() {
            return false;
        }
        let mut cells = vec![String::new(); self.width()];
        cells[0] = id.to_string();
        cells[1] = name.to_string();
        self.rows.push(cells);
        true
    }

    pub fn remove_rows(&mut self, keys: &[String]) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| !keys.iter().any(|k| k == cell_at(r, 0)));
        before - self.rows.len()
    }

    /// Replaces every data row, keeping the header. Keyless and duplicate rows are dropped.
    pub fn replace_rows(&mut self, rows: Vec<Vec<String>>) -> usize {
        let mut seen: HashSet<String> = HashSet::new();
        self.rows = rows
            .into_iter()
            .map(|r| r.into_iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
            .filter(|r| {
                let key = cell_at(r, 0);
                !key.is_empty() && seen.insert(key.to_string())
            })
            .collect();
        self.normalize();
        self.rows.len()
    }

    #[cfg(test)]
    pub fn set_cell(&mut self, key: &str, column: usize, value: &str) -> bool {
        let width = self.width();
        if column >= width {
            return false;
        }
        let Some(i) = self.row_index(key) else {
            return false;
        };
        let row = &mut self.rows[i];
        if row.len() < width {
            row.resize(width, String::new());
        }
        row[column] = value.trim().to_string();
        true
    }

    /// Pads short rows and truncates long ones to the header width.
    pub fn normalize(&mut self) {
        let width = self.width();
        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    /// Rewrites the derived column of every row. No-op for layouts without one.
    pub fn recompute(&mut self) {
        let Some(derived) = self.layout().derived else {
            return;
        };
        self.normalize();
        let pos = self.layout().identity.len();
        let first_scored = self.fixed_width();
        for row in &mut self.rows {
            row[pos] = derived.policy.aggregate(&self.header, row, first_scored);
        }
    }

    pub fn view(&self) -> TableView {
        let width = self.width();
        TableView {
            columns: self.header.clone(),
            rows: self
                .rows
                .iter()
                .map(|r| (0..width).map(|i| cell_at(r, i).to_string()).collect())
                .collect(),
        }
    }
}
