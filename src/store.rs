use crate::table::{Table, TableKind};
use anyhow::Context;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid course id {0:?}")]
    InvalidKey(String),
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Whole-table persistence keyed by owning course.
pub trait TableStore {
    /// Never fails for a table that was never saved; that loads as the fixed header.
    fn load(&self, course_id: &str, kind: TableKind) -> Result<Table, StoreError>;
    fn save(&self, course_id: &str, table: &Table) -> Result<(), StoreError>;
    /// Returns whether anything was removed.
    fn delete(&self, course_id: &str, kind: TableKind) -> Result<bool, StoreError>;
    /// Moves a table to another course key. Returns whether there was a table to move;
    /// an existing table under `to` is never overwritten.
    fn rename(&self, from: &str, to: &str, kind: TableKind) -> Result<bool, StoreError>;
}

fn target_exists(path: PathBuf) -> StoreError {
    StoreError::Write {
        path,
        source: io::Error::new(io::ErrorKind::AlreadyExists, "table already exists"),
    }
}

pub fn validate_key(course_id: &str) -> Result<(), StoreError> {
    let ok = !course_id.is_empty()
        && course_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(course_id.to_string()))
    }
}

/// Text files under `<root>/attendance` and `<root>/grades`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        for kind in [TableKind::Attendance, TableKind::Gradebook] {
            let dir = root.join(kind.dir_name());
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.to_string_lossy()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, course_id: &str, kind: TableKind) -> Result<PathBuf, StoreError> {
        validate_key(course_id)?;
        Ok(self
            .root
            .join(kind.dir_name())
            .join(kind.file_name(course_id)))
    }
}

impl TableStore for FileStore {
    fn load(&self, course_id: &str, kind: TableKind) -> Result<Table, StoreError> {
        let path = self.path(course_id, kind)?;
        match std::fs::read(&path) {
            Ok(bytes) => {
                let table = Table::parse(kind, &String::from_utf8_lossy(&bytes));
                debug!(course_id, ?kind, rows = table.rows().len(), "loaded table");
                Ok(table)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Table::empty(kind)),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    fn save(&self, course_id: &str, table: &Table) -> Result<(), StoreError> {
        let path = self.path(course_id, table.kind())?;
        let tmp = path.with_extension("txt.saving");
        let write = |p: &Path| -> io::Result<()> {
            if let Some(parent) = p.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(p, table.to_text())
        };
        write(&tmp).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, &path).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;
        info!(
            course_id,
            kind = ?table.kind(),
            columns = table.width(),
            rows = table.rows().len(),
            "saved table"
        );
        Ok(())
    }

    fn delete(&self, course_id: &str, kind: TableKind) -> Result<bool, StoreError> {
        let path = self.path(course_id, kind)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Write { path, source }),
        }
    }

    fn rename(&self, from: &str, to: &str, kind: TableKind) -> Result<bool, StoreError> {
        let src = self.path(from, kind)?;
        let dst = self.path(to, kind)?;
        if !src.exists() {
            return Ok(false);
        }
        if dst.exists() {
            return Err(target_exists(dst));
        }
        std::fs::rename(&src, &dst).map_err(|source| StoreError::Write {
            path: dst.clone(),
            source,
        })?;
        info!(from, to, ?kind, "moved table");
        Ok(true)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(prefix: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "{}-{}",
            prefix,
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&p).expect("create temp dir");
        p
    }

    #[test]
    fn missing_file_loads_fixed_header() {
        let store = FileStore::open(&temp_dir("rollbook-store-missing")).expect("open");
        let t = store.load("MATH10", TableKind::Gradebook).expect("load");
        assert_eq!(t.header(), &["Student ID", "Student Name", "Average"]);
        assert!(t.rows().is_empty());
    }

    #[test]
    fn save_rewrites_whole_file() {
        let root = temp_dir("rollbook-store-save");
        let store = FileStore::open(&root).expect("open");
        let mut t = Table::empty(TableKind::Attendance);
        t.push_row("S1", "Ann");
        store.save("BIO9", &t).expect("save");
        t.add_column("2024-01-01", "Present");
        store.save("BIO9", &t).expect("save again");

        let text = std::fs::read_to_string(root.join("attendance/BIO9_attendance.txt")).unwrap();
        assert_eq!(text, "Student ID,Student Name,2024-01-01\nS1,Ann,Present\n");
        assert!(!root.join("attendance/BIO9_attendance.txt.saving").exists());

        assert!(store.delete("BIO9", TableKind::Attendance).unwrap());
        assert!(!store.delete("BIO9", TableKind::Attendance).unwrap());
    }

    #[test]
    fn keys_cannot_escape_the_workspace() {
        let store = FileStore::open(&temp_dir("rollbook-store-keys")).expect("open");
        for bad in ["", "../x", "a/b", "a b", "a.b"] {
            assert!(matches!(
                store.load(bad, TableKind::Attendance),
                Err(StoreError::InvalidKey(_))
            ));
        }
        assert!(store.path("CHEM11-A_2", TableKind::Attendance).is_ok());
    }

    #[test]
    fn rename_moves_file_and_refuses_to_clobber() {
        let root = temp_dir("rollbook-store-rename");
        let store = FileStore::open(&root).expect("open");
        let mut t = Table::empty(TableKind::Gradebook);
        t.push_row("S1", "Ann");
        store.save("CHEM11", &t).expect("save");

        assert!(store.rename("CHEM11", "SCH3U", TableKind::Gradebook).unwrap());
        assert!(!root.join("grades/CHEM11_gradebook.txt").exists());
        assert_eq!(store.load("SCH3U", TableKind::Gradebook).unwrap().rows().len(), 1);
        assert!(!store.rename("CHEM11", "SCH3U", TableKind::Attendance).unwrap());

        store.save("BIO9", &Table::empty(TableKind::Gradebook)).expect("save");
        assert!(matches!(
            store.rename("BIO9", "SCH3U", TableKind::Gradebook),
            Err(StoreError::Write { .. })
        ));
        assert_eq!(store.load("SCH3U", TableKind::Gradebook).unwrap().rows().len(), 1);
    }

    #[test]
    fn open_failure_names_the_directory() {
        let root = temp_dir("rollbook-store-open");
        let blocked = root.join("not-a-dir");
        std::fs::write(&blocked, "file").unwrap();
        let err = FileStore::open(&blocked).unwrap_err();
        assert!(format!("{err:#}").contains("not-a-dir/attendance"), "{err:#}");
    }
}
