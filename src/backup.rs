use anyhow::{anyhow, Context};
use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/rollbook.sqlite3";
const TABLE_DIRS: [&str; 3] = ["attendance", "grades", "reports"];
pub const BUNDLE_FORMAT_V1: &str = "rollbook-workspace-v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEntry {
    path: String,
    sha256: String,
    size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format: String,
    app_version: String,
    exported_at: String,
    entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub entry_count: usize,
    pub removed_count: usize,
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// `(entry name, absolute path)` of every table and report file in the workspace.
fn table_files(workspace_path: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut out = Vec::new();
    for dir in TABLE_DIRS {
        let root = workspace_path.join(dir);
        if !root.is_dir() {
            continue;
        }
        let mut names = Vec::new();
        for ent in std::fs::read_dir(&root)
            .with_context(|| format!("failed to list {}", root.to_string_lossy()))?
        {
            let p = ent?.path();
            if !p.is_file() {
                continue;
            }
            let Some(name) = p.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if name.ends_with(".txt") {
                names.push((format!("{dir}/{name}"), p.clone()));
            }
        }
        // Deterministic entry order.
        names.sort();
        out.extend(names);
    }
    Ok(out)
}

/// `(entry name, absolute path)` for every file a bundle carries.
fn bundle_sources(workspace_path: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let db_path = workspace_path.join(DB_FILE);
    if !db_path.is_file() {
        return Err(anyhow!(
            "workspace database not found: {}",
            db_path.to_string_lossy()
        ));
    }
    let mut out = vec![(DB_ENTRY.to_string(), db_path)];
    out.extend(table_files(workspace_path)?);
    Ok(out)
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let sources = bundle_sources(workspace_path)?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = Vec::with_capacity(sources.len());
    for (name, path) in &sources {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.to_string_lossy()))?;
        zip.start_file(name.as_str(), opts)
            .with_context(|| format!("failed to start entry {name}"))?;
        zip.write_all(&bytes)
            .with_context(|| format!("failed to write entry {name}"))?;
        entries.push(ManifestEntry {
            path: name.clone(),
            sha256: sha256_hex(&bytes),
            size: bytes.len() as u64,
        });
    }

    let manifest = Manifest {
        format: BUNDLE_FORMAT_V1.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
        entries,
    };
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.finish().context("failed to finalize zip bundle")?;
    info!(
        out = %out_path.to_string_lossy(),
        entries = manifest.entries.len(),
        "exported workspace bundle"
    );

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: manifest.entries.len() + 1,
    })
}

/// Restores a bundle into `workspace_path`. Every entry is checked against the
/// manifest before anything on disk is replaced. Table and report files the
/// bundle does not carry are removed, so the workspace matches the bundle.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: Manifest =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
    if manifest.format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", manifest.format));
    }
    if !manifest.entries.iter().any(|e| e.path == DB_ENTRY) {
        return Err(anyhow!("bundle missing {}", DB_ENTRY));
    }

    let mut staged = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let target = entry_target(workspace_path, &entry.path)?;
        let mut bytes = Vec::new();
        archive
            .by_name(&entry.path)
            .with_context(|| format!("bundle missing {}", entry.path))?
            .read_to_end(&mut bytes)
            .with_context(|| format!("failed to read {}", entry.path))?;
        let actual = sha256_hex(&bytes);
        if actual != entry.sha256 {
            return Err(anyhow!(
                "checksum mismatch for {}: expected {}, got {}",
                entry.path,
                entry.sha256,
                actual
            ));
        }
        staged.push((target, bytes));
    }

    let stale: Vec<PathBuf> = table_files(workspace_path)?
        .into_iter()
        .map(|(_, path)| path)
        .filter(|path| !staged.iter().any(|(target, _)| target == path))
        .collect();

    for (target, bytes) in &staged {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create directory {}", parent.to_string_lossy())
            })?;
        }
        let tmp = target.with_extension("importing");
        let mut out = File::create(&tmp)
            .with_context(|| format!("failed to create {}", tmp.to_string_lossy()))?;
        out.write_all(bytes)
            .with_context(|| format!("failed to write {}", tmp.to_string_lossy()))?;
        out.flush()
            .with_context(|| format!("failed to flush {}", tmp.to_string_lossy()))?;
        std::fs::rename(&tmp, target)
            .with_context(|| format!("failed to move {} into place", target.to_string_lossy()))?;
    }
    for path in &stale {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove {}", path.to_string_lossy()))?;
    }
    info!(
        workspace = %workspace_path.to_string_lossy(),
        entries = staged.len(),
        removed = stale.len(),
        "imported workspace bundle"
    );

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        entry_count: staged.len(),
        removed_count: stale.len(),
    })
}

/// Maps a bundle entry name onto the workspace, refusing anything outside
/// the known directories.
fn entry_target(workspace_path: &Path, name: &str) -> anyhow::Result<PathBuf> {
    if name == DB_ENTRY {
        return Ok(workspace_path.join(DB_FILE));
    }
    let Some((dir, file)) = name.split_once('/') else {
        return Err(anyhow!("unexpected bundle entry: {name}"));
    };
    let file_ok = !file.is_empty()
        && !file.contains('/')
        && !file.contains('\\')
        && !file.starts_with('.')
        && file.ends_with(".txt");
    if !TABLE_DIRS.contains(&dir) || !file_ok {
        return Err(anyhow!("unexpected bundle entry: {name}"));
    }
    Ok(workspace_path.join(dir).join(file))
}
