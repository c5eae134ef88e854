use crate::util::new_run_dir;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

/// One execution's artifact directory: the executed cell, the table copy,
/// any produced plot, and a manifest describing them.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub id: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    #[serde(rename = "type")]
    pub kind: String, // "image" | "table_csv" | "code"
    pub path: String, // relative path under the run dir
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn create_new_run(base: Option<&Path>) -> Result<RunInfo> {
    let dir = new_run_dir(base)?;
    let id = dir.file_name().unwrap().to_string_lossy().to_string();
    let manifest_path = dir.join("manifest.json");
    fs::write(&manifest_path, serde_json::to_vec_pretty(&Manifest::default())?)?;
    Ok(RunInfo { id, dir })
}

pub fn append_manifest(run_dir: &Path, entry: ManifestEntry) -> Result<()> {
    let path = run_dir.join("manifest.json");
    let mut manifest: Manifest = if path.exists() {
        serde_json::from_slice(&fs::read(&path)?).unwrap_or_default()
    } else {
        Manifest::default()
    };
    manifest.artifacts.push(entry);
    fs::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    Ok(())
}

/// Recent runs, newest first.
pub fn list_runs(root: &Path, limit: usize) -> Result<Vec<RunInfo>> {
    let mut runs = vec![];
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let modified = entry.metadata()?.modified()?;
            runs.push((modified, RunInfo {
                id: entry.file_name().to_string_lossy().to_string(),
                dir: entry.path(),
            }));
        }
    }
    runs.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(runs.into_iter().take(limit).map(|(_, r)| r).collect())
}
