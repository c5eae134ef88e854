use anyhow::Result;
use directories::ProjectDirs;
use std::{env, fs, path::{Path, PathBuf}};
use uuid::Uuid;

pub fn app_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("io", "Galileo", "Galileo").ok_or_else(|| anyhow::anyhow!("ProjectDirs unavailable"))
}

/// Root directory for run artifacts; `GALILEO_RUNS_DIR` overrides the platform default.
pub fn default_runs_root() -> Result<PathBuf> {
    if let Ok(custom_dir) = env::var("GALILEO_RUNS_DIR") {
        let root = PathBuf::from(custom_dir);
        fs::create_dir_all(&root)?;
        return Ok(root);
    }
    let pd = app_dirs()?;
    let root = pd.data_dir().join("runs");
    fs::create_dir_all(&root)?;
    Ok(root)
}

/// Where the persisted session lives; `GALILEO_SESSION_FILE` overrides the platform default.
pub fn default_session_path() -> Result<PathBuf> {
    if let Ok(custom) = env::var("GALILEO_SESSION_FILE") {
        return Ok(PathBuf::from(custom));
    }
    let pd = app_dirs()?;
    fs::create_dir_all(pd.data_dir())?;
    Ok(pd.data_dir().join("session.json"))
}

pub fn new_run_dir(base: Option<&Path>) -> Result<PathBuf> {
    let id = Uuid::new_v4().to_string();
    let root = match base {
        Some(b) => b.to_path_buf(),
        None => default_runs_root()?,
    };
    let dir = root.join(id);
    fs::create_dir_all(&dir)?;
    fs::create_dir_all(dir.join("cards"))?;
    Ok(dir)
}

pub fn is_path_within(base: &Path, candidate: &Path) -> bool {
    match candidate.canonicalize().and_then(|p| base.canonicalize().map(|b| (b, p))) {
        Ok((b, p)) => p.starts_with(b),
        Err(_) => false,
    }
}

pub fn env_flag(name: &str) -> bool {
    env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_containment_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let inside = dir.path().join("a.txt");
        std::fs::write(&inside, b"x").unwrap();
        assert!(is_path_within(dir.path(), &inside));
        assert!(!is_path_within(dir.path(), &dir.path().join("../outside")));
    }

    #[test]
    fn run_dir_gets_cards_subdir() {
        let root = tempfile::tempdir().unwrap();
        let dir = new_run_dir(Some(root.path())).unwrap();
        assert!(dir.join("cards").is_dir());
    }
}
