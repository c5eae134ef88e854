use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};

/// A timestamped milestone record written into a run's `cards/` directory:
/// task suggested, code synthesized, execution outcome, explanation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TutorCard {
    pub ts_utc: DateTime<Utc>,
    pub run_id: String,
    pub title: String,
    pub summary: String,
    pub details: serde_json::Value,
}

impl TutorCard {
    pub fn save(&self, run_dir: &Path) -> Result<PathBuf> {
        let ts = self.ts_utc.format("%Y%m%d-%H%M%S").to_string();
        let file = run_dir
            .join("cards")
            .join(format!("{}-{}.json", ts, self.title.replace(' ', "_")));
        fs::create_dir_all(file.parent().unwrap())?;
        fs::write(&file, serde_json::to_vec_pretty(self)?)?;
        Ok(file)
    }
}
