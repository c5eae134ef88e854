use crate::executors::ExecutionResult;
use crate::table::Table;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// The user's stated objective, with an optional AI-enhanced rewrite.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Goal {
    pub statement: String,
    pub enhanced: Option<String>,
}

impl Goal {
    pub fn new(statement: impl Into<String>) -> Self {
        Self { statement: statement.into(), enhanced: None }
    }

    /// The rewrite when present, the raw statement otherwise.
    pub fn effective(&self) -> &str {
        self.enhanced.as_deref().unwrap_or(&self.statement)
    }
}

/// Where one analysis cycle currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    TaskSuggested,
    CodeSynthesized,
    ExecutedOk,
    ExecutedErr,
    Explained,
    DebugOffered,
}

/// The session-scoped state bundle. One per user session; every handler takes
/// it `&mut` and the last write wins. Exactly one code snippet and at most
/// one execution result are current; no history, no undo.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    pub dataset_name: Option<String>,
    pub table: Option<Table>,
    pub goal: Option<Goal>,
    pub tasks: Vec<String>,
    /// The task the current code was (or will be) synthesized for.
    pub task: Option<String>,
    pub code: Option<String>,
    pub result: Option<ExecutionResult>,
    pub explanation: Option<String>,
    pub phase: Phase,
    pub last_run_id: Option<String>,
}

impl Session {
    /// Installs a freshly loaded table. Loading a new table clears the task
    /// list, code, result, and explanation, and returns the loop to Idle.
    pub fn set_table(&mut self, name: impl Into<String>, table: Table) {
        self.dataset_name = Some(name.into());
        self.table = Some(table);
        self.tasks.clear();
        self.task = None;
        self.code = None;
        self.result = None;
        self.explanation = None;
        self.last_run_id = None;
        self.phase = Phase::Idle;
    }

    /// Missing file means a fresh session, not an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read session at {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse session at {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("failed to write session at {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> Table {
        Table::from_csv_bytes(b"Age,Sex\n22,male\n").unwrap()
    }

    #[test]
    fn new_table_resets_the_cycle() {
        let mut s = Session::default();
        s.goal = Some(Goal::new("survival by gender"));
        s.tasks = vec!["plot something".into()];
        s.task = Some("plot something".into());
        s.code = Some("print(1)".into());
        s.result = Some(ExecutionResult::from_error("boom"));
        s.explanation = Some("it broke".into());
        s.phase = Phase::ExecutedErr;

        s.set_table("titanic.csv", sample_table());

        assert!(s.tasks.is_empty());
        assert!(s.task.is_none());
        assert!(s.code.is_none());
        assert!(s.result.is_none());
        assert!(s.explanation.is_none());
        assert_eq!(s.phase, Phase::Idle);
        // The goal survives a reload; it belongs to the user, not the table.
        assert!(s.goal.is_some());
    }

    #[test]
    fn enhanced_goal_wins() {
        let mut g = Goal::new("do stuff");
        assert_eq!(g.effective(), "do stuff");
        g.enhanced = Some("plot survival rate by passenger sex".into());
        assert_eq!(g.effective(), "plot survival rate by passenger sex");
    }

    #[test]
    fn session_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut s = Session::default();
        s.set_table("t.csv", sample_table());
        s.code = Some("print(len(df))".into());
        s.save(&path).unwrap();

        let back = Session::load(&path).unwrap();
        assert_eq!(back.dataset_name.as_deref(), Some("t.csv"));
        assert_eq!(back.code.as_deref(), Some("print(len(df))"));
        assert_eq!(back.table.unwrap().shape(), (1, 2));
    }

    #[test]
    fn missing_session_file_is_a_fresh_session() {
        let dir = tempfile::tempdir().unwrap();
        let s = Session::load(&dir.path().join("nope.json")).unwrap();
        assert!(s.table.is_none());
        assert_eq!(s.phase, Phase::Idle);
    }
}
