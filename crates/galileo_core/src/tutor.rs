use crate::config::{ExecBackend, TutorConfig};
use crate::executors::{python::run_python_cell, webhook::run_webhook, ExecutionResult};
use crate::llm::GenerationClient;
use crate::prompts::{self, DebugAdvice};
use crate::runs::{self, ManifestEntry};
use crate::session::{Phase, Session};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use serde_json::json;
use std::{fs, path::Path};
use tracing::warn;

const DEFAULT_GOAL: &str = "explore the dataset and find interesting patterns";

/// The guided analysis loop coordinator: turns user intent into suggested
/// tasks, synthesized code, executed results, and explanations. Every
/// generation failure is recovered locally; the loop itself never crashes.
pub struct Tutor {
    cfg: TutorConfig,
    client: GenerationClient,
}

impl Tutor {
    pub fn new(cfg: TutorConfig) -> Self {
        let client = GenerationClient::new(&cfg);
        Self { cfg, client }
    }

    pub fn config(&self) -> &TutorConfig {
        &self.cfg
    }

    /// Optional AI rewrite of the stated goal. Soft: `None` on failure or
    /// when no goal has been set.
    #[tracing::instrument(skip_all)]
    pub async fn enhance_goal(&self, session: &mut Session) -> Option<String> {
        let goal = session.goal.as_ref()?;
        match self
            .client
            .generate(&self.cfg.model, &prompts::enhance_goal_prompt(&goal.statement))
            .await
        {
            Ok(reply) => {
                let enhanced = reply.trim().to_string();
                session.goal.as_mut().unwrap().enhanced = Some(enhanced.clone());
                Some(enhanced)
            }
            Err(e) => {
                warn!(error = %e, "goal enhancement failed");
                None
            }
        }
    }

    /// Asks for candidate analysis steps and stores the parsed list. Fails
    /// softly: on generation failure the list is empty and the phase is
    /// untouched, so an idle loop stays idle.
    #[tracing::instrument(skip_all)]
    pub async fn suggest_tasks(&self, session: &mut Session) -> Vec<String> {
        let Some(table) = &session.table else {
            warn!("no table loaded; nothing to suggest");
            return vec![];
        };
        let goal = session
            .goal
            .as_ref()
            .map(|g| g.effective().to_string())
            .unwrap_or_else(|| DEFAULT_GOAL.to_string());
        match self
            .client
            .generate(&self.cfg.model, &prompts::suggest_tasks_prompt(&table.columns, &goal))
            .await
        {
            Ok(reply) => {
                let tasks = prompts::parse_task_lines(&reply);
                if !tasks.is_empty() {
                    session.phase = Phase::TaskSuggested;
                }
                session.tasks = tasks.clone();
                tasks
            }
            Err(e) => {
                warn!(error = %e, "task suggestion failed");
                session.tasks.clear();
                vec![]
            }
        }
    }

    /// Turns the selected task (or, absent one, the goal itself) into a
    /// fence-stripped snippet stored as the session's current code.
    #[tracing::instrument(skip_all)]
    pub async fn synthesize_code(&self, session: &mut Session) -> Result<String> {
        let table = session.table.as_ref().context("no table loaded")?;
        let task = session
            .task
            .clone()
            .or_else(|| session.goal.as_ref().map(|g| g.effective().to_string()))
            .context("no task selected and no goal set")?;
        let reply = self
            .client
            .generate(&self.cfg.model, &prompts::synthesize_code_prompt(&task, &table.columns))
            .await?;
        let code = prompts::strip_code_fences(&reply);
        session.code = Some(code.clone());
        session.phase = Phase::CodeSynthesized;
        Ok(code)
    }

    /// Dispatches the current code against a copy of the table, into a fresh
    /// run directory. Execution failures are data, not errors: they land in
    /// the returned result's `error` field. `Err` here means the loop was
    /// driven out of order (no code or no table yet).
    #[tracing::instrument(skip_all)]
    pub async fn execute(&self, session: &mut Session, runs_root: &Path) -> Result<ExecutionResult> {
        let code = session.code.clone().context("no code to execute")?;
        let table = session.table.as_ref().context("no table loaded")?;
        let run = runs::create_new_run(Some(runs_root))?;

        let result = match &self.cfg.backend {
            ExecBackend::Remote { url } => {
                fs::write(run.dir.join("cell.py"), &code)?;
                let result = run_webhook(url, self.cfg.exec_timeout_secs, &code, table).await;
                if let Some(b64) = &result.image_data {
                    persist_remote_image(&run.dir, b64);
                }
                result
            }
            ExecBackend::Local => {
                match run_python_cell(&run.dir, &code, table, self.cfg.exec_timeout_secs) {
                    Ok(r) => r,
                    Err(e) => ExecutionResult::from_error(format!("local execution failed: {e:#}")),
                }
            }
        };

        fs::write(
            run.dir.join("execution.outcome.json"),
            serde_json::to_vec_pretty(&result)?,
        )?;
        let summary = match &result.error {
            Some(err) => format!("execution failed: {}", first_line(err)),
            None if result.image_data.is_some() => "execution produced a plot".to_string(),
            None => "execution succeeded".to_string(),
        };
        write_card(&run.dir, &run.id, "execution", &summary, json!({
            "task": session.task,
            "stdout": result.stdout,
            "error": result.error,
            "has_image": result.image_data.is_some(),
        }))?;

        session.result = Some(result.clone());
        session.last_run_id = Some(run.id);
        session.phase = if result.is_ok() { Phase::ExecutedOk } else { Phase::ExecutedErr };
        Ok(result)
    }

    /// Plain-language explanation of the current snippet. Soft failure.
    #[tracing::instrument(skip_all)]
    pub async fn explain(&self, session: &mut Session) -> Option<String> {
        let code = session.code.as_ref()?;
        match self
            .client
            .generate(&self.cfg.model, &prompts::explain_code_prompt(code))
            .await
        {
            Ok(reply) => {
                let explanation = reply.trim().to_string();
                session.explanation = Some(explanation.clone());
                session.phase = Phase::Explained;
                Some(explanation)
            }
            Err(e) => {
                warn!(error = %e, "explanation failed");
                None
            }
        }
    }

    /// After a failed execution: asks the fix model to explain the error and
    /// propose a corrected snippet. A corrected snippet replaces the current
    /// code but is never auto-executed; the user re-submits it.
    #[tracing::instrument(skip_all)]
    pub async fn debug(&self, session: &mut Session) -> Option<DebugAdvice> {
        let code = session.code.clone()?;
        let error = session.result.as_ref()?.error.clone()?;
        let goal = session
            .goal
            .as_ref()
            .map(|g| g.effective().to_string())
            .or_else(|| session.task.clone())
            .unwrap_or_else(|| DEFAULT_GOAL.to_string());
        match self
            .client
            .generate(&self.cfg.fix_model, &prompts::debug_prompt(&goal, &code, &error))
            .await
        {
            Ok(reply) => {
                let advice = prompts::parse_debug_reply(&reply);
                session.explanation = advice.explanation.clone();
                if let Some(corrected) = &advice.corrected_code {
                    session.code = Some(corrected.clone());
                }
                session.phase = Phase::DebugOffered;
                Some(advice)
            }
            Err(e) => {
                warn!(error = %e, "debugging failed");
                None
            }
        }
    }
}

/// A remote reply's image is persisted alongside local ones so every run dir
/// is self-describing. Undecodable payloads are kept only in the outcome.
fn persist_remote_image(run_dir: &Path, b64: &str) {
    match STANDARD.decode(b64) {
        Ok(bytes) => {
            if fs::write(run_dir.join("plot.png"), bytes).is_ok() {
                let _ = runs::append_manifest(run_dir, ManifestEntry {
                    kind: "image".into(),
                    path: "plot.png".into(),
                    mime: "image/png".into(),
                    title: Some("Generated plot".into()),
                });
            }
        }
        Err(e) => warn!(error = %e, "webhook image_data was not valid base64"),
    }
}

fn write_card(run_dir: &Path, run_id: &str, title: &str, summary: &str, details: serde_json::Value) -> Result<()> {
    let card = crate::cards::TutorCard {
        ts_utc: Utc::now(),
        run_id: run_id.to_string(),
        title: title.to_string(),
        summary: summary.to_string(),
        details,
    };
    card.save(run_dir)?;
    Ok(())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn unreachable_cfg() -> TutorConfig {
        TutorConfig {
            api_key: "test-key".into(),
            model: "test-model".into(),
            fix_model: "test-fix-model".into(),
            // Port 9 (discard) is reliably closed on loopback.
            llm_base: Some("http://127.0.0.1:9".into()),
            temperature: 0.7,
            backend: ExecBackend::Local,
            exec_timeout_secs: 30,
        }
    }

    fn loaded_session() -> Session {
        let mut s = Session::default();
        s.set_table(
            "titanic.csv",
            Table::from_csv_bytes(b"Age,Fare,Survived,Sex\n22,7.25,0,male\n").unwrap(),
        );
        s
    }

    #[tokio::test]
    async fn unreachable_generator_leaves_loop_idle() {
        let tutor = Tutor::new(unreachable_cfg());
        let mut session = loaded_session();
        let tasks = tutor.suggest_tasks(&mut session).await;
        assert!(tasks.is_empty());
        assert!(session.tasks.is_empty());
        assert_eq!(session.phase, Phase::Idle);
    }

    #[tokio::test]
    async fn synthesize_without_table_is_misuse() {
        let tutor = Tutor::new(unreachable_cfg());
        let mut session = Session::default();
        assert!(tutor.synthesize_code(&mut session).await.is_err());
    }

    #[tokio::test]
    async fn execute_without_code_is_misuse() {
        let tutor = Tutor::new(unreachable_cfg());
        let mut session = loaded_session();
        let root = tempfile::tempdir().unwrap();
        assert!(tutor.execute(&mut session, root.path()).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_webhook_lands_as_failed_execution() {
        let mut cfg = unreachable_cfg();
        cfg.backend = ExecBackend::Remote { url: "http://127.0.0.1:9".into() };
        cfg.exec_timeout_secs = 2;
        let tutor = Tutor::new(cfg);
        let mut session = loaded_session();
        session.code = Some("print(1)".into());
        let root = tempfile::tempdir().unwrap();

        let result = tutor.execute(&mut session, root.path()).await.unwrap();
        assert!(result.error.is_some());
        assert!(result.image_data.is_none());
        assert_eq!(session.phase, Phase::ExecutedErr);

        // The run dir records the snippet, the outcome, and a card.
        let run_id = session.last_run_id.unwrap();
        let run_dir = root.path().join(&run_id);
        assert!(run_dir.join("cell.py").exists());
        assert!(run_dir.join("execution.outcome.json").exists());
        assert!(std::fs::read_dir(run_dir.join("cards")).unwrap().count() > 0);
    }

    #[tokio::test]
    async fn debug_requires_a_failed_result() {
        let tutor = Tutor::new(unreachable_cfg());
        let mut session = loaded_session();
        session.code = Some("print(1)".into());
        session.result = Some(ExecutionResult::default());
        assert!(tutor.debug(&mut session).await.is_none());
    }
}
