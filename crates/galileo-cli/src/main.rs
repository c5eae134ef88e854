use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use galileo_core::config::{ExecBackend, TutorConfig};
use galileo_core::runs::list_runs;
use galileo_core::session::{Goal, Phase, Session};
use galileo_core::table::{Table, SAMPLE_DATASET_URL};
use galileo_core::tutor::Tutor;
use galileo_core::util::{default_runs_root, default_session_path};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about = "Galileo — AI data-science tutor: goal → tasks → code → execution → explanation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the persisted session file
    #[arg(long)]
    session_file: Option<PathBuf>,

    /// Override the runs dir
    #[arg(long)]
    runs_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Environment doctor checks
    Doctor,
    /// Load a dataset (path, URL, published sheet, or the bundled sample)
    Load {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        url: Option<String>,
        /// Published spreadsheet document id (use with --sheet-name)
        #[arg(long)]
        sheet_doc: Option<String>,
        #[arg(long)]
        sheet_name: Option<String>,
        /// Load the bundled Titanic sample dataset
        #[arg(long, default_value_t = false)]
        sample: bool,
    },
    /// Set the analysis goal
    Goal {
        statement: Option<String>,
        /// Ask the tutor to rewrite the goal into a sharper objective
        #[arg(long, default_value_t = false)]
        enhance: bool,
    },
    /// Ask the tutor for candidate analysis tasks
    Suggest,
    /// Select a suggested task by number, or set one in free text
    Task {
        #[arg(long)]
        pick: Option<usize>,
        #[arg(long)]
        set: Option<String>,
    },
    /// Synthesize code for the selected task
    Synth,
    /// Execute the current code against the loaded table
    Run {
        /// Submit edited code from a file instead of the stored snippet
        #[arg(long)]
        code_file: Option<PathBuf>,
    },
    /// Ask the tutor to explain the current code
    Explain,
    /// Ask the tutor to explain the last error and propose a fix
    Fix,
    /// Show the session: dataset, goal, tasks, code, last result
    Status,
    /// Inspect recent runs
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    install_tracing();
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let session_path = match cli.session_file.clone() {
        Some(p) => p,
        None => default_session_path()?,
    };
    let runs_root = match cli.runs_dir.clone() {
        Some(p) => {
            std::fs::create_dir_all(&p)?;
            p
        }
        None => default_runs_root()?,
    };

    match cli.command {
        Commands::Doctor => cmd_doctor(),
        Commands::Load { path, url, sheet_doc, sheet_name, sample } => {
            cmd_load(&session_path, path, url, sheet_doc, sheet_name, sample).await
        }
        Commands::Goal { statement, enhance } => cmd_goal(&session_path, statement, enhance).await,
        Commands::Suggest => cmd_suggest(&session_path).await,
        Commands::Task { pick, set } => cmd_task(&session_path, pick, set),
        Commands::Synth => cmd_synth(&session_path).await,
        Commands::Run { code_file } => cmd_run(&session_path, &runs_root, code_file).await,
        Commands::Explain => cmd_explain(&session_path).await,
        Commands::Fix => cmd_fix(&session_path).await,
        Commands::Status => cmd_status(&session_path),
        Commands::Runs { limit } => cmd_runs(&runs_root, limit),
    }
}

fn install_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}

fn keyed_tutor() -> Result<Tutor> {
    Ok(Tutor::new(TutorConfig::from_env()?))
}

fn cmd_doctor() -> Result<()> {
    println!("Galileo doctor:");
    println!(" - Rust: ok (compiled)");
    for (bin, arg) in [("python3", "--version"), ("git", "--version")] {
        match std::process::Command::new(bin).arg(arg).output() {
            Ok(o) => {
                let s = String::from_utf8_lossy(&o.stdout);
                let e = String::from_utf8_lossy(&o.stderr);
                println!("   $ {} {} -> {}", bin, arg, s.trim().lines().next().unwrap_or(e.trim()));
            }
            Err(e) => println!("   $ {} {} -> error: {}", bin, arg, e),
        }
    }
    let plotting = std::process::Command::new("python3")
        .args(["-c", "import pandas, matplotlib"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    println!(" - python plotting stack (pandas + matplotlib): {}", if plotting { "ok" } else { "MISSING" });
    println!(" - GROQ_API_KEY: {}", if std::env::var("GROQ_API_KEY").is_ok() { "set" } else { "MISSING" });
    let cfg = TutorConfig::from_env_unkeyed();
    match cfg.backend {
        ExecBackend::Remote { url } => println!(" - execution backend: remote webhook ({})", url),
        ExecBackend::Local => println!(" - execution backend: local python subprocess"),
    }
    println!(" - execution timeout: {}s", cfg.exec_timeout_secs);
    Ok(())
}

async fn cmd_load(
    session_path: &Path,
    path: Option<PathBuf>,
    url: Option<String>,
    sheet_doc: Option<String>,
    sheet_name: Option<String>,
    sample: bool,
) -> Result<()> {
    let (name, loaded) = if sample {
        ("titanic.csv".to_string(), Table::from_url(SAMPLE_DATASET_URL).await)
    } else if let Some(path) = path {
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        (name, Table::from_csv_path(&path))
    } else if let Some(url) = url {
        (url.clone(), Table::from_url(&url).await)
    } else if let (Some(doc), Some(sheet)) = (sheet_doc, sheet_name) {
        (format!("{doc}/{sheet}"), Table::from_published_sheet(&doc, &sheet).await)
    } else {
        anyhow::bail!("nothing to load: pass --path, --url, --sheet-doc/--sheet-name, or --sample");
    };

    // Ingestion failure leaves the previous session untouched; the user
    // re-prompts with a fixed source.
    let table = match loaded {
        Ok(t) => t,
        Err(e) => {
            println!("Could not load dataset: {e}");
            return Ok(());
        }
    };

    let mut session = Session::load(session_path)?;
    let (rows, cols) = table.shape();
    print_preview(&table);
    session.set_table(&name, table);
    session.save(session_path)?;
    println!("Loaded '{}' with {} rows and {} columns.", name, rows, cols);
    println!("Next: set a goal (`goal \"...\"`) and ask for tasks (`suggest`).");
    Ok(())
}

async fn cmd_goal(session_path: &Path, statement: Option<String>, enhance: bool) -> Result<()> {
    let mut session = Session::load(session_path)?;
    if let Some(statement) = statement {
        session.goal = Some(Goal::new(statement));
    }
    let Some(goal) = &session.goal else {
        anyhow::bail!("no goal set; pass one, e.g. `goal \"bar chart of survival by gender\"`");
    };
    println!("Goal: {}", goal.statement);
    if enhance {
        let tutor = keyed_tutor()?;
        match tutor.enhance_goal(&mut session).await {
            Some(enhanced) => println!("Enhanced: {}", enhanced),
            None => println!("Could not enhance the goal right now; keeping it as stated."),
        }
    }
    session.save(session_path)?;
    Ok(())
}

async fn cmd_suggest(session_path: &Path) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let tutor = keyed_tutor()?;
    let tasks = tutor.suggest_tasks(&mut session).await;
    session.save(session_path)?;
    if tasks.is_empty() {
        println!("No suggestions right now. Check the dataset is loaded and try again.");
        return Ok(());
    }
    println!("Suggested tasks:");
    for (i, task) in tasks.iter().enumerate() {
        println!("  {}. {}", i + 1, task);
    }
    println!("Pick one with `task --pick N`.");
    Ok(())
}

fn cmd_task(session_path: &Path, pick: Option<usize>, set: Option<String>) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let task = if let Some(text) = set {
        text
    } else if let Some(n) = pick {
        session
            .tasks
            .get(n.checked_sub(1).context("task numbers start at 1")?)
            .cloned()
            .with_context(|| format!("no task #{n}; run `suggest` first"))?
    } else {
        anyhow::bail!("pass --pick N or --set \"task text\"");
    };
    println!("Task: {}", task);
    session.task = Some(task);
    session.save(session_path)?;
    Ok(())
}

async fn cmd_synth(session_path: &Path) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let tutor = keyed_tutor()?;
    match tutor.synthesize_code(&mut session).await {
        Ok(code) => {
            session.save(session_path)?;
            println!("--- code ---\n{}\n------------", code);
            println!("Run it with `run`, or edit it and submit with `run --code-file <file>`.");
        }
        Err(e) => println!("Could not synthesize code: {e:#}"),
    }
    Ok(())
}

async fn cmd_run(session_path: &Path, runs_root: &Path, code_file: Option<PathBuf>) -> Result<()> {
    let mut session = Session::load(session_path)?;
    if let Some(file) = code_file {
        let code = std::fs::read_to_string(&file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        session.code = Some(code);
    }
    let cfg = TutorConfig::from_env().unwrap_or_else(|_| TutorConfig::from_env_unkeyed());
    let tutor = Tutor::new(cfg);
    let result = tutor.execute(&mut session, runs_root).await?;
    session.save(session_path)?;

    if let Some(stdout) = &result.stdout {
        println!("{}", stdout.trim_end());
    }
    if let Some(run_id) = &session.last_run_id {
        if result.image_data.is_some() {
            println!("Plot written to {}", runs_root.join(run_id).join("plot.png").display());
        }
    }
    if let Some(error) = &result.error {
        println!("An error occurred during execution:\n{}", error);
        println!("Ask the tutor for help with `fix`.");
    }
    Ok(())
}

async fn cmd_explain(session_path: &Path) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let tutor = keyed_tutor()?;
    match tutor.explain(&mut session).await {
        Some(explanation) => {
            session.save(session_path)?;
            println!("{}", explanation);
        }
        None => println!("No explanation available. Is there code in the session?"),
    }
    Ok(())
}

async fn cmd_fix(session_path: &Path) -> Result<()> {
    let mut session = Session::load(session_path)?;
    let tutor = keyed_tutor()?;
    match tutor.debug(&mut session).await {
        Some(advice) => {
            session.save(session_path)?;
            if let Some(explanation) = &advice.explanation {
                println!("{}\n", explanation);
            }
            match &advice.corrected_code {
                Some(code) => {
                    println!("--- corrected code ---\n{}\n----------------------", code);
                    println!("The corrected code replaced the session snippet; re-submit with `run`.");
                }
                None => println!("The tutor had no corrected code to offer."),
            }
        }
        None => println!("Nothing to fix: need code and a failed execution in the session."),
    }
    Ok(())
}

fn cmd_status(session_path: &Path) -> Result<()> {
    let session = Session::load(session_path)?;
    match (&session.dataset_name, &session.table) {
        (Some(name), Some(table)) => {
            let (rows, cols) = table.shape();
            println!("Dataset: {} ({} rows, {} columns)", name, rows, cols);
        }
        _ => println!("Dataset: none loaded"),
    }
    match &session.goal {
        Some(goal) => println!("Goal: {}", goal.effective()),
        None => println!("Goal: none"),
    }
    if !session.tasks.is_empty() {
        println!("Tasks:");
        for (i, task) in session.tasks.iter().enumerate() {
            println!("  {}. {}", i + 1, task);
        }
    }
    if let Some(task) = &session.task {
        println!("Selected task: {}", task);
    }
    if let Some(code) = &session.code {
        println!("--- code ---\n{}\n------------", code);
    }
    if let Some(result) = &session.result {
        match &result.error {
            Some(error) => println!("Last run: FAILED\n{}", error),
            None => println!(
                "Last run: ok{}",
                if result.image_data.is_some() { " (plot produced)" } else { "" }
            ),
        }
    }
    if let Some(explanation) = &session.explanation {
        println!("Tutor says:\n{}", explanation);
    }
    println!("Phase: {:?}", session.phase);
    if session.phase == Phase::Idle && session.table.is_none() {
        println!("Start by loading a dataset: `load --sample`.");
    }
    Ok(())
}

fn print_preview(table: &Table) {
    println!("{}", table.columns.join(", "));
    for row in &table.head(5).rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| match v {
                serde_json::Value::Null => String::new(),
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join(", "));
    }
}

fn cmd_runs(runs_root: &Path, limit: usize) -> Result<()> {
    let runs = list_runs(runs_root, limit)?;
    println!("Last {} run(s) under {}", runs.len(), runs_root.display());
    for r in runs {
        let n_cards = walkdir::WalkDir::new(r.dir.join("cards"))
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        let has_plot = r.dir.join("plot.png").exists();
        println!(
            "- {}  [{} card(s){}]  {}",
            r.id,
            n_cards,
            if has_plot { ", plot" } else { "" },
            r.dir.display()
        );
    }
    Ok(())
}
