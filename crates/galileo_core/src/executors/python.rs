#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;
    use tempfile::tempdir;

    fn python_has(modules: &str) -> bool {
        std::process::Command::new("python3")
            .arg("-c")
            .arg(format!("import {}", modules))
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn sample_table() -> Table {
        Table::from_csv_bytes(b"Age,Fare,Survived,Sex\n22,7.25,0,male\n38,71.2833,1,female\n")
            .unwrap()
    }

    #[test]
    fn missing_column_yields_error_and_no_image() {
        if !python_has("pandas, matplotlib") {
            eprintln!("skipping: python3 with pandas/matplotlib unavailable");
            return;
        }
        let dir = tempdir().unwrap();
        let out = run_python_cell(dir.path(), "df['Fart'].sum()", &sample_table(), 60).unwrap();
        assert!(out.image_data.is_none());
        assert!(out.error.expect("error populated").contains("Fart"));
    }

    #[test]
    fn plot_snippet_yields_image_and_no_error() {
        if !python_has("pandas, matplotlib") {
            eprintln!("skipping: python3 with pandas/matplotlib unavailable");
            return;
        }
        let dir = tempdir().unwrap();
        let code = "plt.figure()\nplt.plot(df['Age'], df['Fare'])\nplt.title('Age vs Fare')";
        let out = run_python_cell(dir.path(), code, &sample_table(), 60).unwrap();
        assert!(out.error.is_none(), "unexpected error: {:?}", out.error);
        assert!(out.image_data.is_some());
        assert!(dir.path().join("plot.png").exists());
        let manifest: crate::runs::Manifest =
            serde_json::from_slice(&std::fs::read(dir.path().join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.artifacts[0].path, "plot.png");
    }

    #[test]
    fn printed_output_is_captured() {
        if !python_has("pandas, matplotlib") {
            eprintln!("skipping: python3 with pandas/matplotlib unavailable");
            return;
        }
        let dir = tempdir().unwrap();
        let out =
            run_python_cell(dir.path(), "print('rows:', len(df))", &sample_table(), 60).unwrap();
        assert!(out.error.is_none());
        assert!(out.stdout.unwrap().contains("rows: 2"));
    }

    #[test]
    fn canonical_table_is_never_mutated() {
        if !python_has("pandas, matplotlib") {
            eprintln!("skipping: python3 with pandas/matplotlib unavailable");
            return;
        }
        let dir = tempdir().unwrap();
        let table = sample_table();
        let before = table.clone();
        let code = "df.drop(columns=['Age'], inplace=True)\nprint(len(df.columns))";
        let out = run_python_cell(dir.path(), code, &table, 60).unwrap();
        assert!(out.error.is_none());
        assert_eq!(table, before);
    }

    #[test]
    fn runaway_snippet_is_killed_at_the_deadline() {
        if !python_has("pandas, matplotlib") {
            eprintln!("skipping: python3 with pandas/matplotlib unavailable");
            return;
        }
        let dir = tempdir().unwrap();
        let out =
            run_python_cell(dir.path(), "import time\ntime.sleep(30)", &sample_table(), 2).unwrap();
        assert!(out.error.unwrap().contains("timed out"));
    }
}

use crate::executors::ExecutionResult;
use crate::table::Table;
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::{
    fs,
    path::Path,
    process::{Child, Command, Output, Stdio},
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Local execution dispatch. The snippet runs in a fresh `python3` subprocess
/// against a CSV copy of the table, with only the harness-bound names in
/// scope (`df`, `pd`, `plt`, and `sns` when importable) and a hard wall-clock
/// limit after which the process is killed. The canonical table is never
/// handed to the subprocess.
#[tracing::instrument(skip_all, fields(run_dir = %run_dir.display()))]
pub fn run_python_cell(
    run_dir: &Path,
    code: &str,
    table: &Table,
    timeout_secs: u64,
) -> Result<ExecutionResult> {
    fs::create_dir_all(run_dir)?;
    table
        .write_csv(&run_dir.join("table.csv"))
        .context("failed to write table copy for execution")?;
    let script_path = run_dir.join("cell.py");
    fs::write(&script_path, harness_script(code))?;
    debug!(script = %script_path.display(), "wrote python cell");

    let mut cmd = Command::new("python3");
    cmd.arg(script_path.as_os_str())
        .current_dir(run_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!("spawning python");
    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return Ok(ExecutionResult::from_error(format!("failed to spawn python3: {e}"))),
    };

    let output = match wait_with_deadline(child, Duration::from_secs(timeout_secs))? {
        Some(out) => out,
        None => {
            return Ok(ExecutionResult::from_error(format!(
                "execution timed out after {timeout_secs}s and was killed"
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    fs::write(run_dir.join("cell.stdout.txt"), &stdout)?;
    fs::write(run_dir.join("cell.stderr.txt"), &stderr)?;

    if !output.status.success() {
        let err = if stderr.trim().is_empty() {
            format!("python exited {}", output.status)
        } else {
            tail(&stderr, 40)
        };
        return Ok(ExecutionResult::from_error(err));
    }

    let mut result = ExecutionResult::default();
    if !stdout.trim().is_empty() {
        result.stdout = Some(stdout);
    }
    let plot = run_dir.join("plot.png");
    if plot.exists() {
        let bytes = fs::read(&plot)?;
        result.image_data = Some(STANDARD.encode(bytes));
        let entry = crate::runs::ManifestEntry {
            kind: "image".into(),
            path: "plot.png".into(),
            mime: "image/png".into(),
            title: Some("Generated plot".into()),
        };
        let _ = crate::runs::append_manifest(run_dir, entry);
    }
    Ok(result)
}

/// The generated wrapper binds the allow-listed names, loads the table copy,
/// and saves the current figure after the snippet runs. Anything the snippet
/// raises propagates to stderr and a nonzero exit.
fn harness_script(code: &str) -> String {
    format!(
        r#"import pandas as pd
import matplotlib
matplotlib.use("Agg")
import matplotlib.pyplot as plt
try:
    import seaborn as sns
except ImportError:
    sns = None

df = pd.read_csv("table.csv")

{code}

if plt.get_fignums():
    plt.gcf().savefig("plot.png", bbox_inches="tight")
"#
    )
}

fn tail(s: &str, n: usize) -> String {
    let lines: Vec<&str> = s.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

/// Waits for the child up to `limit`; past the deadline the process is
/// SIGKILLed and `None` is returned. The reaper thread outlives the kill and
/// collects the exit status.
fn wait_with_deadline(child: Child, limit: Duration) -> std::io::Result<Option<Output>> {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;

    let pid = child.id();
    let finished = Arc::new(AtomicBool::new(false));
    let flag = finished.clone();
    let handle = thread::spawn(move || {
        let out = child.wait_with_output();
        flag.store(true, Ordering::SeqCst);
        out
    });
    let started = Instant::now();
    loop {
        if finished.load(Ordering::SeqCst) {
            return handle.join().unwrap().map(Some);
        }
        if started.elapsed() > limit {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGKILL);
            }
            #[cfg(not(unix))]
            let _ = pid;
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(50));
    }
}
