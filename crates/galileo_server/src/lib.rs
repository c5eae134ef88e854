use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use galileo_core::config::TutorConfig;
use galileo_core::runs::list_runs;
use galileo_core::session::{Goal, Session};
use galileo_core::table::Table;
use galileo_core::tutor::Tutor;
use galileo_core::util::{default_runs_root, is_path_within};
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

type ApiError = (StatusCode, String);
type ApiResult<T> = Result<T, ApiError>;

fn internal(e: impl std::fmt::Display) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

/// Shared server state: the session bundle behind a lock, the tutor, and the
/// runs root. Handlers clone the session out, act, and write it back;
/// last write wins, per the single-user session model.
pub struct AppState {
    session: Mutex<Session>,
    tutor: Tutor,
    has_key: bool,
    runs_root: PathBuf,
}

impl AppState {
    pub fn new(cfg: TutorConfig, runs_root: PathBuf) -> Arc<Self> {
        let has_key = !cfg.api_key.is_empty();
        Arc::new(Self {
            session: Mutex::new(Session::default()),
            tutor: Tutor::new(cfg),
            has_key,
            runs_root,
        })
    }

    fn require_key(&self) -> ApiResult<()> {
        if self.has_key {
            Ok(())
        } else {
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                "GROQ_API_KEY not configured on the server".to_string(),
            ))
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn get_session(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let session = state.session.lock().clone();
    Json(session_summary(&session))
}

/// Compact view of the session; the table is summarized, not dumped.
fn session_summary(session: &Session) -> serde_json::Value {
    let table = session.table.as_ref().map(|t| {
        let (rows, cols) = t.shape();
        serde_json::json!({
            "rows": rows,
            "cols": cols,
            "columns": t.columns,
            "head": t.head(5).rows,
        })
    });
    serde_json::json!({
        "dataset_name": session.dataset_name,
        "table": table,
        "goal": session.goal,
        "tasks": session.tasks,
        "task": session.task,
        "code": session.code,
        "result": session.result,
        "explanation": session.explanation,
        "phase": session.phase,
        "last_run_id": session.last_run_id,
    })
}

#[derive(Deserialize)]
struct LoadBody {
    name: Option<String>,
    path: Option<String>,
    url: Option<String>,
    sheet_doc: Option<String>,
    sheet_name: Option<String>,
    /// Inline CSV text, for uploads.
    csv_text: Option<String>,
}

async fn load_dataset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoadBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let (default_name, loaded) = if let Some(text) = &body.csv_text {
        ("upload.csv".to_string(), Table::from_csv_bytes(text.as_bytes()))
    } else if let Some(path) = &body.path {
        (path.clone(), Table::from_csv_path(std::path::Path::new(path)))
    } else if let Some(url) = &body.url {
        (url.clone(), Table::from_url(url).await)
    } else if let (Some(doc), Some(sheet)) = (&body.sheet_doc, &body.sheet_name) {
        (format!("{doc}/{sheet}"), Table::from_published_sheet(doc, sheet).await)
    } else {
        return Err((
            StatusCode::BAD_REQUEST,
            "nothing to load: pass csv_text, path, url, or sheet_doc+sheet_name".to_string(),
        ));
    };
    // Ingestion failure leaves the current table in place; the caller
    // re-prompts with a fixed source.
    let table = loaded.map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    let name = body.name.unwrap_or(default_name);
    let (rows, cols) = table.shape();
    let preview = table.head(5).rows.clone();
    let columns = table.columns.clone();
    state.session.lock().set_table(&name, table);
    Ok(Json(serde_json::json!({
        "name": name,
        "rows": rows,
        "cols": cols,
        "columns": columns,
        "head": preview,
    })))
}

#[derive(Deserialize)]
struct GoalBody {
    statement: Option<String>,
    #[serde(default)]
    enhance: bool,
}

async fn set_goal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GoalBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut session = state.session.lock().clone();
    if let Some(statement) = body.statement {
        session.goal = Some(Goal::new(statement));
    }
    if session.goal.is_none() {
        return Err((StatusCode::BAD_REQUEST, "no goal set".to_string()));
    }
    let enhanced = if body.enhance {
        state.require_key()?;
        state.tutor.enhance_goal(&mut session).await
    } else {
        None
    };
    let goal = session.goal.clone();
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "goal": goal, "enhanced": enhanced })))
}

async fn suggest_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.require_key()?;
    let mut session = state.session.lock().clone();
    let tasks = state.tutor.suggest_tasks(&mut session).await;
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "tasks": tasks })))
}

#[derive(Deserialize)]
struct SynthesizeBody {
    task: Option<String>,
    /// 1-based index into the suggested task list.
    task_index: Option<usize>,
}

async fn synthesize_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SynthesizeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_key()?;
    let mut session = state.session.lock().clone();
    if let Some(task) = body.task {
        session.task = Some(task);
    } else if let Some(n) = body.task_index {
        let task = n
            .checked_sub(1)
            .and_then(|i| session.tasks.get(i))
            .cloned()
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("no task #{n}")))?;
        session.task = Some(task);
    }
    let code = state
        .tutor
        .synthesize_code(&mut session)
        .await
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}")))?;
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "code": code })))
}

#[derive(Deserialize)]
struct CodeBody {
    code: String,
}

/// Accepts user-edited code as the session's current snippet.
async fn set_code(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CodeBody>,
) -> Json<serde_json::Value> {
    state.session.lock().code = Some(body.code);
    Json(serde_json::json!({ "ok": true }))
}

async fn execute(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let mut session = state.session.lock().clone();
    let result = state
        .tutor
        .execute(&mut session, &state.runs_root)
        .await
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}")))?;
    let run_id = session.last_run_id.clone();
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "run_id": run_id, "result": result })))
}

async fn explain(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.require_key()?;
    let mut session = state.session.lock().clone();
    let explanation = state.tutor.explain(&mut session).await;
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "explanation": explanation })))
}

async fn debug(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    state.require_key()?;
    let mut session = state.session.lock().clone();
    let advice = state.tutor.debug(&mut session).await;
    let code = session.code.clone();
    *state.session.lock() = session;
    Ok(Json(serde_json::json!({ "advice": advice, "code": code })))
}

#[derive(Deserialize)]
struct ListRunsParams {
    limit: Option<usize>,
}

async fn get_runs(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ListRunsParams>,
) -> ApiResult<Json<serde_json::Value>> {
    let runs = list_runs(&state.runs_root, q.limit.unwrap_or(20)).map_err(internal)?;
    let data: Vec<_> = runs
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "id": r.id,
                "path": r.dir.to_string_lossy(),
            })
        })
        .collect();
    Ok(Json(serde_json::json!({ "runs": data })))
}

async fn download_artifact(
    State(state): State<Arc<AppState>>,
    Path((run_id, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let run_dir = state.runs_root.join(&run_id);
    let candidate = run_dir.join(&file);
    if !is_path_within(&run_dir, &candidate) || !candidate.exists() {
        return Err((StatusCode::NOT_FOUND, "not found".to_string()));
    }
    let mime = mime_guess::from_path(&candidate).first_or_text_plain();
    let bytes = tokio::fs::read(&candidate).await.map_err(internal)?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, mime.essence_str().to_string())],
        bytes,
    )
        .into_response())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(get_session))
        .route("/dataset/load", post(load_dataset))
        .route("/goal", post(set_goal))
        .route("/tasks/suggest", post(suggest_tasks))
        .route("/code/synthesize", post(synthesize_code))
        .route("/code", post(set_code))
        .route("/execute", post(execute))
        .route("/explain", post(explain))
        .route("/debug", post(debug))
        .route("/runs", get(get_runs))
        .route("/runs/:run_id/artifacts/:file", get(download_artifact))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn serve() -> anyhow::Result<()> {
    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse()
        .unwrap_or(8080);

    let cfg = TutorConfig::from_env().unwrap_or_else(|_| {
        tracing::warn!("GROQ_API_KEY not set; generation routes will answer 503");
        TutorConfig::from_env_unkeyed()
    });
    let state = AppState::new(cfg, default_runs_root()?);
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("galileo server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
