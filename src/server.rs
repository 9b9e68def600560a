use crate::core::config::{Config, ServerConfig};
use crate::core::error::AppError;
use crate::core::model::RoadmapStep;
use crate::services::export::NotionExporter;
use crate::services::llm::create_llm;
use crate::services::prompt::validate_field;
use crate::services::roadmap::RoadmapService;
use crate::services::search::{create_search, ResourceAugmenter};
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{error, info, warn};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone, Debug)]
pub struct AppState {
    pub roadmaps: Arc<RoadmapService>,
    pub exporter: Option<Arc<NotionExporter>>,
}

impl AppState {
    pub fn new(roadmaps: RoadmapService, exporter: Option<NotionExporter>) -> Self {
        Self {
            roadmaps: Arc::new(roadmaps),
            exporter: exporter.map(Arc::new),
        }
    }

    /// Builds every service from config. A missing completion credential is fatal here,
    /// missing search or Notion credentials only switch those features off.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        let llm = create_llm(&config.llm)?;
        let search = create_search(&config.search)?;
        let augmenter = ResourceAugmenter::new(search, &config.search);

        let exporter = match NotionExporter::new(&config.export.notion) {
            Ok(exporter) => Some(exporter),
            Err(e) => {
                info!("Notion export disabled: {}", e);
                None
            }
        };

        let roadmaps = RoadmapService::new(llm, augmenter, config.generation.clone());
        Ok(Self::new(roadmaps, exporter))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self.diagnostic());
        } else {
            warn!("Rejected request: {}", self);
        }
        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| AppError::validation(format!("Invalid request body: {}", e.body_text())))
}

pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/roadmap", post(roadmap))
        .route("/tasks", post(tasks))
        .route("/export", post(export))
        .with_state(state)
        .layer(cors)
}

pub async fn run_server(config: &ServerConfig, app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .with_context(|| format!("Invalid server address {}:{}", config.host, config.port))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "message": "Hello from the API!" }))
}

#[derive(Deserialize)]
struct RoadmapRequest {
    skill: Option<String>,
}

async fn roadmap(
    State(state): State<AppState>,
    payload: Result<Json<RoadmapRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let steps = state.roadmaps.generate_roadmap(req.skill.as_deref()).await?;
    Ok(Json(json!({
        "message": "Roadmap generated successfully",
        "data": steps,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TasksRequest {
    skill: Option<String>,
    step_title: Option<String>,
    step_index: Option<u32>,
}

async fn tasks(
    State(state): State<AppState>,
    payload: Result<Json<TasksRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let out = state
        .roadmaps
        .generate_tasks(
            req.skill.as_deref(),
            req.step_title.as_deref(),
            req.step_index,
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "stepIndex": out.step_index,
        "stepTitle": out.step_title,
        "tasks": out.tasks,
    })))
}

#[derive(Deserialize)]
struct ExportRequest {
    skill: Option<String>,
    #[serde(default)]
    roadmap: Vec<RoadmapStep>,
}

async fn export(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    let req = body(payload)?;
    let skill = validate_field("Skill", req.skill.as_deref())?;
    if req.roadmap.is_empty() {
        return Err(AppError::validation("Roadmap is required"));
    }
    let exporter = state
        .exporter
        .as_ref()
        .ok_or_else(|| AppError::configuration("Notion export is not configured"))?;

    let url = exporter.export(&skill, &req.roadmap).await?;
    Ok(Json(json!({ "notionPageUrl": url })))
}
