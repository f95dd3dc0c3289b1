//! HTTP routes for the ceres server.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection, rejection::QueryRejection},
    http::StatusCode,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use ceres_core::{CellSnapshot, CellWithOutput, DocumentRegistry};

use crate::error::ServerResult;
use crate::protocol::{
    AddCellRequest, CreateNotebookRequest, ExecuteCellRequest, HealthResponse, NotebookRequest,
    UpdateCellRequest,
};

/// Application state shared across handlers.
pub struct AppState {
    /// Open notebooks.
    pub registry: Arc<DocumentRegistry>,
}

/// Create the router with all routes.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/notebooks", get(list_notebooks_handler))
        .route("/create_notebook", post(create_notebook_handler))
        .route("/open_notebook", post(open_notebook_handler))
        .route("/close_notebook", post(close_notebook_handler))
        .route("/add_cell", post(add_cell_handler))
        .route("/update_cell", post(update_cell_handler))
        .route("/get_notebook_cells", get(get_cells_handler))
        .route("/execute_cell", post(execute_cell_handler))
        .route("/restart_kernel", post(restart_kernel_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        notebooks: state.registry.paths().await.len(),
    })
}

async fn list_notebooks_handler(State(state): State<Arc<AppState>>) -> Json<Vec<PathBuf>> {
    Json(state.registry.paths().await)
}

async fn create_notebook_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateNotebookRequest>, JsonRejection>,
) -> ServerResult<Json<PathBuf>> {
    let Json(request) = payload?;
    let path = state
        .registry
        .create(&request.directory, &request.name)
        .await?;
    Ok(Json(path))
}

async fn open_notebook_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NotebookRequest>, JsonRejection>,
) -> ServerResult<Json<PathBuf>> {
    let Json(request) = payload?;
    let path = state.registry.open(&request.filepath).await?;
    Ok(Json(path))
}

async fn close_notebook_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NotebookRequest>, JsonRejection>,
) -> ServerResult<StatusCode> {
    let Json(request) = payload?;
    state.registry.close(&request.filepath).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_cell_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AddCellRequest>, JsonRejection>,
) -> ServerResult<Json<CellSnapshot>> {
    let Json(request) = payload?;
    let handle = state.registry.get(&request.filepath).await?;
    let mut document = handle.lock().await;
    let cell = document.add_cell(request.cell_type, &request.source)?;
    Ok(Json(cell.snapshot(document.path())))
}

async fn update_cell_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<UpdateCellRequest>, JsonRejection>,
) -> ServerResult<Json<CellSnapshot>> {
    let Json(request) = payload?;
    let handle = state.registry.get(&request.filepath).await?;
    let mut document = handle.lock().await;
    let cell = document.set_source(&request.cell_id, &request.source)?;
    Ok(Json(cell.snapshot(document.path())))
}

async fn get_cells_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<NotebookRequest>, QueryRejection>,
) -> ServerResult<Json<Vec<CellWithOutput>>> {
    let Query(request) = query?;
    let handle = state.registry.get(&request.filepath).await?;
    let document = handle.lock().await;
    let cells = document
        .cells()
        .iter()
        .map(|cell| cell.with_output(document.path()))
        .collect();
    Ok(Json(cells))
}

async fn execute_cell_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ExecuteCellRequest>, JsonRejection>,
) -> ServerResult<Json<CellWithOutput>> {
    let Json(request) = payload?;
    let handle = state.registry.get(&request.filepath).await?;
    let mut document = handle.lock().await;
    let executed = document.execute_cell(&request.cell_id).await?;
    Ok(Json(executed))
}

async fn restart_kernel_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NotebookRequest>, JsonRejection>,
) -> ServerResult<StatusCode> {
    let Json(request) = payload?;
    let handle = state.registry.get(&request.filepath).await?;
    handle.lock().await.restart_kernel().await?;
    Ok(StatusCode::NO_CONTENT)
}
