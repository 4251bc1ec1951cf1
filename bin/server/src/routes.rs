//! HTTP routes.
//!
//! Every route except `/health` and `/connectors` acts on behalf of the
//! caller named by [`Caller`]. Records owned by someone else answer 404.

use crate::auth::Caller;
use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use conduit_connector::ConnectorInfo;
use conduit_core::{DataEnvelope, DataSchema, ExecutionId, NodeId, WorkflowId};
use conduit_workflow::{
    Execution, ExecutionRequest, GraphDefinition, NodeSchemaReport, SchemaValidation,
    ValidationResult, Workflow, WorkflowUpdate,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use tower_http::trace::TraceLayer;

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/connectors", get(list_connectors))
        .route("/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/workflows/{id}",
            get(get_workflow).patch(update_workflow).delete(delete_workflow),
        )
        .route("/workflow/{id}/graph", get(get_graph).put(put_graph))
        .route("/workflow/{id}/validate", post(validate_graph))
        .route("/workflow/{id}/validate-schema", post(validate_schema))
        .route("/workflow/{id}/schema", get(workflow_schema))
        .route(
            "/workflow/{id}/nodes/{node_id}/schema/output",
            get(node_output_schema),
        )
        .route(
            "/workflow/{id}/nodes/{node_id}/schema/input",
            get(node_input_schema),
        )
        .route("/workflow/{id}/nodes/{node_id}/sample", get(node_sample))
        .route("/workflow/{id}/execute", post(execute_workflow))
        .route("/workflow/{id}/webhook", post(webhook))
        .route("/workflow/{id}/executions", get(list_executions))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/cancel", post(cancel_execution))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn workflow_id(raw: &str) -> Result<WorkflowId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound {
        message: format!("workflow not found: {raw}"),
    })
}

fn execution_id(raw: &str) -> Result<ExecutionId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound {
        message: format!("execution not found: {raw}"),
    })
}

fn node_id(raw: &str) -> Result<NodeId, ApiError> {
    NodeId::new(raw).map_err(|_| ApiError::NotFound {
        message: format!("node not found: {raw}"),
    })
}

/// Parses a request body that may be left empty.
fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))
}

async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "ok" }))
}

async fn list_connectors(State(state): State<AppState>) -> Json<Vec<ConnectorInfo>> {
    Json(state.registry.infos())
}

#[derive(Debug, Deserialize)]
struct CreateWorkflow {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create_workflow(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Json(body): Json<CreateWorkflow>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    let workflow = state
        .workflows
        .create_workflow(owner, &body.name, body.description)
        .await?;
    Ok((StatusCode::CREATED, Json(workflow)))
}

async fn list_workflows(
    State(state): State<AppState>,
    Caller(owner): Caller,
) -> Result<Json<Vec<Workflow>>, ApiError> {
    Ok(Json(state.workflows.list_workflows(owner).await?))
}

async fn get_workflow(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    let id = workflow_id(&id)?;
    Ok(Json(state.workflows.get_workflow(owner, id).await?))
}

async fn update_workflow(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    Json(update): Json<WorkflowUpdate>,
) -> Result<Json<Workflow>, ApiError> {
    let id = workflow_id(&id)?;
    Ok(Json(state.workflows.update_workflow(owner, id, update).await?))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = workflow_id(&id)?;
    state.workflows.delete_workflow(owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_graph(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<GraphDefinition>, ApiError> {
    let id = workflow_id(&id)?;
    Ok(Json(state.workflows.get_graph(owner, id).await?))
}

/// Stores the graph whether or not it is valid; the status says which.
async fn put_graph(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    Json(graph): Json<GraphDefinition>,
) -> Result<(StatusCode, Json<ValidationResult>), ApiError> {
    let id = workflow_id(&id)?;
    let result = state.workflows.save_graph(owner, id, &graph).await?;
    let status = if result.valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(result)))
}

async fn validate_graph(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ValidationResult>, ApiError> {
    let id = workflow_id(&id)?;
    let graph: Option<GraphDefinition> = optional_json(&body)?;
    Ok(Json(
        state
            .workflows
            .validate_graph(owner, id, graph.as_ref())
            .await?,
    ))
}

async fn validate_schema(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<SchemaValidation>, ApiError> {
    let id = workflow_id(&id)?;
    Ok(Json(state.schemas.validate_schema(owner, id).await?))
}

async fn workflow_schema(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<NodeSchemaReport>>, ApiError> {
    let id = workflow_id(&id)?;
    Ok(Json(state.schemas.workflow_schema(owner, id).await?))
}

async fn node_output_schema(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path((id, node)): Path<(String, String)>,
) -> Result<Json<DataSchema>, ApiError> {
    let id = workflow_id(&id)?;
    let node = node_id(&node)?;
    Ok(Json(state.schemas.node_output_schema(owner, id, &node).await?))
}

async fn node_input_schema(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path((id, node)): Path<(String, String)>,
) -> Result<Json<DataSchema>, ApiError> {
    let id = workflow_id(&id)?;
    let node = node_id(&node)?;
    Ok(Json(state.schemas.node_input_schema(owner, id, &node).await?))
}

#[derive(Debug, Deserialize)]
struct SampleParams {
    limit: Option<usize>,
}

async fn node_sample(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path((id, node)): Path<(String, String)>,
    Query(params): Query<SampleParams>,
) -> Result<Json<DataEnvelope>, ApiError> {
    let id = workflow_id(&id)?;
    let node = node_id(&node)?;
    Ok(Json(
        state
            .previews
            .node_sample(owner, id, &node, params.limit)
            .await?,
    ))
}

async fn execute_workflow(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let id = workflow_id(&id)?;
    let payload = optional_json(&body)?;
    let execution = state
        .engine
        .execute(ExecutionRequest::manual(owner, id, payload))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

async fn webhook(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let id = workflow_id(&id)?;
    let payload = optional_json(&body)?
        .ok_or_else(|| ApiError::bad_request("webhook payload is required"))?;
    let execution = state
        .engine
        .execute(ExecutionRequest::webhook(owner, id, payload))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
}

async fn list_executions(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Execution>>, ApiError> {
    let id = workflow_id(&id)?;
    let limit = state.executions.limit(params.limit);
    Ok(Json(state.engine.list_executions(owner, id, limit).await?))
}

async fn get_execution(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<Json<Execution>, ApiError> {
    let id = execution_id(&id)?;
    Ok(Json(state.engine.status(owner, id).await?))
}

async fn cancel_execution(
    State(state): State<AppState>,
    Caller(owner): Caller,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Execution>), ApiError> {
    let id = execution_id(&id)?;
    let execution = state.engine.cancel(owner, id).await?;
    Ok((StatusCode::ACCEPTED, Json(execution)))
}
