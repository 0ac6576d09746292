//! File collection and item write handlers.
//!
//! Collection POSTs and item PATCH/PUTs run the validator chain before
//! persisting through the File entity model. `validate=false` bypasses the
//! chain for elevated principals; `check_only=true` dry-runs the chain
//! without persisting.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use tracing::warn;
use utoipa;
use uuid::Uuid;

use crate::file::{
    validate_file_write, FileClass, FileProperties, PropagationResult, UpdateReport,
    ValidationContext, ValidationErrors,
};
use crate::web::dto::{check_write_shape, result_envelope, WriteQuery};
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::{AuthUser, Permission};

/// Shallow-merge a PATCH body over the current property document.
fn merge_patch(current: &Value, body: &Value) -> Value {
    let mut merged = current.clone();
    if let (Some(merged_obj), Some(body_obj)) = (merged.as_object_mut(), body.as_object()) {
        for (key, value) in body_obj {
            merged_obj.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn log_propagation_failures(uuid: &str, report: &UpdateReport) {
    for outcome in &report.propagations {
        match &outcome.result {
            PropagationResult::Propagated { .. } | PropagationResult::AlreadyConsistent => {}
            other => warn!(
                "related_files propagation on {} to '{}' ({}) did not apply: {:?}",
                uuid, outcome.target, outcome.relationship_type, other
            ),
        }
    }
}

async fn run_validators(
    state: &AppState,
    class: FileClass,
    current: Option<&FileProperties>,
    current_uuid: Option<&str>,
    force_md5: bool,
    body: &Value,
) -> Result<(), ApiError> {
    let ctx = ValidationContext {
        pool: state.db.pool(),
        class,
        current,
        current_uuid,
        force_md5,
    };
    let mut errors = ValidationErrors::new();
    validate_file_write(&ctx, body, &mut errors)
        .await
        .map_err(ApiError::from)?;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ApiError::validation(errors.into_errors()))
    }
}

async fn create_file_impl(
    state: Arc<AppState>,
    auth: AuthUser,
    query: WriteQuery,
    body: Value,
    class: FileClass,
) -> Result<Response, ApiError> {
    if query.skip_validation() {
        auth.require(Permission::Unvalidated)?;
    } else {
        auth.require(Permission::Add)?;
        check_write_shape(&body)?;
        run_validators(&state, class, None, None, query.force_md5(), &body).await?;
    }

    let properties: FileProperties = serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid file properties: {e}")))?;

    let uuid = Uuid::new_v4().to_string();
    let service = state.file_service();
    let (item, report) = service
        .create(class, &uuid, properties)
        .await
        .map_err(ApiError::from)?;
    log_propagation_failures(&uuid, &report);

    let rendered = service
        .render(&item, auth.role().can(Permission::Edit))
        .await
        .map_err(ApiError::from)?;
    Ok((StatusCode::CREATED, Json(result_envelope(rendered))).into_response())
}

/// POST /files-processed - Create a processed file.
#[utoipa::path(
    post,
    path = "/files-processed",
    tag = "files",
    responses(
        (status = 201, description = "File created"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Add permission required"),
        (status = 422, description = "Validation failed")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_processed_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<WriteQuery>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_file_impl(state, auth, query, body, FileClass::Processed).await
}

/// POST /files-submitted - Create a submitted file.
#[utoipa::path(
    post,
    path = "/files-submitted",
    tag = "files",
    responses(
        (status = 201, description = "File created"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Add permission required"),
        (status = 422, description = "Validation failed")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_submitted_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<WriteQuery>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_file_impl(state, auth, query, body, FileClass::Submitted).await
}

/// POST /files-reference - Create a reference file.
#[utoipa::path(
    post,
    path = "/files-reference",
    tag = "files",
    responses(
        (status = 201, description = "File created"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Add permission required"),
        (status = 422, description = "Validation failed")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn create_reference_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<WriteQuery>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    create_file_impl(state, auth, query, body, FileClass::Reference).await
}

/// GET /files/{uuid} - Render the item, or dry-run validation with
/// `check_only=true` (index permission).
#[utoipa::path(
    get,
    path = "/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "File uuid"),
        ("check_only" = Option<String>, Query, description = "Dry-run validation only")
    ),
    responses(
        (status = 200, description = "Rendered item or validation success"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "File not found"),
        (status = 422, description = "Validation failed (check_only)")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
    Query(query): Query<WriteQuery>,
) -> Result<Response, ApiError> {
    let service = state.file_service();

    if query.check_only() {
        auth.require(Permission::Index)?;
        let item = service
            .load(&uuid)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::not_found("File not found"))?;
        let body = serde_json::to_value(&item.properties)
            .map_err(crate::DepotError::from)
            .map_err(ApiError::from)?;
        run_validators(
            &state,
            item.class,
            Some(&item.properties),
            Some(&uuid),
            query.force_md5(),
            &body,
        )
        .await?;
        return Ok(Json(serde_json::json!({"status": "success"})).into_response());
    }

    auth.require(Permission::View)?;
    let item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;
    let rendered = service
        .render(&item, auth.role().can(Permission::Edit))
        .await
        .map_err(ApiError::from)?;
    Ok(Json(rendered).into_response())
}

async fn edit_file_impl(
    state: Arc<AppState>,
    auth: AuthUser,
    uuid: String,
    query: WriteQuery,
    body: Value,
    replace: bool,
) -> Result<Response, ApiError> {
    if query.check_only() {
        auth.require(Permission::Index)?;
    } else if query.skip_validation() {
        auth.require(Permission::Unvalidated)?;
    } else {
        auth.require(Permission::Edit)?;
    }

    let service = state.file_service();
    let mut item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    if !query.skip_validation() {
        check_write_shape(&body)?;
        run_validators(
            &state,
            item.class,
            Some(&item.properties),
            Some(&uuid),
            query.force_md5(),
            &body,
        )
        .await?;
    }

    if query.check_only() {
        return Ok(Json(serde_json::json!({"status": "success"})).into_response());
    }

    let current = serde_json::to_value(&item.properties)
        .map_err(crate::DepotError::from)
        .map_err(ApiError::from)?;
    let merged = if replace {
        body
    } else {
        merge_patch(&current, &body)
    };
    let properties: FileProperties = serde_json::from_value(merged)
        .map_err(|e| ApiError::bad_request(format!("Invalid file properties: {e}")))?;

    let report = service
        .update(&mut item, properties, BTreeMap::new())
        .await
        .map_err(ApiError::from)?;
    log_propagation_failures(&uuid, &report);

    let rendered = service
        .render(&item, true)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(result_envelope(rendered)).into_response())
}

/// PATCH /files/{uuid} - Partial update through the validator chain.
#[utoipa::path(
    patch,
    path = "/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "File updated"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Edit permission required"),
        (status = 404, description = "File not found"),
        (status = 422, description = "Validation failed")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn patch_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
    Query(query): Query<WriteQuery>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    edit_file_impl(state, auth, uuid, query, body, false).await
}

/// PUT /files/{uuid} - Full replacement through the validator chain.
#[utoipa::path(
    put,
    path = "/files/{uuid}",
    tag = "files",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "File replaced"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Edit permission required"),
        (status = 404, description = "File not found"),
        (status = 422, description = "Validation failed")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn put_file(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
    Query(query): Query<WriteQuery>,
    Json(body): Json<Value>,
) -> Result<Response, ApiError> {
    edit_file_impl(state, auth, uuid, query, body, true).await
}
