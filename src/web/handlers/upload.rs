//! Upload coordinator handlers.
//!
//! `GET /files/{uuid}/upload` projects the current credential/location
//! record; `POST /files/{uuid}/upload` rotates or issues credentials,
//! gated on the awaiting-upload status family.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use utoipa;

use crate::file::{
    upload_principal_name, AccessMode, FileStatus, StorageRecordKey, SUPPORTED_SERVICE,
};
use crate::web::dto::result_envelope;
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::{AuthUser, Permission};
use crate::DepotError;

/// GET /files/{uuid}/upload - Current credential/location projection.
#[utoipa::path(
    get,
    path = "/files/{uuid}/upload",
    tag = "upload",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "Credential/location projection"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Edit permission required"),
        (status = 404, description = "File not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn get_upload(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.require(Permission::Edit)?;

    let service = state.file_service();
    let item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    // Show the bare s3 location for files that landed in storage without a
    // grant being issued through us.
    let upload_credentials = match item.external() {
        Some(external) => match &external.upload_credentials {
            Some(credentials) => serde_json::to_value(credentials).map_err(DepotError::from)?,
            None if external.service == SUPPORTED_SERVICE => json!({
                "upload_url": format!("s3://{}/{}", external.bucket, external.key),
            }),
            None => Value::Null,
        },
        None => Value::Null,
    };

    let extra_files_creds = service
        .extra_files_creds(&item)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(json!({
        "@graph": [{
            "@id": item.at_id(),
            "upload_credentials": upload_credentials,
            "extra_files_creds": extra_files_creds,
        }],
    })))
}

/// POST /files/{uuid}/upload - Rotate or issue upload credentials.
///
/// Requires the file's status to be in the awaiting-upload family; an
/// `upload failed` file transitions back to `uploading`.
#[utoipa::path(
    post,
    path = "/files/{uuid}/upload",
    tag = "upload",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "Credentials rotated; updated item returned"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Status not in the awaiting-upload family"),
        (status = 404, description = "File not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn post_upload(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    auth.require(Permission::Edit)?;

    let service = state.file_service();
    let mut item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let status = item.properties.status;
    if !status.is_some_and(|s| s.is_awaiting_upload()) {
        return Err(ApiError::forbidden(
            "status must be \"uploading\" to issue new credentials",
        ));
    }

    let creds = match item.external() {
        // Handle objects initially posted as another state.
        None => service
            .build_external_creds(&item.uuid, &item.properties)
            .await
            .map_err(ApiError::from)?,
        Some(external) if external.service == SUPPORTED_SERVICE => {
            let name = upload_principal_name(item.properties.filename.as_deref());
            state
                .issuer
                .issue(
                    &external.bucket,
                    &external.key,
                    name.as_deref(),
                    AccessMode::Write,
                )
                .await
                .map_err(ApiError::from)?
        }
        Some(external) => {
            return Err(DepotError::UnsupportedService(external.service.clone()).into())
        }
    };

    let mut new_properties = item.properties.clone();
    if new_properties.status == Some(FileStatus::UploadFailed) {
        new_properties.status = Some(FileStatus::Uploading);
    }

    let mut records = BTreeMap::new();
    records.insert(StorageRecordKey::Primary, creds);

    tracing::debug!("before modification of {}", item.uuid);
    service
        .update(&mut item, new_properties, records)
        .await
        .map_err(ApiError::from)?;
    tracing::debug!("after modification of {}", item.uuid);

    let rendered = service
        .render(&item, true)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(result_envelope(rendered)))
}
