//! Download broker handlers.
//!
//! `download` resolves a file (or one of its extra files) to a concrete
//! storage object and answers with a presigned redirect, a soft-redirect
//! descriptor, or relayed partial content. `download_cli` returns
//! read-scoped credentials for command-line tooling, and `drs` serves the
//! GA4GH DRS descriptor.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{json, Value};
use utoipa;

use crate::analytics::{client_id_from_cookies, report_download, DownloadEvent};
use crate::config::DownloadConfig;
use crate::datetime::to_rfc3339;
use crate::db::ItemRepository;
use crate::file::{
    AccessMode, ExternalCreds, FileItem, FileService, StorageRecordKey, SUPPORTED_SERVICE,
};
use crate::storage::GetObjectRequest;
use crate::web::dto::DownloadQuery;
use crate::web::error::ApiError;
use crate::web::handlers::AppState;
use crate::web::middleware::{AuthUser, Permission};
use crate::DepotError;

/// Generate a safe Content-Disposition header value for file downloads.
///
/// This function sanitizes the filename to prevent header injection attacks
/// and uses RFC 5987 encoding for non-ASCII filenames.
fn content_disposition_header(filename: &str) -> String {
    // Sanitize filename for the basic filename parameter (ASCII fallback)
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control()) // Remove control characters (CR, LF, etc.)
        .map(|c| match c {
            '"' => '_',  // Replace double quotes
            '\\' => '_', // Replace backslashes
            _ => c,
        })
        .collect();

    // For ASCII-only filenames, use simple format
    if filename.is_ascii() && !filename.chars().any(|c| c.is_control() || c == '"' || c == '\\') {
        return format!("attachment; filename=\"{}\"", filename);
    }

    // Use RFC 5987 encoding for non-ASCII or special characters
    let encoded = urlencoding::encode(filename);

    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

/// Bytes covered by a `Range` header against a file of the given size.
///
/// Handles single and multi ranges; open ends resolve to the file size and
/// suffix ranges to their length. A malformed header counts as a full
/// download.
fn parse_range_bytes(header: &str, file_size: u64) -> u64 {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return file_size;
    };
    let mut total = 0u64;
    for part in ranges.split(',') {
        let Some((start, end)) = part.trim().split_once('-') else {
            continue;
        };
        match (start.parse::<u64>().ok(), end.parse::<u64>().ok()) {
            // end is inclusive on the wire
            (Some(start), Some(end)) => {
                total += (end + 1).min(file_size).saturating_sub(start);
            }
            (Some(start), None) => total += file_size.saturating_sub(start),
            (None, Some(suffix)) => total += suffix.min(file_size),
            (None, None) => {}
        }
    }
    total
}

/// The artifact a download request resolved to: the primary file or one of
/// its extra files.
#[derive(Debug, Clone)]
struct ResolvedArtifact {
    filename: String,
    record_key: StorageRecordKey,
    file_size: Option<u64>,
}

/// Match the requested filename against the primary file, then against the
/// extra files. None means not-found.
async fn resolve_artifact(
    service: &FileService<'_>,
    item: &FileItem,
    requested: Option<&str>,
) -> Result<Option<ResolvedArtifact>, DepotError> {
    let format = match item.properties.file_format.as_deref() {
        Some(reference) => service.formats().get(reference).await?,
        None => None,
    };

    if item.properties.accession_or_external().is_some() {
        let title = item.display_title(format.as_ref());
        if requested.is_none() || requested == Some(title.as_str()) {
            return Ok(Some(ResolvedArtifact {
                filename: title,
                record_key: StorageRecordKey::Primary,
                file_size: item.properties.file_size,
            }));
        }
    }

    for extra in &item.properties.extra_files {
        let Some(eformat) = service.formats().get(&extra.file_format).await? else {
            continue;
        };
        let Some(accession) = extra.accession.as_deref() else {
            continue;
        };
        let title = match eformat.extension() {
            Some(ext) => format!("{accession}.{ext}"),
            None => accession.to_string(),
        };
        if requested.is_none() || requested == Some(title.as_str()) {
            return Ok(Some(ResolvedArtifact {
                filename: title,
                record_key: StorageRecordKey::ExtraFile(eformat.uuid),
                file_size: extra.file_size,
            }));
        }
    }

    Ok(None)
}

/// Reconcile a stored bucket name against the two configured canonical
/// buckets. A drifted stored value is never trusted over configuration.
fn reconcile_bucket(
    stored: &str,
    upload_bucket: &str,
    wfout_bucket: &str,
) -> (String, bool) {
    if stored == upload_bucket || stored == wfout_bucket {
        return (stored.to_string(), false);
    }
    let substituted = if stored.contains("wfout") {
        wfout_bucket.to_string()
    } else {
        upload_bucket.to_string()
    };
    (substituted, true)
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(|value| value.trim().parse().ok())
}

/// Whether to route the redirect through the download proxy: only for
/// clients whose address is known and outside the trusted set.
fn use_download_proxy(config: &DownloadConfig, client: Option<IpAddr>) -> bool {
    let Some(client) = client else {
        return false;
    };
    if config.proxy_base.is_none() {
        return false;
    }
    !config
        .trusted_client_ips
        .iter()
        .any(|trusted| trusted.parse::<IpAddr>() == Ok(client))
}

/// Descriptive fields for the analytics event, resolved best-effort.
async fn submitter_title(state: &AppState, item: &FileItem) -> Option<String> {
    let reference = item
        .properties
        .lab
        .as_deref()
        .or_else(|| item.properties.extra.get("sequencing_center").and_then(Value::as_str))?;
    let repo = ItemRepository::new(state.db.pool());
    let record = match repo.get(reference).await.ok()? {
        Some(record) => record,
        None => repo.get_by_unique_key("accession", reference).await.ok()??,
    };
    record
        .properties
        .get("display_title")
        .or_else(|| record.properties.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn experiment_or_assay_type(item: &FileItem) -> Option<String> {
    if let Some(assay) = item
        .properties
        .extra
        .get("data_generation_summary")
        .and_then(|summary| summary.get("assays"))
        .and_then(Value::as_array)
        .and_then(|assays| assays.first())
        .and_then(Value::as_str)
    {
        return Some(assay.to_string());
    }
    item.properties
        .extra
        .get("track_and_facet_info")
        .and_then(|info| info.get("experiment_type"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn file_type(item: &FileItem) -> String {
    if let Some(category) = item
        .properties
        .extra
        .get("data_category")
        .and_then(Value::as_array)
        .and_then(|categories| categories.first())
        .and_then(Value::as_str)
    {
        return category.to_string();
    }
    item.properties
        .file_type
        .clone()
        .unwrap_or_else(|| "other".to_string())
}

/// GET /files/{uuid}/download - Resolve and redirect to the file content.
#[utoipa::path(
    get,
    path = "/files/{uuid}/download",
    tag = "download",
    params(
        ("uuid" = String, Path, description = "File uuid"),
        ("soft" = Option<String>, Query, description = "Return a soft-redirect descriptor")
    ),
    responses(
        (status = 307, description = "Redirect to presigned URL"),
        (status = 200, description = "Soft-redirect descriptor or relayed content"),
        (status = 206, description = "Relayed partial content"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No matching artifact")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn download(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
    Query(query): Query<DownloadQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    download_impl(state, auth, uuid, None, query, uri, headers, jar).await
}

/// GET /files/{uuid}/download/{filename} - Download by resolved filename.
#[utoipa::path(
    get,
    path = "/files/{uuid}/download/{filename}",
    tag = "download",
    params(
        ("uuid" = String, Path, description = "File uuid"),
        ("filename" = String, Path, description = "Expected artifact filename")
    ),
    responses(
        (status = 307, description = "Redirect to presigned URL"),
        (status = 404, description = "No matching artifact")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn download_named(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path((uuid, filename)): Path<(String, String)>,
    Query(query): Query<DownloadQuery>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    download_impl(state, auth, uuid, Some(filename), query, uri, headers, jar).await
}

#[allow(clippy::too_many_arguments)]
async fn download_impl(
    state: Arc<AppState>,
    auth: AuthUser,
    uuid: String,
    requested: Option<String>,
    query: DownloadQuery,
    uri: axum::http::Uri,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<Response, ApiError> {
    auth.require(Permission::View)?;

    let service = state.file_service();
    let item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    // with extra_files the caller may be after the main file or one of the
    // extras; search both before giving up
    let artifact = resolve_artifact(&service, &item, requested.as_deref())
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| {
            ApiError::not_found(requested.clone().unwrap_or_else(|| uuid.clone()))
        })?;

    let external = match item.storage_records.get(&artifact.record_key) {
        Some(external) => external.clone(),
        None => {
            // lazily build a location-only record for files that predate
            // credential bookkeeping
            let key = format!("{}/{}", item.uuid, artifact.filename);
            state
                .issuer
                .issue(
                    &state.config.storage.file_upload_bucket,
                    &key,
                    None,
                    AccessMode::Read,
                )
                .await
                .map_err(ApiError::from)?
        }
    };

    if external.service != SUPPORTED_SERVICE {
        return Err(DepotError::UnsupportedService(external.service.clone()).into());
    }

    let storage = &state.config.storage;
    let (bucket, overridden) = reconcile_bucket(
        &external.bucket,
        &storage.file_upload_bucket,
        &storage.file_wfout_bucket,
    );
    if overridden {
        tracing::error!(
            "Encountered s3 bucket mismatch - ignoring metadata value {} and using registry value {}",
            external.bucket,
            bucket
        );
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let request = GetObjectRequest {
        bucket,
        key: external.key.clone(),
        content_disposition: content_disposition_header(&artifact.filename),
        range: range.clone(),
    };

    let presigned = state
        .object_store
        .presign_get(&request)
        .await
        .map_err(ApiError::from)?;

    // Analytics side effect: best-effort and fully detached from the response
    if state.config.analytics.ga4_secret.is_some() {
        let file_size = artifact.file_size.unwrap_or(0);
        let bytes_downloaded = match &range {
            Some(header) => parse_range_bytes(header, file_size),
            None => file_size,
        };
        let host = headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost")
            .to_string();
        let event = DownloadEvent {
            filename: artifact.filename.clone(),
            bytes_downloaded,
            file_at_id: item.at_id(),
            item_types: vec!["File".to_string(), item.class.type_name().to_string()],
            file_type: file_type(&item),
            experiment_type: experiment_or_assay_type(&item),
            dataset: item.properties.dataset.clone(),
            submitter_title: submitter_title(&state, &item).await,
            user_uuid: Some(auth.0.sub.clone()),
            user_groups: Some(auth.0.groups.clone()),
            range_query: range.is_some(),
            request_url: format!("https://{host}{uri}"),
            host,
            client_id: client_id_from_cookies(
                jar.get("clientIdentifier").map(|c| c.value()),
                jar.get("_ga").map(|c| c.value()),
            ),
        };
        let analytics = state.config.analytics.clone();
        tokio::spawn(async move {
            report_download(&analytics, event).await;
        });
    }

    if query.soft() {
        return Ok(Json(json!({
            "@type": ["SoftRedirect"],
            "location": presigned.url,
            "expires": to_rfc3339(&presigned.expires_at),
        }))
        .into_response());
    }

    if range.is_some() {
        // relay the ranged object server-side, verbatim
        let object = state
            .object_store
            .get_object_ranged(&request)
            .await
            .map_err(ApiError::from)?;
        let content_type = mime_guess::from_path(&artifact.filename)
            .first_or_octet_stream()
            .to_string();
        let mut builder = Response::builder()
            .status(object.status)
            .header(header::CONTENT_TYPE, content_type)
            .header(
                header::CONTENT_DISPOSITION,
                content_disposition_header(&artifact.filename),
            );
        if let Some(accept_ranges) = object.accept_ranges {
            builder = builder.header(header::ACCEPT_RANGES, accept_ranges);
        }
        if let Some(content_range) = object.content_range {
            builder = builder.header(header::CONTENT_RANGE, content_range);
        }
        if let Some(content_length) = object.content_length {
            builder = builder.header(header::CONTENT_LENGTH, content_length);
        }
        return builder
            .body(Body::from(object.body))
            .map_err(|e| ApiError::internal(e.to_string()));
    }

    let mut location = presigned.url;
    if use_download_proxy(&state.config.download, client_ip(&headers)) {
        if let Some(base) = &state.config.download.proxy_base {
            location = format!("{base}{location}");
        }
    }

    // 307 redirect specifies to keep original method
    Response::builder()
        .status(StatusCode::TEMPORARY_REDIRECT)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// GET /files/{uuid}/download_cli - Read-scoped credentials as JSON.
///
/// Same resolution path as download, but returns the raw credential
/// payload for command-line tooling instead of redirecting.
#[utoipa::path(
    get,
    path = "/files/{uuid}/download_cli",
    tag = "download",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "Read-scoped credential payload"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "File not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn download_cli(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
) -> Result<Json<ExternalCreds>, ApiError> {
    auth.require(Permission::View)?;

    let service = state.file_service();
    let item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let artifact = resolve_artifact(&service, &item, None)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found(uuid.clone()))?;

    let (bucket, key) = match item.storage_records.get(&artifact.record_key) {
        Some(external) if external.service == SUPPORTED_SERVICE => {
            let storage = &state.config.storage;
            let (bucket, overridden) = reconcile_bucket(
                &external.bucket,
                &storage.file_upload_bucket,
                &storage.file_wfout_bucket,
            );
            if overridden {
                tracing::error!(
                    "Encountered s3 bucket mismatch - ignoring metadata value {} and using registry value {}",
                    external.bucket,
                    bucket
                );
            }
            (bucket, external.key.clone())
        }
        Some(external) => {
            return Err(DepotError::UnsupportedService(external.service.clone()).into())
        }
        None => (
            state.config.storage.file_upload_bucket.clone(),
            format!("{}/{}", item.uuid, artifact.filename),
        ),
    };

    let creds = state
        .issuer
        .issue(&bucket, &key, Some("DownloadCredentials"), AccessMode::Read)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(creds))
}

/// Expand the DRS base object with the properties that map onto it.
fn build_drs_object(mut base: Value, rendered: &Value) -> Value {
    let Some(object) = base.as_object_mut() else {
        return base;
    };
    if let Some(description) = rendered.get("description") {
        object.insert("description".to_string(), description.clone());
    }
    // size is required by DRS so take it or default to 0
    object.insert(
        "size".to_string(),
        rendered.get("file_size").cloned().unwrap_or(json!(0)),
    );
    if let Some(uuid) = rendered.get("uuid") {
        object.insert("aliases".to_string(), json!([uuid]));
    }
    if let Some(md5) = rendered.get("content_md5sum") {
        object.insert(
            "checksums".to_string(),
            json!([{ "checksum": md5, "type": "md5" }]),
        );
        object.insert("version".to_string(), md5.clone());
    }
    if let Some(filename) = rendered.get("filename") {
        object.insert("name".to_string(), filename.clone());
    }
    if let Some(modified) = rendered
        .get("last_modified")
        .and_then(|m| m.get("date_modified"))
    {
        object.insert("updated_time".to_string(), modified.clone());
    }
    base
}

/// GET /files/{uuid}/drs - GA4GH DRS object descriptor.
#[utoipa::path(
    get,
    path = "/files/{uuid}/drs",
    tag = "download",
    params(
        ("uuid" = String, Path, description = "File uuid")
    ),
    responses(
        (status = 200, description = "DRS object"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "File not found")
    ),
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn drs(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(uuid): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    auth.require(Permission::View)?;

    let service = state.file_service();
    let item = service
        .load(&uuid)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("File not found"))?;

    let rendered = service
        .render(&item, false)
        .await
        .map_err(ApiError::from)?;

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let accession = item
        .properties
        .accession_or_external()
        .unwrap_or(&item.uuid);

    let base = json!({
        "id": rendered.get("@id"),
        "created_time": rendered.get("date_created"),
        "drs_id": accession,
        "self_uri": format!("drs://{host}/files/{uuid}/drs"),
        "access_methods": [
            {
                // always prefer https
                "access_url": { "url": format!("https://{host}/files/{uuid}/download") },
                "type": "https"
            },
            {
                // but provide http as well in case we are not on prod
                "access_url": { "url": format!("http://{host}/files/{uuid}/download") },
                "type": "http"
            },
        ],
    });

    Ok(Json(build_drs_object(base, &rendered)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_header_simple_ascii() {
        let result = content_disposition_header("XYZ001.bam");
        assert_eq!(result, "attachment; filename=\"XYZ001.bam\"");
    }

    #[test]
    fn test_content_disposition_header_injection() {
        let result = content_disposition_header("test\r\nX-Injected: bad.bam");
        assert!(!result.contains('\r'));
        assert!(!result.contains('\n'));
        assert!(result.starts_with("attachment; filename="));
    }

    #[test]
    fn test_content_disposition_header_non_ascii() {
        let result = content_disposition_header("ファイル.bam");
        assert!(result.contains("filename*=UTF-8''"));
    }

    #[test]
    fn test_parse_range_bytes_single() {
        assert_eq!(parse_range_bytes("bytes=100-199", 1000), 100);
    }

    #[test]
    fn test_parse_range_bytes_multi() {
        assert_eq!(parse_range_bytes("bytes=0-49,100-199", 1000), 150);
    }

    #[test]
    fn test_parse_range_bytes_open_end() {
        assert_eq!(parse_range_bytes("bytes=500-", 1000), 500);
    }

    #[test]
    fn test_parse_range_bytes_suffix() {
        assert_eq!(parse_range_bytes("bytes=-200", 1000), 200);
    }

    #[test]
    fn test_parse_range_bytes_clamps_to_file_size() {
        assert_eq!(parse_range_bytes("bytes=0-4999", 1000), 1000);
    }

    #[test]
    fn test_parse_range_bytes_malformed() {
        assert_eq!(parse_range_bytes("items=1-2", 1000), 1000);
    }

    #[test]
    fn test_reconcile_bucket_trusts_known_buckets() {
        assert_eq!(
            reconcile_bucket("depot-files", "depot-files", "depot-wfout"),
            ("depot-files".to_string(), false)
        );
        assert_eq!(
            reconcile_bucket("depot-wfout", "depot-files", "depot-wfout"),
            ("depot-wfout".to_string(), false)
        );
    }

    #[test]
    fn test_reconcile_bucket_overrides_drifted_values() {
        // a stored bucket hinting workflow output maps to the wfout bucket
        assert_eq!(
            reconcile_bucket("old-prod-wfout-bucket", "depot-files", "depot-wfout"),
            ("depot-wfout".to_string(), true)
        );
        assert_eq!(
            reconcile_bucket("old-prod-uploads", "depot-files", "depot-wfout"),
            ("depot-files".to_string(), true)
        );
    }

    #[test]
    fn test_use_download_proxy() {
        let config = DownloadConfig {
            proxy_base: Some("https://proxy.example.org/".to_string()),
            trusted_client_ips: vec!["10.0.0.5".to_string()],
        };
        assert!(!use_download_proxy(&config, None));
        assert!(!use_download_proxy(
            &config,
            Some("10.0.0.5".parse().unwrap())
        ));
        assert!(use_download_proxy(
            &config,
            Some("203.0.113.9".parse().unwrap())
        ));

        let no_proxy = DownloadConfig::default();
        assert!(!use_download_proxy(
            &no_proxy,
            Some("203.0.113.9".parse().unwrap())
        ));
    }

    #[test]
    fn test_client_ip_from_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "203.0.113.9, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(
            client_ip(&headers),
            Some("203.0.113.9".parse::<IpAddr>().unwrap())
        );
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_build_drs_object() {
        let rendered = json!({
            "uuid": "u-1",
            "file_size": 1234,
            "content_md5sum": "abc",
            "filename": "reads.bam",
            "description": "test file",
            "last_modified": {"date_modified": "2024-01-01T00:00:00Z"},
        });
        let base = json!({"id": "/files/u-1/", "drs_id": "XYZ001"});
        let drs = build_drs_object(base, &rendered);
        assert_eq!(drs["size"], 1234);
        assert_eq!(drs["aliases"][0], "u-1");
        assert_eq!(drs["checksums"][0]["checksum"], "abc");
        assert_eq!(drs["checksums"][0]["type"], "md5");
        assert_eq!(drs["version"], "abc");
        assert_eq!(drs["name"], "reads.bam");
        assert_eq!(drs["updated_time"], "2024-01-01T00:00:00Z");
        assert_eq!(drs["description"], "test file");
    }

    #[test]
    fn test_build_drs_object_minimal() {
        let drs = build_drs_object(json!({"drs_id": "XYZ001"}), &json!({}));
        // size is required by DRS
        assert_eq!(drs["size"], 0);
        assert!(drs.get("checksums").is_none());
    }
}
