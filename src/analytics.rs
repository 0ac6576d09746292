//! Google Analytics download reporting.
//!
//! A single GA4 Measurement-Protocol "purchase" event is fired per
//! download. Reporting is strictly best-effort: configuration or transport
//! problems are logged and must never affect the download response itself.

use serde_json::{json, Map, Value};
use tracing::error;

use crate::config::AnalyticsConfig;

/// GA4 Measurement Protocol collection endpoint.
const GA_COLLECT_URL: &str = "https://www.google-analytics.com/mp/collect";

/// Everything one download event reports.
#[derive(Debug, Clone)]
pub struct DownloadEvent {
    pub filename: String,
    /// Bytes served: the file size, or the Range-derived count.
    pub bytes_downloaded: u64,
    pub file_at_id: String,
    /// Type hierarchy, base first (e.g. `["File", "FileProcessed"]`).
    pub item_types: Vec<String>,
    pub file_type: String,
    pub experiment_type: Option<String>,
    pub dataset: Option<String>,
    pub submitter_title: Option<String>,
    pub user_uuid: Option<String>,
    pub user_groups: Option<Vec<String>>,
    /// Whether the request carried a Range header.
    pub range_query: bool,
    pub request_url: String,
    pub host: String,
    pub client_id: String,
}

/// Resolve the GA client id from cookies.
///
/// Prefers the `clientIdentifier` cookie; falls back to the `_ga` cookie
/// with its version prefix stripped, then to `"programmatic"`.
pub fn client_id_from_cookies(
    client_identifier: Option<&str>,
    ga_cookie: Option<&str>,
) -> String {
    if let Some(cid) = client_identifier {
        return cid.to_string();
    }
    if let Some(ga) = ga_cookie {
        let parts: Vec<&str> = ga.split('.').collect();
        if parts.len() > 2 {
            return parts[2..].join(".");
        }
    }
    "programmatic".to_string()
}

/// Look up the tracker id for a request host, falling back to the
/// `"default"` mapping. The tracker id is the second element of the
/// mapped pair.
pub fn tracker_id<'a>(config: &'a AnalyticsConfig, host: &str) -> Option<&'a str> {
    let mapping = config
        .hostname_tracker_ids
        .get(host)
        .or_else(|| config.hostname_tracker_ids.get("default"))?;
    mapping.get(1).map(String::as_str)
}

fn category(item_types: &[String], index: usize) -> String {
    item_types
        .get(index)
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Build the GA4 payload for a download event. None-valued fields are left
/// out rather than serialized as null.
pub fn build_payload(event: &DownloadEvent, timestamp_micros: i64) -> Value {
    let file_extension = event
        .filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .unwrap_or("");
    let experiment_type = event.experiment_type.as_deref().unwrap_or("None");
    let dataset = event.dataset.as_deref().unwrap_or("None");
    let submitter = event.submitter_title.as_deref().unwrap_or("None");

    let mut params = Map::new();
    params.insert("name".to_string(), json!(event.filename));
    params.insert("source".to_string(), json!("Serverside File Download"));
    params.insert(
        "action".to_string(),
        json!(if event.range_query {
            "Range Query"
        } else {
            "File Download"
        }),
    );
    params.insert("file_name".to_string(), json!(event.filename));
    params.insert("file_extension".to_string(), json!(file_extension));
    params.insert("link_url".to_string(), json!(event.request_url));
    params.insert("file_size".to_string(), json!(event.bytes_downloaded));
    params.insert(
        "downloads".to_string(),
        json!(if event.range_query { 0 } else { 1 }),
    );
    params.insert("experiment_type".to_string(), json!(experiment_type));
    params.insert("dataset".to_string(), json!(dataset));
    params.insert("lab".to_string(), json!(submitter));
    params.insert(
        "file_classification".to_string(),
        json!(event.item_types.join("/")),
    );
    params.insert("file_type".to_string(), json!(event.file_type));
    params.insert(
        "items".to_string(),
        json!([{
            "item_id": event.file_at_id,
            "item_name": event.filename,
            "item_category": category(&event.item_types, 0),
            "item_category2": category(&event.item_types, 1),
            "item_category3": category(&event.item_types, 2),
            "item_category4": experiment_type,
            "item_category5": dataset,
            "item_brand": submitter,
            "item_variant": event.file_type,
            "quantity": 1
        }]),
    );

    if let Some(user_uuid) = &event.user_uuid {
        params.insert("user_uuid".to_string(), json!(user_uuid));
    }
    if let Some(groups) = &event.user_groups {
        let mut groups = groups.clone();
        groups.sort();
        // compact JSON, aligned with what the front end reports
        if let Ok(compact) = serde_json::to_string(&groups) {
            params.insert("user_groups".to_string(), json!(compact));
        }
    }

    let mut payload = Map::new();
    payload.insert("client_id".to_string(), json!(event.client_id));
    payload.insert(
        "timestamp_micros".to_string(),
        json!(timestamp_micros.to_string()),
    );
    payload.insert("non_personalized_ads".to_string(), json!(false));
    if let Some(user_uuid) = &event.user_uuid {
        payload.insert("user_id".to_string(), json!(user_uuid));
    }
    payload.insert(
        "events".to_string(),
        json!([{ "name": "purchase", "params": Value::Object(params) }]),
    );
    Value::Object(payload)
}

/// Fire one download event at GA. All failures are logged and swallowed.
pub async fn report_download(config: &AnalyticsConfig, event: DownloadEvent) {
    let Some(secret) = config.ga4_secret.as_deref() else {
        return;
    };
    let Some(tid) = tracker_id(config, &event.host) else {
        error!("No valid tracker id found in analytics hostname_tracker_ids");
        return;
    };

    let timestamp_micros = chrono::Utc::now().timestamp_micros();
    let payload = build_payload(&event, timestamp_micros);
    let url = format!("{GA_COLLECT_URL}?measurement_id={tid}&api_secret={secret}");

    let client = reqwest::Client::new();
    if let Err(e) = client.post(&url).json(&payload).send().await {
        error!("Exception encountered posting to GA: {}", e);
    }
}
