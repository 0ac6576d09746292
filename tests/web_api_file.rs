//! Web API File write tests.
//!
//! Integration tests for the file collection/item write endpoints: the
//! validator chain, credential issuance on create, extra files, and
//! related-file symmetry.

mod common;

use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use common::{create_test_server, make_token, TestContext};
use serde_json::{json, Value};

async fn post_file(ctx: &TestContext, token: &str, body: Value) -> (StatusCode, Value) {
    let response = ctx
        .server
        .post("/files-processed")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&body)
        .await;
    (response.status_code(), response.json::<Value>())
}

fn created_uuid(body: &Value) -> String {
    body["@graph"][0]["uuid"].as_str().unwrap().to_string()
}

fn error_descriptions(body: &Value) -> Vec<String> {
    body["error"]["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["description"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_post_requires_token() {
    let ctx = create_test_server().await;
    let response = ctx
        .server
        .post("/files-processed")
        .json(&json!({"file_format": "bam"}))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_post_requires_add_permission() {
    let ctx = create_test_server().await;
    let token = make_token("viewer");
    let (status, _) = post_file(&ctx, &token, json!({"file_format": "bam"})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_post_bam_without_filename_succeeds() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploading",
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    let rendered = &body["@graph"][0];
    assert_eq!(rendered["display_title"], "XYZ001.bam");
    assert_eq!(rendered["accession"], "XYZ001");
    let uuid = rendered["uuid"].as_str().unwrap();
    assert_eq!(
        rendered["href"],
        format!("/files/{uuid}/download/XYZ001.bam")
    );
    assert_eq!(rendered["upload_key"], format!("{uuid}/XYZ001.bam"));
}

#[tokio::test]
async fn test_patch_extension_mismatch_then_fixed_together() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploading",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let uuid = created_uuid(&body);

    // filename alone disagrees with the bam format
    let response = ctx
        .server
        .patch(&format!("/files/{uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({"filename": "test.zip"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    let descriptions = error_descriptions(&body);
    assert!(descriptions
        .iter()
        .any(|d| d.contains("extension does not agree")));

    // changing format and filename together passes
    let response = ctx
        .server
        .patch(&format!("/files/{uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({"file_format": "zip", "filename": "test.zip"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["@graph"][0]["display_title"], "XYZ001.zip");
}

#[tokio::test]
async fn test_display_title_without_extension_for_other_format() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "other",
            "status": "uploaded",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["@graph"][0]["display_title"], "XYZ001");
}

#[tokio::test]
async fn test_format_not_allowed_for_item_type() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    // bai is only valid for FileProcessed
    let response = ctx
        .server
        .post("/files-submitted")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({"accession": "XYZ005", "file_format": "bai", "status": "uploaded"}))
        .await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert!(error_descriptions(&body)
        .iter()
        .any(|d| d == "File format bai is not allowed for FileSubmitted"));
}

#[tokio::test]
async fn test_md5_uniqueness_and_force_bypass() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");
    let md5 = "d41d8cd98f00b204e9800998ecf8427e";

    let (status, _) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploaded",
            "md5sum": md5,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // a second processed file with the same md5 is rejected
    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ002",
            "file_format": "bam",
            "status": "uploaded",
            "md5sum": md5,
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_descriptions(&body)
        .iter()
        .any(|d| d == &format!("md5sum {md5} already exists for accession XYZ001")));

    // force_md5 bypasses the check regardless of collision
    let response = ctx
        .server
        .post("/files-processed")
        .add_query_param("force_md5", "")
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({
            "accession": "XYZ003",
            "file_format": "bam",
            "status": "uploaded",
            "md5sum": md5,
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_md5_unchanged_on_same_entity_is_allowed() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");
    let md5 = "0cc175b9c0f1b6a831c399e269772661";

    let (_, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploaded",
            "md5sum": md5,
        }),
    )
    .await;
    let uuid = created_uuid(&body);

    let response = ctx
        .server
        .patch(&format!("/files/{uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .json(&json!({"md5sum": md5}))
        .await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_extra_files_duplicate_format_message() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploading",
            "extra_files": [
                {"file_format": "bai"},
                {"file_format": "bai"}
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_descriptions(&body).iter().any(|d| d
        == "Multple extra files with 'bai' format cannot be submitted at the same time"));
}

#[tokio::test]
async fn test_extra_file_same_format_as_parent_message() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploading",
            "extra_files": [{"file_format": "bam"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(error_descriptions(&body)
        .iter()
        .any(|d| d == "'bam' format cannot be the same for file and extra_file"));
}

#[tokio::test]
async fn test_extra_files_get_derived_fields_and_credentials() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (status, body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "filename": "reads.bam",
            "status": "uploading",
            "extra_files": [{"file_format": "bai"}],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let rendered = &body["@graph"][0];
    let uuid = rendered["uuid"].as_str().unwrap();

    let extra = &rendered["extra_files"][0];
    assert_eq!(extra["file_format"], "fmt-bai");
    assert_eq!(extra["accession"], "XYZ001");
    assert_eq!(extra["href"], format!("/files/{uuid}/download/XYZ001.bai"));
    assert_eq!(extra["upload_key"], format!("{uuid}/XYZ001.bai"));

    // editor sees extra-file credentials while awaiting upload
    let creds = &rendered["extra_files_creds"][0];
    assert!(creds["upload_credentials"]["SessionToken"].is_string());
}

#[tokio::test]
async fn test_related_files_symmetry_end_to_end() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (_, parent_body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "status": "uploaded",
        }),
    )
    .await;
    let parent_uuid = created_uuid(&parent_body);

    let (status, child_body) = post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ002",
            "file_format": "bam",
            "status": "uploaded",
            "related_files": [
                {"relationship_type": "derived from", "file": parent_uuid}
            ],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let child_uuid = created_uuid(&child_body);

    // the inverse edge appears on the parent without a second client write
    let response = ctx
        .server
        .get(&format!("/files/{parent_uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .await;
    response.assert_status_ok();
    let parent: Value = response.json();
    let related = parent["related_files"].as_array().unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0]["relationship_type"], "parent of");
    assert_eq!(related[0]["file"], child_uuid);
}

#[tokio::test]
async fn test_paired_with_is_self_inverse() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");

    let (_, a_body) = post_file(
        &ctx,
        &token,
        json!({"accession": "XYZ001", "file_format": "bam", "status": "uploaded"}),
    )
    .await;
    let a_uuid = created_uuid(&a_body);

    post_file(
        &ctx,
        &token,
        json!({
            "accession": "XYZ002",
            "file_format": "bam",
            "status": "uploaded",
            "related_files": [
                {"relationship_type": "paired with", "file": a_uuid}
            ],
        }),
    )
    .await;

    let response = ctx
        .server
        .get(&format!("/files/{a_uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {token}"))
        .await;
    let a: Value = response.json();
    assert_eq!(a["related_files"][0]["relationship_type"], "paired with");
}

#[tokio::test]
async fn test_validate_false_requires_admin() {
    let ctx = create_test_server().await;

    let submitter = make_token("submitter");
    let response = ctx
        .server
        .post("/files-processed")
        .add_query_param("validate", "false")
        .add_header(AUTHORIZATION, format!("Bearer {submitter}"))
        .json(&json!({"accession": "XYZ001", "file_format": "bam", "status": "uploaded"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // admins may bypass the chain entirely, mismatched filename included
    let admin = make_token("admin");
    let response = ctx
        .server
        .post("/files-processed")
        .add_query_param("validate", "false")
        .add_header(AUTHORIZATION, format!("Bearer {admin}"))
        .json(&json!({
            "accession": "XYZ002",
            "file_format": "bam",
            "filename": "wrong.zip",
            "status": "uploaded",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
}

#[tokio::test]
async fn test_check_only_dry_run_does_not_persist() {
    let ctx = create_test_server().await;
    let submitter = make_token("submitter");
    let admin = make_token("admin");

    let (_, body) = post_file(
        &ctx,
        &submitter,
        json!({"accession": "XYZ001", "file_format": "bam", "status": "uploaded"}),
    )
    .await;
    let uuid = created_uuid(&body);

    // index permission required
    let response = ctx
        .server
        .patch(&format!("/files/{uuid}"))
        .add_query_param("check_only", "true")
        .add_header(AUTHORIZATION, format!("Bearer {submitter}"))
        .json(&json!({"status": "released"}))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = ctx
        .server
        .patch(&format!("/files/{uuid}"))
        .add_query_param("check_only", "true")
        .add_header(AUTHORIZATION, format!("Bearer {admin}"))
        .json(&json!({"status": "released"}))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "success");

    // nothing persisted
    let response = ctx
        .server
        .get(&format!("/files/{uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {submitter}"))
        .await;
    let rendered: Value = response.json();
    assert_eq!(rendered["status"], "uploaded");
}

#[tokio::test]
async fn test_upload_credentials_withheld_from_viewers() {
    let ctx = create_test_server().await;
    let submitter = make_token("submitter");
    let viewer = make_token("viewer");

    let (_, body) = post_file(
        &ctx,
        &submitter,
        json!({
            "accession": "XYZ001",
            "file_format": "bam",
            "filename": "reads.bam",
            "status": "uploading",
        }),
    )
    .await;
    let uuid = created_uuid(&body);
    assert!(body["@graph"][0]["upload_credentials"]["SessionToken"].is_string());

    // withheld entirely for viewers, not rendered as null
    let response = ctx
        .server
        .get(&format!("/files/{uuid}"))
        .add_header(AUTHORIZATION, format!("Bearer {viewer}"))
        .await;
    response.assert_status_ok();
    let rendered: Value = response.json();
    assert!(rendered.get("upload_credentials").is_none());
    assert!(rendered.get("extra_files_creds").is_none());
}

#[tokio::test]
async fn test_shape_check_rejects_bad_md5() {
    let ctx = create_test_server().await;
    let token = make_token("submitter");
    let (status, _) = post_file(
        &ctx,
        &token,
        json!({"accession": "XYZ001", "file_format": "bam", "md5sum": "short"}),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}
