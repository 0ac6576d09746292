//! Shared test fixtures: hermetic credential issuer and object store
//! fakes, a seeded test server, and JWT helpers.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};

use depot::config::Config;
use depot::file::{AccessMode, CredentialIssuer, ExternalCreds, UploadCredentials};
use depot::storage::{
    GetObjectRequest, ObjectStore, PresignedUrl, RangedObject, DOWNLOAD_URL_EXPIRY_SECS,
};
use depot::web::handlers::AppState;
use depot::web::middleware::{JwtClaims, JwtState};
use depot::web::router::create_router;
use depot::{Database, FileFormat, FormatRegistry, Result};

pub const JWT_SECRET: &str = "test-secret-key-for-testing-only";

/// Deterministic credential issuer; records every issuance.
#[derive(Default)]
pub struct FakeIssuer {
    pub issued: Mutex<Vec<(String, String, Option<String>)>>,
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue(
        &self,
        bucket: &str,
        key: &str,
        name: Option<&str>,
        _mode: AccessMode,
    ) -> Result<ExternalCreds> {
        self.issued.lock().unwrap().push((
            bucket.to_string(),
            key.to_string(),
            name.map(str::to_string),
        ));
        let upload_credentials = name.map(|name| UploadCredentials {
            access_key_id: "AKIATEST".to_string(),
            secret_access_key: "test-secret".to_string(),
            session_token: format!("token-for-{name}"),
            expiration: "2099-01-01T00:00:00Z".to_string(),
            upload_url: format!("s3://{bucket}/{key}"),
            federated_user_arn: format!("arn:aws:sts::000000000000:federated-user/{name}"),
            federated_user_id: format!("000000000000:{name}"),
            s3_encrypt_key_id: None,
            request_id: "req-test".to_string(),
            key: key.to_string(),
        });
        Ok(ExternalCreds {
            service: "s3".to_string(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_credentials,
        })
    }
}

/// Object store fake: canned presigned URLs and ranged objects, recorded
/// deletions.
#[derive(Default)]
pub struct FakeObjectStore {
    pub deleted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn presign_get(&self, request: &GetObjectRequest) -> Result<PresignedUrl> {
        Ok(PresignedUrl {
            url: format!(
                "https://{}.s3.amazonaws.com/{}?X-Amz-Signature=test",
                request.bucket, request.key
            ),
            expires_at: Utc::now() + chrono::Duration::seconds(DOWNLOAD_URL_EXPIRY_SECS as i64),
        })
    }

    async fn get_object_ranged(&self, request: &GetObjectRequest) -> Result<RangedObject> {
        let partial = request.range.is_some();
        Ok(RangedObject {
            status: if partial { 206 } else { 200 },
            body: vec![42u8; 100],
            accept_ranges: Some("bytes".to_string()),
            content_length: Some(100),
            content_range: partial.then(|| "bytes 100-199/1000".to_string()),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.deleted
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// A running test server plus handles on its collaborators.
pub struct TestContext {
    pub server: TestServer,
    pub db: Arc<Database>,
    pub issuer: Arc<FakeIssuer>,
    pub object_store: Arc<FakeObjectStore>,
}

/// Seed the standard format fixtures.
pub async fn seed_formats(db: &Database) {
    let registry = FormatRegistry::new(db.pool());
    registry
        .create(
            "fmt-bam",
            &FileFormat {
                uuid: String::new(),
                file_format: "bam".to_string(),
                standard_file_extension: "bam".to_string(),
                other_allowed_extensions: vec![],
                valid_item_types: vec![
                    "FileProcessed".to_string(),
                    "FileSubmitted".to_string(),
                ],
                extrafile_formats: vec!["bai".to_string()],
            },
        )
        .await
        .unwrap();
    registry
        .create(
            "fmt-bai",
            &FileFormat {
                uuid: String::new(),
                file_format: "bai".to_string(),
                standard_file_extension: "bai".to_string(),
                other_allowed_extensions: vec![],
                valid_item_types: vec!["FileProcessed".to_string()],
                extrafile_formats: vec![],
            },
        )
        .await
        .unwrap();
    registry
        .create(
            "fmt-zip",
            &FileFormat {
                uuid: String::new(),
                file_format: "zip".to_string(),
                standard_file_extension: "zip".to_string(),
                other_allowed_extensions: vec![],
                valid_item_types: vec![
                    "FileProcessed".to_string(),
                    "FileSubmitted".to_string(),
                ],
                extrafile_formats: vec![],
            },
        )
        .await
        .unwrap();
    registry
        .create(
            "fmt-other",
            &FileFormat {
                uuid: String::new(),
                file_format: "other".to_string(),
                standard_file_extension: String::new(),
                other_allowed_extensions: vec![],
                valid_item_types: vec!["FileProcessed".to_string()],
                extrafile_formats: vec![],
            },
        )
        .await
        .unwrap();
}

/// Create a test server with an in-memory database and fake collaborators.
pub async fn create_test_server() -> TestContext {
    let db = Arc::new(
        Database::open_in_memory()
            .await
            .expect("Failed to create test database"),
    );
    seed_formats(&db).await;

    let mut config = Config::default();
    config.web.jwt_secret = JWT_SECRET.to_string();
    let config = Arc::new(config);

    let issuer = Arc::new(FakeIssuer::default());
    let object_store = Arc::new(FakeObjectStore::default());

    let app_state = Arc::new(AppState::new(
        db.clone(),
        config,
        issuer.clone(),
        object_store.clone(),
    ));
    let jwt_state = Arc::new(JwtState::new(JWT_SECRET));
    let router = create_router(app_state, jwt_state, &[]);
    let server = TestServer::new(router).expect("Failed to create test server");

    TestContext {
        server,
        db,
        issuer,
        object_store,
    }
}

/// Mint a JWT for the given role.
pub fn make_token(role: &str) -> String {
    let now = Utc::now().timestamp() as u64;
    let claims = JwtClaims {
        sub: format!("user-{role}"),
        username: role.to_string(),
        role: role.to_string(),
        groups: vec![],
        iat: now,
        exp: now + 3600,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("Failed to encode test token")
}
