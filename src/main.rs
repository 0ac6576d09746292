use std::sync::Arc;

use aws_config::{BehaviorVersion, Region};
use tracing::info;

use depot::web::WebServer;
use depot::{Config, Database, S3ObjectStore, StsCredentialIssuer};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            Config::default()
        }
    };

    // Initialize logging
    if let Err(e) = depot::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("DEPOT - Data External-Object Portal");
    info!(
        "Server configured on {}:{}",
        config.server.host, config.server.port
    );

    let config = Arc::new(config);

    let db = match Database::open(&config.database.path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(config.storage.region.clone()))
        .load()
        .await;
    let issuer = Arc::new(StsCredentialIssuer::new(
        aws_sdk_sts::Client::new(&aws_config),
        config.storage.clone(),
    ));
    let object_store = Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&aws_config)));

    let server = match WebServer::new(config, db, issuer, object_store) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Failed to configure web server: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server.run().await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
