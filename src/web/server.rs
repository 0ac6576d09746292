//! Web server for DEPOT.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::config::Config;
use crate::db::Database;
use crate::file::CredentialIssuer;
use crate::storage::ObjectStore;
use crate::{DepotError, Result};

use super::handlers::AppState;
use super::middleware::JwtState;
use super::router::{create_health_router, create_router, create_swagger_router};

/// Web server for the API.
pub struct WebServer {
    /// Server address.
    addr: SocketAddr,
    /// Application state.
    app_state: Arc<AppState>,
    /// JWT state.
    jwt_state: Arc<JwtState>,
    /// Allowed CORS origins.
    cors_origins: Vec<String>,
}

impl WebServer {
    /// Create a new web server.
    pub fn new(
        config: Arc<Config>,
        db: Arc<Database>,
        issuer: Arc<dyn CredentialIssuer>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .map_err(|e| DepotError::Config(format!("Invalid web server address: {e}")))?;

        let jwt_state = Arc::new(JwtState::new(&config.web.jwt_secret));
        let cors_origins = config.web.cors_origins.clone();
        let app_state = Arc::new(AppState::new(db, config, issuer, object_store));

        Ok(Self {
            addr,
            app_state,
            jwt_state,
            cors_origins,
        })
    }

    /// Run the server until shutdown.
    pub async fn run(self) -> Result<()> {
        let router = create_router(self.app_state, self.jwt_state, &self.cors_origins)
            .merge(create_health_router())
            .merge(create_swagger_router());

        tracing::info!("Web API listening on {}", self.addr);
        let listener = TcpListener::bind(self.addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
        Ok(())
    }
}
