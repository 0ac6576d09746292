//! API handlers for the DEPOT Web API.

pub mod file;
pub mod item;
pub mod upload;

pub use file::*;
pub use item::*;
pub use upload::*;

use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::file::{CredentialIssuer, FileService};
use crate::storage::ObjectStore;

/// Shared application state.
pub struct AppState {
    /// Database handle.
    pub db: Arc<Database>,
    /// Application configuration.
    pub config: Arc<Config>,
    /// Credential issuer.
    pub issuer: Arc<dyn CredentialIssuer>,
    /// Object store.
    pub object_store: Arc<dyn ObjectStore>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        issuer: Arc<dyn CredentialIssuer>,
        object_store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            db,
            config,
            issuer,
            object_store,
        }
    }

    /// A file service over this state's collaborators.
    pub fn file_service(&self) -> FileService<'_> {
        FileService::new(
            self.db.pool(),
            self.issuer.as_ref(),
            self.object_store.as_ref(),
            &self.config.storage,
        )
    }
}
