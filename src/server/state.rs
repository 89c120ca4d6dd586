//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::library::{BookStore, StatsRefresher};
use crate::uploads::UploadStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Per-user book store.
    pub books: Arc<BookStore>,
    /// External catalog client.
    pub catalog: Arc<CatalogClient>,
}

impl AppState {
    /// Build the state once at startup.
    ///
    /// Creates the upload directory and wires the stats refresher into the
    /// book store.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let auth = Arc::new(AuthService::new(db.clone(), &config.auth));
        let uploads = UploadStore::new(&config.uploads)?;
        let books = BookStore::new(db.clone(), uploads)
            .with_observer(Arc::new(StatsRefresher::new(auth.clone())));
        let catalog = CatalogClient::new(&config.catalog)?;

        if !catalog.is_configured() {
            tracing::warn!("No catalog API key configured, external search is unavailable");
        }

        Ok(Self {
            config: Arc::new(config),
            db,
            auth,
            books: Arc::new(books),
            catalog: Arc::new(catalog),
        })
    }

    /// Upload store used for covers.
    pub fn uploads(&self) -> &UploadStore {
        self.books.uploads()
    }
}
