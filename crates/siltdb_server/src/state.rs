//! Shared handler state.

use siltdb_core::Database;
use std::sync::Arc;

/// State passed to every handler.
///
/// The engine handle is the explicit dependency; there are no ambient
/// singletons.
#[derive(Clone)]
pub struct AppState {
    /// The database engine.
    pub db: Arc<Database>,
    /// Optional boundary API key.
    pub api_key: Option<String>,
}

impl AppState {
    /// Creates handler state around an open database.
    pub fn new(db: Arc<Database>, api_key: Option<String>) -> Self {
        Self { db, api_key }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("db", &self.db)
            .field("api_key_set", &self.api_key.is_some())
            .finish()
    }
}
