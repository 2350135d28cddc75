use std::sync::Arc;

use crate::AppState;
use crate::config::ChatConfig;
use crate::db::Database;

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler tests that exercise real SQL queries without I/O.
pub async fn test_app_state() -> AppState {
    let store = crate::repository::test_helpers::test_store().await;
    let db = Arc::new(Database {
        pool: store.pool.clone(),
    });
    AppState::new(db, ChatConfig::default())
}
