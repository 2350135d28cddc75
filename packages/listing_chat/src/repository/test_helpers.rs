use sqlx::sqlite::SqlitePoolOptions;

use super::ChatStore;

/// Create a fresh ChatStore backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied (~1ms).
pub async fn test_store() -> ChatStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    ChatStore::new(pool)
}

/// Insert a user row the way the accounts app would.
pub async fn seed_user(store: &ChatStore, id: i64, first_name: &str) {
    sqlx::query(
        "INSERT INTO users (id, first_name, last_name, email, profile_image_url)
         VALUES (?, ?, 'User', ?, NULL)",
    )
    .bind(id)
    .bind(first_name)
    .bind(format!("{}@example.com", first_name.to_lowercase()))
    .execute(&store.pool)
    .await
    .expect("Failed to seed user");
}

pub async fn seed_listing(store: &ChatStore, id: i64, owner_id: i64) {
    sqlx::query("INSERT INTO listings (id, owner_id, title) VALUES (?, ?, ?)")
        .bind(id)
        .bind(owner_id)
        .bind(format!("Listing {}", id))
        .execute(&store.pool)
        .await
        .expect("Failed to seed listing");
}

/// Issue a session token valid for an hour.
pub async fn seed_session(store: &ChatStore, token: &str, user_id: i64) {
    let expires_at = chrono::Utc::now().timestamp() + 3600;
    sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES (?, ?, ?)")
        .bind(token)
        .bind(user_id)
        .bind(expires_at)
        .execute(&store.pool)
        .await
        .expect("Failed to seed session");
}

/// Buyer 1 ("Buyer"), seller 2 ("Seller"), outsider 3 ("Other"), and
/// listing 10 owned by the seller.
pub async fn seed_marketplace(store: &ChatStore) {
    seed_user(store, 1, "Buyer").await;
    seed_user(store, 2, "Seller").await;
    seed_user(store, 3, "Other").await;
    seed_listing(store, 10, 2).await;
}
