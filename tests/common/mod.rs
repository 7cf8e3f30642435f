//! Common test utilities

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use commerce_admin::api::AppState;
use commerce_admin::images::UnconfiguredImageStorage;
use commerce_admin::Config;

pub const TEST_SESSION_TOKEN: &str = "test_session_123";
pub const TEST_AUTH_SECRET: &str = "test-secret";

/// Setup test database - truncate tables and seed a valid session
pub async fn setup_test_db() -> PgPool {
    dotenvy::dotenv().ok();
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    let mut tx = pool.begin().await.expect("Failed to begin transaction");

    sqlx::query(
        "TRUNCATE TABLE events, snapshots, outbox, projection_cursors, product_list, \
         variant_list, collection_list, collection_products, position_owners, \
         slug_redirects, schedule_list, fulfillment_list, published_products, sessions CASCADE",
    )
    .execute(&mut *tx)
    .await
    .expect("Failed to clean up DB");

    // Seed a session matching the middleware's token hashing
    sqlx::query(
        r#"
        INSERT INTO sessions (token_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + INTERVAL '1 day')
        "#,
    )
    .bind(hash_token(TEST_SESSION_TOKEN, TEST_AUTH_SECRET))
    .bind(uuid::Uuid::new_v4())
    .execute(&mut *tx)
    .await
    .expect("Failed to seed session");

    tx.commit().await.expect("Failed to commit transaction");

    pool
}

fn hash_token(token: &str, secret: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Config for tests, bypassing the environment
pub fn test_config(database_url: String) -> Config {
    Config {
        database_url,
        database_max_connections: 5,
        host: "127.0.0.1".to_string(),
        port: 0,
        environment: "test".to_string(),
        auth_secret: TEST_AUTH_SECRET.to_string(),
        auth_base_url: "http://localhost:3000".to_string(),
        auth_trusted_origins: vec!["https://admin.test".to_string()],
        auth_ip_header: None,
        cdn_base_url: None,
        scheduler_tick: Duration::from_secs(10),
        scheduler_retry_base: Duration::from_millis(100),
        scheduler_max_attempts: 3,
        outbox_batch_size: 100,
    }
}

/// Application state wired against the test database
pub fn test_state(pool: PgPool) -> AppState {
    let url = std::env::var("DATABASE_URL").unwrap_or_default();
    AppState::new(
        pool,
        Arc::new(test_config(url)),
        Arc::new(UnconfiguredImageStorage),
    )
}
