//! Database module
//!
//! Connectivity and schema verification. Migrations are raw SQL files in
//! `migrations/`; this only checks the result is in place before serving.

use sqlx::PgPool;

/// Simple connectivity check
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    let required_tables = vec![
        "sessions",
        "events",
        "snapshots",
        "outbox",
        "projection_cursors",
        "product_list",
        "variant_list",
        "collection_list",
        "collection_products",
        "position_owners",
        "slug_redirects",
        "schedule_list",
        "fulfillment_list",
        "published_products",
    ];

    for table in required_tables {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    Ok(true)
}
