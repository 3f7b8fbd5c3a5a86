use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use driftboard_common::config::DatabaseConfig;
use driftboard_common::Result;

pub mod comment;
pub mod community;
pub mod post;
pub mod user;

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init_pool(cfg: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .connect(&cfg.url)
        .await?;
    Ok(pool)
}

/// Create missing tables and indices. Statements are idempotent.
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA.split(';') {
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}
