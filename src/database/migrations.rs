use crate::error::Result;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Apply every migration not yet recorded in `schema_migrations`
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    create_migrations_table(pool).await?;

    for (version, name, sql) in get_migrations() {
        if !is_migration_applied(pool, version).await? {
            info!(version = version, name = name, "Applying migration");

            // Plain &str runs unprepared, so multi-statement migrations work
            pool.execute(sql).await?;
            record_migration(pool, version, name).await?;

            info!(version = version, name = name, "Migration applied successfully");
        }
    }

    Ok(())
}

async fn create_migrations_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn is_migration_applied(pool: &PgPool, version: i32) -> Result<bool> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM schema_migrations WHERE version = $1",
    )
    .bind(version)
    .fetch_one(pool)
    .await?;

    Ok(count > 0)
}

async fn record_migration(pool: &PgPool, version: i32, name: &str) -> Result<()> {
    sqlx::query("INSERT INTO schema_migrations (version, name) VALUES ($1, $2)")
        .bind(version)
        .bind(name)
        .execute(pool)
        .await?;

    Ok(())
}

/// All migrations, in application order
fn get_migrations() -> Vec<(i32, &'static str, &'static str)> {
    vec![(1, "execution_records", MIGRATION_001_EXECUTION_RECORDS)]
}

// Terminal execution records; code and output stay in memory only
const MIGRATION_001_EXECUTION_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS execution_records (
    id VARCHAR(64) PRIMARY KEY,
    lecture_id BIGINT NOT NULL,
    user_zcode VARCHAR(255) NOT NULL,
    language VARCHAR(32) NOT NULL,
    status VARCHAR(16) NOT NULL,
    exit_code INTEGER NOT NULL,
    duration_ms BIGINT NOT NULL,
    error TEXT,
    executed_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_execution_records_lecture ON execution_records(lecture_id, executed_at DESC);
CREATE INDEX IF NOT EXISTS idx_execution_records_user ON execution_records(user_zcode);
"#;
