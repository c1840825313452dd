use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use crate::error::Result;
use crate::execution::ExecutionAudit;
use crate::models::{ExecutionAuditRow, ExecutionRecord};

/// Repository for the execution audit trail
#[derive(Clone)]
pub struct ExecutionRepository {
    pool: PgPool,
}

impl ExecutionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert an audit row; a duplicate id is ignored and yields `None`
    pub async fn insert(&self, row: &ExecutionAuditRow) -> Result<Option<ExecutionAuditRow>> {
        let inserted = sqlx::query_as::<_, ExecutionAuditRow>(
            r#"
            INSERT INTO execution_records
                (id, lecture_id, user_zcode, language, status, exit_code, duration_ms, error, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO NOTHING
            RETURNING id, lecture_id, user_zcode, language, status, exit_code, duration_ms, error, executed_at
            "#,
        )
        .bind(&row.id)
        .bind(row.lecture_id)
        .bind(&row.user_zcode)
        .bind(&row.language)
        .bind(&row.status)
        .bind(row.exit_code)
        .bind(row.duration_ms)
        .bind(&row.error)
        .bind(row.executed_at)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted)
    }
}

#[async_trait]
impl ExecutionAudit for ExecutionRepository {
    async fn record(&self, record: &ExecutionRecord) -> Result<()> {
        let row = ExecutionAuditRow::from(record);
        match self.insert(&row).await? {
            Some(_) => debug!(execution_id = %row.id, "Execution audited"),
            None => debug!(execution_id = %row.id, "Execution already audited"),
        }
        Ok(())
    }
}
