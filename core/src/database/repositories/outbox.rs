// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Outbox repository.

use sqlx::PgPool;

use crate::database::{error::DatabaseResult, models::OutboxRecord};

/// Outbox repository
pub struct OutboxRepository {
    pool: PgPool,
}

impl OutboxRepository {
    /// Create a new outbox repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an outbox row for a job.
    pub async fn insert(&self, job_id: i64) -> DatabaseResult<()> {
        sqlx::query("INSERT INTO outbox (job_id) VALUES ($1)")
            .bind(job_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Unpublished rows in insertion order.
    pub async fn list_unpublished(&self, limit: i64) -> DatabaseResult<Vec<OutboxRecord>> {
        let records = sqlx::query_as::<_, OutboxRecord>(
            r#"
            SELECT * FROM outbox
            WHERE published = FALSE
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Mark a row published after a successful queue push.
    pub async fn mark_published(&self, outbox_id: i64) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET published = TRUE, published_at = now()
            WHERE id = $1
            "#,
        )
        .bind(outbox_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
