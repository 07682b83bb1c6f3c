// SQLite MessageStore Implementation

use async_trait::async_trait;
use orderq_core::domain::{Envelope, EnvelopeState, MessageId};
use orderq_core::error::{AppError, Result};
use orderq_core::port::MessageStore;
use sqlx::SqlitePool;
use tracing::debug;

// Helper to convert sqlx::Error to AppError with structured information
fn map_sqlx_error(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                let code_str = code.as_ref();

                // SQLite error codes: https://www.sqlite.org/rescode.html
                match code_str {
                    "2067" | "1555" => AppError::Database(format!(
                        "Unique constraint violation: {} ({})",
                        db_err.message(),
                        code_str
                    )),
                    "5" => AppError::Database(format!(
                        "Database locked (SQLITE_BUSY): {}",
                        db_err.message()
                    )),
                    "13" => AppError::Database(format!("Database full: {}", db_err.message())),
                    _ => AppError::Database(format!(
                        "Database error [{}]: {}",
                        code_str,
                        db_err.message()
                    )),
                }
            } else {
                AppError::Database(format!("Database error: {}", db_err.message()))
            }
        }
        sqlx::Error::RowNotFound => AppError::Database("Row not found".to_string()),
        sqlx::Error::ColumnNotFound(col) => {
            AppError::Database(format!("Column not found: {}", col))
        }
        // Connection, pool, protocol errors
        _ => AppError::Database(err.to_string()),
    }
}

pub struct SqliteMessageStore {
    pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, destination, payload, redelivery_count, state,
                enqueued_at, available_at, lease_expires_at,
                original_destination, dead_letter_reason
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&envelope.id)
        .bind(&envelope.destination)
        .bind(&envelope.payload)
        .bind(i64::from(envelope.redelivery_count))
        .bind(envelope.state.to_string())
        .bind(envelope.enqueued_at)
        .bind(envelope.available_at)
        .bind(envelope.lease_expires_at)
        .bind(&envelope.original_destination)
        .bind(&envelope.dead_letter_reason)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn claim_next(
        &self,
        destination: &str,
        now: i64,
        lease_ms: i64,
    ) -> Result<Option<Envelope>> {
        // Single statement: the row flips to IN_FLIGHT for exactly one caller
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            UPDATE messages
            SET state = ?, lease_expires_at = ?
            WHERE id = (
                SELECT id FROM messages
                WHERE destination = ? AND state = ? AND available_at <= ?
                ORDER BY enqueued_at ASC, rowid ASC
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(EnvelopeState::InFlight.to_string())
        .bind(now.saturating_add(lease_ms))
        .bind(destination)
        .bind(EnvelopeState::Ready.to_string())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(MessageRow::into_envelope).transpose()
    }

    async fn ack(&self, id: &MessageId, lease_expires_at: i64) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM messages WHERE id = ? AND state = ? AND lease_expires_at = ?",
        )
        .bind(id)
        .bind(EnvelopeState::InFlight.to_string())
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn settle(&self, envelope: &Envelope, lease_expires_at: i64) -> Result<bool> {
        // Conditional on the lease so a stale holder cannot overwrite a recovered message
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET destination = ?, payload = ?, redelivery_count = ?, state = ?,
                available_at = ?, lease_expires_at = ?,
                original_destination = ?, dead_letter_reason = ?
            WHERE id = ? AND state = ? AND lease_expires_at = ?
            "#,
        )
        .bind(&envelope.destination)
        .bind(&envelope.payload)
        .bind(i64::from(envelope.redelivery_count))
        .bind(envelope.state.to_string())
        .bind(envelope.available_at)
        .bind(envelope.lease_expires_at)
        .bind(&envelope.original_destination)
        .bind(&envelope.dead_letter_reason)
        .bind(&envelope.id)
        .bind(EnvelopeState::InFlight.to_string())
        .bind(lease_expires_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let settled = result.rows_affected() == 1;
        if !settled {
            debug!(message_id = %envelope.id, "Settle skipped, lease no longer held");
        }
        Ok(settled)
    }

    async fn find_by_id(&self, id: &MessageId) -> Result<Option<Envelope>> {
        let row = sqlx::query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(MessageRow::into_envelope).transpose()
    }

    async fn count(&self, destination: &str, state: EnvelopeState) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE destination = ? AND state = ?")
                .bind(destination)
                .bind(state.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(count)
    }

    async fn list(&self, destination: &str, limit: usize) -> Result<Vec<Envelope>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE destination = ?
            ORDER BY enqueued_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(destination)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(MessageRow::into_envelope).collect()
    }

    async fn find_expired_leases(&self, now: i64) -> Result<Vec<Envelope>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT * FROM messages
            WHERE state = ? AND lease_expires_at <= ?
            ORDER BY lease_expires_at ASC
            "#,
        )
        .bind(EnvelopeState::InFlight.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(MessageRow::into_envelope).collect()
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct MessageRow {
    id: String,
    destination: String,
    payload: String,
    redelivery_count: i64,
    state: String,
    enqueued_at: i64,
    available_at: i64,
    lease_expires_at: Option<i64>,
    original_destination: Option<String>,
    dead_letter_reason: Option<String>,
}

impl MessageRow {
    fn into_envelope(self) -> Result<Envelope> {
        let state: EnvelopeState = self.state.parse().map_err(AppError::Database)?;
        let redelivery_count = u32::try_from(self.redelivery_count).map_err(|_| {
            AppError::Database(format!(
                "Message {} has out-of-range redelivery_count {}",
                self.id, self.redelivery_count
            ))
        })?;

        Ok(Envelope {
            id: self.id,
            destination: self.destination,
            payload: self.payload,
            redelivery_count,
            state,
            enqueued_at: self.enqueued_at,
            available_at: self.available_at,
            lease_expires_at: self.lease_expires_at,
            original_destination: self.original_destination,
            dead_letter_reason: self.dead_letter_reason,
        })
    }
}
