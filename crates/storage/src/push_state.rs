use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use domain_push_core::types::UnknownPushStatus;
use domain_push_core::{Domain, PushState, PushStatus, Transition};

use crate::domains::{DomainRow, DOMAIN_COLUMNS};
use crate::to_rfc3339;

/// Push state store: per-domain status, provider identifiers and retry
/// bookkeeping, updated only through compare-and-set.
#[derive(Clone)]
pub struct PushStateRepository {
    pub(crate) pool: SqlitePool,
}

impl PushStateRepository {
    /// Reads the domain together with its persisted push state.
    pub async fn load(&self, domain_id: &str) -> Result<Option<Domain>, PushStateError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ?"
        ))
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DomainRow::into_domain).transpose()?)
    }

    /// Persists `transition` only if the stored state still matches `expected`.
    ///
    /// The status, provider identifiers, counters and the push log row are
    /// written in one transaction. Identifiers already stored are never
    /// replaced. A mismatch returns [`PushStateError::Stale`] and leaves the row
    /// untouched.
    pub async fn compare_and_set(
        &self,
        domain_id: &str,
        expected: &PushState,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<PushState, PushStateError> {
        let next = transition.apply_to(expected, now);
        let written_at = to_rfc3339(now);

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE domains \
             SET push_status = ?, \
                 dns_record_id = COALESCE(dns_record_id, ?), \
                 platform_registration = COALESCE(platform_registration, ?), \
                 attempt_count = ?, \
                 self_heal_count = ?, \
                 last_attempt_at = ?, \
                 last_error = ?, \
                 push_version = ?, \
                 updated_at = ? \
             WHERE id = ? AND push_version = ? AND push_status = ?",
        )
        .bind(next.status.as_str())
        .bind(&transition.refs.dns_record_id)
        .bind(&transition.refs.platform_registration)
        .bind(next.attempt_count as i64)
        .bind(next.self_heal_count as i64)
        .bind(&written_at)
        .bind(&next.last_error)
        .bind(next.version as i64)
        .bind(&written_at)
        .bind(domain_id)
        .bind(expected.version as i64)
        .bind(expected.status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = sqlx::query("SELECT push_version FROM domains WHERE id = ?")
                .bind(domain_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match current {
                Some(row) => PushStateError::Stale {
                    expected: expected.version,
                    actual: row.get::<i64, _>("push_version") as u64,
                },
                None => PushStateError::NotFound,
            });
        }

        sqlx::query(
            "INSERT INTO domain_push_log \
             (domain_id, from_status, to_status, event, detail, attempt_count, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(domain_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.event)
        .bind(&transition.detail)
        .bind(next.attempt_count as i64)
        .bind(&written_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    /// Returns the recorded transitions for a domain, oldest first.
    pub async fn history(&self, domain_id: &str) -> Result<Vec<PushLogEntry>, PushStateError> {
        let rows = sqlx::query_as::<_, PushLogRow>(
            "SELECT from_status, to_status, event, detail, attempt_count, created_at \
             FROM domain_push_log WHERE domain_id = ? ORDER BY id ASC",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<PushLogEntry, PushStateError> {
                Ok(PushLogEntry {
                    from: row.from_status.parse()?,
                    to: row.to_status.parse()?,
                    event: row.event,
                    detail: row.detail,
                    attempt_count: row.attempt_count as u32,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}

/// One persisted state transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushLogEntry {
    pub from: PushStatus,
    pub to: PushStatus,
    pub event: String,
    pub detail: String,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct PushLogRow {
    from_status: String,
    to_status: String,
    event: String,
    detail: String,
    attempt_count: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum PushStateError {
    #[error("domain not found")]
    NotFound,
    #[error("push state changed concurrently (expected version {expected}, found {actual})")]
    Stale { expected: u64, actual: u64 },
    #[error("failed to decode push state: {0}")]
    Decode(#[from] UnknownPushStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
