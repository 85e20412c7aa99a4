use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;

use domain_push_core::types::UnknownPushStatus;
use domain_push_core::{Domain, ProviderRefs, PushState, PushStatus};

use crate::{is_foreign_key_violation, is_unique_violation, to_rfc3339};

pub(crate) const DOMAIN_COLUMNS: &str = "id, site_id, hostname, is_primary, redirect_to_primary, \
     push_status, dns_record_id, platform_registration, attempt_count, self_heal_count, \
     last_attempt_at, last_error, push_version, created_at, updated_at";

/// Repository for operator driven domain changes.
///
/// Nothing here writes the push columns; those belong to
/// [`crate::PushStateRepository`].
#[derive(Clone)]
pub struct DomainRepository {
    pub(crate) pool: SqlitePool,
}

impl DomainRepository {
    /// Inserts a domain. The first domain of a site becomes its primary.
    ///
    /// The primary flag is computed inside the insert itself so concurrent
    /// inserts for one site serialize on the write lock.
    pub async fn insert(&self, domain: &NewDomain<'_>) -> Result<Domain, DomainError> {
        let created_at = to_rfc3339(domain.created_at);
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "INSERT INTO domains \
             (id, site_id, hostname, is_primary, redirect_to_primary, push_status, created_at, updated_at) \
             SELECT ?, ?, ?, \
                    NOT EXISTS (SELECT 1 FROM domains WHERE site_id = ? AND is_primary = 1), \
                    ?, ?, ?, ? \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(domain.id)
        .bind(domain.site_id)
        .bind(domain.hostname)
        .bind(domain.site_id)
        .bind(domain.redirect_to_primary as i64)
        .bind(PushStatus::NotStarted.as_str())
        .bind(&created_at)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DomainError::DuplicateHostname(domain.hostname.to_string())
            } else if is_foreign_key_violation(&err) {
                DomainError::SiteNotFound
            } else {
                DomainError::Database(err)
            }
        })?;

        Ok(row.into_domain()?)
    }

    /// Loads a domain by id.
    pub async fn fetch(&self, domain_id: &str) -> Result<Option<Domain>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE id = ?"
        ))
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DomainRow::into_domain).transpose().map_err(Into::into)
    }

    /// Loads a domain by its normalized hostname.
    pub async fn fetch_by_hostname(&self, hostname: &str) -> Result<Option<Domain>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE hostname = ?"
        ))
        .bind(hostname)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DomainRow::into_domain).transpose().map_err(Into::into)
    }

    /// Returns the primary domain of a site, if the site has any domain.
    pub async fn fetch_primary(&self, site_id: &str) -> Result<Option<Domain>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE site_id = ? AND is_primary = 1"
        ))
        .bind(site_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DomainRow::into_domain).transpose().map_err(Into::into)
    }

    /// Lists the domains of a site, primary first.
    pub async fn list_for_site(&self, site_id: &str) -> Result<Vec<Domain>, DomainError> {
        let rows = sqlx::query_as::<_, DomainRow>(&format!(
            "SELECT {DOMAIN_COLUMNS} FROM domains WHERE site_id = ? \
             ORDER BY is_primary DESC, hostname ASC"
        ))
        .bind(site_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| row.into_domain().map_err(Into::into))
            .collect()
    }

    /// Deletes a non-primary domain and returns the removed row.
    pub async fn delete(&self, domain_id: &str) -> Result<Domain, DomainError> {
        let deleted = sqlx::query_as::<_, DomainRow>(&format!(
            "DELETE FROM domains WHERE id = ? AND is_primary = 0 RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await?;

        match deleted {
            Some(row) => Ok(row.into_domain()?),
            None if self.fetch(domain_id).await?.is_some() => Err(DomainError::PrimaryDomain),
            None => Err(DomainError::NotFound),
        }
    }

    /// Makes the domain the primary of its site, demoting the previous one.
    pub async fn set_primary(
        &self,
        domain_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Domain, DomainError> {
        let updated_at = to_rfc3339(now);
        let mut tx = self.pool.begin().await?;

        // the first statement writes, so the transaction holds the write lock
        // before anything is read
        sqlx::query(
            "UPDATE domains SET is_primary = 0, updated_at = ? \
             WHERE is_primary = 1 AND id <> ? \
               AND site_id = (SELECT site_id FROM domains WHERE id = ?)",
        )
        .bind(&updated_at)
        .bind(domain_id)
        .bind(domain_id)
        .execute(&mut *tx)
        .await?;

        let promoted = sqlx::query_as::<_, DomainRow>(&format!(
            "UPDATE domains SET is_primary = 1, updated_at = ? WHERE id = ? \
             RETURNING {DOMAIN_COLUMNS}"
        ))
        .bind(&updated_at)
        .bind(domain_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = promoted else {
            return Err(DomainError::NotFound);
        };
        tx.commit().await?;
        Ok(row.into_domain()?)
    }

    /// Updates whether the domain redirects to the site's primary.
    pub async fn set_redirect(
        &self,
        domain_id: &str,
        redirect_to_primary: bool,
        now: DateTime<Utc>,
    ) -> Result<Domain, DomainError> {
        let result =
            sqlx::query("UPDATE domains SET redirect_to_primary = ?, updated_at = ? WHERE id = ?")
                .bind(redirect_to_primary as i64)
                .bind(to_rfc3339(now))
                .bind(domain_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }

        self.fetch(domain_id).await?.ok_or(DomainError::NotFound)
    }
}

/// Data required to create a domain. `hostname` must already be normalized.
pub struct NewDomain<'a> {
    pub id: &'a str,
    pub site_id: &'a str,
    pub hostname: &'a str,
    pub redirect_to_primary: bool,
    pub created_at: DateTime<Utc>,
}

/// Errors raised by domain mutations.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain not found")]
    NotFound,
    #[error("site not found")]
    SiteNotFound,
    #[error("hostname {0} is already attached to a site")]
    DuplicateHostname(String),
    #[error("the primary domain of a site cannot be deleted")]
    PrimaryDomain,
    #[error("failed to decode domain row: {0}")]
    Decode(#[from] UnknownPushStatus),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DomainRow {
    pub id: String,
    pub site_id: String,
    pub hostname: String,
    pub is_primary: i64,
    pub redirect_to_primary: i64,
    pub push_status: String,
    pub dns_record_id: Option<String>,
    pub platform_registration: Option<String>,
    pub attempt_count: i64,
    pub self_heal_count: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub push_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DomainRow {
    pub(crate) fn into_domain(self) -> Result<Domain, UnknownPushStatus> {
        let status: PushStatus = self.push_status.parse()?;
        Ok(Domain {
            id: self.id,
            site_id: self.site_id,
            hostname: self.hostname,
            is_primary: self.is_primary != 0,
            redirect_to_primary: self.redirect_to_primary != 0,
            push: PushState {
                status,
                provider_refs: ProviderRefs {
                    dns_record_id: self.dns_record_id,
                    platform_registration: self.platform_registration,
                },
                attempt_count: self.attempt_count as u32,
                self_heal_count: self.self_heal_count as u32,
                last_attempt_at: self.last_attempt_at,
                last_error: self.last_error,
                version: self.push_version as u64,
            },
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
