use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use domain_push_core::Site;

use crate::to_rfc3339;

/// Repository for the minimal tenant rows domains hang off.
#[derive(Clone)]
pub struct SiteRepository {
    pub(crate) pool: SqlitePool,
}

impl SiteRepository {
    /// Creates the site, or renames it and replaces its project override.
    pub async fn upsert(&self, site: &NewSite<'_>) -> Result<Site, SiteError> {
        let written_at = to_rfc3339(site.created_at);
        let row = sqlx::query(
            "INSERT INTO sites (id, name, platform_project_id, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
                 name = excluded.name, \
                 platform_project_id = excluded.platform_project_id, \
                 updated_at = excluded.updated_at \
             RETURNING id, name, platform_project_id",
        )
        .bind(site.id)
        .bind(site.name)
        .bind(site.platform_project_id)
        .bind(&written_at)
        .bind(&written_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(Site {
            id: row.get("id"),
            name: row.get("name"),
            platform_project_id: row.get("platform_project_id"),
        })
    }

    /// Loads a site by id.
    pub async fn fetch(&self, site_id: &str) -> Result<Option<Site>, SiteError> {
        let row = sqlx::query("SELECT id, name, platform_project_id FROM sites WHERE id = ?")
            .bind(site_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Site {
            id: row.get("id"),
            name: row.get("name"),
            platform_project_id: row.get("platform_project_id"),
        }))
    }
}

/// Data required to create or update a site.
pub struct NewSite<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub platform_project_id: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum SiteError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
