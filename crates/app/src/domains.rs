use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use domain_push_core::{normalize_hostname, Domain, HostnameError, Site};
use domain_push_providers::{DnsProvider, PlatformProvider, ProviderError, RegistrationRef};
use domain_push_storage::{Database, DomainError, NewDomain, NewSite, SiteError};

use crate::hostname_cache::{HostnameCache, SiteResolution};
use crate::lock::{DomainLocks, LockTimeout};
use crate::push::Clock;

/// Operator facing domain mutations and hostname resolution.
#[derive(Clone)]
pub struct DomainService {
    database: Database,
    dns: Arc<dyn DnsProvider>,
    platform: Arc<dyn PlatformProvider>,
    locks: DomainLocks,
    cache: HostnameCache,
    clock: Clock,
}

impl DomainService {
    pub fn new(
        database: Database,
        dns: Arc<dyn DnsProvider>,
        platform: Arc<dyn PlatformProvider>,
        locks: DomainLocks,
        cache: HostnameCache,
        clock: Clock,
    ) -> Self {
        Self {
            database,
            dns,
            platform,
            locks,
            cache,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Creates or updates the tenant row domains hang off. A project override
    /// only affects registrations made after the change.
    pub async fn upsert_site(
        &self,
        site_id: &str,
        name: &str,
        platform_project_id: Option<&str>,
    ) -> Result<Site, DomainServiceError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(DomainServiceError::InvalidSite("name must not be empty"));
        }
        let platform_project_id = platform_project_id
            .map(str::trim)
            .filter(|project| !project.is_empty());

        let site = self
            .database
            .sites()
            .upsert(&NewSite {
                id: site_id,
                name,
                platform_project_id,
                created_at: self.now(),
            })
            .await?;

        info!(
            stage = "domains",
            site_id,
            platform_project_id = site.platform_project_id.as_deref().unwrap_or("default"),
            "site saved"
        );
        Ok(site)
    }

    /// Attaches a hostname to a site. The site's first domain becomes primary.
    pub async fn create(
        &self,
        site_id: &str,
        hostname: &str,
        redirect_to_primary: bool,
    ) -> Result<Domain, DomainServiceError> {
        let hostname = normalize_hostname(hostname)?;
        let id = Uuid::new_v4().to_string();

        let domain = self
            .database
            .domains()
            .insert(&NewDomain {
                id: &id,
                site_id,
                hostname: &hostname,
                redirect_to_primary,
                created_at: self.now(),
            })
            .await?;
        self.cache.invalidate(&domain.hostname).await;

        info!(
            stage = "domains",
            domain_id = %domain.id,
            site_id,
            hostname = %domain.hostname,
            is_primary = domain.is_primary,
            "domain created"
        );
        Ok(domain)
    }

    /// Removes a non-primary domain and detaches it from the providers in the
    /// background. Provider clean-up failures are logged and never undo the
    /// deletion.
    pub async fn delete(&self, domain_id: &str) -> Result<Domain, DomainServiceError> {
        let repo = self.database.domains();
        let domain = self
            .locks
            .with_lock(domain_id, || repo.delete(domain_id))
            .await??;
        self.cache.invalidate(&domain.hostname).await;

        info!(
            stage = "domains",
            domain_id,
            hostname = %domain.hostname,
            "domain deleted"
        );
        self.spawn_cleanup(domain.clone());
        Ok(domain)
    }

    /// Makes the domain its site's primary, demoting the previous one.
    pub async fn set_primary(&self, domain_id: &str) -> Result<Domain, DomainServiceError> {
        let repo = self.database.domains();
        let domain = repo.set_primary(domain_id, self.now()).await?;

        // every sibling's redirect target changed
        let siblings = repo.list_for_site(&domain.site_id).await?;
        self.cache
            .invalidate_many(siblings.iter().map(|sibling| sibling.hostname.as_str()))
            .await;

        info!(
            stage = "domains",
            domain_id,
            site_id = %domain.site_id,
            hostname = %domain.hostname,
            "primary domain changed"
        );
        Ok(domain)
    }

    pub async fn set_redirect(
        &self,
        domain_id: &str,
        redirect_to_primary: bool,
    ) -> Result<Domain, DomainServiceError> {
        let domain = self
            .database
            .domains()
            .set_redirect(domain_id, redirect_to_primary, self.now())
            .await?;
        self.cache.invalidate(&domain.hostname).await;
        Ok(domain)
    }

    /// Lists a site's domains, primary first.
    pub async fn list(&self, site_id: &str) -> Result<Vec<Domain>, DomainServiceError> {
        if self.database.sites().fetch(site_id).await?.is_none() {
            return Err(DomainServiceError::Domain(DomainError::SiteNotFound));
        }
        Ok(self.database.domains().list_for_site(site_id).await?)
    }

    /// Maps a request hostname to the site serving it.
    ///
    /// Input that is not a valid hostname resolves to nothing.
    pub async fn resolve(
        &self,
        hostname: &str,
    ) -> Result<Option<SiteResolution>, DomainServiceError> {
        let Ok(hostname) = normalize_hostname(hostname) else {
            return Ok(None);
        };
        if let Some(hit) = self.cache.get(&hostname).await {
            return Ok(Some(hit));
        }

        let generation = self.cache.generation().await;
        let repo = self.database.domains();
        let Some(domain) = repo.fetch_by_hostname(&hostname).await? else {
            return Ok(None);
        };

        let redirect_to = if !domain.is_primary && domain.redirect_to_primary {
            repo.fetch_primary(&domain.site_id)
                .await?
                .map(|primary| primary.hostname)
        } else {
            None
        };

        let resolution = SiteResolution {
            site_id: domain.site_id,
            domain_id: domain.id,
            hostname: domain.hostname,
            is_primary: domain.is_primary,
            redirect_to,
        };
        self.cache
            .insert_if_current(generation, resolution.clone())
            .await;
        Ok(Some(resolution))
    }

    fn spawn_cleanup(&self, domain: Domain) {
        let dns = self.dns.clone();
        let platform = self.platform.clone();

        tokio::spawn(async move {
            let refs = domain.push.provider_refs;
            if let Some(record_id) = refs.dns_record_id {
                let result = dns.delete_record(&record_id).await;
                record_cleanup("dns", &domain.hostname, result.as_ref().err());
            }

            if let Some(stored) = refs.platform_registration {
                let result = match stored.parse::<RegistrationRef>() {
                    Ok(registration) => platform.remove_domain(&registration).await,
                    Err(err) => Err(err),
                };
                record_cleanup("platform", &domain.hostname, result.as_ref().err());
            }
        });
    }
}

fn record_cleanup(
    provider: &'static str,
    hostname: &str,
    error: Option<&ProviderError>,
) {
    match error {
        None => {
            counter!("provider_cleanup_total", "provider" => provider, "result" => "ok")
                .increment(1);
            info!(stage = "domains", provider, hostname, "provider clean-up finished");
        }
        Some(err) => {
            counter!("provider_cleanup_total", "provider" => provider, "result" => "error")
                .increment(1);
            warn!(stage = "domains", provider, hostname, error = %err, "provider clean-up failed");
        }
    }
}

#[derive(Debug, Error)]
pub enum DomainServiceError {
    #[error("invalid site: {0}")]
    InvalidSite(&'static str),
    #[error("invalid hostname: {0}")]
    InvalidHostname(#[from] HostnameError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Site(#[from] SiteError),
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
}
