use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{info, warn};

use domain_push_core::machine::{apply, PushEvent, PushLimits, Step};
use domain_push_core::{
    is_apex, Domain, PushOutcome, PushStatus, PushStatusReport, RetryPolicy, TransitionError,
};
use domain_push_providers::{
    DnsProvider, DnsTarget, ErrorClass, PlatformProvider, ProviderError, RegistrationRef, SiteRef,
};
use domain_push_storage::{Database, PushLogEntry, PushStateError, SiteError};
use domain_push_util::{DnsConfig, PlatformConfig, PushConfig};

use crate::hostname_cache::HostnameCache;
use crate::lock::{DomainLocks, LockTimeout};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Tunables and provider targets for push journeys.
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub limits: PushLimits,
    pub retry: RetryPolicy,
    pub verify_polls: u32,
    pub verify_interval: Duration,
    pub cname_target: String,
    pub apex_target: String,
    /// Platform project for sites without an override.
    pub default_project_id: String,
}

impl PushSettings {
    pub fn from_config(dns: &DnsConfig, platform: &PlatformConfig, push: &PushConfig) -> Self {
        Self {
            limits: PushLimits {
                max_attempts: push.max_attempts,
                max_self_heals: push.max_self_heals,
            },
            retry: RetryPolicy::new(push.backoff_base, push.backoff_max),
            verify_polls: push.verify_polls.max(1),
            verify_interval: push.verify_interval,
            cname_target: dns.cname_target.clone(),
            apex_target: dns.apex_target.to_string(),
            default_project_id: platform.project_id.clone(),
        }
    }

    /// Record a hostname must point at: A for apex hostnames, CNAME otherwise.
    pub fn target_for(&self, hostname: &str) -> DnsTarget {
        if is_apex(hostname) {
            DnsTarget::a(&self.apex_target)
        } else {
            DnsTarget::cname(&self.cname_target)
        }
    }
}

/// Drives domains through DNS configuration and platform registration.
///
/// Each step runs under the domain's lock and ends with one compare-and-set
/// write, so a push can be repeated or resumed after a crash from whatever
/// state was last persisted.
#[derive(Clone)]
pub struct PushOrchestrator {
    database: Database,
    dns: Arc<dyn DnsProvider>,
    platform: Arc<dyn PlatformProvider>,
    locks: DomainLocks,
    cache: HostnameCache,
    settings: Arc<PushSettings>,
    clock: Clock,
}

enum StepResult {
    /// Journey reached a state this call should not move past.
    Done(Domain),
    Advanced,
    /// Transient failure persisted, wait before retrying.
    Retry(Duration),
    /// Platform verification still pending.
    Pending(Domain),
}

impl PushOrchestrator {
    pub fn new(
        database: Database,
        dns: Arc<dyn DnsProvider>,
        platform: Arc<dyn PlatformProvider>,
        locks: DomainLocks,
        cache: HostnameCache,
        settings: PushSettings,
        clock: Clock,
    ) -> Self {
        Self {
            database,
            dns,
            platform,
            locks,
            cache,
            settings: Arc::new(settings),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Pushes the domain as far as it can go in this call.
    ///
    /// Active domains return immediately without provider calls. Failed or
    /// needs-action domains restart at DNS configuration. A domain still
    /// waiting on platform verification after the configured polls returns a
    /// non-success outcome in `platform_verifying`; pushing again resumes it.
    pub async fn push_domain(&self, domain_id: &str) -> Result<PushOutcome, PushError> {
        let result = self.run(domain_id).await;
        let label = match &result {
            Ok(outcome) if outcome.success => "active",
            Ok(outcome) if outcome.needs_action => outcome.status.as_str(),
            Ok(_) => "pending",
            Err(PushError::LockTimeout(_)) => "lock_timeout",
            Err(_) => "error",
        };
        counter!("domain_push_requests_total", "result" => label).increment(1);
        result
    }

    async fn run(&self, domain_id: &str) -> Result<PushOutcome, PushError> {
        let mut first_step = true;
        let mut polls = 0u32;

        loop {
            let step = self
                .locks
                .with_lock(domain_id, || self.step(domain_id, first_step))
                .await??;
            first_step = false;

            match step {
                StepResult::Done(domain) => return Ok(PushOutcome::from_domain(&domain)),
                StepResult::Advanced => {}
                StepResult::Retry(delay) => tokio::time::sleep(delay).await,
                StepResult::Pending(domain) => {
                    polls += 1;
                    if polls >= self.settings.verify_polls {
                        info!(
                            stage = "push",
                            domain_id,
                            hostname = %domain.hostname,
                            polls,
                            "platform verification still pending"
                        );
                        return Ok(PushOutcome::from_domain(&domain));
                    }
                    tokio::time::sleep(self.settings.verify_interval).await;
                }
            }
        }
    }

    /// Reads the persisted push state. Never takes the domain lock.
    pub async fn get_domain_push_status(
        &self,
        domain_id: &str,
    ) -> Result<PushStatusReport, PushError> {
        let domain = self
            .database
            .push_state()
            .load(domain_id)
            .await?
            .ok_or(PushError::NotFound)?;
        Ok(PushStatusReport::from_domain(&domain))
    }

    /// Persisted transitions for the domain, oldest first.
    pub async fn get_domain_push_history(
        &self,
        domain_id: &str,
    ) -> Result<Vec<PushLogEntry>, PushError> {
        let store = self.database.push_state();
        if store.load(domain_id).await?.is_none() {
            return Err(PushError::NotFound);
        }
        Ok(store.history(domain_id).await?)
    }

    async fn step(&self, domain_id: &str, first_step: bool) -> Result<StepResult, PushError> {
        let started = Instant::now();
        let store = self.database.push_state();
        let domain = store.load(domain_id).await?.ok_or(PushError::NotFound)?;
        let from = domain.push.status;

        let event = match from {
            PushStatus::Active => return Ok(StepResult::Done(domain)),
            PushStatus::Failed | PushStatus::NeedsAction if !first_step => {
                return Ok(StepResult::Done(domain))
            }
            PushStatus::NotStarted | PushStatus::Failed | PushStatus::NeedsAction => {
                PushEvent::Requested
            }
            PushStatus::DnsConfiguring => self.configure_dns(&domain).await,
            PushStatus::DnsVerifying => self.verify_dns(&domain).await,
            PushStatus::PlatformRegistering => self.register_with_platform(&domain).await?,
            PushStatus::PlatformVerifying => self.check_platform(&domain).await,
        };

        let transition = match apply(&domain.push, event, &self.settings.limits)? {
            Step::Wait => return Ok(StepResult::Pending(domain)),
            Step::Move(transition) => transition,
        };

        let next = store
            .compare_and_set(&domain.id, &domain.push, &transition, self.now())
            .await?;
        self.cache.invalidate(&domain.hostname).await;

        counter!(
            "domain_push_transitions_total",
            "from" => transition.from.as_str(),
            "to" => transition.to.as_str()
        )
        .increment(1);
        histogram!("domain_push_step_seconds", "status" => from.as_str())
            .record(started.elapsed().as_secs_f64());

        if transition.is_retry() {
            let delay = self
                .settings
                .retry
                .delay_for(next.attempt_count, transition.retry_after);
            warn!(
                stage = "push",
                domain_id,
                hostname = %domain.hostname,
                status = %from,
                attempt = next.attempt_count,
                delay_ms = delay.as_millis() as u64,
                error = %transition.detail,
                "push step failed, retrying"
            );
            return Ok(StepResult::Retry(delay));
        }

        if next.status.needs_action() {
            warn!(
                stage = "push",
                domain_id,
                hostname = %domain.hostname,
                from = %transition.from,
                to = %transition.to,
                event = transition.event,
                error = %transition.detail,
                "push stopped"
            );
        } else {
            info!(
                stage = "push",
                domain_id,
                hostname = %domain.hostname,
                from = %transition.from,
                to = %transition.to,
                event = transition.event,
                "push transition persisted"
            );
        }

        if next.status.is_terminal() {
            return Ok(StepResult::Done(Domain {
                push: next,
                ..domain
            }));
        }
        Ok(StepResult::Advanced)
    }

    async fn configure_dns(&self, domain: &Domain) -> PushEvent {
        match self.dns.verify_credential().await {
            Ok(true) => {}
            Ok(false) => {
                return PushEvent::CredentialRejected {
                    detail: "dns provider rejected the configured credential".to_string(),
                }
            }
            Err(err) => return provider_event(err),
        }

        let target = self.settings.target_for(&domain.hostname);
        match self.dns.ensure_record(&domain.hostname, &target).await {
            Ok(record) => PushEvent::RecordEnsured {
                record_id: record.id,
            },
            Err(err) => provider_event(err),
        }
    }

    async fn verify_dns(&self, domain: &Domain) -> PushEvent {
        let target = self.settings.target_for(&domain.hostname);
        // leftover records for the name are ignored as long as ours is published
        match self.dns.find_records(&domain.hostname).await {
            Ok(records) if records.iter().any(|record| target.matches(record)) => {
                PushEvent::RecordVisible
            }
            Ok(_) => PushEvent::Transient {
                detail: format!(
                    "dns record for {} is not yet visible at the provider",
                    domain.hostname
                ),
                retry_after: None,
            },
            Err(err) => provider_event(err),
        }
    }

    /// Registration is idempotent on the platform, so it is re-issued on every
    /// pass. A registration removed on the platform side is restored this way.
    async fn register_with_platform(&self, domain: &Domain) -> Result<PushEvent, PushError> {
        let stored = domain
            .push
            .provider_refs
            .platform_registration
            .as_deref()
            .map(str::parse::<RegistrationRef>);

        let site_ref = match stored {
            // an earlier journey fixed the project, keep registering there
            Some(Ok(registration)) => SiteRef {
                site_id: domain.site_id.clone(),
                project_id: registration.project_id,
            },
            Some(Err(err)) => {
                return Ok(PushEvent::Fatal {
                    detail: err.to_string(),
                })
            }
            None => {
                let Some(site) = self.database.sites().fetch(&domain.site_id).await? else {
                    return Ok(PushEvent::Fatal {
                        detail: format!("site {} no longer exists", domain.site_id),
                    });
                };
                SiteRef {
                    project_id: site
                        .platform_project_id
                        .unwrap_or_else(|| self.settings.default_project_id.clone()),
                    site_id: site.id,
                }
            }
        };

        Ok(
            match self
                .platform
                .register_domain(&domain.hostname, &site_ref)
                .await
            {
                Ok(registration) => PushEvent::Registered {
                    registration: registration.to_string(),
                },
                Err(err) => provider_event(err),
            },
        )
    }

    async fn check_platform(&self, domain: &Domain) -> PushEvent {
        let registration = match domain
            .push
            .provider_refs
            .platform_registration
            .as_deref()
            .map(str::parse::<RegistrationRef>)
        {
            Some(Ok(registration)) => registration,
            Some(Err(err)) => {
                return PushEvent::Fatal {
                    detail: err.to_string(),
                }
            }
            None => {
                return PushEvent::Fatal {
                    detail: "no platform registration recorded".to_string(),
                }
            }
        };

        match self.platform.check_verification(&registration).await {
            Ok(state) => PushEvent::Verification(state),
            Err(err) => provider_event(err),
        }
    }
}

/// Translates a provider failure into the event the state machine consumes.
fn provider_event(err: ProviderError) -> PushEvent {
    let detail = err.to_string();
    match err.class() {
        ErrorClass::Credential => PushEvent::CredentialRejected { detail },
        ErrorClass::Transient => PushEvent::Transient {
            detail,
            retry_after: err.retry_after(),
        },
        ErrorClass::Conflict => PushEvent::Conflict { detail },
        ErrorClass::Fatal => PushEvent::Fatal { detail },
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("domain not found")]
    NotFound,
    #[error(transparent)]
    LockTimeout(#[from] LockTimeout),
    #[error("push state changed concurrently, retry the push")]
    StaleState,
    #[error("storage error: {0}")]
    Storage(#[source] PushStateError),
    #[error("failed to load site: {0}")]
    Site(#[from] SiteError),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<PushStateError> for PushError {
    fn from(err: PushStateError) -> Self {
        match err {
            PushStateError::NotFound => Self::NotFound,
            PushStateError::Stale { .. } => Self::StaleState,
            other => Self::Storage(other),
        }
    }
}
