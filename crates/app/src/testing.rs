//! In-process provider fakes and a seeded orchestrator for tests.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use tempfile::TempDir;

use domain_push_core::machine::PushLimits;
use domain_push_core::{PushStatus, RetryPolicy, VerificationState};
use domain_push_providers::{
    DnsProvider, DnsTarget, PlatformProvider, ProviderError, RecordRef, RegistrationRef, SiteRef,
};
use domain_push_storage::{Database, NewDomain, NewSite, PushLogEntry};

use crate::domains::DomainService;
use crate::hostname_cache::HostnameCache;
use crate::lock::DomainLocks;
use crate::push::{Clock, PushOrchestrator, PushSettings};

type ErrorFactory = Box<dyn Fn() -> ProviderError + Send + Sync>;

#[derive(Default)]
struct DnsState {
    credential_rejected: bool,
    records: Vec<RecordRef>,
    created: usize,
    calls: usize,
    next_id: usize,
    fail_once: Option<ProviderError>,
    fail_always: Option<ErrorFactory>,
    fail_find: Option<ProviderError>,
}

impl DnsState {
    fn publish(&mut self, hostname: &str, target: &DnsTarget) -> RecordRef {
        self.next_id += 1;
        let record = RecordRef {
            id: format!("rec-{}", self.next_id),
            name: hostname.to_string(),
            record_type: target.record_type,
            content: target.content.clone(),
        };
        self.records.push(record.clone());
        record
    }
}

/// DNS provider keeping records in memory.
#[derive(Default)]
pub struct FakeDns {
    state: Mutex<DnsState>,
}

impl FakeDns {
    fn with_state<T>(&self, f: impl FnOnce(&mut DnsState) -> T) -> T {
        let mut state = self.state.lock().expect("fake dns poisoned");
        f(&mut state)
    }

    pub fn reject_credential(&self) {
        self.with_state(|state| state.credential_rejected = true);
    }

    pub fn accept_credential(&self) {
        self.with_state(|state| state.credential_rejected = false);
    }

    pub fn fail_ensure_once(&self, err: ProviderError) {
        self.with_state(|state| state.fail_once = Some(err));
    }

    pub fn fail_ensure_always(&self, factory: impl Fn() -> ProviderError + Send + Sync + 'static) {
        self.with_state(|state| state.fail_always = Some(Box::new(factory)));
    }

    /// Fails the next record lookup.
    pub fn fail_find_once(&self, err: ProviderError) {
        self.with_state(|state| state.fail_find = Some(err));
    }

    /// Publishes a record without counting it as created by the code under test.
    pub fn seed_record(&self, hostname: &str, target: DnsTarget) {
        self.with_state(|state| {
            state.publish(hostname, &target);
        });
    }

    pub fn records_created(&self) -> usize {
        self.with_state(|state| state.created)
    }

    pub fn records_total(&self) -> usize {
        self.with_state(|state| state.records.len())
    }

    pub fn calls(&self) -> usize {
        self.with_state(|state| state.calls)
    }
}

#[async_trait]
impl DnsProvider for FakeDns {
    async fn verify_credential(&self) -> Result<bool, ProviderError> {
        Ok(self.with_state(|state| {
            state.calls += 1;
            !state.credential_rejected
        }))
    }

    async fn ensure_record(
        &self,
        hostname: &str,
        target: &DnsTarget,
    ) -> Result<RecordRef, ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            if let Some(factory) = &state.fail_always {
                return Err(factory());
            }
            if let Some(err) = state.fail_once.take() {
                return Err(err);
            }

            if let Some(existing) = state
                .records
                .iter()
                .find(|record| record.name == hostname && target.matches(record))
            {
                return Ok(existing.clone());
            }
            if let Some(stale) = state
                .records
                .iter_mut()
                .find(|record| record.name == hostname)
            {
                stale.record_type = target.record_type;
                stale.content = target.content.clone();
                return Ok(stale.clone());
            }

            state.created += 1;
            Ok(state.publish(hostname, target))
        })
    }

    async fn find_records(&self, hostname: &str) -> Result<Vec<RecordRef>, ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            if let Some(err) = state.fail_find.take() {
                return Err(err);
            }
            Ok(state
                .records
                .iter()
                .filter(|record| record.name == hostname)
                .cloned()
                .collect())
        })
    }

    async fn delete_record(&self, record_id: &str) -> Result<(), ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            state.records.retain(|record| record.id != record_id);
        });
        Ok(())
    }
}

#[derive(Default)]
struct PlatformState {
    script: VecDeque<VerificationState>,
    last: Option<VerificationState>,
    registered: HashSet<String>,
    registrations: usize,
    removed: usize,
    calls: usize,
    registration_failure: Option<ProviderError>,
    verification_failure: Option<ProviderError>,
}

/// Hosting platform answering verification checks from a script.
#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    fn with_state<T>(&self, f: impl FnOnce(&mut PlatformState) -> T) -> T {
        let mut state = self.state.lock().expect("fake platform poisoned");
        f(&mut state)
    }

    /// Queues verification answers. The last one repeats once the queue drains.
    pub fn script(&self, answers: impl IntoIterator<Item = VerificationState>) {
        self.with_state(|state| state.script.extend(answers));
    }

    pub fn fail_registration(&self, err: ProviderError) {
        self.with_state(|state| state.registration_failure = Some(err));
    }

    pub fn fail_verification_once(&self, err: ProviderError) {
        self.with_state(|state| state.verification_failure = Some(err));
    }

    /// Drops a registration behind the orchestrator's back.
    pub fn forget(&self, hostname: &str) {
        self.with_state(|state| {
            state.registered.remove(hostname);
        });
    }

    pub fn registrations(&self) -> usize {
        self.with_state(|state| state.registrations)
    }

    pub fn removed(&self) -> usize {
        self.with_state(|state| state.removed)
    }

    pub fn calls(&self) -> usize {
        self.with_state(|state| state.calls)
    }
}

#[async_trait]
impl PlatformProvider for FakePlatform {
    async fn register_domain(
        &self,
        hostname: &str,
        site: &SiteRef,
    ) -> Result<RegistrationRef, ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            if let Some(err) = state.registration_failure.take() {
                return Err(err);
            }
            if state.registered.insert(hostname.to_string()) {
                state.registrations += 1;
            }
            Ok(RegistrationRef {
                project_id: site.project_id.clone(),
                hostname: hostname.to_string(),
            })
        })
    }

    async fn check_verification(
        &self,
        registration: &RegistrationRef,
    ) -> Result<VerificationState, ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            if let Some(err) = state.verification_failure.take() {
                return Err(err);
            }
            if !state.registered.contains(&registration.hostname) {
                return Err(ProviderError::Status {
                    status: StatusCode::NOT_FOUND,
                    body: format!("{} is not registered", registration.hostname),
                });
            }
            if let Some(next) = state.script.pop_front() {
                state.last = Some(next);
            }
            Ok(state.last.unwrap_or(VerificationState::Pending))
        })
    }

    async fn remove_domain(&self, registration: &RegistrationRef) -> Result<(), ProviderError> {
        self.with_state(|state| {
            state.calls += 1;
            if state.registered.remove(&registration.hostname) {
                state.removed += 1;
            }
        });
        Ok(())
    }
}

/// Fast limits: three attempts, millisecond backoff, two verification polls.
pub fn settings() -> PushSettings {
    PushSettings {
        limits: PushLimits {
            max_attempts: 3,
            max_self_heals: 3,
        },
        retry: RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(5))
            .without_jitter(),
        verify_polls: 2,
        verify_interval: Duration::from_millis(1),
        cname_target: "cname.vercel-dns.com".to_string(),
        apex_target: "76.76.21.21".to_string(),
        default_project_id: "prj_default".to_string(),
    }
}

pub struct Fixture {
    pub database: Database,
    pub dns: Arc<FakeDns>,
    pub platform: Arc<FakePlatform>,
    pub locks: DomainLocks,
    pub cache: HostnameCache,
    pub settings: PushSettings,
    pub orchestrator: PushOrchestrator,
    pub domains: DomainService,
    _dir: TempDir,
}

/// Migrated database with site `s-1` and its primary domain `d-1`
/// (`blog.example.com`), wired to fresh fakes.
pub async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!(
        "sqlite://{}?mode=rwc",
        dir.path().join("domains.db").display()
    );
    let database = Database::connect(&url).await.expect("connect");
    database.run_migrations().await.expect("migrations");

    database
        .sites()
        .upsert(&NewSite {
            id: "s-1",
            name: "Field Notes",
            platform_project_id: None,
            created_at: Utc::now(),
        })
        .await
        .expect("insert site");
    database
        .domains()
        .insert(&NewDomain {
            id: "d-1",
            site_id: "s-1",
            hostname: "blog.example.com",
            redirect_to_primary: true,
            created_at: Utc::now(),
        })
        .await
        .expect("insert domain");

    let dns = Arc::new(FakeDns::default());
    let platform = Arc::new(FakePlatform::default());
    let locks = DomainLocks::new(Duration::from_millis(250));
    let cache = HostnameCache::new();
    let clock: Clock = Arc::new(Utc::now);

    let orchestrator = PushOrchestrator::new(
        database.clone(),
        dns.clone(),
        platform.clone(),
        locks.clone(),
        cache.clone(),
        settings(),
        clock.clone(),
    );
    let domains = DomainService::new(
        database.clone(),
        dns.clone(),
        platform.clone(),
        locks.clone(),
        cache.clone(),
        clock,
    );

    Fixture {
        database,
        dns,
        platform,
        locks,
        cache,
        settings: settings(),
        orchestrator,
        domains,
        _dir: dir,
    }
}

impl Fixture {
    pub async fn history(&self, domain_id: &str) -> Vec<PushLogEntry> {
        self.database
            .push_state()
            .history(domain_id)
            .await
            .expect("history")
    }

    /// Simulates a process that died after persisting `status`.
    pub async fn force_status(&self, domain_id: &str, status: PushStatus) {
        sqlx::query("UPDATE domains SET push_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(domain_id)
            .execute(self.database.pool())
            .await
            .expect("force status");
    }
}
