mod api;
mod domains;
mod hostname_cache;
mod lock;
mod problem;
mod push;
mod router;
mod telemetry;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};

use chrono::Utc;
use tracing::info;

use domain_push_providers::{DnsProviderClient, PlatformDomainClient};
use domain_push_storage::Database;
use domain_push_util::{database_exists, ensure_database_dir, load_env_file, AppConfig};

use crate::domains::DomainService;
use crate::hostname_cache::HostnameCache;
use crate::lock::DomainLocks;
use crate::push::{Clock, PushOrchestrator, PushSettings};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let fresh = !database_exists(&config.database_url);
    ensure_database_dir(&config.database_url)?;
    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;
    info!(stage = "app", fresh, "database ready");

    let http = reqwest::Client::builder()
        .timeout(config.push.provider_timeout)
        .user_agent(concat!("domain-push/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let dns = Arc::new(DnsProviderClient::new(
        config.dns.api_token.clone(),
        config.dns.zone_id.clone(),
        config.dns.api_base.clone(),
        http.clone(),
    ));
    let platform = Arc::new(PlatformDomainClient::new(
        config.platform.api_token.clone(),
        config.platform.team_id.clone(),
        config.platform.api_base.clone(),
        http,
    ));

    let locks = DomainLocks::new(config.push.lock_timeout);
    let cache = HostnameCache::new();
    let clock: Clock = Arc::new(Utc::now);
    let settings = PushSettings::from_config(&config.dns, &config.platform, &config.push);

    let orchestrator = PushOrchestrator::new(
        database.clone(),
        dns.clone(),
        platform.clone(),
        locks.clone(),
        cache.clone(),
        settings,
        clock.clone(),
    );
    let domains = DomainService::new(database, dns, platform, locks, cache, clock);
    let state = router::AppState::new(metrics, orchestrator, domains);

    let addr: SocketAddr = config.bind_addr;
    info!(
        stage = "app",
        %addr,
        env = %config.environment.as_str(),
        dns_api = %config.dns.api_base,
        platform_api = %config.platform.api_base,
        "starting HTTP server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}
