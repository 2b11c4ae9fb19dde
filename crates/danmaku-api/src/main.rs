//! Danmaku Gateway HTTP entrypoint.
//!
//! Binds the dandanplay-compatible surface under `/{token}/...` and
//! `/{token}/api/v2/...`, plus an ambient `/health`, `/ready`,
//! `/liveness`, `/metrics` surface that is never token-gated.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use danmaku_api::middleware::SecurityHeaders;
use danmaku_api::routes;
use danmaku_api::state::AppState;
use danmaku_api::token_repository::PgTokenRepository;
use danmaku_core::config::{BootstrapSettings, ConfigStore};
use danmaku_fallback::{PgLibraryRepository, VirtualIdMinter};
use danmaku_metadata::MetadataRegistry;
use danmaku_providers::AdapterRegistry;
use danmaku_ratelimit::{ProviderQuota, RateLimiter};
use danmaku_scheduler::{JobRegistry, PgScheduledTaskRepository, Scheduler};
use danmaku_tasks::{PgTaskHistoryRepository, TaskManager, WorkerCounts};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing::info;

/// Reads each registered adapter's declared quota straight out of the
/// registry, so the admin UI's per-adapter settings double as the rate
/// limiter's provider bucket sizes without a second source of truth.
struct RegistryQuota(Arc<AdapterRegistry>);

impl ProviderQuota for RegistryQuota {
    fn quota_for(&self, provider: &str) -> Option<u64> {
        self.0
            .enabled_sorted()
            .into_iter()
            .find(|a| a.descriptor().provider_name == provider)
            .and_then(|a| a.descriptor().rate_limit_quota)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).json().init();

    let bootstrap = BootstrapSettings::load().expect("bootstrap settings (DATABASE_URL, REDIS_URL) must be set");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&bootstrap.database_url)
        .await
        .expect("failed to connect to the configured database");

    info!(bind_address = %bootstrap.bind_address, "starting danmaku gateway");

    let config = Arc::new(ConfigStore::new(pool.clone()));
    let cache = Arc::new(danmaku_cache::MemoryCacheStore::new());
    let verification_enabled = config.get_bool("scraperVerificationEnabled", true).await.unwrap_or(true);
    let adapters = Arc::new(AdapterRegistry::new(None, verification_enabled));

    let rate_limiter = Arc::new(RateLimiter::new(
        10_000,
        Duration::from_secs(60),
        Duration::from_secs(60),
        500,
        Duration::from_secs(60),
        Box::new(RegistryQuota(adapters.clone())),
    ));

    let task_manager = Arc::new(TaskManager::new(
        Arc::new(PgTaskHistoryRepository::new(pool.clone())),
        WorkerCounts::default(),
    ));

    let trusted_proxies_raw = config.get_or("trustedProxies", "[]").await.unwrap_or_else(|_| "[]".to_string());
    let trusted_proxies: Vec<ipnetwork::IpNetwork> = serde_json::from_str::<Vec<String>>(&trusted_proxies_raw)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect();

    let state = AppState {
        config: config.clone(),
        cache,
        rate_limiter,
        adapters,
        // No concrete TMDB/Bangumi/Douban source is wired in yet; the
        // registry stays empty and search fallback simply skips the
        // metadata rescue step until one is registered.
        metadata: Arc::new(MetadataRegistry::new()),
        library: Arc::new(PgLibraryRepository::new(pool.clone())),
        tokens: Arc::new(PgTokenRepository::new(pool.clone())),
        virtual_ids: Arc::new(VirtualIdMinter::new()),
        task_manager: task_manager.clone(),
        trusted_proxies: Arc::new(trusted_proxies),
        metrics: Arc::new(danmaku_api::metrics::Metrics::new()),
    };

    let scheduler = Scheduler::new(
        Arc::new(PgScheduledTaskRepository::new(pool.clone())),
        Arc::new(JobRegistry::new()),
        task_manager,
    )
    .await
    .expect("failed to start the cron engine");
    scheduler.start().await.expect("failed to schedule persisted jobs");

    let bind_address = bootstrap.bind_address.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .wrap(SecurityHeaders)
            .configure(routes::health::configure)
            .configure(routes::configure)
    })
    .bind(&bind_address)?
    .shutdown_timeout(30)
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining in-flight requests");
        server_handle.stop(true).await;
    });

    server.await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
