use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context as _;
use axum::{extract::FromRef, routing::get, Router};
use clap::Parser;
use clap_verbosity_flag::{log::LevelFilter, InfoLevel, Verbosity};
use figment::{providers::Format as _, Figment};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    auth, blob::ProofStore, config::AppConfig, db, models::AdminRole, moderation,
    ratelimit::RateLimiter, webhook, webhook::WebhookProducer,
};
pub use crate::error::Error;

/// The application user agent. Concatenates the package name and version. e.g. `proofdesk/0.0.0`.
pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// The application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug, Clone)]
/// Command line arguments.
pub struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "default.toml")]
    pub config: PathBuf,
    /// The verbosity level.
    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}

#[derive(Clone, FromRef)]
/// The application state, shared across all routes.
pub struct AppState {
    /// The application configuration.
    pub config: AppConfig,
    /// The database connection pool.
    pub db: SqlitePool,
    /// The outbound HTTP client.
    pub client: reqwest::Client,
    /// The webhook producer.
    pub hooks: WebhookProducer,
    /// The submission-creation rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// The proof file store.
    pub proofs: ProofStore,
}

/// A fully assembled application: router, state, and background tasks.
pub(crate) struct App {
    pub router: Router,
    pub state: AppState,
    /// The webhook delivery worker.
    pub worker: tokio::task::JoinHandle<()>,
    /// The retry-sweep / expiry / session-purge loop.
    pub maintenance: tokio::task::JoinHandle<()>,
}

/// Assemble the application from a loaded configuration. Shared by [`run`]
/// and the test harness.
pub(crate) async fn build(config: AppConfig) -> anyhow::Result<App> {
    tokio::fs::create_dir_all(&config.proofs.path)
        .await
        .context("failed to create proof directory")?;

    let pool = db::establish_pool(&config.db)
        .await
        .context("failed to establish database connection pool")?;
    db::init_schema(&pool).await?;

    let client = reqwest::Client::builder()
        .user_agent(APP_USER_AGENT)
        .build()
        .context("failed to build requester client")?;

    let (worker, hooks) = webhook::spawn(pool.clone(), client.clone(), config.webhook.clone());
    let maintenance = tokio::spawn(maintenance_loop(
        pool.clone(),
        client.clone(),
        config.clone(),
    ));

    let state = AppState {
        config: config.clone(),
        db: pool,
        client,
        hooks,
        limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
        proofs: ProofStore::new(config.proofs.path.clone()),
    };

    let router = Router::new()
        .route("/", get(crate::index))
        .nest("/api/app", crate::endpoints::app_routes())
        .nest("/api/admin", crate::endpoints::admin_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    Ok(App {
        router,
        state,
        worker,
        maintenance,
    })
}

/// The durability backstop for webhook retries, plus housekeeping: expire
/// stale submissions and purge dead sessions.
async fn maintenance_loop(db: SqlitePool, client: reqwest::Client, config: AppConfig) {
    let mut interval = tokio::time::interval(Duration::from_secs(config.webhook.sweep_interval));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup is quiet.
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Err(e) = webhook::retry_sweep(&db, &client, &config.webhook).await {
            warn!("webhook retry sweep failed: {e:?}");
        }
        if let Err(e) = moderation::expire_stale(&db, config.review.expire_after_days).await {
            warn!("expiry sweep failed: {e:?}");
        }
        match auth::purge_expired_sessions(&db).await {
            Ok(0) => {}
            Ok(purged) => info!("purged {purged} expired sessions"),
            Err(e) => warn!("session purge failed: {e:?}"),
        }
    }
}

/// The main application entry point.
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    // Set up trace logging to console and account for the user-provided verbosity flag.
    if args.verbosity.log_level_filter() != LevelFilter::Off {
        let lvl = match args.verbosity.log_level_filter() {
            LevelFilter::Error => tracing::Level::ERROR,
            LevelFilter::Warn => tracing::Level::WARN,
            LevelFilter::Info | LevelFilter::Off => tracing::Level::INFO,
            LevelFilter::Debug => tracing::Level::DEBUG,
            LevelFilter::Trace => tracing::Level::TRACE,
        };
        tracing_subscriber::fmt().with_max_level(lvl).init();
    }

    if !args.config.exists() {
        // Not fatal: all settings can come from the environment, but a
        // missing file usually means a forgotten mount.
        warn!(
            "configuration file {} does not exist",
            args.config.display()
        );
    }

    // Read and parse the user-provided configuration.
    let config: AppConfig = Figment::new()
        .admerge(figment::providers::Toml::file(args.config))
        .admerge(figment::providers::Env::prefixed("PROOFDESK_"))
        .extract()
        .context("failed to load configuration")?;

    if config.webhook.endpoint.is_none() {
        warn!("no webhook endpoint configured; events will be persisted but not delivered");
    }

    // Initialize metrics reporting.
    crate::metrics::setup(config.metrics.as_ref()).context("failed to set up metrics exporter")?;

    let addr = config
        .listen_address
        .unwrap_or(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000));

    let App {
        router,
        state,
        // Held for the process lifetime.
        worker: _worker,
        maintenance: _maintenance,
    } = build(config).await?;

    // Determine whether or not this was the first startup (i.e. no admin
    // accounts exist). If so, create one and share its credentials via the
    // console.
    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admins")
        .fetch_one(&state.db)
        .await
        .context("failed to count admins")?;

    if admins == 0 {
        let password = auth::generate_token();
        auth::create_admin(&state.db, "admin", &password, AdminRole::SuperAdmin)
            .await
            .map_err(|e| anyhow::anyhow!("failed to create initial admin: {e}"))?;

        // N.B: This is a sensitive message, so we're bypassing `tracing` here and
        // logging it directly to console.
        println!("=====================================");
        println!("            FIRST STARTUP            ");
        println!("=====================================");
        println!("Log in to the dashboard with:");
        println!("  username: admin");
        println!("  password: {password}");
        println!("=====================================");
    }

    info!("listening on {addr}");
    info!("connect to: http://127.0.0.1:{}", addr.port());

    let listener = TcpListener::bind(&addr)
        .await
        .context("failed to bind address")?;

    let serve = tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .context("failed to serve app")
    });

    serve
        .await
        .map_err(Into::into)
        .and_then(|r| r)
        .context("failed to serve app")
}
