mod config;
mod error;
mod gateway;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::HeaderValue, middleware as axum_mw, Router};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use config::Config;
use gateway::keystore::{KeyStore, PersistentKeyStore};
use gateway::metrics::{MetricsSink, PersistentMetricsSink};
use gateway::providers::{anthropic::AnthropicHandler, gemini::GeminiHandler, openai::OpenAiHandler};
use gateway::ratelimit::{memory::MemoryBackend, remote::RemoteBackend, RateLimitBackend, RateLimiter};
use gateway::registry::ProviderRegistry;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (ignore if missing)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    tracing::info!("Starting LLM Gateway on {}", config.listen_addr);

    // Create Postgres connection pool
    let db = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // Create Redis connection manager
    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis = redis_client.get_connection_manager().await?;
    tracing::info!("Connected to Redis");

    // Warm up Redis caches
    {
        let mut warm_redis = redis.clone();
        services::key_service::warm_up_redis(&db, &mut warm_redis).await?;
    }

    // Build the provider registry (C1): one handler + pooled client per
    // enabled upstream.
    let mut registry = ProviderRegistry::new();
    if config.openai.enabled {
        registry.register(Arc::new(OpenAiHandler::new(config.openai.base_url.clone())));
    }
    if config.anthropic.enabled {
        registry.register(Arc::new(AnthropicHandler::new(config.anthropic.base_url.clone())));
    }
    if config.gemini.enabled {
        registry.register(Arc::new(GeminiHandler::new(config.gemini.base_url.clone())));
    }
    let registry = Arc::new(registry);

    // Build the rate limiter (C8) on whichever backend config selects.
    let backend: Box<dyn RateLimitBackend> = match config.rate_limit_backend.as_str() {
        "remote" => Box::new(RemoteBackend::new(redis.clone())),
        _ => Box::new(MemoryBackend::new()),
    };
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), backend));

    let key_store: Arc<dyn KeyStore> = Arc::new(PersistentKeyStore::new(db.clone(), redis.clone()));
    let metrics: Arc<dyn MetricsSink> = Arc::new(PersistentMetricsSink::new(db.clone()));

    // Build shared state
    let state = Arc::new(AppState {
        db,
        redis,
        config: config.clone(),
        registry,
        rate_limiter,
        key_store,
        metrics,
    });

    // Spawn background log retention task
    if config.log_retention_days > 0 {
        let retention_db = state.db.clone();
        let retention_days = config.log_retention_days;
        tokio::spawn(async move {
            // Run cleanup once on startup, then every hour
            loop {
                match services::log_service::cleanup_old_logs(&retention_db, retention_days).await {
                    Ok(n) if n > 0 => {
                        tracing::info!(
                            "Cleaned up {} request logs older than {} days",
                            n,
                            retention_days
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!("Log cleanup error: {}", e);
                    }
                }
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            }
        });
    }

    // Build routes
    let admin_routes = routes::admin::router()
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    // The gateway's own proxy surface applies its own CORS handling per
    // request (spec §6's bit-exact header contract), so it sits outside
    // the global CorsLayer below rather than double-applying headers.
    let gateway_routes = routes::gateway::router();

    let allow_origin = if config.cors_origin == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    let cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    let admin_with_cors = Router::new()
        .nest("/admin", admin_routes)
        .layer(cors);

    let app = Router::new()
        .merge(admin_with_cors)
        .route("/health", axum::routing::get(|| async { "ok" }))
        .merge(gateway_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Listening on {}", config.listen_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
