//! DealMemo API Gateway
//!
//! The HTTP surface of the memo pipeline.
//! Handles:
//! - Memo version creation and reads
//! - The generation trigger (rate limited)
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use dealmemo_common::{
    config::{AppConfig, StoreBackend},
    db::DbPool,
    errors::AppError,
    llm::create_generative_client,
    metrics, Repository, SystemClock,
};
use dealmemo_engine::{InMemoryStore, LlmSectionGenerator, MemoStore, Orchestrator, SectionStore};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub memos: Arc<dyn MemoStore>,
    pub sections: Arc<dyn SectionStore>,
    pub orchestrator: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = Arc::new(config);

    init_tracing(&config);

    info!(
        service = %config.observability.service_name,
        "Starting DealMemo API Gateway v{}",
        dealmemo_common::VERSION
    );

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .set_buckets_for_metric(
                Matcher::Suffix("generation_duration_seconds".to_string()),
                metrics::GENERATION_BUCKETS,
            )?
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }
    metrics::register_metrics();

    let state = build_state(config.clone()).await?;
    let app = create_router(state)?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Structured logging, RUST_LOG overrides the configured level
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wire the status store, generative client and pipeline
async fn build_state(config: Arc<AppConfig>) -> Result<AppState, AppError> {
    let (memos, sections): (Arc<dyn MemoStore>, Arc<dyn SectionStore>) = match config.store.backend {
        StoreBackend::Postgres => {
            info!("Connecting to database...");
            let pool = DbPool::new(&config.database).await?;
            if config.database.run_migrations {
                pool.migrate().await?;
            }
            let repo = Arc::new(Repository::new(pool));
            let memos: Arc<dyn MemoStore> = repo.clone();
            let sections: Arc<dyn SectionStore> = repo;
            (memos, sections)
        }
        StoreBackend::Memory => {
            warn!("Using in-memory status store; state is lost on restart");
            let store = Arc::new(InMemoryStore::new());
            let memos: Arc<dyn MemoStore> = store.clone();
            let sections: Arc<dyn SectionStore> = store;
            (memos, sections)
        }
    };

    let client = create_generative_client(&config.llm)?;
    info!(model = client.model_name(), "Generative client ready");

    let clock = Arc::new(SystemClock);
    let generator = Arc::new(LlmSectionGenerator::new(
        client,
        sections.clone(),
        memos.clone(),
        clock.clone(),
    ));
    let orchestrator = Orchestrator::new(
        generator,
        sections.clone(),
        memos.clone(),
        clock,
        config.generation.clone(),
    );

    Ok(AppState {
        config,
        memos,
        sections,
        orchestrator: Arc::new(orchestrator),
    })
}

/// Create the main application router
fn create_router(state: AppState) -> Result<Router, AppError> {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // Generation trigger, optionally rate limited
    let mut generate_routes = Router::new()
        .route("/memos/{id}/generate", post(handlers::memos::generate));

    if state.config.rate_limit.enabled {
        let limiter = create_rate_limiter(&state.config.rate_limit)?;
        let limit = state.config.rate_limit.requests_per_second;
        generate_routes = generate_routes.route_layer(from_fn(move |req: Request, next: Next| {
            rate_limit_middleware(req, next, limiter.clone(), limit)
        }));
    }

    // The trigger runs until the memo is terminal, bounded by the pipeline's
    // own poll deadline rather than the request timeout.
    let api_routes = Router::new()
        .route(
            "/deals/{deal_id}/memos",
            post(handlers::memos::create_memo).get(handlers::memos::list_memos),
        )
        .route("/memos/{id}", get(handlers::memos::get_memo))
        .route("/memos/{id}/sections", get(handlers::memos::list_sections))
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .merge(generate_routes);

    // Compose the app
    Ok(Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
