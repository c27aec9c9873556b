use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use portico::auth::{AuthManager, RejectAllVerifier, TokenVerifier};
use portico::config::{load_seed_routes, Config};
use portico::context::AppContext;
use portico::gateway::Forwarder;
use portico::kafka::{AuditProducer, AuditSink};
use portico::ratelimit::FixedWindowLimiter;
use portico::registry::tracker::Tracker;
use portico::registry::{run_presence_loop, Registry};
use portico::routes::create_router;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    let config = Arc::new(config);

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.rust_log.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("=== Portico gateway starting ===");
    info!("Port: {}", config.port);
    info!("Node: {}", config.node_name);

    // Registry and presence tracking
    let (tracker, presence_events) = Tracker::new(config.node_name.clone());
    let registry = Arc::new(Registry::new(Arc::new(tracker)));
    tokio::spawn(run_presence_loop(registry.clone(), presence_events));

    // Seed the registry from the static routing file, if configured
    if let Some(path) = &config.routes_file {
        match load_seed_routes(Path::new(path)) {
            Ok(seeds) => {
                for (api_id, definition) in seeds {
                    if let Err(e) = registry.add_api(&api_id, definition) {
                        warn!(api_id = %api_id, error = %e, "Skipping seed route");
                    }
                }
                info!(
                    routes_file = %path,
                    apis = registry.list_apis().len(),
                    "Registry seeded from routes file"
                );
            }
            Err(e) => warn!(routes_file = %path, error = %e, "Failed to load routes file"),
        }
    }

    // Token verification
    let verifier: Arc<dyn TokenVerifier> = if config.jwt.secret.is_empty() {
        warn!("JWT_SECRET not set; secured endpoints will reject all requests");
        Arc::new(RejectAllVerifier)
    } else {
        Arc::new(AuthManager::new(&config.jwt)?)
    };

    // Rate limiting and upstream client
    let limiter = Arc::new(FixedWindowLimiter::from_config(&config.security));
    let forwarder = Forwarder::new(config.upstream.timeout_secs);

    // Audit pipeline
    let audit = AuditSink::new(config.kafka.queue_capacity);
    let producer = AuditProducer::new(&config.kafka)?;
    tokio::spawn(audit.clone().run(producer));

    let ctx = Arc::new(AppContext::new(
        config.clone(),
        registry,
        limiter,
        verifier,
        forwarder,
        audit,
    ));

    let app = create_router(ctx);

    let bind_address = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .context("Failed to bind to address")?;
    info!("Portico gateway listening on {}", bind_address);

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
