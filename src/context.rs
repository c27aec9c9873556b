use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::gateway::Forwarder;
use crate::kafka::AuditSink;
use crate::ratelimit::RateLimiter;
use crate::registry::Registry;

/// Shared application context handed to every handler.
///
/// The limiter and verifier sit behind traits so tests (and deployments
/// with different policies) can substitute them without touching the
/// pipeline.
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub limiter: Arc<dyn RateLimiter>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub forwarder: Forwarder,
    pub audit: AuditSink,
}

impl AppContext {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        limiter: Arc<dyn RateLimiter>,
        verifier: Arc<dyn TokenVerifier>,
        forwarder: Forwarder,
        audit: AuditSink,
    ) -> Self {
        Self {
            config,
            registry,
            limiter,
            verifier,
            forwarder,
            audit,
        }
    }
}
