use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::registry::definition::{
    ApiDefinition, AuthType, Endpoint, HttpMethod, ProxySpec, VersionData, DEFAULT_VERSION,
};

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;

// Upstream requests carry a total timeout; clients needing longer streams
// raise it via UPSTREAM_TIMEOUT_SECS
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

const DEFAULT_RATE_LIMIT_MAX_REQUESTS: u32 = 1000;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

const DEFAULT_AUDIT_QUEUE_CAPACITY: usize = 1024;

/// Maximum size of a request body the gateway will buffer for forwarding
pub const MAX_REQUEST_BODY_SIZE: usize = 2 * 1024 * 1024; // 2 MB

// ============================================================================
// Configuration Structures
// ============================================================================

/// Upstream client configuration
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Total timeout for an upstream round trip (seconds)
    pub timeout_secs: u64,
}

/// Rate-limit policy for the proxy surface
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    pub rate_limit_enabled: bool,
    /// Requests allowed per (backend, client IP) pair per window
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_secs: u64,
    /// Salt for hashed identifiers in log lines
    pub log_hash_salt: String,
}

/// JWT verification settings
#[derive(Clone, Debug)]
pub struct JwtConfig {
    /// HS256 shared secret
    pub secret: String,
    /// Expected issuer; unset skips the issuer check
    pub issuer: Option<String>,
}

/// Kafka configuration for the audit sink
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Whether the audit sink publishes to Kafka (false = log-only mode)
    pub enabled: bool,
    /// Comma-separated list of brokers, e.g. "kafka1:9092,kafka2:9092"
    pub hosts: String,
    /// Topic receiving audit events
    pub topic: String,
    /// Capacity of the in-process audit queue; overflow evicts the oldest
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    /// Identity of this node in the cluster presence map
    pub node_name: String,
    /// Optional JSON file seeding the registry at boot
    pub routes_file: Option<String>,
    pub rust_log: String,
    pub upstream: UpstreamConfig,
    pub security: SecurityConfig,
    pub jwt: JwtConfig,
    pub kafka: KafkaConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            node_name: std::env::var("NODE_NAME").unwrap_or_else(|_| {
                format!("portico-{}", uuid::Uuid::new_v4().simple())
            }),
            routes_file: std::env::var("ROUTES_FILE").ok(),
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            upstream: UpstreamConfig {
                timeout_secs: std::env::var("UPSTREAM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS),
            },
            security: SecurityConfig {
                rate_limit_enabled: std::env::var("RATE_LIMIT_ENABLED")
                    .unwrap_or_else(|_| "true".to_string())
                    .parse()
                    .unwrap_or(true),
                rate_limit_max_requests: std::env::var("RATE_LIMIT_MAX_REQUESTS")
                    .ok()
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(DEFAULT_RATE_LIMIT_MAX_REQUESTS),
                rate_limit_window_secs: std::env::var("RATE_LIMIT_WINDOW_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECS),
                log_hash_salt: std::env::var("LOG_HASH_SALT")
                    .unwrap_or_else(|_| "portico".to_string()),
            },
            jwt: JwtConfig {
                secret: {
                    let secret = std::env::var("JWT_SECRET").unwrap_or_default();
                    if !secret.is_empty() && secret.len() < 32 {
                        anyhow::bail!(
                            "JWT_SECRET must be at least 32 characters long. \
                             Generate one with: openssl rand -base64 32"
                        );
                    }
                    secret
                },
                issuer: std::env::var("JWT_ISSUER").ok(),
            },
            kafka: {
                let hosts = std::env::var("KAFKA_HOSTS").unwrap_or_default();
                KafkaConfig {
                    enabled: !hosts.is_empty(),
                    hosts,
                    topic: std::env::var("KAFKA_TOPIC")
                        .unwrap_or_else(|_| "portico-audit".to_string()),
                    queue_capacity: std::env::var("AUDIT_QUEUE_CAPACITY")
                        .ok()
                        .and_then(|c| c.parse().ok())
                        .unwrap_or(DEFAULT_AUDIT_QUEUE_CAPACITY),
                }
            },
        })
    }
}

// ============================================================================
// Static routing seed
// ============================================================================

/// One record of the static routing seed file.
///
/// `host` names an environment variable whose value (or `localhost`) gives
/// the backend host.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedRoute {
    pub path: String,
    pub method: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub auth: bool,
}

/// Load and group the seed file into API definitions.
///
/// Records sharing `(host, port)` collapse into one API; per-record `auth`
/// becomes the endpoint's `not_secured` flag. Records with an unknown
/// method are logged and skipped so one bad line cannot block boot.
pub fn load_seed_routes(path: &Path) -> Result<Vec<(String, ApiDefinition)>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read routes file {}", path.display()))?;
    let records: Vec<SeedRoute> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse routes file {}", path.display()))?;

    Ok(group_seed_routes(records))
}

fn group_seed_routes(records: Vec<SeedRoute>) -> Vec<(String, ApiDefinition)> {
    let mut groups: BTreeMap<(String, u16), Vec<SeedRoute>> = BTreeMap::new();
    for record in records {
        groups
            .entry((record.host.clone(), record.port))
            .or_default()
            .push(record);
    }

    groups
        .into_iter()
        .map(|((host, port), records)| {
            let api_id = format!("{}-{}", host.to_lowercase().replace('_', "-"), port);
            let any_auth = records.iter().any(|r| r.auth);

            let endpoints: Vec<Endpoint> = records
                .into_iter()
                .filter_map(|record| {
                    let method: HttpMethod = match record.method.parse() {
                        Ok(m) => m,
                        Err(e) => {
                            tracing::warn!(
                                path = %record.path,
                                method = %record.method,
                                error = %e,
                                "Skipping seed route with unknown method"
                            );
                            return None;
                        }
                    };
                    Some(Endpoint {
                        id: format!("{} {}", method, record.path),
                        method,
                        path: record.path,
                        not_secured: !record.auth,
                    })
                })
                .collect();

            let mut version_data = std::collections::HashMap::new();
            version_data.insert(DEFAULT_VERSION.to_string(), VersionData { endpoints });

            let def = ApiDefinition {
                name: api_id.clone(),
                auth_type: if any_auth { AuthType::Jwt } else { AuthType::None },
                auth: Default::default(),
                proxy: ProxySpec {
                    target_url: host,
                    port,
                    use_env: true,
                },
                versioned: false,
                version_data,
                ref_number: 0,
                timestamp: chrono::Utc::now(),
                node_name: String::new(),
                phx_ref: None,
            };

            (api_id, def)
        })
        .collect()
}
