use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, IntCounter, TextEncoder, opts, register_histogram, register_int_counter,
};

pub static PROXIED_REQUESTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_proxied_requests_total",
        "Total number of requests forwarded upstream"
    ))
    .unwrap()
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_rate_limited_total",
        "Total number of requests denied by the rate-limit gate"
    ))
    .unwrap()
});

pub static AUTH_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_auth_rejected_total",
        "Total number of requests rejected by the auth gate"
    ))
    .unwrap()
});

pub static REGISTRY_JOINS_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_registry_joins_accepted_total",
        "Cluster joins that changed the local registry view"
    ))
    .unwrap()
});

pub static UPSTREAM_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "portico_upstream_latency_seconds",
        "Histogram of upstream round-trip times"
    )
    .unwrap()
});

pub static AUDIT_PUBLISH_SUCCESS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_audit_publish_success_total",
        "Audit events successfully written to Kafka"
    ))
    .unwrap()
});

pub static AUDIT_PUBLISH_FAILURE: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_audit_publish_failure_total",
        "Audit events that failed to reach Kafka"
    ))
    .unwrap()
});

pub static AUDIT_DROPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(opts!(
        "portico_audit_dropped_total",
        "Audit events evicted from the full in-process queue"
    ))
    .unwrap()
});

/// Force registration of all metric statics.
///
/// Lazy statics only register on first touch; calling this at router
/// construction makes every series visible on /metrics from the start.
pub fn init() {
    Lazy::force(&PROXIED_REQUESTS_TOTAL);
    Lazy::force(&RATE_LIMITED_TOTAL);
    Lazy::force(&AUTH_REJECTED_TOTAL);
    Lazy::force(&REGISTRY_JOINS_ACCEPTED);
    Lazy::force(&UPSTREAM_LATENCY);
    Lazy::force(&AUDIT_PUBLISH_SUCCESS);
    Lazy::force(&AUDIT_PUBLISH_FAILURE);
    Lazy::force(&AUDIT_DROPPED_TOTAL);
}

pub fn gather_metrics() -> Result<String> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;

    Ok(String::from_utf8(buffer)?)
}
