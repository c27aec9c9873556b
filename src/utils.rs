use std::net::IpAddr;

use sha2::{Digest, Sha256};

/// Creates a truncated, salted hash of an identifier for safe logging.
///
/// Token subjects and similar identifiers never appear verbatim in log
/// lines; they are hashed with the configured salt first.
pub fn log_safe_id(id: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let hash = hasher.finalize();

    hash[..4]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}

/// Derive the client IP for rate limiting and audit events.
///
/// Checks `X-Forwarded-For` (first hop), then `X-Real-IP`, then the direct
/// peer address. In production the reverse proxy is expected to set
/// `X-Forwarded-For` and strip untrusted values.
pub fn extract_client_ip(headers: &axum::http::HeaderMap, direct_ip: Option<IpAddr>) -> String {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded_for.to_str() {
            // X-Forwarded-For can contain a chain: "client, proxy1, proxy2"
            let first = forwarded_str.split(',').next().unwrap_or("").trim();
            if let Ok(ip) = first.parse::<IpAddr>() {
                return ip.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(real_ip_str) = real_ip.to_str() {
            if let Ok(ip) = real_ip_str.trim().parse::<IpAddr>() {
                return ip.to_string();
            }
        }
    }

    if let Some(ip) = direct_ip {
        return ip.to_string();
    }

    "unknown".to_string()
}
