use anyhow::{Context, Result};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // token subject
    pub exp: i64,    // Expiration time
    #[serde(default)]
    pub iat: i64, // Issued at
    #[serde(default)]
    pub iss: Option<String>, // Issuer
}

/// Token verification contract consumed by the auth gate.
///
/// The production implementation verifies JWTs; tests substitute a stub.
pub trait TokenVerifier: Send + Sync {
    fn verify_token(&self, token: &str) -> Result<Claims>;
}

/// HS256 JWT verifier
pub struct AuthManager {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl AuthManager {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        if config.secret.is_empty() {
            anyhow::bail!(
                "JWT_SECRET is required to serve secured routes. \
                 Generate one with: openssl rand -base64 32"
            );
        }

        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer.clone()]);
        }

        Ok(Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
        })
    }
}

impl TokenVerifier for AuthManager {
    fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .context("Failed to verify HS256 token")?;
        Ok(token_data.claims)
    }
}

/// Verifier used when no JWT secret is configured: every token fails, so
/// secured endpoints answer 401 instead of silently opening up.
pub struct RejectAllVerifier;

impl TokenVerifier for RejectAllVerifier {
    fn verify_token(&self, _token: &str) -> Result<Claims> {
        anyhow::bail!("token verification is not configured")
    }
}

/// Collect candidate tokens for an endpoint per its auth options.
///
/// Header values have an optional `Bearer ` prefix stripped; the query
/// parameter's values are whitespace-split. Any single verifying token
/// passes the gate.
pub fn collect_tokens(
    options: &crate::registry::definition::AuthOptions,
    headers: &axum::http::HeaderMap,
    query: Option<&str>,
) -> Vec<String> {
    let mut tokens = Vec::new();

    if options.use_header {
        for value in headers.get_all(options.header_name.as_str()) {
            if let Ok(raw) = value.to_str() {
                let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
                if !token.is_empty() {
                    tokens.push(token.to_string());
                }
            }
        }
    }

    if options.use_query {
        if let Some(query) = query {
            for (key, value) in url_decoded_pairs(query) {
                if key == options.query_name {
                    tokens.extend(
                        value
                            .split_whitespace()
                            .map(|t| t.to_string())
                            .filter(|t| !t.is_empty()),
                    );
                }
            }
        }
    }

    tokens
}

fn url_decoded_pairs(query: &str) -> Vec<(String, String)> {
    serde_urlencoded::from_str::<Vec<(String, String)>>(query).unwrap_or_default()
}
