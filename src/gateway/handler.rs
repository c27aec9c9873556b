//! The proxy pipeline: match, gate, forward, audit.
//!
//! This is the catch-all handler behind every route the management API
//! does not own. HTTP framing stays out here; the matcher and forwarder
//! only see the pieces they need.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;

use crate::auth::collect_tokens;
use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::kafka::AuditRecord;
use crate::metrics;
use crate::ratelimit::Passage;
use crate::registry::definition::{ApiDefinition, Endpoint};
use crate::utils::{extract_client_ip, log_safe_id};

/// Handle one proxied request end to end.
pub async fn proxy_request(
    State(ctx): State<Arc<AppContext>>,
    req: Request,
) -> AppResult<Response> {
    // The table is a published snapshot; matching never waits on
    // registry reconciliation
    let table = ctx.registry.route_table();
    let (api_id, api, endpoint) = match table.find(req.method(), req.uri().path()) {
        Some((api_id, api, endpoint)) => (api_id.to_string(), api.clone(), endpoint.clone()),
        None => return Err(AppError::NoRoute),
    };

    let client_ip = extract_client_ip(req.headers(), None);

    // Rate-limit gate, keyed by backend and source IP
    if let Passage::Denied = ctx
        .limiter
        .request_passage(&api.proxy.authority(), &client_ip)
    {
        metrics::RATE_LIMITED_TOTAL.inc();
        return Err(AppError::RateLimited);
    }

    // Auth gate: any verifying token passes
    let token_subject = authorize(&ctx, &api, &endpoint, &req)?;

    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let response = ctx.forwarder.dispatch(&api, &endpoint, req).await?;

    // Only authenticated traffic is audited
    if let Some(subject) = token_subject {
        ctx.audit.publish(AuditRecord::new(
            api_id,
            endpoint.id.clone(),
            method,
            path,
            client_ip,
            Some(subject),
        ));
    }

    Ok(response)
}

/// Run the auth gate for a matched endpoint.
///
/// Returns the verified token subject for secured endpoints, `None` for
/// open ones.
fn authorize(
    ctx: &AppContext,
    api: &ApiDefinition,
    endpoint: &Endpoint,
    req: &Request,
) -> AppResult<Option<String>> {
    if !api.requires_auth(endpoint) {
        return Ok(None);
    }

    let tokens = collect_tokens(&api.auth, req.headers(), req.uri().query());
    let claims = tokens
        .iter()
        .find_map(|token| ctx.verifier.verify_token(token).ok());

    match claims {
        Some(claims) => {
            tracing::debug!(
                subject_hash = %log_safe_id(&claims.sub, &ctx.config.security.log_hash_salt),
                path = %req.uri().path(),
                "Token verified"
            );
            Ok(Some(claims.sub))
        }
        None => {
            metrics::AUTH_REJECTED_TOTAL.inc();
            tracing::debug!(
                path = %req.uri().path(),
                candidates = tokens.len(),
                "No presented token verified"
            );
            Err(AppError::Unauthenticated)
        }
    }
}
