//! Upstream dispatch: turn a matched request into a backend call and relay
//! the backend's answer.
//!
//! Method shapes:
//! - GET/HEAD/OPTIONS/DELETE forward without a body, query re-encoded onto
//!   the URL
//! - PUT/PATCH and plain POST forward the parsed parameters as JSON
//! - multipart POST is rebuilt part-by-part, carrying the file with its
//!   original filename and content type
//!
//! A response that declares chunked transfer encoding is streamed through;
//! everything else is relayed in one shot.

use std::time::Duration;

use axum::body::Body;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, HeaderMap, Method};
use axum::response::Response;
use serde_json::Value;

use crate::config::MAX_REQUEST_BODY_SIZE;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::registry::definition::{ApiDefinition, Endpoint};

/// HTTP client forwarding requests to backend services
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(timeout_secs: u64) -> Self {
        // Connection pooling and keep-alive across requests to one backend
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("Failed to create HTTP client");

        Self { client }
    }

    /// Forward a matched request upstream and relay the response.
    ///
    /// Client disconnects drop this future, which cancels the in-flight
    /// upstream call.
    pub async fn dispatch(
        &self,
        api: &ApiDefinition,
        _endpoint: &Endpoint,
        req: Request,
    ) -> AppResult<Response> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(str::to_string);
        let headers = req.headers().clone();

        let mut url = api.proxy.url_for(&path);
        if let Some(query) = &query {
            url = format!("{}?{}", url, query);
        }

        tracing::debug!(method = %method, url = %url, "Forwarding request upstream");

        let timer = metrics::UPSTREAM_LATENCY.start_timer();
        let upstream = if method == Method::GET
            || method == Method::HEAD
            || method == Method::OPTIONS
            || method == Method::DELETE
        {
            self.forward_bodyless(method, &url, &headers).await?
        } else if method == Method::PUT || method == Method::PATCH {
            self.forward_json(method, &url, &headers, req).await?
        } else if method == Method::POST {
            if is_multipart(&headers) {
                self.forward_multipart(&url, &headers, req).await?
            } else {
                self.forward_json(method, &url, &headers, req).await?
            }
        } else {
            timer.stop_and_discard();
            return Err(AppError::MethodUnsupported);
        };
        timer.observe_duration();
        metrics::PROXIED_REQUESTS_TOTAL.inc();

        relay_response(upstream).await
    }

    async fn forward_bodyless(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
    ) -> AppResult<reqwest::Response> {
        let response = self
            .client
            .request(method, url)
            .headers(filter_request_headers(headers))
            .send()
            .await?;
        Ok(response)
    }

    async fn forward_json(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
        req: Request,
    ) -> AppResult<reqwest::Response> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();

        let body = axum::body::to_bytes(req.into_body(), MAX_REQUEST_BODY_SIZE)
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let mut out_headers = filter_request_headers(headers);
        let builder = self.client.request(method, url);

        let builder = if body.is_empty() {
            builder.headers(out_headers)
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            // Form parameters are re-serialized as a JSON object
            let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(&body)
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            let object: serde_json::Map<String, Value> = pairs
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            out_headers.remove(header::CONTENT_TYPE);
            builder.headers(out_headers).json(&Value::Object(object))
        } else {
            // A JSON body already is the serialized parsed parameters;
            // relay it byte-for-byte
            builder.headers(out_headers).body(body.to_vec())
        };

        let response = builder.send().await?;
        Ok(response)
    }

    /// Rebuild a multipart POST for the backend.
    ///
    /// Any part carrying a filename (the conventional `qqfile` upload key
    /// included) is forwarded as the file with its original filename and
    /// content type; other parts are carried as text fields.
    async fn forward_multipart(
        &self,
        url: &str,
        headers: &HeaderMap,
        req: Request,
    ) -> AppResult<reqwest::Response> {
        let mut multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if let Some(file_name) = field.file_name().map(str::to_string) {
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;

                let mut part =
                    reqwest::multipart::Part::bytes(data.to_vec()).file_name(file_name);
                if let Some(content_type) = content_type {
                    part = part
                        .mime_str(&content_type)
                        .map_err(|e| AppError::BadRequest(e.to_string()))?;
                }
                form = form.part(name, part);
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                form = form.text(name, text);
            }
        }

        let mut out_headers = filter_request_headers(headers);
        // reqwest supplies the multipart content type with its own boundary
        out_headers.remove(header::CONTENT_TYPE);

        let response = self
            .client
            .post(url)
            .headers(out_headers)
            .multipart(form)
            .send()
            .await?;
        Ok(response)
    }
}

/// Relay an upstream response to the client.
///
/// When the upstream declares chunked transfer encoding the body is
/// streamed through; otherwise it is buffered and sent in one shot with
/// the upstream status and headers.
async fn relay_response(upstream: reqwest::Response) -> AppResult<Response> {
    let status = upstream.status();
    let headers = upstream.headers().clone();
    let chunked = transfer_encoding_is_chunked(&headers);

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        if name == header::TRANSFER_ENCODING || name == header::CONNECTION {
            continue;
        }
        if chunked && name == header::CONTENT_LENGTH {
            continue;
        }
        builder = builder.header(name, value);
    }

    let body = if chunked {
        Body::from_stream(upstream.bytes_stream())
    } else {
        Body::from(upstream.bytes().await.map_err(AppError::from)?)
    };

    builder
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// Whether the upstream declared chunked transfer encoding.
///
/// A case-insensitive substring check: `Transfer-Encoding: gzip, chunked`
/// counts.
fn transfer_encoding_is_chunked(headers: &HeaderMap) -> bool {
    headers.get_all(header::TRANSFER_ENCODING).iter().any(|v| {
        v.to_str()
            .map(|s| s.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    })
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Copy request headers for the upstream call.
///
/// Host is the backend's to set; length and framing are recomputed by the
/// client.
fn filter_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::TRANSFER_ENCODING
        {
            continue;
        }
        out.insert(name, value.clone());
    }
    out
}
