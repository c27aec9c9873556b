//! Request matching against the local registry view.
//!
//! The route table is compiled whenever the registry view changes; the
//! per-request lookup does no allocation and no locking beyond cloning the
//! published `Arc`.

use axum::http::Method;
use regex::Regex;

use crate::registry::definition::{ApiDefinition, Endpoint};

/// Pre-compiled matching table over the local replicas.
///
/// APIs are held in lexicographic `api_id` order so that overlapping
/// patterns resolve deterministically: the first match wins.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<CompiledApi>,
}

#[derive(Debug)]
struct CompiledApi {
    api_id: String,
    api: ApiDefinition,
    endpoints: Vec<CompiledEndpoint>,
}

#[derive(Debug)]
struct CompiledEndpoint {
    /// Index into the API's default-version endpoint list
    index: usize,
    pattern: Regex,
}

impl RouteTable {
    /// Compile a table from `(api_id, definition)` pairs.
    ///
    /// Endpoints whose path fails to compile are skipped with a warning;
    /// a single bad record must not take the whole table down.
    pub fn compile(mut apis: Vec<(String, ApiDefinition)>) -> Self {
        apis.sort_by(|a, b| a.0.cmp(&b.0));

        let routes = apis
            .into_iter()
            .map(|(api_id, api)| {
                let endpoints = api
                    .default_endpoints()
                    .iter()
                    .enumerate()
                    .filter_map(|(index, endpoint)| match compile_path(&endpoint.path) {
                        Ok(pattern) => Some(CompiledEndpoint { index, pattern }),
                        Err(e) => {
                            tracing::warn!(
                                api_id = %api_id,
                                endpoint_id = %endpoint.id,
                                path = %endpoint.path,
                                error = %e,
                                "Skipping endpoint with uncompilable path"
                            );
                            None
                        }
                    })
                    .collect();

                CompiledApi {
                    api_id,
                    api,
                    endpoints,
                }
            })
            .collect();

        Self { routes }
    }

    /// Find the first API and endpoint matching the request.
    ///
    /// An endpoint matches when the method is identical and the path
    /// pattern, with `{id}` wildcards standing for one segment, matches the
    /// request path anchored at its end.
    pub fn find(&self, method: &Method, path: &str) -> Option<(&str, &ApiDefinition, &Endpoint)> {
        for route in &self.routes {
            for compiled in &route.endpoints {
                let endpoint = &route.api.default_endpoints()[compiled.index];
                if endpoint.method.matches(method) && compiled.pattern.is_match(path) {
                    return Some((&route.api_id, &route.api, endpoint));
                }
            }
        }
        None
    }

    /// `api_id`s in iteration order
    pub fn api_ids(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.api_id.as_str())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Translate an endpoint path pattern into an end-anchored regex.
///
/// Each `{id}` segment becomes `[^/]+`; every other segment is matched
/// literally.
fn compile_path(pattern: &str) -> Result<Regex, regex::Error> {
    let translated: Vec<String> = pattern
        .split('/')
        .map(|segment| {
            if segment == "{id}" {
                "[^/]+".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect();

    Regex::new(&format!("{}$", translated.join("/")))
}
