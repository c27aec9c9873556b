use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version label holding the endpoints served by the matcher.
pub const DEFAULT_VERSION: &str = "default";

/// HTTP methods an endpoint can declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Compare against a wire-level request method
    pub fn matches(&self, method: &axum::http::Method) -> bool {
        self.as_str() == method.as_str()
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            "OPTIONS" => Ok(HttpMethod::Options),
            other => Err(format!("unknown HTTP method: {}", other)),
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an API authenticates its callers
///
/// A definition without an explicit `auth_type` is treated as open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Jwt,
}

/// Where candidate tokens are collected from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthOptions {
    /// Request header carrying the token
    pub header_name: String,
    /// Query parameter carrying the token (values are whitespace-split)
    pub query_name: String,
    pub use_header: bool,
    pub use_query: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            header_name: "authorization".to_string(),
            query_name: "token".to_string(),
            use_header: true,
            use_query: true,
        }
    }
}

/// Upstream location of the backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySpec {
    /// Literal backend host, or the name of an environment variable whose
    /// value gives the host when `use_env` is set
    pub target_url: String,
    pub port: u16,
    #[serde(default)]
    pub use_env: bool,
}

impl ProxySpec {
    /// Resolve the backend host, falling back to localhost when the
    /// referenced environment variable is unset
    pub fn resolve_host(&self) -> String {
        if self.use_env {
            std::env::var(&self.target_url).unwrap_or_else(|_| "localhost".to_string())
        } else {
            self.target_url.clone()
        }
    }

    /// Resolved `host:port` pair, used as the rate-limit key
    pub fn authority(&self) -> String {
        format!("{}:{}", self.resolve_host(), self.port)
    }

    /// Full upstream URL for a request path
    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}{}", self.authority(), path)
    }
}

/// A single routable operation of an API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub method: HttpMethod,
    /// Path pattern; `{id}` segments match any single path segment
    pub path: String,
    /// Endpoints marked not secured skip the auth gate even on a JWT API
    #[serde(default)]
    pub not_secured: bool,
}

/// Endpoints published under one version label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionData {
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One node's copy of a service routing record.
///
/// The content fields describe the service; `ref_number`, `timestamp`,
/// `node_name` and `phx_ref` are replication metadata. `ref_number` is the
/// cluster-wide logical version; `timestamp` is only a tie-break;
/// `node_name` records the authoring node; `phx_ref` is the presence token
/// stamped by the tracker when the replica is announced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub name: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default)]
    pub auth: AuthOptions,
    pub proxy: ProxySpec,
    #[serde(default)]
    pub versioned: bool,
    #[serde(default)]
    pub version_data: HashMap<String, VersionData>,
    #[serde(default)]
    pub ref_number: i64,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub node_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phx_ref: Option<String>,
}

impl ApiDefinition {
    /// Structural equality over content and logical version, ignoring the
    /// per-replica metadata (`timestamp`, `node_name`, `phx_ref`).
    ///
    /// This is the comparison the quorum rule votes with: two replicas
    /// "carry the same definition" when everything a client can observe
    /// is identical.
    pub fn content_eq(&self, other: &ApiDefinition) -> bool {
        self.name == other.name
            && self.auth_type == other.auth_type
            && self.auth == other.auth
            && self.proxy == other.proxy
            && self.versioned == other.versioned
            && self.version_data == other.version_data
            && self.ref_number == other.ref_number
    }

    /// Endpoints of the default version, which is what the matcher serves
    pub fn default_endpoints(&self) -> &[Endpoint] {
        self.version_data
            .get(DEFAULT_VERSION)
            .map(|v| v.endpoints.as_slice())
            .unwrap_or(&[])
    }

    /// Whether a given endpoint requires a verified token
    pub fn requires_auth(&self, endpoint: &Endpoint) -> bool {
        self.auth_type == AuthType::Jwt && !endpoint.not_secured
    }

    /// Build a definition with a single default-version endpoint list
    pub fn with_endpoints(
        name: impl Into<String>,
        proxy: ProxySpec,
        auth_type: AuthType,
        endpoints: Vec<Endpoint>,
    ) -> Self {
        let mut version_data = HashMap::new();
        version_data.insert(DEFAULT_VERSION.to_string(), VersionData { endpoints });

        Self {
            name: name.into(),
            auth_type,
            auth: AuthOptions::default(),
            proxy,
            versioned: false,
            version_data,
            ref_number: 0,
            timestamp: Utc::now(),
            node_name: String::new(),
            phx_ref: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> ApiDefinition {
        ApiDefinition::with_endpoints(
            "movies",
            ProxySpec {
                target_url: "SVC_MOVIES".to_string(),
                port: 8081,
                use_env: true,
            },
            AuthType::Jwt,
            vec![Endpoint {
                id: "GET /myapi/movies".to_string(),
                method: HttpMethod::Get,
                path: "/myapi/movies".to_string(),
                not_secured: false,
            }],
        )
    }

    #[test]
    fn test_content_eq_ignores_replica_metadata() {
        let a = sample_def();
        let mut b = a.clone();
        b.node_name = "node2".to_string();
        b.phx_ref = Some("ref-xyz".to_string());
        b.timestamp = Utc::now() + chrono::Duration::minutes(5);

        assert!(a.content_eq(&b));
    }

    #[test]
    fn test_content_eq_detects_content_change() {
        let a = sample_def();
        let mut b = a.clone();
        b.name = "movies-v2".to_string();
        assert!(!a.content_eq(&b));

        let mut c = a.clone();
        c.ref_number += 1;
        assert!(!a.content_eq(&c));
    }

    #[test]
    fn test_missing_auth_type_deserializes_as_none() {
        let json = r#"{
            "name": "open-api",
            "proxy": { "target_url": "localhost", "port": 9000 }
        }"#;
        let def: ApiDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.auth_type, AuthType::None);
        assert!(def.default_endpoints().is_empty());
    }

    #[test]
    fn test_proxy_env_resolution_falls_back_to_localhost() {
        let proxy = ProxySpec {
            target_url: "PORTICO_TEST_UNSET_HOST_VAR".to_string(),
            port: 4000,
            use_env: true,
        };
        assert_eq!(proxy.authority(), "localhost:4000");

        let literal = ProxySpec {
            target_url: "backend.internal".to_string(),
            port: 4000,
            use_env: false,
        };
        assert_eq!(literal.url_for("/users"), "http://backend.internal:4000/users");
    }

    #[test]
    fn test_method_parse_and_match() {
        let m: HttpMethod = "delete".parse().unwrap();
        assert_eq!(m, HttpMethod::Delete);
        assert!(m.matches(&axum::http::Method::DELETE));
        assert!(!m.matches(&axum::http::Method::GET));
        assert!("TRACE".parse::<HttpMethod>().is_err());
    }
}
