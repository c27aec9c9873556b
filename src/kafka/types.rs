use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Audit event for one authenticated forwarded request.
///
/// Serialized to JSON and published to the audit topic. The partition key
/// is the `api_id`, keeping one API's trail ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub api_id: String,
    pub endpoint_id: String,
    /// HTTP method of the forwarded request
    pub method: String,
    /// Request path as received by the gateway
    pub path: String,
    pub source_ip: String,
    /// Event timestamp (ISO8601)
    pub timestamp: String,
    /// Subject claim of the verified token, when one was presented
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_subject: Option<String>,
}

impl AuditRecord {
    pub fn new(
        api_id: impl Into<String>,
        endpoint_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        source_ip: impl Into<String>,
        token_subject: Option<String>,
    ) -> Self {
        Self {
            api_id: api_id.into(),
            endpoint_id: endpoint_id.into(),
            method: method.into(),
            path: path.into(),
            source_ip: source_ip.into(),
            timestamp: Utc::now().to_rfc3339(),
            token_subject,
        }
    }
}
