use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use super::definition::ApiDefinition;

/// Presence change observed somewhere in the cluster.
///
/// Events are delivered at-least-once to the registry; the registry's
/// reconciliation is idempotent, so duplicates are harmless.
#[derive(Debug, Clone)]
pub enum PresenceEvent {
    Join { api_id: String, meta: ApiDefinition },
    Leave { api_id: String, meta: ApiDefinition },
}

/// Errors from presence operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TrackError {
    #[error("replica is already tracked on this node")]
    AlreadyTracked,
    #[error("replica is not tracked on this node")]
    NotTracked,
}

/// Cluster presence map: `{api_id, node} → definition`.
///
/// The tracker owns presence; the registry never mutates it except through
/// `track` / `untrack` / `update`. Every presence change, local or applied
/// from a peer, is fanned out as a [`PresenceEvent`] on the channel handed
/// back by [`Tracker::new`]. A cluster transport feeds peer changes in via
/// `apply_remote_join` / `apply_remote_leave`.
pub struct Tracker {
    node_name: String,
    /// api_id → node → definition (with phx_ref stamped)
    state: Mutex<HashMap<String, HashMap<String, ApiDefinition>>>,
    events: mpsc::UnboundedSender<PresenceEvent>,
}

impl Tracker {
    /// Create a tracker and the receiving end of its presence events
    pub fn new(node_name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<PresenceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                node_name: node_name.into(),
                state: Mutex::new(HashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Opaque presence token for a newly announced replica
    fn new_ref() -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn emit(&self, event: PresenceEvent) {
        // The receiver only goes away on shutdown; a lost event is moot then.
        let _ = self.events.send(event);
    }

    /// Announce a local replica.
    ///
    /// Fails if `(api_id, self)` is already tracked. The stored definition
    /// keeps the caller's `node_name` and `ref_number` (a replica adopted
    /// from a peer keeps its author) but always gets a fresh `phx_ref`.
    pub fn track(&self, api_id: &str, mut meta: ApiDefinition) -> Result<String, TrackError> {
        let phx_ref = Self::new_ref();
        {
            let mut state = self.state.lock().unwrap();
            let replicas = state.entry(api_id.to_string()).or_default();
            if replicas.contains_key(&self.node_name) {
                return Err(TrackError::AlreadyTracked);
            }
            meta.phx_ref = Some(phx_ref.clone());
            replicas.insert(self.node_name.clone(), meta.clone());
        }

        tracing::debug!(api_id = %api_id, phx_ref = %phx_ref, "Tracked local replica");
        self.emit(PresenceEvent::Join {
            api_id: api_id.to_string(),
            meta,
        });
        Ok(phx_ref)
    }

    /// Withdraw the local replica, if any
    pub fn untrack(&self, api_id: &str) -> Option<ApiDefinition> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let replicas = state.get_mut(api_id)?;
            let removed = replicas.remove(&self.node_name);
            let now_empty = replicas.is_empty();
            if now_empty {
                state.remove(api_id);
            }
            removed
        }?;

        tracing::debug!(api_id = %api_id, "Untracked local replica");
        self.emit(PresenceEvent::Leave {
            api_id: api_id.to_string(),
            meta: removed.clone(),
        });
        Some(removed)
    }

    /// Replace the metadata of the local replica, stamping a fresh phx_ref
    pub fn update(&self, api_id: &str, mut meta: ApiDefinition) -> Result<String, TrackError> {
        let phx_ref = Self::new_ref();
        {
            let mut state = self.state.lock().unwrap();
            let replicas = state.get_mut(api_id).ok_or(TrackError::NotTracked)?;
            if !replicas.contains_key(&self.node_name) {
                return Err(TrackError::NotTracked);
            }
            meta.phx_ref = Some(phx_ref.clone());
            replicas.insert(self.node_name.clone(), meta.clone());
        }

        tracing::debug!(api_id = %api_id, phx_ref = %phx_ref, "Updated local replica");
        self.emit(PresenceEvent::Join {
            api_id: api_id.to_string(),
            meta,
        });
        Ok(phx_ref)
    }

    /// All replicas held for a node, sorted by api_id for deterministic
    /// iteration downstream
    pub fn list_by_node(&self, node: &str) -> Vec<(String, ApiDefinition)> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<(String, ApiDefinition)> = state
            .iter()
            .filter_map(|(api_id, replicas)| {
                replicas.get(node).map(|meta| (api_id.clone(), meta.clone()))
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn find_by_node(&self, api_id: &str, node: &str) -> Option<ApiDefinition> {
        let state = self.state.lock().unwrap();
        state.get(api_id).and_then(|replicas| replicas.get(node)).cloned()
    }

    /// Every replica of an API across the cluster
    pub fn find_all(&self, api_id: &str) -> Vec<(String, ApiDefinition)> {
        let state = self.state.lock().unwrap();
        state
            .get(api_id)
            .map(|replicas| {
                replicas
                    .iter()
                    .map(|(node, meta)| (node.clone(), meta.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Apply a join observed on a peer node and fan it out
    pub fn apply_remote_join(&self, node: &str, api_id: &str, meta: ApiDefinition) {
        {
            let mut state = self.state.lock().unwrap();
            state
                .entry(api_id.to_string())
                .or_default()
                .insert(node.to_string(), meta.clone());
        }

        tracing::debug!(api_id = %api_id, node = %node, "Applied remote join");
        self.emit(PresenceEvent::Join {
            api_id: api_id.to_string(),
            meta,
        });
    }

    /// Apply a leave observed on a peer node and fan it out.
    ///
    /// The map entry is only removed when its phx_ref matches the leaving
    /// replica's; a stale leave for a since-re-announced replica must not
    /// clobber the newer presence. The event is emitted either way so the
    /// registry can run its own guards.
    pub fn apply_remote_leave(&self, node: &str, api_id: &str, meta: ApiDefinition) {
        {
            let mut state = self.state.lock().unwrap();
            let now_empty = if let Some(replicas) = state.get_mut(api_id) {
                let current_matches = replicas
                    .get(node)
                    .map(|held| held.phx_ref == meta.phx_ref)
                    .unwrap_or(false);
                if current_matches {
                    replicas.remove(node);
                }
                replicas.is_empty()
            } else {
                false
            };
            if now_empty {
                state.remove(api_id);
            }
        }

        tracing::debug!(api_id = %api_id, node = %node, "Applied remote leave");
        self.emit(PresenceEvent::Leave {
            api_id: api_id.to_string(),
            meta,
        });
    }
}
