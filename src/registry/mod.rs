//! Cluster-replicated routing registry.
//!
//! The registry is the per-node authoritative view of API definitions. All
//! mutations — admin operations and presence callbacks alike — are
//! serialized behind one lock, and every mutation republishes a compiled
//! route-table snapshot so the request hot path never waits on
//! reconciliation.

pub mod definition;
pub mod tracker;

use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::{AppError, AppResult};
use crate::matcher::RouteTable;
use definition::ApiDefinition;
use tracker::{PresenceEvent, TrackError, Tracker};

/// Per-node registry of API definitions backed by the cluster tracker.
pub struct Registry {
    tracker: Arc<Tracker>,
    /// Serializes all mutations; presence callbacks and admin calls contend
    /// here, never on the read path
    mutate: Mutex<()>,
    /// Snapshot served to the matcher, rebuilt after every mutation
    routes: RwLock<Arc<RouteTable>>,
}

impl Registry {
    pub fn new(tracker: Arc<Tracker>) -> Self {
        Self {
            tracker,
            mutate: Mutex::new(()),
            routes: RwLock::new(Arc::new(RouteTable::default())),
        }
    }

    pub fn node_name(&self) -> &str {
        self.tracker.node_name()
    }

    /// Current compiled route table (cheap `Arc` clone)
    pub fn route_table(&self) -> Arc<RouteTable> {
        self.routes.read().unwrap().clone()
    }

    /// Snapshot of all local replicas, sorted by api_id
    pub fn list_apis(&self) -> Vec<(String, ApiDefinition)> {
        self.tracker.list_by_node(self.node_name())
    }

    /// Local replica of an API, if this node holds one
    pub fn get_api(&self, api_id: &str) -> Option<ApiDefinition> {
        self.tracker.find_by_node(api_id, self.node_name())
    }

    /// Create a local API definition and announce it to the cluster.
    ///
    /// The stored replica gets `node_name = self`, `ref_number = 0` and a
    /// fresh timestamp regardless of what the caller supplied.
    pub fn add_api(&self, api_id: &str, mut def: ApiDefinition) -> AppResult<ApiDefinition> {
        let _guard = self.mutate.lock().unwrap();

        def.node_name = self.node_name().to_string();
        def.ref_number = 0;
        def.timestamp = Utc::now();
        def.phx_ref = None;

        match self.tracker.track(api_id, def) {
            Ok(_) => {}
            Err(TrackError::AlreadyTracked) => {
                return Err(AppError::AlreadyTracked(api_id.to_string()));
            }
            Err(TrackError::NotTracked) => {
                return Err(AppError::Internal(format!(
                    "track of '{}' reported an untracked replica",
                    api_id
                )));
            }
        }
        self.republish();

        tracing::info!(api_id = %api_id, "API added to registry");
        Ok(self.get_api(api_id).expect("replica tracked above"))
    }

    /// Replace a local API definition, bumping its logical version.
    pub fn update_api(&self, api_id: &str, mut def: ApiDefinition) -> AppResult<ApiDefinition> {
        let _guard = self.mutate.lock().unwrap();

        let local = self
            .get_api(api_id)
            .ok_or_else(|| AppError::NotFound(api_id.to_string()))?;

        def.node_name = self.node_name().to_string();
        def.ref_number = local.ref_number + 1;
        def.timestamp = Utc::now();
        def.phx_ref = None;

        if self.tracker.update(api_id, def).is_err() {
            return Err(AppError::NotFound(api_id.to_string()));
        }
        self.republish();

        tracing::info!(api_id = %api_id, "API updated in registry");
        Ok(self.get_api(api_id).expect("replica updated above"))
    }

    /// Withdraw the local replica of an API.
    pub fn delete_api(&self, api_id: &str) -> AppResult<()> {
        let _guard = self.mutate.lock().unwrap();

        if self.tracker.untrack(api_id).is_none() {
            return Err(AppError::NotFound(api_id.to_string()));
        }
        self.republish();

        tracing::info!(api_id = %api_id, "API deleted from registry");
        Ok(())
    }

    /// Reconcile a join announced anywhere in the cluster.
    ///
    /// Resolution order: missing local replica adopts the announcement;
    /// otherwise the higher `ref_number` wins; at equal versions a strict
    /// majority of structurally equal replicas wins, and an exact half
    /// falls back to the wall-clock tie-break.
    pub fn on_join(&self, api_id: &str, incoming: ApiDefinition) {
        let _guard = self.mutate.lock().unwrap();

        let Some(local) = self.get_api(api_id) else {
            // Bootstrap: adopt the foreign announcement as-is, keeping its
            // ref_number and authoring node
            match self.tracker.track(api_id, incoming) {
                Ok(_) => {
                    tracing::info!(api_id = %api_id, "Adopted API from cluster join");
                    crate::metrics::REGISTRY_JOINS_ACCEPTED.inc();
                    self.republish();
                }
                Err(e) => {
                    tracing::warn!(api_id = %api_id, error = %e, "Failed to adopt joined API");
                }
            }
            return;
        };

        if local.ref_number > incoming.ref_number {
            tracing::debug!(
                api_id = %api_id,
                local_ref = local.ref_number,
                incoming_ref = incoming.ref_number,
                "Join skipped: local replica is newer"
            );
            return;
        }

        let adopt = if local.ref_number < incoming.ref_number {
            true
        } else if local.content_eq(&incoming) {
            false
        } else {
            self.quorum_favors(api_id, &local, &incoming)
        };

        if adopt {
            match self.tracker.update(api_id, incoming) {
                Ok(_) => {
                    tracing::info!(
                        api_id = %api_id,
                        ref_number = local.ref_number,
                        "Local replica updated from cluster join"
                    );
                    crate::metrics::REGISTRY_JOINS_ACCEPTED.inc();
                    self.republish();
                }
                Err(e) => {
                    tracing::warn!(api_id = %api_id, error = %e, "Failed to apply joined API");
                }
            }
        }
    }

    /// Quorum vote for conflicting definitions at the same ref_number.
    ///
    /// Counts how many replicas across the cluster already carry the
    /// incoming definition. Strict majority adopts, strict minority skips,
    /// an exact half defers to the incoming timestamp.
    fn quorum_favors(&self, api_id: &str, local: &ApiDefinition, incoming: &ApiDefinition) -> bool {
        let replicas = self.tracker.find_all(api_id);
        let total = replicas.len();
        let matching = replicas
            .iter()
            .filter(|(_, def)| def.content_eq(incoming))
            .count();

        tracing::debug!(
            api_id = %api_id,
            matching = matching,
            total = total,
            "Resolving equal-ref join by quorum"
        );

        if 2 * matching > total {
            true
        } else if 2 * matching < total {
            false
        } else {
            incoming.timestamp > local.timestamp
        }
    }

    /// Reconcile a leave announced anywhere in the cluster.
    ///
    /// The phx_ref guard keeps stale leaves from removing a replica that
    /// has since been re-announced; a foreign replica that is genuinely
    /// gone from the cluster view takes the local copy with it.
    pub fn on_leave(&self, api_id: &str, departing: ApiDefinition) {
        let _guard = self.mutate.lock().unwrap();

        let Some(local) = self.get_api(api_id) else {
            return;
        };

        let untrack = if departing.node_name == self.node_name() {
            departing.phx_ref == local.phx_ref
        } else {
            let foreign_present = self
                .tracker
                .find_by_node(api_id, &departing.node_name)
                .is_some();
            local.phx_ref == departing.phx_ref || !foreign_present
        };

        if untrack {
            self.tracker.untrack(api_id);
            self.republish();
            tracing::info!(
                api_id = %api_id,
                departing_node = %departing.node_name,
                "Local replica removed after cluster leave"
            );
        } else {
            tracing::debug!(
                api_id = %api_id,
                departing_node = %departing.node_name,
                "Leave skipped: presence token does not match"
            );
        }
    }

    /// Rebuild and publish the matcher snapshot from the local replicas.
    fn republish(&self) {
        let table = RouteTable::compile(self.list_apis());
        *self.routes.write().unwrap() = Arc::new(table);
    }
}

/// Drive registry reconciliation from tracker presence events.
///
/// Callback errors are logged inside the registry and swallowed; each
/// event is an idempotent reconciliation, so the loop never stops on one.
pub async fn run_presence_loop(
    registry: Arc<Registry>,
    mut events: mpsc::UnboundedReceiver<PresenceEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            PresenceEvent::Join { api_id, meta } => registry.on_join(&api_id, meta),
            PresenceEvent::Leave { api_id, meta } => registry.on_leave(&api_id, meta),
        }
    }
    tracing::debug!("Presence event channel closed, reconciliation loop exiting");
}
