//! The build state machine: cache-backed status tracking per flow id.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::cache::{CacheError, CacheStore};

use super::record::{BuildRecord, BuildStatus, GRAPH_DATA_FIELD, STATUS_FIELD, flow_data_key};

/// Outcome of submitting a graph description for building.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InitOutcome {
    /// Record written at `STARTED`.
    Accepted,
    /// A build is already in flight; the existing handle stands. No state
    /// was mutated.
    AlreadyBuilding,
}

/// Decision of the atomic check-and-begin gate.
///
/// Exactly one of two simultaneous `begin` calls for the same flow id
/// observes [`BuildGate::Proceed`]; the other exits re-entrant with
/// [`BuildGate::AlreadyBuilding`].
#[derive(Debug, PartialEq, Eq)]
pub enum BuildGate {
    /// No build record exists for this flow id.
    Missing,
    /// A build is already in flight.
    AlreadyBuilding,
    /// The record exists but its graph description is empty.
    EmptyGraph,
    /// Preconditions held; the record is now `IN_PROGRESS`.
    Proceed {
        /// The stored graph description, byte-identical to what was
        /// submitted.
        graph_data: String,
    },
}

/// Owns the lifecycle of flow build records in the cache store.
///
/// Every mutation refreshes the record's TTL so a slow build does not expire
/// mid-flight under normal conditions. A build exceeding the whole TTL can
/// still lose its record; that race is accepted, not defended against.
pub struct BuildStateMachine {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    // Per-flow async locks backing the check-and-transition guarantees.
    gates: Mutex<FxHashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl BuildStateMachine {
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            gates: Mutex::new(FxHashMap::default()),
        }
    }

    fn gate(&self, flow_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().expect("gate map poisoned");
        gates.entry(flow_id.to_string()).or_default().clone()
    }

    async fn read_status(&self, key: &str) -> Result<Option<BuildStatus>, CacheError> {
        Ok(self
            .store
            .hash_get(key, STATUS_FIELD)
            .await?
            .as_deref()
            .and_then(BuildStatus::parse))
    }

    /// Submit a graph description, entering the machine at `STARTED`.
    ///
    /// Idempotent against an in-flight build: if the current status is
    /// `IN_PROGRESS` the existing record is left untouched and
    /// [`InitOutcome::AlreadyBuilding`] is returned.
    pub async fn initialize(
        &self,
        flow_id: &str,
        graph_data: &str,
    ) -> Result<InitOutcome, CacheError> {
        let gate = self.gate(flow_id);
        let _held = gate.lock().await;
        let key = flow_data_key(flow_id);
        if self.read_status(&key).await? == Some(BuildStatus::InProgress) {
            tracing::debug!(flow_id, "build already in progress, keeping existing record");
            return Ok(InitOutcome::AlreadyBuilding);
        }
        self.store
            .hash_set_multi(
                &key,
                &[
                    (GRAPH_DATA_FIELD, graph_data),
                    (STATUS_FIELD, BuildStatus::Started.as_str()),
                ],
                self.ttl,
            )
            .await?;
        Ok(InitOutcome::Accepted)
    }

    /// Current status; `None` for an absent (or expired) record.
    pub async fn status(&self, flow_id: &str) -> Result<Option<BuildStatus>, CacheError> {
        self.read_status(&flow_data_key(flow_id)).await
    }

    /// Whether the flow's artifact is built. Absence reports `false`, never
    /// an error.
    pub async fn is_built(&self, flow_id: &str) -> Result<bool, CacheError> {
        Ok(self.status(flow_id).await? == Some(BuildStatus::Success))
    }

    /// Full record, for callers that need the stored graph description.
    pub async fn read_record(&self, flow_id: &str) -> Result<Option<BuildRecord>, CacheError> {
        let key = flow_data_key(flow_id);
        let Some(status) = self.read_status(&key).await? else {
            return Ok(None);
        };
        let graph_data = self
            .store
            .hash_get(&key, GRAPH_DATA_FIELD)
            .await?
            .unwrap_or_default();
        Ok(Some(BuildRecord { graph_data, status }))
    }

    /// The atomic decision point of a build request.
    ///
    /// Checks, in order: record exists, record not already `IN_PROGRESS`,
    /// graph description present and non-empty. On the first violation the
    /// corresponding gate variant is returned with no mutation; otherwise the
    /// record transitions to `IN_PROGRESS` (TTL refreshed) before the lock is
    /// released.
    pub async fn begin(&self, flow_id: &str) -> Result<BuildGate, CacheError> {
        let gate = self.gate(flow_id);
        let _held = gate.lock().await;
        let key = flow_data_key(flow_id);

        if !self.store.exists(&key).await? {
            return Ok(BuildGate::Missing);
        }
        if self.read_status(&key).await? == Some(BuildStatus::InProgress) {
            return Ok(BuildGate::AlreadyBuilding);
        }
        let graph_data = self
            .store
            .hash_get(&key, GRAPH_DATA_FIELD)
            .await?
            .unwrap_or_default();
        if graph_is_empty(&graph_data) {
            return Ok(BuildGate::EmptyGraph);
        }
        self.store
            .hash_set_field(
                &key,
                STATUS_FIELD,
                BuildStatus::InProgress.as_str(),
                self.ttl,
            )
            .await?;
        Ok(BuildGate::Proceed { graph_data })
    }

    /// Orchestrator-only: record the build as succeeded, refreshing TTL.
    pub async fn mark_success(&self, flow_id: &str) -> Result<(), CacheError> {
        self.mark(flow_id, BuildStatus::Success).await
    }

    /// Orchestrator-only: record the build as failed, refreshing TTL.
    pub async fn mark_failure(&self, flow_id: &str) -> Result<(), CacheError> {
        self.mark(flow_id, BuildStatus::Failure).await
    }

    async fn mark(&self, flow_id: &str, status: BuildStatus) -> Result<(), CacheError> {
        self.store
            .hash_set_field(&flow_data_key(flow_id), STATUS_FIELD, status.as_str(), self.ttl)
            .await
    }
}

/// An empty graph description is anything JSON-falsy: absent, blank, `null`,
/// `{}`, `[]`, `""`, `0`, or `false`.
fn graph_is_empty(raw: &str) -> bool {
    if raw.trim().is_empty() {
        return true;
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => true,
        Ok(Value::Object(map)) => map.is_empty(),
        Ok(Value::Array(items)) => items.is_empty(),
        Ok(Value::String(s)) => s.is_empty(),
        Ok(Value::Bool(b)) => !b,
        Ok(Value::Number(n)) => n.as_f64() == Some(0.0),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;

    fn machine() -> BuildStateMachine {
        BuildStateMachine::new(Arc::new(InMemoryCacheStore::new()), Duration::from_secs(600))
    }

    #[tokio::test]
    async fn initialize_writes_started_record() {
        let state = machine();
        let outcome = state.initialize("f1", r#"{"nodes": [1]}"#).await.unwrap();
        assert_eq!(outcome, InitOutcome::Accepted);
        assert_eq!(state.status("f1").await.unwrap(), Some(BuildStatus::Started));
        assert!(!state.is_built("f1").await.unwrap());
    }

    #[tokio::test]
    async fn absent_record_reports_not_built() {
        let state = machine();
        assert_eq!(state.status("ghost").await.unwrap(), None);
        assert!(!state.is_built("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn begin_transitions_to_in_progress_and_returns_graph() {
        let state = machine();
        state.initialize("f1", r#"{"nodes": [1]}"#).await.unwrap();
        match state.begin("f1").await.unwrap() {
            BuildGate::Proceed { graph_data } => assert_eq!(graph_data, r#"{"nodes": [1]}"#),
            other => panic!("expected Proceed, got {other:?}"),
        }
        assert_eq!(
            state.status("f1").await.unwrap(),
            Some(BuildStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn begin_rejects_missing_record() {
        let state = machine();
        assert_eq!(state.begin("ghost").await.unwrap(), BuildGate::Missing);
    }

    #[tokio::test]
    async fn begin_is_reentrant_while_in_progress() {
        let state = machine();
        state.initialize("f1", r#"{"nodes": [1]}"#).await.unwrap();
        assert!(matches!(
            state.begin("f1").await.unwrap(),
            BuildGate::Proceed { .. }
        ));
        assert_eq!(state.begin("f1").await.unwrap(), BuildGate::AlreadyBuilding);
        // Status untouched by the rejected attempt.
        assert_eq!(
            state.status("f1").await.unwrap(),
            Some(BuildStatus::InProgress)
        );
    }

    #[tokio::test]
    async fn begin_rejects_empty_graph_without_transition() {
        let state = machine();
        state.initialize("f1", "{}").await.unwrap();
        assert_eq!(state.begin("f1").await.unwrap(), BuildGate::EmptyGraph);
        assert_eq!(state.status("f1").await.unwrap(), Some(BuildStatus::Started));
    }

    #[tokio::test]
    async fn initialize_is_idempotent_against_in_flight_build() {
        let state = machine();
        state.initialize("f1", r#"{"nodes": [1]}"#).await.unwrap();
        state.begin("f1").await.unwrap();
        let outcome = state.initialize("f1", r#"{"nodes": [2]}"#).await.unwrap();
        assert_eq!(outcome, InitOutcome::AlreadyBuilding);
        // The in-flight record's graph data was not overwritten.
        let record = state.read_record("f1").await.unwrap().unwrap();
        assert_eq!(record.graph_data, r#"{"nodes": [1]}"#);
    }

    #[tokio::test]
    async fn success_reenters_at_started_on_resubmission() {
        let state = machine();
        state.initialize("f1", r#"{"nodes": [1]}"#).await.unwrap();
        state.begin("f1").await.unwrap();
        state.mark_success("f1").await.unwrap();
        assert!(state.is_built("f1").await.unwrap());

        let outcome = state.initialize("f1", r#"{"nodes": [2]}"#).await.unwrap();
        assert_eq!(outcome, InitOutcome::Accepted);
        assert_eq!(state.status("f1").await.unwrap(), Some(BuildStatus::Started));
    }

    #[test]
    fn empty_graph_detection() {
        assert!(graph_is_empty(""));
        assert!(graph_is_empty("   "));
        assert!(graph_is_empty("null"));
        assert!(graph_is_empty("{}"));
        assert!(graph_is_empty("[]"));
        assert!(graph_is_empty("\"\""));
        assert!(!graph_is_empty(r#"{"nodes": []}"#));
        assert!(!graph_is_empty("not json"));
    }
}
