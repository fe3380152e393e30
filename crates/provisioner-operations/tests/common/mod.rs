// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Shared test doubles for executor, queue and runtime tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provisioner_core::model::{ClusterConfig, GcpConfig, KymaConfig};
use provisioner_core::{
    Cluster, Operation, OperationState, OperationType, Session, SessionError, StageName,
};
use provisioner_operations::{
    ExecutorConfig, FailureHandler, RetryPolicy, RuntimeCondition, RuntimeStatusReporter, Stage,
    StageError, StageMap, StageResult,
};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(20);

/// Executor settings with instant retries.
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        default_delay: DEFAULT_DELAY,
        retry: RetryPolicy::fixed(5, Duration::ZERO),
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "provisioner_operations=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn test_cluster(id: &str) -> Cluster {
    Cluster {
        id: id.to_string(),
        tenant: "tenant-1".to_string(),
        cluster_config: ClusterConfig::Gcp(GcpConfig {
            name: format!("cluster-{}", id),
            ..Default::default()
        }),
        kubeconfig: None,
        kyma_config: KymaConfig::default(),
        creation_timestamp: Utc::now(),
        deleted: false,
        sub_account_id: None,
    }
}

pub fn test_operation(
    id: &str,
    operation_type: OperationType,
    stage: StageName,
    cluster_id: &str,
) -> Operation {
    let mut operation = Operation::new(operation_type, cluster_id, "Operation started");
    operation.id = id.to_string();
    operation.stage = stage;
    operation
}

// ============================================================================
// Session
// ============================================================================

/// A persisted write accepted by [`MockSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Transition {
        operation_id: String,
        stage: StageName,
        message: String,
        timestamp: DateTime<Utc>,
    },
    State {
        operation_id: String,
        state: OperationState,
        message: String,
    },
}

#[derive(Default)]
struct SessionState {
    operations: HashMap<String, Operation>,
    clusters: HashMap<String, Cluster>,
    writes: Vec<Write>,
    failing_writes: usize,
    failing_reads: bool,
}

/// In-memory session with the conditional write semantics of the database
/// backends, a log of accepted writes and injectable failures.
#[derive(Default)]
pub struct MockSession {
    state: Mutex<SessionState>,
}

impl MockSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(operation: Operation, cluster: Cluster) -> Arc<Self> {
        let session = Self::new();
        session.put_cluster(cluster);
        session.put_operation(operation);
        Arc::new(session)
    }

    pub fn put_operation(&self, operation: Operation) {
        self.lock().operations.insert(operation.id.clone(), operation);
    }

    pub fn put_cluster(&self, cluster: Cluster) {
        self.lock().clusters.insert(cluster.id.clone(), cluster);
    }

    pub fn operation(&self, id: &str) -> Operation {
        self.lock().operations[id].clone()
    }

    pub fn writes(&self) -> Vec<Write> {
        self.lock().writes.clone()
    }

    pub fn transitions(&self) -> Vec<StageName> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::Transition { stage, .. } => Some(stage),
                Write::State { .. } => None,
            })
            .collect()
    }

    pub fn state_writes(&self) -> Vec<(OperationState, String)> {
        self.writes()
            .into_iter()
            .filter_map(|w| match w {
                Write::State { state, message, .. } => Some((state, message)),
                Write::Transition { .. } => None,
            })
            .collect()
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.lock().failing_writes = n;
    }

    /// Fail every read with a transient error.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().failing_reads = fail;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap()
    }
}

fn transient() -> SessionError {
    SessionError::Io(std::io::Error::other("connection reset by peer"))
}

fn not_in_progress(operation: &Operation) -> SessionError {
    SessionError::InvalidState {
        operation_id: operation.id.clone(),
        expected: OperationState::InProgress.to_string(),
        actual: operation.state.to_string(),
    }
}

#[async_trait]
impl Session for MockSession {
    async fn get_operation(&self, operation_id: &str) -> Result<Operation, SessionError> {
        let state = self.lock();
        if state.failing_reads {
            return Err(transient());
        }
        state
            .operations
            .get(operation_id)
            .cloned()
            .ok_or_else(|| SessionError::operation_not_found(operation_id))
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster, SessionError> {
        let state = self.lock();
        if state.failing_reads {
            return Err(transient());
        }
        state
            .clusters
            .get(cluster_id)
            .cloned()
            .ok_or_else(|| SessionError::cluster_not_found(cluster_id))
    }

    async fn update_operation_state(
        &self,
        operation_id: &str,
        message: &str,
        new_state: OperationState,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(transient());
        }

        let operation = state
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| SessionError::operation_not_found(operation_id))?;
        if operation.state != OperationState::InProgress {
            if operation.state == new_state {
                return Ok(());
            }
            return Err(not_in_progress(operation));
        }

        operation.state = new_state;
        operation.message = message.to_string();
        if new_state.is_terminal() {
            operation.end_timestamp = Some(timestamp);
        }
        state.writes.push(Write::State {
            operation_id: operation_id.to_string(),
            state: new_state,
            message: message.to_string(),
        });
        Ok(())
    }

    async fn transition_operation(
        &self,
        operation_id: &str,
        message: &str,
        stage: &StageName,
        timestamp: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let mut state = self.lock();
        if state.failing_writes > 0 {
            state.failing_writes -= 1;
            return Err(transient());
        }

        let operation = state
            .operations
            .get_mut(operation_id)
            .ok_or_else(|| SessionError::operation_not_found(operation_id))?;
        if operation.state != OperationState::InProgress {
            return Err(not_in_progress(operation));
        }

        operation.stage = stage.clone();
        operation.message = message.to_string();
        operation.last_transition = Some(timestamp);
        state.writes.push(Write::Transition {
            operation_id: operation_id.to_string(),
            stage: stage.clone(),
            message: message.to_string(),
            timestamp,
        });
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &Cluster) -> Result<(), SessionError> {
        self.put_cluster(cluster.clone());
        Ok(())
    }

    async fn insert_operation(&self, operation: &Operation) -> Result<(), SessionError> {
        self.put_operation(operation.clone());
        Ok(())
    }

    async fn update_kubeconfig(&self, cluster_id: &str, kubeconfig: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        let cluster = state
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| SessionError::cluster_not_found(cluster_id))?;
        cluster.kubeconfig = Some(kubeconfig.to_string());
        Ok(())
    }

    async fn list_in_progress_operations(&self) -> Result<Vec<Operation>, SessionError> {
        let mut operations: Vec<_> = self
            .lock()
            .operations
            .values()
            .filter(|op| op.state == OperationState::InProgress)
            .cloned()
            .collect();
        operations.sort_by_key(|op| op.start_timestamp);
        Ok(operations)
    }
}

// ============================================================================
// Stages
// ============================================================================

type Responder = dyn Fn(usize) -> Result<StageResult, StageError> + Send + Sync;

/// Stage whose result is computed from the number of previous calls.
pub struct ScriptedStage {
    name: StageName,
    time_limit: Duration,
    calls: AtomicUsize,
    respond: Box<Responder>,
}

impl ScriptedStage {
    pub fn new(
        name: impl Into<StageName>,
        respond: impl Fn(usize) -> Result<StageResult, StageError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            time_limit: Duration::from_secs(60 * 60),
            calls: AtomicUsize::new(0),
            respond: Box::new(respond),
        }
    }

    /// Stage that always advances to `next`.
    pub fn advancing(name: impl Into<StageName>, next: impl Into<StageName>) -> Self {
        let next = next.into();
        Self::new(name, move |_| Ok(StageResult::next(next.clone())))
    }

    /// Stage that always asks to be polled again after `delay`.
    pub fn waiting(name: impl Into<StageName>, delay: Duration) -> Self {
        let name = name.into();
        let again = name.clone();
        Self::new(name, move |_| Ok(StageResult::wait(again.clone(), delay)))
    }

    pub fn with_time_limit(mut self, time_limit: Duration) -> Self {
        self.time_limit = time_limit;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Stage for ScriptedStage {
    fn name(&self) -> StageName {
        self.name.clone()
    }

    fn time_limit(&self) -> Duration {
        self.time_limit
    }

    async fn run(
        &self,
        _cluster: &Cluster,
        _operation: &Operation,
    ) -> Result<StageResult, StageError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        (self.respond)(call)
    }
}

pub fn stage_map(stages: &[Arc<ScriptedStage>]) -> StageMap {
    StageMap::new(stages.iter().map(|s| s.clone() as Arc<dyn Stage>)).unwrap()
}

// ============================================================================
// Collaborators
// ============================================================================

/// Failure handler recording the operations it was called for.
#[derive(Default)]
pub struct RecordingFailureHandler {
    calls: Mutex<Vec<Operation>>,
    failures_left: AtomicUsize,
}

impl RecordingFailureHandler {
    /// Handler whose first `n` calls fail.
    pub fn failing(n: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(n),
        }
    }

    pub fn calls(&self) -> Vec<Operation> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FailureHandler for RecordingFailureHandler {
    async fn handle_failure(&self, operation: &Operation, _cluster: &Cluster) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(operation.clone());
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("upgrade flag service unavailable");
        }
        Ok(())
    }
}

/// Status reporter recording every condition it is asked to set.
#[derive(Default)]
pub struct RecordingStatusReporter {
    calls: Mutex<Vec<(String, RuntimeCondition, String)>>,
    failures_left: AtomicUsize,
}

impl RecordingStatusReporter {
    /// Reporter whose first `n` calls fail.
    pub fn failing(n: usize) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failures_left: AtomicUsize::new(n),
        }
    }

    pub fn calls(&self) -> Vec<(String, RuntimeCondition, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RuntimeStatusReporter for RecordingStatusReporter {
    async fn set_runtime_status_condition(
        &self,
        cluster_id: &str,
        condition: RuntimeCondition,
        tenant: &str,
    ) -> anyhow::Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((cluster_id.to_string(), condition, tenant.to_string()));
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("runtime registry unavailable");
        }
        Ok(())
    }
}
