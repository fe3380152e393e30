// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Metrics sink injected into executors.
//!
//! The engine reports events through [`MetricsSink`]; exporting them to a
//! metrics backend is left to the embedding application.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use provisioner_core::{OperationState, OperationType, StageName};

/// Receiver of executor events. Every method defaults to doing nothing.
pub trait MetricsSink: Send + Sync {
    /// An operation reached a terminal state after `duration`.
    fn operation_finished(
        &self,
        _operation_type: OperationType,
        _state: OperationState,
        _duration: Duration,
    ) {
    }

    /// An operation moved from one stage to another.
    fn stage_transitioned(&self, _operation_type: OperationType, _from: &StageName, _to: &StageName) {}

    /// An operation was handed back to the queue.
    fn operation_requeued(&self, _operation_type: OperationType, _delay: Duration) {}
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Sink that counts events in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: Mutex<Counters>,
}

#[derive(Debug, Default, Clone)]
struct Counters {
    finished: HashMap<(OperationType, OperationState), u64>,
    transitions: HashMap<(StageName, StageName), u64>,
    requeues: u64,
}

impl InMemoryMetrics {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations of `operation_type` that ended in `state`.
    pub fn finished(&self, operation_type: OperationType, state: OperationState) -> u64 {
        self.with_counters(|c| {
            c.finished
                .get(&(operation_type, state))
                .copied()
                .unwrap_or(0)
        })
    }

    /// Transitions from `from` to `to`.
    pub fn transitions(&self, from: &StageName, to: &StageName) -> u64 {
        self.with_counters(|c| {
            c.transitions
                .get(&(from.clone(), to.clone()))
                .copied()
                .unwrap_or(0)
        })
    }

    /// Total requeues.
    pub fn requeues(&self) -> u64 {
        self.with_counters(|c| c.requeues)
    }

    fn with_counters<R>(&self, f: impl FnOnce(&mut Counters) -> R) -> R {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut counters)
    }
}

impl MetricsSink for InMemoryMetrics {
    fn operation_finished(
        &self,
        operation_type: OperationType,
        state: OperationState,
        _duration: Duration,
    ) {
        self.with_counters(|c| *c.finished.entry((operation_type, state)).or_default() += 1);
    }

    fn stage_transitioned(&self, _operation_type: OperationType, from: &StageName, to: &StageName) {
        self.with_counters(|c| {
            *c.transitions
                .entry((from.clone(), to.clone()))
                .or_default() += 1
        });
    }

    fn operation_requeued(&self, _operation_type: OperationType, _delay: Duration) {
        self.with_counters(|c| c.requeues += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioner_core::model::stages;

    #[test]
    fn test_in_memory_metrics_counts() {
        let metrics = InMemoryMetrics::new();
        metrics.operation_finished(
            OperationType::Provision,
            OperationState::Succeeded,
            Duration::from_secs(90),
        );
        metrics.stage_transitioned(
            OperationType::Provision,
            &stages::WAIT_FOR_CLUSTER_DOMAIN,
            &stages::WAIT_FOR_CLUSTER_CREATION,
        );
        metrics.operation_requeued(OperationType::Provision, Duration::from_secs(20));
        metrics.operation_requeued(OperationType::Provision, Duration::from_secs(20));

        assert_eq!(
            metrics.finished(OperationType::Provision, OperationState::Succeeded),
            1
        );
        assert_eq!(
            metrics.finished(OperationType::Provision, OperationState::Failed),
            0
        );
        assert_eq!(
            metrics.transitions(
                &stages::WAIT_FOR_CLUSTER_DOMAIN,
                &stages::WAIT_FOR_CLUSTER_CREATION
            ),
            1
        );
        assert_eq!(metrics.requeues(), 2);
    }
}
