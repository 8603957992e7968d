//! Structured events emitted during an analysis run.
//!
//! Run progress never goes to a logger directly. Components hold an
//! [`EventSink`] and emit [`AuditEvent`]s into it; the caller decides where
//! they go:
//!
//! - [`NoopSink`] drops everything (the default)
//! - [`TracingSink`] forwards each event to `tracing`
//!
//! Tests install their own sink to assert on what happened.

use std::sync::Arc;
use std::time::Duration;

use crate::model::ResourceKind;

// =============================================================================
// Events
// =============================================================================

/// Something observable that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// A session was established and an Identity client built for it.
    SessionConnected { tenancy_id: String, region: String },

    /// A compartment's collections were loaded.
    CompartmentLoaded {
        compartment_id: String,
        compartment_name: String,
        children: usize,
        policies: usize,
    },

    /// A compartment was not descended into because it is not active.
    CompartmentSkipped {
        compartment_id: String,
        lifecycle_state: String,
    },

    CacheHit {
        compartment_id: String,
        kind: ResourceKind,
    },

    CacheMiss {
        compartment_id: String,
        kind: ResourceKind,
    },

    /// A cache entry existed but could not be decoded.
    CacheCorrupt {
        compartment_id: String,
        kind: ResourceKind,
        message: String,
    },

    /// A cache write failed; the run continues without it.
    CacheWriteFailed {
        compartment_id: String,
        kind: ResourceKind,
        message: String,
    },

    /// A transient failure is about to be retried.
    FetchRetry {
        compartment_id: String,
        kind: ResourceKind,
        attempt: u32,
        delay: Duration,
        message: String,
    },

    /// A compartment gave up after its last attempt.
    FetchFailed {
        compartment_id: String,
        kind: ResourceKind,
        attempts: u32,
        message: String,
    },

    /// A compartment task panicked or was cancelled before reporting.
    TaskAborted {
        compartment_id: String,
        message: String,
    },

    /// A statement or matching rule was kept with a warning.
    ParseWarning {
        source_id: String,
        text: String,
        message: String,
    },

    /// The fetch phase finished.
    RunCompleted {
        compartments: usize,
        failures: usize,
        elapsed: Duration,
    },

    /// Policy statements were parsed.
    PoliciesLoaded {
        compartments: usize,
        statements: usize,
        parse_warnings: usize,
        failures: usize,
    },

    DynamicGroupsLoaded {
        groups: usize,
        parse_warnings: usize,
        failures: usize,
    },
}

// =============================================================================
// Sinks
// =============================================================================

/// Receiver for [`AuditEvent`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Shared sink handle.
pub type DynSink = Arc<dyn EventSink>;

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: &AuditEvent) {}
}

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &AuditEvent) {
        match event {
            AuditEvent::SessionConnected { tenancy_id, region } => tracing::info!(
                tenancy = %tenancy_id,
                region = %region,
                "Session established"
            ),
            AuditEvent::CompartmentLoaded {
                compartment_id,
                compartment_name,
                children,
                policies,
            } => tracing::debug!(
                compartment_id = %compartment_id,
                compartment_name = %compartment_name,
                children,
                policies,
                "Compartment loaded"
            ),
            AuditEvent::CompartmentSkipped {
                compartment_id,
                lifecycle_state,
            } => tracing::debug!(
                compartment_id = %compartment_id,
                lifecycle_state = %lifecycle_state,
                "Skipping inactive compartment"
            ),
            AuditEvent::CacheHit {
                compartment_id,
                kind,
            } => tracing::trace!(compartment_id = %compartment_id, kind = %kind, "Cache hit"),
            AuditEvent::CacheMiss {
                compartment_id,
                kind,
            } => tracing::trace!(compartment_id = %compartment_id, kind = %kind, "Cache miss"),
            AuditEvent::CacheCorrupt {
                compartment_id,
                kind,
                message,
            } => tracing::warn!(
                compartment_id = %compartment_id,
                kind = %kind,
                error = %message,
                "Ignoring unreadable cache entry"
            ),
            AuditEvent::CacheWriteFailed {
                compartment_id,
                kind,
                message,
            } => tracing::warn!(
                compartment_id = %compartment_id,
                kind = %kind,
                error = %message,
                "Failed to write cache entry"
            ),
            AuditEvent::FetchRetry {
                compartment_id,
                kind,
                attempt,
                delay,
                message,
            } => tracing::warn!(
                compartment_id = %compartment_id,
                kind = %kind,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Fetch failed, retrying"
            ),
            AuditEvent::FetchFailed {
                compartment_id,
                kind,
                attempts,
                message,
            } => tracing::error!(
                compartment_id = %compartment_id,
                kind = %kind,
                attempts,
                error = %message,
                "Giving up on compartment"
            ),
            AuditEvent::TaskAborted {
                compartment_id,
                message,
            } => tracing::error!(
                compartment_id = %compartment_id,
                error = %message,
                "Compartment task did not complete"
            ),
            AuditEvent::ParseWarning {
                source_id,
                text,
                message,
            } => tracing::debug!(
                source_id = %source_id,
                text = %text,
                warning = %message,
                "Kept statement with parse warning"
            ),
            AuditEvent::RunCompleted {
                compartments,
                failures,
                elapsed,
            } => tracing::info!(
                compartments,
                failures,
                elapsed_ms = elapsed.as_millis() as u64,
                "Hierarchy fetch completed"
            ),
            AuditEvent::PoliciesLoaded {
                compartments,
                statements,
                parse_warnings,
                failures,
            } => tracing::info!(
                compartments,
                statements,
                parse_warnings,
                failures,
                "Policies loaded"
            ),
            AuditEvent::DynamicGroupsLoaded {
                groups,
                parse_warnings,
                failures,
            } => tracing::info!(groups, parse_warnings, failures, "Dynamic groups loaded"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Sink that keeps every event for later inspection.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        pub fn events(&self) -> Vec<AuditEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count(&self, pred: impl Fn(&AuditEvent) -> bool) -> usize {
            self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: &AuditEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}
