//! Audit emitter: hands mutation records to an [`AuditSink`].
//!
//! Emission happens after the mutation committed. Sink failures are
//! logged and dropped; they never reach the caller.

use std::time::Duration;

use orgchart_core::context::RequestContext;
use orgchart_core::models::audit::{AuditAction, AuditEvent, Changes, FieldChange};
use orgchart_core::models::organization::Organization;
use orgchart_core::repository::AuditSink;
use serde_json::Value;
use tracing::{debug, warn};

/// Fields left out of create/delete snapshots.
const SNAPSHOT_SKIP: &[&str] = &["id", "created_at", "updated_at", "deleted_at"];

pub struct AuditEmitter<A: AuditSink> {
    sink: A,
    timeout: Duration,
}

impl<A: AuditSink> AuditEmitter<A> {
    pub fn new(sink: A, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Record `action` on `target_id` by the request's actor.
    pub async fn emit(
        &self,
        ctx: &RequestContext,
        action: AuditAction,
        target_id: impl Into<String>,
        changes: Changes,
    ) {
        let event = AuditEvent::new(action, ctx.actor().clone(), target_id).with_changes(changes);
        let target = event.target_id.clone();

        // The mutation has committed; record it even if the request is gone.
        let bg = ctx.background(self.timeout);
        match bg.run(self.sink.record(event)).await {
            Ok(()) => debug!(action = %action, target_id = %target, "Audit event recorded"),
            Err(e) => warn!(
                action = %action,
                target_id = %target,
                error = %e,
                "Failed to record audit event"
            ),
        }
    }
}

/// Every field of a new node, with `old = null`.
pub fn created(org: &Organization) -> Changes {
    snapshot(org)
        .into_iter()
        .map(|(field, value)| (field, FieldChange::new(Value::Null, value)))
        .collect()
}

/// Every field of a removed node, with `new = null`.
pub fn deleted(org: &Organization) -> Changes {
    snapshot(org)
        .into_iter()
        .map(|(field, value)| (field, FieldChange::new(value, Value::Null)))
        .collect()
}

fn snapshot(org: &Organization) -> Vec<(String, Value)> {
    match serde_json::to_value(org) {
        Ok(Value::Object(fields)) => fields
            .into_iter()
            .filter(|(k, _)| !SNAPSHOT_SKIP.contains(&k.as_str()))
            .collect(),
        _ => Vec::new(),
    }
}
