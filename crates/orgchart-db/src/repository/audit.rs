//! SurrealDB audit store: an append-only `audit_event` table that is both
//! the [`AuditSink`] for services and a queryable [`AuditRepository`].

use chrono::{DateTime, SecondsFormat, Utc};
use orgchart_core::context::Actor;
use orgchart_core::error::OrgChartResult;
use orgchart_core::ids;
use orgchart_core::models::audit::{AuditAction, AuditEvent, Changes, StoredAuditEvent};
use orgchart_core::repository::{AuditRepository, AuditSink, audit_limit};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use super::parse_uuid;
use crate::error::DbError;

#[derive(Debug, SurrealValue)]
struct AuditEventRow {
    record_id: String,
    action: String,
    actor_id: String,
    actor_name: String,
    target_id: String,
    changes: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl AuditEventRow {
    fn try_into_event(self) -> Result<StoredAuditEvent, DbError> {
        let action = AuditAction::parse(&self.action).map_err(|e| DbError::Decode(e.to_string()))?;
        let changes: Changes = serde_json::from_value(self.changes)
            .map_err(|e| DbError::Decode(format!("invalid audit changes: {e}")))?;
        Ok(StoredAuditEvent {
            id: parse_uuid(&self.record_id, "audit event")?,
            event: AuditEvent {
                action,
                actor: Actor::new(self.actor_id, self.actor_name),
                target_id: self.target_id,
                changes,
                timestamp: self.timestamp,
            },
        })
    }
}

/// SurrealDB implementation of the audit sink and query interface.
#[derive(Clone)]
pub struct SurrealAuditRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAuditRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AuditSink for SurrealAuditRepository<C> {
    async fn record(&self, event: AuditEvent) -> OrgChartResult<()> {
        let changes = serde_json::to_value(&event.changes)
            .map_err(|e| DbError::Decode(format!("unserializable audit changes: {e}")))?;

        self.db
            .query(
                "CREATE type::record('audit_event', $id) SET \
                 action = $action, actor_id = $actor_id, \
                 actor_name = $actor_name, target_id = $target_id, \
                 changes = $changes, timestamp = <datetime>$timestamp",
            )
            .bind(("id", ids::new_id().to_string()))
            .bind(("action", event.action.as_str().to_string()))
            .bind(("actor_id", event.actor.id))
            .bind(("actor_name", event.actor.name))
            .bind(("target_id", event.target_id))
            .bind(("changes", changes))
            .bind((
                "timestamp",
                event.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            ))
            .await
            .map_err(DbError::from)?
            .check()
            .map_err(DbError::from_check)?;

        Ok(())
    }
}

impl<C: Connection> AuditRepository for SurrealAuditRepository<C> {
    async fn list_by_target(
        &self,
        target_id: &str,
        limit: Option<u64>,
    ) -> OrgChartResult<Vec<StoredAuditEvent>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM audit_event \
                 WHERE target_id = $target_id \
                 ORDER BY timestamp DESC, id DESC LIMIT $limit",
            )
            .bind(("target_id", target_id.to_string()))
            .bind(("limit", audit_limit(limit)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AuditEventRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(AuditEventRow::try_into_event)
            .collect::<Result<Vec<_>, DbError>>()?)
    }

    async fn list_recent(&self, limit: Option<u64>) -> OrgChartResult<Vec<StoredAuditEvent>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM audit_event \
                 ORDER BY timestamp DESC, id DESC LIMIT $limit",
            )
            .bind(("limit", audit_limit(limit)))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AuditEventRow> = result.take(0).map_err(DbError::from)?;
        Ok(rows
            .into_iter()
            .map(AuditEventRow::try_into_event)
            .collect::<Result<Vec<_>, DbError>>()?)
    }
}
