//! Audit event model.
//!
//! Events serialize to
//! `{action, actor: {id, name}, target_id, changes: {field: {old, new}}, timestamp}`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::Actor;
use crate::error::{OrgChartError, OrgChartResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Move,
    Delete,
    SetPrimary,
    AddAux,
    RemoveAux,
    ResetPassword,
    Unlock,
    BatchUpdateStatus,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Move => "move",
            AuditAction::Delete => "delete",
            AuditAction::SetPrimary => "set_primary",
            AuditAction::AddAux => "add_aux",
            AuditAction::RemoveAux => "remove_aux",
            AuditAction::ResetPassword => "reset_password",
            AuditAction::Unlock => "unlock",
            AuditAction::BatchUpdateStatus => "batch_update_status",
        }
    }

    pub fn parse(raw: &str) -> OrgChartResult<Self> {
        Ok(match raw {
            "create" => AuditAction::Create,
            "update" => AuditAction::Update,
            "move" => AuditAction::Move,
            "delete" => AuditAction::Delete,
            "set_primary" => AuditAction::SetPrimary,
            "add_aux" => AuditAction::AddAux,
            "remove_aux" => AuditAction::RemoveAux,
            "reset_password" => AuditAction::ResetPassword,
            "unlock" => AuditAction::Unlock,
            "batch_update_status" => AuditAction::BatchUpdateStatus,
            other => {
                return Err(OrgChartError::invalid(format!(
                    "unknown audit action: {other}"
                )));
            }
        })
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    #[serde(default)]
    pub old: Value,
    #[serde(default)]
    pub new: Value,
}

impl FieldChange {
    pub fn new(old: Value, new: Value) -> Self {
        Self { old, new }
    }

    /// Build a change from any serializable pair. Values that fail to
    /// serialize are recorded as `null`.
    pub fn of<T: Serialize + ?Sized>(old: &T, new: &T) -> Self {
        Self {
            old: serde_json::to_value(old).unwrap_or(Value::Null),
            new: serde_json::to_value(new).unwrap_or(Value::Null),
        }
    }
}

/// Field name to old/new pair. Ordered so the serialized form is stable.
pub type Changes = BTreeMap<String, FieldChange>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub actor: Actor,
    pub target_id: String,
    pub changes: Changes,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, actor: Actor, target_id: impl Into<String>) -> Self {
        Self {
            action,
            actor,
            target_id: target_id.into(),
            changes: Changes::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes.extend(changes);
        self
    }

    pub fn change<T: Serialize + ?Sized>(mut self, field: &str, old: &T, new: &T) -> Self {
        self.changes.insert(field.to_string(), FieldChange::of(old, new));
        self
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// An audit event as persisted, with its storage id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAuditEvent {
    pub id: Uuid,
    #[serde(flatten)]
    pub event: AuditEvent,
}
