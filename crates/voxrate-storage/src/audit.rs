//! Audit records written by the logging hooks

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use voxrate_core::models::{Action, ActionTiming, ActionTrigger, CallCost};

/// One entry of an audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEntry {
    CallCost {
        source: String,
        logged_at: DateTime<Utc>,
        cost: CallCost,
    },
    ActionTrigger {
        source: String,
        logged_at: DateTime<Utc>,
        account_id: String,
        trigger: ActionTrigger,
        actions: Vec<Action>,
    },
    ActionTiming {
        source: String,
        logged_at: DateTime<Utc>,
        timing: ActionTiming,
        actions: Vec<Action>,
    },
}

impl AuditEntry {
    pub fn source(&self) -> &str {
        match self {
            AuditEntry::CallCost { source, .. }
            | AuditEntry::ActionTrigger { source, .. }
            | AuditEntry::ActionTiming { source, .. } => source,
        }
    }
}
