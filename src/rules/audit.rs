//! Append-only audit log entries for rule mutations

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::rules::model::{Rule, RuleSnapshot};
use crate::types::ReconResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
    Enabled,
    Disabled,
}

/// One immutable record of a rule mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub action: AuditAction,
    /// State before the mutation; `None` for creations
    pub previous_data: Option<RuleSnapshot>,
    /// State after the mutation; `None` for deletions
    pub new_data: Option<RuleSnapshot>,
    pub changed_at: NaiveDateTime,
    pub changed_by: Option<String>,
    pub change_reason: Option<String>,
}

impl AuditEntry {
    pub fn record(
        rule: &Rule,
        action: AuditAction,
        previous_data: Option<RuleSnapshot>,
        new_data: Option<RuleSnapshot>,
        changed_by: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            action,
            previous_data,
            new_data,
            changed_at: chrono::Utc::now().naive_utc(),
            changed_by,
            change_reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.change_reason = Some(reason.into());
        self
    }

    /// Top-level fields that differ between the two snapshots
    pub fn changes(&self) -> ReconResult<Vec<FieldChange>> {
        structural_diff(self.previous_data.as_ref(), self.new_data.as_ref())
    }
}

/// A top-level field whose serialized value changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

fn top_level_fields<T: Serialize>(value: Option<&T>) -> ReconResult<serde_json::Map<String, Value>> {
    match value.map(serde_json::to_value).transpose()? {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => {
            let mut map = serde_json::Map::new();
            map.insert("value".to_string(), other);
            Ok(map)
        }
        None => Ok(serde_json::Map::new()),
    }
}

/// Compare two values field by field on their serialized form.
///
/// Unchanged fields are omitted; a missing side shows as `None`.
pub fn structural_diff<T: Serialize>(
    before: Option<&T>,
    after: Option<&T>,
) -> ReconResult<Vec<FieldChange>> {
    let before = top_level_fields(before)?;
    let after = top_level_fields(after)?;

    let mut keys: Vec<&String> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    Ok(keys
        .into_iter()
        .filter_map(|key| {
            let old = before.get(key);
            let new = after.get(key);
            (old != new).then(|| FieldChange {
                field: key.clone(),
                before: old.cloned(),
                after: new.cloned(),
            })
        })
        .collect())
}
