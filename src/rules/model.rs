//! Rule data model

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::types::Marketplace;

/// Default priority for rules that do not set one
pub const DEFAULT_PRIORITY: i32 = 50;
pub const MIN_PRIORITY: i32 = 1;
pub const MAX_PRIORITY: i32 = 100;

/// Marketplaces a rule participates in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    All,
    Shopee,
    MercadoLivre,
    Magalu,
}

impl From<Marketplace> for RuleScope {
    fn from(marketplace: Marketplace) -> Self {
        match marketplace {
            Marketplace::Shopee => RuleScope::Shopee,
            Marketplace::MercadoLivre => RuleScope::MercadoLivre,
            Marketplace::Magalu => RuleScope::Magalu,
        }
    }
}

/// Whether a scope set admits the given marketplace.
///
/// An empty scope behaves like `all`.
pub fn scope_includes(scope: &BTreeSet<RuleScope>, marketplace: Marketplace) -> bool {
    scope.is_empty()
        || scope.contains(&RuleScope::All)
        || scope.contains(&RuleScope::from(marketplace))
}

/// Payment field a condition inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionField {
    /// Description and type joined by a space
    FullText,
    Description,
    #[serde(alias = "type")]
    TransactionType,
    Amount,
    OrderId,
}

impl ConditionField {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ConditionField::Amount)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Contains,
    NotContains,
    Equals,
    NotEquals,
    StartsWith,
    EndsWith,
    Regex,
    GreaterThan,
    LessThan,
    Between,
}

impl ConditionOperator {
    /// Operators that only make sense on numeric fields
    pub fn is_numeric_only(&self) -> bool {
        matches!(
            self,
            ConditionOperator::GreaterThan | ConditionOperator::LessThan | ConditionOperator::Between
        )
    }

    /// Operators that make sense on numeric fields
    pub fn supports_numeric(&self) -> bool {
        self.is_numeric_only()
            || matches!(self, ConditionOperator::Equals | ConditionOperator::NotEquals)
    }
}

/// A single predicate over a payment field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub field: ConditionField,
    pub operator: ConditionOperator,
    pub value: String,
    /// Upper bound for `between`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value2: Option<String>,
}

impl Condition {
    pub fn new(
        field: ConditionField,
        operator: ConditionOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            field,
            operator,
            value: value.into(),
            value2: None,
        }
    }

    pub fn contains(field: ConditionField, value: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Contains, value)
    }

    pub fn regex(field: ConditionField, pattern: impl Into<String>) -> Self {
        Self::new(field, ConditionOperator::Regex, pattern)
    }

    pub fn between(low: impl Into<String>, high: impl Into<String>) -> Self {
        Self {
            field: ConditionField::Amount,
            operator: ConditionOperator::Between,
            value: low.into(),
            value2: Some(high.into()),
        }
    }
}

/// How a rule's conditions combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

/// Effect of a matched rule on a payment row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    AddTags { tags: BTreeSet<String> },
    SetType { transaction_type: String },
    SetDescription { description: String },
    SetCategory { category: String },
    MarkExpense,
    MarkIncome,
    /// Exclude the row from import
    Skip,
    FlagReview {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl Action {
    pub fn add_tags<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Action::AddTags {
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    pub fn set_type(transaction_type: impl Into<String>) -> Self {
        Action::SetType {
            transaction_type: transaction_type.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Draft,
    #[default]
    Published,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn yes() -> bool {
    true
}

/// User-authored rule contents, used to create rules and stage drafts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulePayload {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub marketplaces: BTreeSet<RuleScope>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub condition_logic: ConditionLogic,
    #[serde(default)]
    pub actions: Vec<Action>,
    /// 1..=100, higher runs first; clamped on write
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "yes")]
    pub enabled: bool,
    #[serde(default)]
    pub stop_on_match: bool,
}

impl RulePayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            marketplaces: BTreeSet::from([RuleScope::All]),
            conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            actions: Vec::new(),
            priority: DEFAULT_PRIORITY,
            enabled: true,
            stop_on_match: false,
        }
    }

    pub fn scoped_to(mut self, scopes: impl IntoIterator<Item = RuleScope>) -> Self {
        self.marketplaces = scopes.into_iter().collect();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_logic(mut self, logic: ConditionLogic) -> Self {
        self.condition_logic = logic;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn stopping_on_match(mut self) -> Self {
        self.stop_on_match = true;
        self
    }
}

/// Partial update of a rule; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<Option<String>>,
    #[serde(default)]
    pub marketplaces: Option<BTreeSet<RuleScope>>,
    #[serde(default)]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default)]
    pub condition_logic: Option<ConditionLogic>,
    #[serde(default)]
    pub actions: Option<Vec<Action>>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub stop_on_match: Option<bool>,
}

impl RuleUpdate {
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    /// Whether the update touches nothing but `enabled`
    pub fn only_toggles_enabled(&self) -> bool {
        let without_enabled = RuleUpdate {
            enabled: None,
            ..self.clone()
        };
        without_enabled == RuleUpdate::default()
    }

    /// Overlay this update on a payload
    pub fn apply_to(&self, base: &RulePayload) -> RulePayload {
        RulePayload {
            name: self.name.clone().unwrap_or_else(|| base.name.clone()),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| base.description.clone()),
            marketplaces: self
                .marketplaces
                .clone()
                .unwrap_or_else(|| base.marketplaces.clone()),
            conditions: self
                .conditions
                .clone()
                .unwrap_or_else(|| base.conditions.clone()),
            condition_logic: self.condition_logic.unwrap_or(base.condition_logic),
            actions: self.actions.clone().unwrap_or_else(|| base.actions.clone()),
            priority: self.priority.unwrap_or(base.priority),
            enabled: self.enabled.unwrap_or(base.enabled),
            stop_on_match: self.stop_on_match.unwrap_or(base.stop_on_match),
        }
    }
}

/// A tagging rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    /// Insertion order, used to break priority ties
    pub sequence: u64,
    pub name: String,
    pub description: Option<String>,
    pub marketplaces: BTreeSet<RuleScope>,
    pub conditions: Vec<Condition>,
    pub condition_logic: ConditionLogic,
    pub actions: Vec<Action>,
    pub priority: u8,
    pub enabled: bool,
    pub stop_on_match: bool,
    pub status: RuleStatus,
    pub version: u32,
    pub is_system_rule: bool,
    /// Pending edits not yet visible to evaluation
    pub draft: Option<RulePayload>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

fn clamp_priority(priority: i32) -> u8 {
    // within 1..=100 after the clamp, so the cast cannot truncate
    priority.clamp(MIN_PRIORITY, MAX_PRIORITY) as u8
}

impl Rule {
    /// Build a rule from an already validated payload
    pub fn from_payload(
        id: impl Into<String>,
        sequence: u64,
        payload: &RulePayload,
        status: RuleStatus,
        now: NaiveDateTime,
    ) -> Self {
        let mut rule = Self {
            id: id.into(),
            sequence,
            name: String::new(),
            description: None,
            marketplaces: BTreeSet::new(),
            conditions: Vec::new(),
            condition_logic: ConditionLogic::And,
            actions: Vec::new(),
            priority: clamp_priority(DEFAULT_PRIORITY),
            enabled: true,
            stop_on_match: false,
            status,
            version: 1,
            is_system_rule: false,
            draft: None,
            created_at: now,
            updated_at: now,
        };
        rule.apply_payload(payload);
        rule
    }

    /// Overwrite the user-authored fields
    pub fn apply_payload(&mut self, payload: &RulePayload) {
        self.name = payload.name.clone();
        self.description = payload.description.clone();
        self.marketplaces = payload.marketplaces.clone();
        self.conditions = payload.conditions.clone();
        self.condition_logic = payload.condition_logic;
        self.actions = payload.actions.clone();
        self.priority = clamp_priority(payload.priority);
        self.enabled = payload.enabled;
        self.stop_on_match = payload.stop_on_match;
    }

    /// The user-authored fields as a payload
    pub fn payload(&self) -> RulePayload {
        RulePayload {
            name: self.name.clone(),
            description: self.description.clone(),
            marketplaces: self.marketplaces.clone(),
            conditions: self.conditions.clone(),
            condition_logic: self.condition_logic,
            actions: self.actions.clone(),
            priority: i32::from(self.priority),
            enabled: self.enabled,
            stop_on_match: self.stop_on_match,
        }
    }

    pub fn has_draft(&self) -> bool {
        self.draft.is_some()
    }

    pub fn is_published(&self) -> bool {
        self.status == RuleStatus::Published
    }

    /// Whether the rule takes part in evaluation for this marketplace
    pub fn applies_to(&self, marketplace: Marketplace) -> bool {
        scope_includes(&self.marketplaces, marketplace)
    }

    pub fn snapshot(&self) -> RuleSnapshot {
        RuleSnapshot {
            name: self.name.clone(),
            description: self.description.clone(),
            marketplaces: self.marketplaces.clone(),
            conditions: self.conditions.clone(),
            condition_logic: self.condition_logic,
            actions: self.actions.clone(),
            priority: self.priority,
            enabled: self.enabled,
            stop_on_match: self.stop_on_match,
            status: self.status,
            version: self.version,
            is_system_rule: self.is_system_rule,
            draft: self.draft.clone(),
        }
    }

    /// Replace the rule's state with a snapshot, keeping identity and timestamps
    pub fn apply_snapshot(&mut self, snapshot: &RuleSnapshot) {
        self.name = snapshot.name.clone();
        self.description = snapshot.description.clone();
        self.marketplaces = snapshot.marketplaces.clone();
        self.conditions = snapshot.conditions.clone();
        self.condition_logic = snapshot.condition_logic;
        self.actions = snapshot.actions.clone();
        self.priority = snapshot.priority;
        self.enabled = snapshot.enabled;
        self.stop_on_match = snapshot.stop_on_match;
        self.status = snapshot.status;
        self.version = snapshot.version;
        self.is_system_rule = snapshot.is_system_rule;
        self.draft = snapshot.draft.clone();
    }
}

/// Rule state recorded in the audit log, without id or timestamps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub name: String,
    pub description: Option<String>,
    pub marketplaces: BTreeSet<RuleScope>,
    pub conditions: Vec<Condition>,
    pub condition_logic: ConditionLogic,
    pub actions: Vec<Action>,
    pub priority: u8,
    pub enabled: bool,
    pub stop_on_match: bool,
    pub status: RuleStatus,
    pub version: u32,
    pub is_system_rule: bool,
    pub draft: Option<RulePayload>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serializes_as_tagged_union() {
        let action = Action::add_tags(["taxa"]);
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "add_tags");
        assert_eq!(json["tags"][0], "taxa");

        let parsed: Action =
            serde_json::from_str(r#"{"type":"set_type","transaction_type":"Frete"}"#).unwrap();
        assert_eq!(parsed, Action::set_type("Frete"));

        let bad = serde_json::from_str::<Action>(r#"{"type":"set_type","tags":["x"]}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_condition_field_accepts_type_alias() {
        let condition: Condition =
            serde_json::from_str(r#"{"field":"type","operator":"equals","value":"Saque"}"#)
                .unwrap();
        assert_eq!(condition.field, ConditionField::TransactionType);
    }

    #[test]
    fn test_empty_scope_means_all() {
        assert!(scope_includes(&BTreeSet::new(), Marketplace::Magalu));
        let shopee_only = BTreeSet::from([RuleScope::Shopee]);
        assert!(scope_includes(&shopee_only, Marketplace::Shopee));
        assert!(!scope_includes(&shopee_only, Marketplace::MercadoLivre));
    }

    #[test]
    fn test_priority_is_clamped() {
        let now = chrono::Utc::now().naive_utc();
        let low = Rule::from_payload(
            "r1",
            0,
            &RulePayload::new("low").with_priority(-5),
            RuleStatus::Published,
            now,
        );
        let high = Rule::from_payload(
            "r2",
            1,
            &RulePayload::new("high").with_priority(500),
            RuleStatus::Published,
            now,
        );
        assert_eq!(low.priority, 1);
        assert_eq!(high.priority, 100);
    }

    #[test]
    fn test_update_overlays_payload() {
        let base = RulePayload::new("Frete").with_priority(40);
        let update = RuleUpdate {
            priority: Some(70),
            description: Some(Some("shipping".into())),
            ..Default::default()
        };

        let merged = update.apply_to(&base);
        assert_eq!(merged.name, "Frete");
        assert_eq!(merged.priority, 70);
        assert_eq!(merged.description.as_deref(), Some("shipping"));
        assert!(!update.only_toggles_enabled());
        assert!(RuleUpdate::enabled(false).only_toggles_enabled());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let now = chrono::Utc::now().naive_utc();
        let mut rule = Rule::from_payload(
            "r1",
            0,
            &RulePayload::new("Ads").with_action(Action::MarkExpense),
            RuleStatus::Published,
            now,
        );
        let before = rule.snapshot();

        rule.apply_payload(&RulePayload::new("Ads v2"));
        assert_ne!(rule.snapshot(), before);

        rule.apply_snapshot(&before);
        assert_eq!(rule.snapshot(), before);
        assert_eq!(rule.id, "r1");
    }
}
