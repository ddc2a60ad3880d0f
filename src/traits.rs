//! Collaborator traits for order lookup, rule persistence and validation

use async_trait::async_trait;

use crate::rules::audit::AuditEntry;
use crate::rules::model::{Rule, RulePayload};
use crate::types::*;
use crate::utils::validation::validate_rule_payload;

/// ERP order lookup
///
/// Implementations return an empty list when nothing is found and an error
/// only for transport failures, so the two stay distinguishable.
#[async_trait]
pub trait OrderLookup: Send + Sync {
    /// Find ERP orders whose ecommerce channel field holds the given marketplace order id
    async fn find_by_marketplace_id(
        &self,
        marketplace: Marketplace,
        external_id: &str,
    ) -> ReconResult<Vec<OrderRecord>>;

    /// Free-text search by order id or customer name.
    ///
    /// Fails with [`ReconError::RateLimited`] when the ERP throttles requests;
    /// callers must wait the given delay before retrying.
    async fn search_manual(
        &self,
        query: &str,
        marketplace: Marketplace,
    ) -> ReconResult<Vec<OrderRecord>>;
}

/// Source of published rules for evaluation
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// Published rules whose scope admits the marketplace
    async fn list_published(&self, marketplace: Marketplace) -> ReconResult<Vec<Rule>>;
}

/// Storage abstraction for rules and their audit log
///
/// Concurrency control for rule writes (e.g. optimistic locking on id and
/// version) belongs to the implementation.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Save a new rule
    async fn save_rule(&mut self, rule: &Rule) -> ReconResult<()>;

    async fn get_rule(&self, rule_id: &str) -> ReconResult<Option<Rule>>;

    /// All rules in insertion order
    async fn list_rules(&self) -> ReconResult<Vec<Rule>>;

    /// Replace an existing rule
    async fn update_rule(&mut self, rule: &Rule) -> ReconResult<()>;

    async fn delete_rule(&mut self, rule_id: &str) -> ReconResult<()>;

    /// Next insertion sequence number
    async fn next_sequence(&mut self) -> ReconResult<u64>;

    /// Append an entry to the audit log
    async fn append(&mut self, entry: &AuditEntry) -> ReconResult<()>;

    async fn get_audit_entry(&self, audit_id: &str) -> ReconResult<Option<AuditEntry>>;

    /// Audit entries for a rule, newest first
    async fn get_history(&self, rule_id: &str, limit: usize) -> ReconResult<Vec<AuditEntry>>;
}

/// Trait for implementing custom rule validation
pub trait RuleValidator: Send + Sync {
    /// Validate a payload before it is written
    fn validate_rule(&self, payload: &RulePayload) -> ReconResult<()>;
}

/// Default validator: structural checks on conditions and actions
pub struct DefaultRuleValidator;

impl RuleValidator for DefaultRuleValidator {
    fn validate_rule(&self, payload: &RulePayload) -> ReconResult<()> {
        let issues = validate_rule_payload(payload);
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ReconError::Validation(issues))
        }
    }
}
