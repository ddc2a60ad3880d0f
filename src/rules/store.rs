//! Rule store with an append-only audit trail
//!
//! Every mutating call appends exactly one [`AuditEntry`]. History is never
//! rewritten: a restore re-applies an old snapshot and logs it as a new entry.

use async_trait::async_trait;
use std::collections::HashSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::rules::audit::{AuditAction, AuditEntry, FieldChange};
use crate::rules::engine::{detect_conflicts, RuleConflict};
use crate::rules::model::{Rule, RulePayload, RuleSnapshot, RuleStatus, RuleUpdate};
use crate::rules::system::{is_system_rule_id, system_rules};
use crate::traits::*;
use crate::types::*;
use crate::utils::validation::sanitize_payload;

/// Rule manager that handles rule writes and their audit log
pub struct RuleStore<S: RuleRepository> {
    storage: S,
    validator: Box<dyn RuleValidator>,
    actor: Option<String>,
}

impl<S: RuleRepository> RuleStore<S> {
    /// Create a new rule store with the default validator
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            validator: Box::new(DefaultRuleValidator),
            actor: None,
        }
    }

    /// Create a new rule store with a custom validator
    pub fn with_validator(storage: S, validator: Box<dyn RuleValidator>) -> Self {
        Self {
            storage,
            validator,
            actor: None,
        }
    }

    /// Record `actor` as `changed_by` on audit entries
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn now() -> chrono::NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }

    fn prepare(&self, payload: &RulePayload) -> ReconResult<RulePayload> {
        self.validator.validate_rule(payload)?;
        Ok(sanitize_payload(payload))
    }

    async fn load(&self, rule_id: &str) -> ReconResult<Rule> {
        self.storage
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| ReconError::RuleNotFound(rule_id.to_string()))
    }

    async fn record(
        &mut self,
        rule: &Rule,
        action: AuditAction,
        previous: Option<RuleSnapshot>,
        reason: Option<String>,
    ) -> ReconResult<()> {
        let new_data = match action {
            AuditAction::Deleted => None,
            _ => Some(rule.snapshot()),
        };
        let mut entry = AuditEntry::record(rule, action, previous, new_data, self.actor.clone());
        entry.change_reason = reason;
        self.storage.append(&entry).await
    }

    async fn save_changes(
        &mut self,
        rule: &mut Rule,
        previous: RuleSnapshot,
        action: AuditAction,
        reason: Option<String>,
    ) -> ReconResult<()> {
        rule.updated_at = Self::now();
        self.storage.update_rule(rule).await?;
        self.record(rule, action, Some(previous), reason).await
    }

    async fn warn_conflicts(&self, rule_id: &str) -> ReconResult<()> {
        for conflict in self.conflicts().await? {
            if conflict.rule_id == rule_id || conflict.conflicting_rule_id == rule_id {
                warn!(
                    rule = %conflict.rule_name,
                    other = %conflict.conflicting_rule_name,
                    reason = %conflict.reason,
                    "rule conditions overlap"
                );
            }
        }
        Ok(())
    }

    async fn insert(&mut self, payload: &RulePayload, status: RuleStatus) -> ReconResult<Rule> {
        let payload = self.prepare(payload)?;
        let sequence = self.storage.next_sequence().await?;
        let rule = Rule::from_payload(
            Uuid::new_v4().to_string(),
            sequence,
            &payload,
            status,
            Self::now(),
        );

        self.storage.save_rule(&rule).await?;
        self.record(&rule, AuditAction::Created, None, None).await?;
        info!(rule_id = %rule.id, name = %rule.name, ?status, "rule created");

        self.warn_conflicts(&rule.id).await?;
        Ok(rule)
    }

    /// Create a published rule
    #[instrument(skip(self, payload), fields(name = %payload.name))]
    pub async fn create(&mut self, payload: RulePayload) -> ReconResult<Rule> {
        self.insert(&payload, RuleStatus::Published).await
    }

    /// Create a rule in draft status, invisible to evaluation until published
    #[instrument(skip(self, payload), fields(name = %payload.name))]
    pub async fn create_draft(&mut self, payload: RulePayload) -> ReconResult<Rule> {
        self.insert(&payload, RuleStatus::Draft).await
    }

    pub async fn get(&self, rule_id: &str) -> ReconResult<Option<Rule>> {
        self.storage.get_rule(rule_id).await
    }

    pub async fn list(&self) -> ReconResult<Vec<Rule>> {
        self.storage.list_rules().await
    }

    /// Update a rule's contents.
    ///
    /// System rules accept updates that only toggle `enabled`.
    #[instrument(skip(self, update))]
    pub async fn update(&mut self, rule_id: &str, update: RuleUpdate) -> ReconResult<Rule> {
        if let Some(enabled) = update.enabled {
            if update.only_toggles_enabled() {
                return self.set_enabled(rule_id, enabled).await;
            }
        }

        let mut rule = self.load(rule_id).await?;
        if rule.is_system_rule {
            return Err(ReconError::SystemRule(rule.id));
        }

        let payload = self.prepare(&update.apply_to(&rule.payload()))?;
        let previous = rule.snapshot();
        rule.apply_payload(&payload);

        self.save_changes(&mut rule, previous, AuditAction::Updated, None)
            .await?;
        info!(rule_id = %rule.id, "rule updated");

        self.warn_conflicts(&rule.id).await?;
        Ok(rule)
    }

    /// Delete a rule; system rules cannot be deleted
    #[instrument(skip(self))]
    pub async fn delete(&mut self, rule_id: &str) -> ReconResult<()> {
        let rule = self.load(rule_id).await?;
        if rule.is_system_rule {
            return Err(ReconError::SystemRule(rule.id));
        }

        self.storage.delete_rule(rule_id).await?;
        self.record(&rule, AuditAction::Deleted, Some(rule.snapshot()), None)
            .await?;
        info!(rule_id, "rule deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn set_enabled(&mut self, rule_id: &str, enabled: bool) -> ReconResult<Rule> {
        let mut rule = self.load(rule_id).await?;
        let previous = rule.snapshot();
        rule.enabled = enabled;

        let action = if enabled {
            AuditAction::Enabled
        } else {
            AuditAction::Disabled
        };
        self.save_changes(&mut rule, previous, action, None).await?;
        info!(rule_id, enabled, "rule toggled");
        Ok(rule)
    }

    /// Re-apply the state recorded in an audit entry.
    ///
    /// Uses the entry's `previous_data` unless `use_new_data` is set. A rule
    /// that no longer exists is recreated under its original id.
    #[instrument(skip(self))]
    pub async fn restore(&mut self, audit_id: &str, use_new_data: bool) -> ReconResult<Rule> {
        let entry = self
            .storage
            .get_audit_entry(audit_id)
            .await?
            .ok_or_else(|| ReconError::AuditEntryNotFound(audit_id.to_string()))?;

        let (snapshot, side) = if use_new_data {
            (entry.new_data.as_ref(), "new_data")
        } else {
            (entry.previous_data.as_ref(), "previous_data")
        };
        let snapshot = snapshot.ok_or_else(|| {
            ReconError::invalid(side, format!("Audit entry {audit_id} has no {side} to restore"))
        })?;
        let reason = Some(format!("restored from audit entry {audit_id}"));

        match self.storage.get_rule(&entry.rule_id).await? {
            Some(mut rule) => {
                let previous = rule.snapshot();
                if rule.is_system_rule {
                    rule.enabled = snapshot.enabled;
                } else {
                    rule.apply_snapshot(snapshot);
                }

                self.save_changes(&mut rule, previous, AuditAction::Updated, reason)
                    .await?;
                info!(rule_id = %rule.id, audit_id, "rule restored");
                Ok(rule)
            }
            None => {
                let sequence = self.storage.next_sequence().await?;
                let now = Self::now();
                let mut rule = Rule::from_payload(
                    entry.rule_id.clone(),
                    sequence,
                    &RulePayload::new(snapshot.name.clone()),
                    snapshot.status,
                    now,
                );
                rule.apply_snapshot(snapshot);

                self.storage.save_rule(&rule).await?;
                self.record(&rule, AuditAction::Created, None, reason).await?;
                info!(rule_id = %rule.id, audit_id, "deleted rule recreated");
                Ok(rule)
            }
        }
    }

    /// Stage edits without affecting evaluation.
    ///
    /// A rule still in draft status is edited directly; a published rule
    /// keeps the edits pending until [`publish`](Self::publish).
    #[instrument(skip(self, payload))]
    pub async fn save_draft(&mut self, rule_id: &str, payload: RulePayload) -> ReconResult<Rule> {
        let mut rule = self.load(rule_id).await?;
        if rule.is_system_rule {
            return Err(ReconError::SystemRule(rule.id));
        }

        let payload = self.prepare(&payload)?;
        let previous = rule.snapshot();
        match rule.status {
            RuleStatus::Draft => rule.apply_payload(&payload),
            RuleStatus::Published => rule.draft = Some(payload),
        }

        self.save_changes(&mut rule, previous, AuditAction::Updated, None)
            .await?;
        info!(rule_id, "draft saved");
        Ok(rule)
    }

    #[instrument(skip(self))]
    pub async fn discard_draft(&mut self, rule_id: &str) -> ReconResult<Rule> {
        let mut rule = self.load(rule_id).await?;
        if !rule.has_draft() {
            return Err(ReconError::invalid("draft", "Rule has no pending draft"));
        }

        let previous = rule.snapshot();
        rule.draft = None;
        self.save_changes(&mut rule, previous, AuditAction::Updated, None)
            .await?;
        info!(rule_id, "draft discarded");
        Ok(rule)
    }

    /// Make a rule visible to evaluation, applying any pending draft
    #[instrument(skip(self))]
    pub async fn publish(&mut self, rule_id: &str) -> ReconResult<Rule> {
        let mut rule = self.load(rule_id).await?;
        if rule.is_published() && !rule.has_draft() {
            return Err(ReconError::invalid(
                "status",
                "Rule is already published with no pending draft",
            ));
        }

        let previous = rule.snapshot();
        if let Some(draft) = rule.draft.take() {
            rule.apply_payload(&draft);
            rule.version += 1;
        }
        rule.status = RuleStatus::Published;

        self.save_changes(&mut rule, previous, AuditAction::Updated, None)
            .await?;
        info!(rule_id, version = rule.version, "rule published");

        self.warn_conflicts(&rule.id).await?;
        Ok(rule)
    }

    /// Install the built-in system rules that are not present yet
    #[instrument(skip(self))]
    pub async fn install_system_rules(&mut self) -> ReconResult<Vec<Rule>> {
        let present: HashSet<String> = self
            .storage
            .list_rules()
            .await?
            .into_iter()
            .map(|rule| rule.id)
            .filter(|id| is_system_rule_id(id))
            .collect();
        let mut installed = Vec::new();

        for (id, payload) in system_rules() {
            if present.contains(&id) {
                continue;
            }

            let payload = self.prepare(&payload)?;
            let sequence = self.storage.next_sequence().await?;
            let mut rule =
                Rule::from_payload(id, sequence, &payload, RuleStatus::Published, Self::now());
            rule.is_system_rule = true;

            self.storage.save_rule(&rule).await?;
            self.record(&rule, AuditAction::Created, None, None).await?;
            installed.push(rule);
        }

        info!(count = installed.len(), "system rules installed");
        Ok(installed)
    }

    /// Audit entries for a rule, newest first
    pub async fn history(&self, rule_id: &str, limit: usize) -> ReconResult<Vec<AuditEntry>> {
        self.storage.get_history(rule_id, limit).await
    }

    /// Fields changed by one audit entry
    pub async fn diff(&self, audit_id: &str) -> ReconResult<Vec<FieldChange>> {
        let entry = self
            .storage
            .get_audit_entry(audit_id)
            .await?
            .ok_or_else(|| ReconError::AuditEntryNotFound(audit_id.to_string()))?;
        entry.changes()
    }

    /// Current advisory conflicts among enabled rules
    pub async fn conflicts(&self) -> ReconResult<Vec<RuleConflict>> {
        let rules = self.storage.list_rules().await?;
        Ok(detect_conflicts(&rules))
    }
}

#[async_trait]
impl<S: RuleRepository> RuleSource for RuleStore<S> {
    async fn list_published(&self, marketplace: Marketplace) -> ReconResult<Vec<Rule>> {
        Ok(self
            .storage
            .list_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.is_published() && rule.applies_to(marketplace))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::{Action, Condition, ConditionField};
    use crate::utils::MemoryStorage;

    fn payload(name: &str, value: &str) -> RulePayload {
        RulePayload::new(name)
            .with_condition(Condition::contains(ConditionField::FullText, value))
            .with_action(Action::add_tags([value]))
    }

    fn store() -> RuleStore<MemoryStorage> {
        RuleStore::new(MemoryStorage::new()).with_actor("tester")
    }

    #[tokio::test]
    async fn test_create_appends_created_entry() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();

        let history = store.history(&rule.id, 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::Created);
        assert!(history[0].previous_data.is_none());
        assert_eq!(history[0].new_data, Some(rule.snapshot()));
        assert_eq!(history[0].changed_by.as_deref(), Some("tester"));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_rejected_without_audit() {
        let mut store = store();
        let err = store
            .create(RulePayload::new("No conditions").with_action(Action::Skip))
            .await
            .unwrap_err();

        assert!(matches!(err, ReconError::Validation(_)));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_each_mutation_appends_one_entry() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();

        store
            .update(
                &rule.id,
                RuleUpdate {
                    priority: Some(70),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        store.set_enabled(&rule.id, false).await.unwrap();
        store.update(&rule.id, RuleUpdate::enabled(true)).await.unwrap();
        store.delete(&rule.id).await.unwrap();

        let actions: Vec<AuditAction> = store
            .history(&rule.id, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::Deleted,
                AuditAction::Enabled,
                AuditAction::Disabled,
                AuditAction::Updated,
                AuditAction::Created,
            ]
        );
    }

    #[tokio::test]
    async fn test_install_fills_in_missing_system_rules() {
        let mut store = store();
        store.install_system_rules().await.unwrap();
        store.storage.delete_rule("system_saque").await.unwrap();
        store
            .create(
                RulePayload::new("Saque manual")
                    .with_condition(Condition::contains(ConditionField::FullText, "saque"))
                    .with_action(Action::add_tags(["saque"])),
            )
            .await
            .unwrap();

        let reinstalled = store.install_system_rules().await.unwrap();

        assert_eq!(reinstalled.len(), 1);
        assert_eq!(reinstalled[0].id, "system_saque");
        assert!(reinstalled[0].is_system_rule);
        assert_eq!(store.list().await.unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_system_rules_only_toggle() {
        let mut store = store();
        let installed = store.install_system_rules().await.unwrap();
        assert_eq!(installed.len(), 7);
        assert!(store.install_system_rules().await.unwrap().is_empty());

        let err = store.delete("system_frete").await.unwrap_err();
        assert!(matches!(err, ReconError::SystemRule(_)));

        let err = store
            .update(
                "system_frete",
                RuleUpdate {
                    name: Some("Shipping".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::SystemRule(_)));

        let disabled = store.set_enabled("system_frete", false).await.unwrap();
        assert!(!disabled.enabled);
    }

    #[tokio::test]
    async fn test_restore_deleted_rule_recreates_it() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();
        store.delete(&rule.id).await.unwrap();

        let deletion = store.history(&rule.id, 1).await.unwrap().remove(0);
        let restored = store.restore(&deletion.id, false).await.unwrap();

        assert_eq!(restored.id, rule.id);
        assert_eq!(restored.snapshot(), rule.snapshot());

        let latest = store.history(&rule.id, 1).await.unwrap().remove(0);
        assert_eq!(latest.action, AuditAction::Created);
        assert!(latest.previous_data.is_none());
    }

    #[tokio::test]
    async fn test_restore_missing_side_is_validation_error() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();
        let creation = store.history(&rule.id, 1).await.unwrap().remove(0);

        let err = store.restore(&creation.id, false).await.unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));

        let err = store.restore("missing", true).await.unwrap_err();
        assert!(matches!(err, ReconError::AuditEntryNotFound(_)));
    }

    #[tokio::test]
    async fn test_draft_lifecycle() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();

        let staged = store
            .save_draft(&rule.id, payload("Frete v2", "envio"))
            .await
            .unwrap();
        assert!(staged.has_draft());
        assert_eq!(staged.name, "Frete");

        let published_rules = store.list_published(Marketplace::Shopee).await.unwrap();
        assert_eq!(published_rules[0].name, "Frete");

        let published = store.publish(&rule.id).await.unwrap();
        assert!(!published.has_draft());
        assert_eq!(published.name, "Frete v2");
        assert_eq!(published.version, 2);

        store
            .save_draft(&rule.id, payload("Frete v3", "x"))
            .await
            .unwrap();
        let discarded = store.discard_draft(&rule.id).await.unwrap();
        assert!(!discarded.has_draft());
        assert_eq!(discarded.version, 2);

        let history = store.history(&rule.id, 10).await.unwrap();
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_draft_rules_are_not_published_until_publish() {
        let mut store = store();
        let draft = store.create_draft(payload("Frete", "frete")).await.unwrap();
        assert!(store
            .list_published(Marketplace::Magalu)
            .await
            .unwrap()
            .is_empty());

        let published = store.publish(&draft.id).await.unwrap();
        assert_eq!(published.version, 1);
        assert_eq!(
            store.list_published(Marketplace::Magalu).await.unwrap().len(),
            1
        );

        let err = store.publish(&draft.id).await.unwrap_err();
        assert!(matches!(err, ReconError::Validation(_)));
    }

    #[tokio::test]
    async fn test_conflicts_are_advisory() {
        let mut store = store();
        store.create(payload("Frete", "frete")).await.unwrap();
        store
            .create(payload("Frete grátis", "frete grátis"))
            .await
            .unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.conflicts().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_diff_of_update() {
        let mut store = store();
        let rule = store.create(payload("Frete", "frete")).await.unwrap();
        store
            .update(
                &rule.id,
                RuleUpdate {
                    stop_on_match: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let entry = store.history(&rule.id, 1).await.unwrap().remove(0);
        let changes = store.diff(&entry.id).await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].field, "stop_on_match");
    }
}
