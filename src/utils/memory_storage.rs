//! In-memory storage implementation for testing

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::rules::audit::AuditEntry;
use crate::rules::model::Rule;
use crate::traits::*;
use crate::types::*;

fn poisoned() -> ReconError {
    ReconError::Storage("memory storage lock poisoned".to_string())
}

fn read<T>(lock: &RwLock<T>) -> ReconResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| poisoned())
}

fn write<T>(lock: &RwLock<T>) -> ReconResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| poisoned())
}

/// In-memory rules, audit log and ERP orders for testing and development.
///
/// Clones share the same underlying data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    rules: Arc<RwLock<Vec<Rule>>>,
    audit: Arc<RwLock<Vec<AuditEntry>>>,
    sequence: Arc<AtomicU64>,
    orders: Arc<RwLock<Vec<(Marketplace, OrderRecord)>>>,
    failing_ids: Arc<RwLock<HashSet<String>>>,
    manual_retry_after: Arc<RwLock<Option<u64>>>,
    lookup_calls: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Create a new memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an ERP order for a marketplace
    pub fn add_order(&self, marketplace: Marketplace, order: OrderRecord) -> ReconResult<()> {
        write(&self.orders)?.push((marketplace, order));
        Ok(())
    }

    /// Builder form of [`add_order`](Self::add_order) for tests
    pub fn with_orders(
        self,
        marketplace: Marketplace,
        orders: impl IntoIterator<Item = OrderRecord>,
    ) -> ReconResult<Self> {
        for order in orders {
            self.add_order(marketplace, order)?;
        }
        Ok(self)
    }

    /// Make lookups for this marketplace order id fail with a transport error
    pub fn fail_lookup_for(&self, external_id: impl Into<String>) -> ReconResult<()> {
        write(&self.failing_ids)?.insert(external_id.into());
        Ok(())
    }

    /// Make manual searches fail with a rate-limit signal
    pub fn rate_limit_manual_search(&self, retry_after_seconds: u64) -> ReconResult<()> {
        *write(&self.manual_retry_after)? = Some(retry_after_seconds);
        Ok(())
    }

    /// Number of `find_by_marketplace_id` calls served so far
    pub fn lookup_calls(&self) -> usize {
        self.lookup_calls.load(Ordering::SeqCst)
    }

    /// Full audit log in append order
    pub fn audit_log(&self) -> ReconResult<Vec<AuditEntry>> {
        Ok(read(&self.audit)?.clone())
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) -> ReconResult<()> {
        write(&self.rules)?.clear();
        write(&self.audit)?.clear();
        write(&self.orders)?.clear();
        write(&self.failing_ids)?.clear();
        *write(&self.manual_retry_after)? = None;
        Ok(())
    }
}

#[async_trait]
impl RuleRepository for MemoryStorage {
    async fn save_rule(&mut self, rule: &Rule) -> ReconResult<()> {
        let mut rules = write(&self.rules)?;
        if rules.iter().any(|r| r.id == rule.id) {
            return Err(ReconError::Storage(format!(
                "rule {} already exists",
                rule.id
            )));
        }
        rules.push(rule.clone());
        Ok(())
    }

    async fn get_rule(&self, rule_id: &str) -> ReconResult<Option<Rule>> {
        Ok(read(&self.rules)?.iter().find(|r| r.id == rule_id).cloned())
    }

    async fn list_rules(&self) -> ReconResult<Vec<Rule>> {
        let mut rules = read(&self.rules)?.clone();
        rules.sort_by_key(|r| r.sequence);
        Ok(rules)
    }

    async fn update_rule(&mut self, rule: &Rule) -> ReconResult<()> {
        let mut rules = write(&self.rules)?;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                *existing = rule.clone();
                Ok(())
            }
            None => Err(ReconError::RuleNotFound(rule.id.clone())),
        }
    }

    async fn delete_rule(&mut self, rule_id: &str) -> ReconResult<()> {
        let mut rules = write(&self.rules)?;
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        if rules.len() == before {
            Err(ReconError::RuleNotFound(rule_id.to_string()))
        } else {
            Ok(())
        }
    }

    async fn next_sequence(&mut self) -> ReconResult<u64> {
        Ok(self.sequence.fetch_add(1, Ordering::SeqCst))
    }

    async fn append(&mut self, entry: &AuditEntry) -> ReconResult<()> {
        write(&self.audit)?.push(entry.clone());
        Ok(())
    }

    async fn get_audit_entry(&self, audit_id: &str) -> ReconResult<Option<AuditEntry>> {
        Ok(read(&self.audit)?.iter().find(|e| e.id == audit_id).cloned())
    }

    async fn get_history(&self, rule_id: &str, limit: usize) -> ReconResult<Vec<AuditEntry>> {
        Ok(read(&self.audit)?
            .iter()
            .rev()
            .filter(|e| e.rule_id == rule_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RuleSource for MemoryStorage {
    async fn list_published(&self, marketplace: Marketplace) -> ReconResult<Vec<Rule>> {
        Ok(self
            .list_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.is_published() && rule.applies_to(marketplace))
            .collect())
    }
}

#[async_trait]
impl OrderLookup for MemoryStorage {
    async fn find_by_marketplace_id(
        &self,
        marketplace: Marketplace,
        external_id: &str,
    ) -> ReconResult<Vec<OrderRecord>> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);

        if read(&self.failing_ids)?.contains(external_id) {
            return Err(ReconError::Lookup(format!(
                "connection reset while looking up {external_id}"
            )));
        }

        Ok(read(&self.orders)?
            .iter()
            .filter(|(m, order)| *m == marketplace && order.marketplace_order_id == external_id)
            .map(|(_, order)| order.clone())
            .collect())
    }

    async fn search_manual(
        &self,
        query: &str,
        marketplace: Marketplace,
    ) -> ReconResult<Vec<OrderRecord>> {
        if let Some(retry_after_seconds) = *read(&self.manual_retry_after)? {
            return Err(ReconError::RateLimited {
                retry_after_seconds,
            });
        }

        let needle = query.trim().to_lowercase();
        Ok(read(&self.orders)?
            .iter()
            .filter(|(m, _)| *m == marketplace)
            .map(|(_, order)| order)
            .filter(|order| {
                order.marketplace_order_id.to_lowercase().contains(&needle)
                    || order
                        .order_number
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
                    || order
                        .customer_name
                        .as_deref()
                        .is_some_and(|n| n.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    #[tokio::test]
    async fn test_lookup_distinguishes_not_found_from_failure() {
        let storage = MemoryStorage::new()
            .with_orders(
                Marketplace::Shopee,
                [OrderRecord::new("erp-1", "X1", BigDecimal::from(100), 1)],
            )
            .unwrap();
        storage.fail_lookup_for("BROKEN").unwrap();

        let found = storage
            .find_by_marketplace_id(Marketplace::Shopee, "X1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let other_marketplace = storage
            .find_by_marketplace_id(Marketplace::Magalu, "X1")
            .await
            .unwrap();
        assert!(other_marketplace.is_empty());

        let err = storage
            .find_by_marketplace_id(Marketplace::Shopee, "BROKEN")
            .await
            .unwrap_err();
        assert!(matches!(err, ReconError::Lookup(_)));
        assert_eq!(storage.lookup_calls(), 3);
    }

    #[tokio::test]
    async fn test_manual_search_by_customer_and_rate_limit() {
        let mut order = OrderRecord::new("erp-1", "X1", BigDecimal::from(100), 1);
        order.customer_name = Some("Maria Souza".into());
        let storage = MemoryStorage::new()
            .with_orders(Marketplace::Shopee, [order])
            .unwrap();

        let hits = storage
            .search_manual("souza", Marketplace::Shopee)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);

        storage.rate_limit_manual_search(30).unwrap();
        let err = storage
            .search_manual("souza", Marketplace::Shopee)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_limited() {
        use crate::rules::audit::AuditAction;
        use crate::rules::model::{RulePayload, RuleStatus};

        let mut storage = MemoryStorage::new();
        let rule = Rule::from_payload(
            "r1",
            0,
            &RulePayload::new("r1"),
            RuleStatus::Published,
            chrono::Utc::now().naive_utc(),
        );
        storage.save_rule(&rule).await.unwrap();
        for action in [AuditAction::Created, AuditAction::Disabled, AuditAction::Enabled] {
            let entry = AuditEntry::record(&rule, action, None, Some(rule.snapshot()), None);
            storage.append(&entry).await.unwrap();
        }

        let history = storage.get_history("r1", 2).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, AuditAction::Enabled);
        assert_eq!(history[1].action, AuditAction::Disabled);
    }
}
