//! Payment to ERP order matching
//!
//! Each payment row ends in one of three terminal states: `linked`,
//! `unmatched` or `multiple_entries`. Rows whose marketplace order ids share
//! a base id (e.g. `123`, `123_AJUSTE`, `123_REEMBOLSO_2`) form a group; a
//! group with more than one row is a split settlement and every row in it is
//! `multiple_entries`.

use bigdecimal::BigDecimal;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::traits::OrderLookup;
use crate::types::*;

const NO_ORDER_ID: &str = "payment has no marketplace order id";

static SUFFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"_(?:AJUSTE|REEMBOLSO|RETIRADA)(?:_\d+)?$|_\d+$").expect("suffix regex")
});

/// Strip settlement suffixes from a marketplace order id
pub fn base_order_id(external_id: &str) -> &str {
    let trimmed = external_id.trim();
    match SUFFIX.find(trimmed) {
        Some(suffix) if suffix.start() > 0 => &trimmed[..suffix.start()],
        _ => trimmed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Linked,
    Unmatched,
    MultipleEntries,
}

/// Outcome of matching one payment row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub status: MatchStatus,
    /// ERP order id when exactly one order was found
    pub order_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderRecord>,
    /// Other rows settling the same order
    pub related_payment_ids: Vec<String>,
    /// Sum of net amounts across the group, for `multiple_entries`
    pub net_balance: Option<BigDecimal>,
    /// 0.0 to 1.0
    pub confidence: f64,
    pub diagnostic: Option<String>,
}

impl MatchResult {
    pub fn unmatched(diagnostic: impl Into<String>) -> Self {
        Self {
            status: MatchStatus::Unmatched,
            order_id: None,
            order: None,
            related_payment_ids: Vec::new(),
            net_balance: None,
            confidence: 0.0,
            diagnostic: Some(diagnostic.into()),
        }
    }

    pub fn linked(order: OrderRecord) -> Self {
        Self {
            status: MatchStatus::Linked,
            order_id: Some(order.id.clone()),
            order: Some(order),
            related_payment_ids: Vec::new(),
            net_balance: None,
            confidence: 1.0,
            diagnostic: None,
        }
    }

    /// Whether an ERP order is attached, directly or through a split group
    pub fn has_order(&self) -> bool {
        self.order.is_some()
    }
}

/// Turn a lookup response into a single-row match result
pub fn classify(base_id: &str, lookup: Result<Vec<OrderRecord>, String>) -> MatchResult {
    match lookup {
        Err(message) => MatchResult::unmatched(message),
        Ok(mut orders) => match orders.len() {
            0 => MatchResult::unmatched(format!("no ERP order found for {base_id}")),
            1 => MatchResult::linked(orders.remove(0)),
            n => {
                let ids: Vec<&str> = orders.iter().map(|o| o.id.as_str()).collect();
                MatchResult::unmatched(format!(
                    "{n} ERP orders share marketplace id {base_id} ({}), link manually",
                    ids.join(", ")
                ))
            }
        },
    }
}

/// Rows of a batch grouped by base order id, in first-seen order.
///
/// Rows without an order id belong to no group.
#[derive(Debug, Clone, Default)]
pub struct EntryGroups {
    groups: Vec<(String, Vec<usize>)>,
    by_row: Vec<Option<usize>>,
}

impl EntryGroups {
    pub fn build(payments: &[PaymentRecord]) -> Self {
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
        let mut by_row = Vec::with_capacity(payments.len());

        for (row, payment) in payments.iter().enumerate() {
            let base = base_order_id(&payment.marketplace_order_id);
            if base.is_empty() {
                by_row.push(None);
                continue;
            }
            let group = *index.entry(base).or_insert_with(|| {
                groups.push((base.to_string(), Vec::new()));
                groups.len() - 1
            });
            groups[group].1.push(row);
            by_row.push(Some(group));
        }

        Self { groups, by_row }
    }

    /// Distinct base order ids
    pub fn base_ids(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(base, _)| base.as_str())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn group_of(&self, row: usize) -> Option<usize> {
        self.by_row.get(row).copied().flatten()
    }

    /// Rows that share a group with `row`, excluding it
    pub fn related_rows(&self, row: usize) -> Vec<usize> {
        self.group_of(row)
            .map(|g| {
                self.groups[g]
                    .1
                    .iter()
                    .copied()
                    .filter(|&r| r != row)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A lookup that failed at the transport level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupFailure {
    pub base_order_id: String,
    pub message: String,
}

/// Match results for a whole batch, in payment order
#[derive(Debug, Clone, Default)]
pub struct BatchMatch {
    pub results: Vec<MatchResult>,
    pub failures: Vec<LookupFailure>,
}

/// Matches payment rows to ERP orders through an [`OrderLookup`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchEngine;

impl MatchEngine {
    pub fn new() -> Self {
        Self
    }

    /// Match a single row, without batch grouping
    pub async fn match_payment<L: OrderLookup + ?Sized>(
        &self,
        payment: &PaymentRecord,
        marketplace: Marketplace,
        lookup: &L,
    ) -> MatchResult {
        let base = base_order_id(&payment.marketplace_order_id);
        if base.is_empty() {
            return MatchResult::unmatched(NO_ORDER_ID);
        }
        let response = lookup
            .find_by_marketplace_id(marketplace, base)
            .await
            .map_err(|e| {
                warn!(order_id = base, error = %e, "order lookup failed");
                e.to_string()
            });
        classify(base, response)
    }

    /// Match a batch: one lookup per base order id, at most `concurrency` in
    /// flight, then mark split settlements.
    pub async fn match_batch<L: OrderLookup + ?Sized>(
        &self,
        payments: &[PaymentRecord],
        marketplace: Marketplace,
        lookup: &L,
        concurrency: usize,
    ) -> BatchMatch {
        let groups = EntryGroups::build(payments);

        let responses: Vec<(String, Result<Vec<OrderRecord>, String>)> =
            stream::iter(groups.base_ids().map(str::to_string).collect::<Vec<_>>())
                .map(|base| async move {
                    let response = lookup
                        .find_by_marketplace_id(marketplace, &base)
                        .await
                        .map_err(|e| e.to_string());
                    (base, response)
                })
                .buffered(concurrency.max(1))
                .collect()
                .await;

        let mut failures = Vec::new();
        // (result, lookup failed)
        let per_group: Vec<(MatchResult, bool)> = responses
            .into_iter()
            .map(|(base, response)| {
                let failed = response.is_err();
                if let Err(message) = &response {
                    warn!(order_id = %base, error = %message, "order lookup failed");
                    failures.push(LookupFailure {
                        base_order_id: base.clone(),
                        message: message.clone(),
                    });
                }
                (classify(&base, response), failed)
            })
            .collect();

        let results = (0..payments.len())
            .map(|row| {
                let Some(group) = groups.group_of(row) else {
                    return MatchResult::unmatched(NO_ORDER_ID);
                };
                let (result, failed) = per_group[group].clone();
                let related = groups.related_rows(row);
                if related.is_empty() {
                    return result;
                }

                let net_balance = groups.groups[group]
                    .1
                    .iter()
                    .map(|&r| payments[r].net_amount.clone())
                    .fold(BigDecimal::from(0), |acc, amount| acc + amount);
                debug!(
                    payment_id = %payments[row].id,
                    entries = related.len() + 1,
                    "split settlement"
                );

                let related_payment_ids = related
                    .into_iter()
                    .map(|r| payments[r].id.clone())
                    .collect();

                // A failed lookup stays unmatched; the group is kept for context
                if failed {
                    return MatchResult {
                        related_payment_ids,
                        net_balance: Some(net_balance),
                        ..result
                    };
                }

                let confidence = if result.has_order() { 1.0 } else { 0.0 };
                MatchResult {
                    status: MatchStatus::MultipleEntries,
                    confidence,
                    related_payment_ids,
                    net_balance: Some(net_balance),
                    ..result
                }
            })
            .collect();

        BatchMatch { results, failures }
    }

    /// Link a row to an order chosen by a person
    pub fn manual_link(&self, payment: &PaymentRecord, order: OrderRecord) -> MatchResult {
        debug!(payment_id = %payment.id, order_id = %order.id, "manual link");
        MatchResult {
            diagnostic: Some("manual".to_string()),
            ..MatchResult::linked(order)
        }
    }

    /// Manual search against the ERP.
    ///
    /// Rate-limit errors are returned as-is; the caller owns the backoff.
    pub async fn search_manual<L: OrderLookup + ?Sized>(
        &self,
        query: &str,
        marketplace: Marketplace,
        lookup: &L,
    ) -> ReconResult<Vec<OrderRecord>> {
        lookup
            .search_manual(query, marketplace)
            .await
            .inspect_err(|e| {
                if let Some(delay) = e.retry_after() {
                    warn!(retry_after_secs = delay.as_secs(), "manual search rate limited");
                }
            })
    }
}
