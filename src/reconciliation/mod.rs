//! Batch reconciliation of marketplace payments against ERP orders
//!
//! A run has two passes. The first groups rows by base order id and looks up
//! each distinct id once. The second decorates every row independently with
//! its match result, rule outcome and fee breakdown. Only transport-level
//! lookup failures are escalated to [`ReconciliationReport::errors`]; every
//! other problem stays local to its row.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, instrument};

use crate::config::{EngineConfig, ReconcileOptions};
use crate::fees::{EscrowComparison, EscrowTolerance, FeeBreakdown, FeeCalculator, FeeOverrides};
use crate::matching::{LookupFailure, MatchEngine, MatchResult, MatchStatus};
use crate::rules::engine::{RuleEngine, RuleOutcome};
use crate::traits::{OrderLookup, RuleSource};
use crate::types::*;

pub const TAG_SELLER_VOUCHER: &str = "cupom loja";
pub const TAG_AFFILIATE_COMMISSION: &str = "comissão afiliado";
pub const TAG_LEVE_MAIS_PAGUE_MENOS: &str = "leve mais pague menos";
pub const TAG_MULTI_ENTRY: &str = "multi-entry";

/// Tags derived from the fee breakdown, recomputed with it
const FEE_TAGS: [&str; 3] = [
    TAG_SELLER_VOUCHER,
    TAG_AFFILIATE_COMMISSION,
    TAG_LEVE_MAIS_PAGUE_MENOS,
];

/// A payment row with everything the reconciliation learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratedPaymentRow {
    /// The payment after rule actions and automatic tags
    pub payment: PaymentRecord,
    pub match_result: MatchResult,
    pub rule_outcome: RuleOutcome,
    pub fee_breakdown: Option<FeeBreakdown>,
    /// Why fees could not be computed for a matched order
    pub fee_error: Option<String>,
    /// Net value the order should have paid out
    pub expected_net: Option<BigDecimal>,
    pub escrow: Option<EscrowComparison>,
    /// Excluded from import by a `skip` rule
    pub skipped: bool,
    pub flagged_for_review: bool,
}

impl DecoratedPaymentRow {
    pub fn has_escrow_discrepancy(&self) -> bool {
        self.escrow
            .as_ref()
            .is_some_and(EscrowComparison::is_discrepancy)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub total: usize,
    pub linked: usize,
    pub unmatched: usize,
    pub multi_entry: usize,
    /// Rows attached to an ERP order, whether linked or split
    pub with_order: usize,
    pub skipped: usize,
    pub flagged_for_review: usize,
    pub fee_errors: usize,
    pub escrow_discrepancies: usize,
    /// Sum of net amounts of rows not skipped
    pub total_net_amount: BigDecimal,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
}

impl ReconciliationSummary {
    fn from_rows(rows: &[DecoratedPaymentRow]) -> Self {
        let mut summary = Self {
            total: rows.len(),
            ..Default::default()
        };

        for row in rows {
            match row.match_result.status {
                MatchStatus::Linked => summary.linked += 1,
                MatchStatus::Unmatched => summary.unmatched += 1,
                MatchStatus::MultipleEntries => summary.multi_entry += 1,
            }
            if row.match_result.has_order() {
                summary.with_order += 1;
            }
            if row.skipped {
                summary.skipped += 1;
            } else {
                summary.total_net_amount += &row.payment.net_amount;
            }
            if row.flagged_for_review {
                summary.flagged_for_review += 1;
            }
            if row.fee_error.is_some() {
                summary.fee_errors += 1;
            }
            if row.has_escrow_discrepancy() {
                summary.escrow_discrepancies += 1;
            }
            if let Some(date) = row.payment.payment_date {
                summary.period_start = Some(summary.period_start.map_or(date, |d| d.min(date)));
                summary.period_end = Some(summary.period_end.map_or(date, |d| d.max(date)));
            }
        }

        summary
    }

    /// Share of rows attached to an ERP order, in percent
    pub fn match_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.with_order as f64 / self.total as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub rows: Vec<DecoratedPaymentRow>,
    pub summary: ReconciliationSummary,
    /// Lookup transport failures; the affected rows are `unmatched`
    pub errors: Vec<LookupFailure>,
}

/// Orchestrates matching, rule evaluation and fee computation
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    fee_calculator: FeeCalculator,
    match_engine: MatchEngine,
    escrow: EscrowTolerance,
    options: ReconcileOptions,
}

impl ReconciliationEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            fee_calculator: FeeCalculator::new(config.fees),
            match_engine: MatchEngine::new(),
            escrow: config.escrow,
            options: config.reconcile,
        }
    }

    pub fn fee_calculator(&self) -> &FeeCalculator {
        &self.fee_calculator
    }

    pub fn match_engine(&self) -> &MatchEngine {
        &self.match_engine
    }

    /// Reconcile a batch of payments from one marketplace
    #[instrument(skip_all, fields(marketplace = %marketplace, payments = payments.len()))]
    pub async fn reconcile<L, R>(
        &self,
        payments: &[PaymentRecord],
        marketplace: Marketplace,
        lookup: &L,
        rule_source: &R,
    ) -> ReconResult<ReconciliationReport>
    where
        L: OrderLookup + ?Sized,
        R: RuleSource + ?Sized,
    {
        let rules = RuleEngine::new(rule_source.list_published(marketplace).await?);
        debug!(rules = rules.len(), "rules loaded");

        let batch = self
            .match_engine
            .match_batch(payments, marketplace, lookup, self.options.lookup_concurrency)
            .await;

        let rows: Vec<DecoratedPaymentRow> = payments
            .iter()
            .zip(batch.results)
            .map(|(payment, match_result)| self.decorate(payment, match_result, &rules, marketplace))
            .collect();

        let summary = ReconciliationSummary::from_rows(&rows);
        info!(
            total = summary.total,
            linked = summary.linked,
            unmatched = summary.unmatched,
            multi_entry = summary.multi_entry,
            lookup_errors = batch.failures.len(),
            "reconciliation finished"
        );

        Ok(ReconciliationReport {
            rows,
            summary,
            errors: batch.failures,
        })
    }

    fn decorate(
        &self,
        payment: &PaymentRecord,
        match_result: MatchResult,
        rules: &RuleEngine,
        marketplace: Marketplace,
    ) -> DecoratedPaymentRow {
        let (mut updated, rule_outcome) = rules.apply(payment, marketplace);
        if match_result.status == MatchStatus::MultipleEntries {
            updated.tags.insert(TAG_MULTI_ENTRY.to_string());
        }

        let mut row = DecoratedPaymentRow {
            payment: updated,
            match_result,
            skipped: rule_outcome.skipped,
            flagged_for_review: rule_outcome.flagged_for_review,
            rule_outcome,
            fee_breakdown: None,
            fee_error: None,
            expected_net: None,
            escrow: None,
        };
        self.refresh_fees(&mut row, marketplace);
        row
    }

    /// Recompute a row's fee breakdown, e.g. after its overrides changed
    pub fn refresh_fees(&self, row: &mut DecoratedPaymentRow, marketplace: Marketplace) {
        row.fee_breakdown = None;
        row.fee_error = None;
        row.expected_net = None;
        row.escrow = None;
        for tag in FEE_TAGS {
            if !row.rule_outcome.applied_tags.contains(tag) {
                row.payment.tags.remove(tag);
            }
        }

        let Some(order) = row.match_result.order.as_ref() else {
            return;
        };

        let breakdown = match self.fee_calculator.compute(
            marketplace,
            order,
            row.payment.fee_overrides.as_ref(),
        ) {
            Ok(breakdown) => breakdown,
            Err(e) => {
                debug!(payment_id = %row.payment.id, error = %e, "fee computation failed");
                row.fee_error = Some(e.to_string());
                return;
            }
        };

        if marketplace == Marketplace::Shopee {
            let zero = BigDecimal::from(0);
            if breakdown.seller_voucher > zero {
                row.payment.tags.insert(TAG_SELLER_VOUCHER.to_string());
            }
            if breakdown.ams_commission_fee > zero {
                row.payment.tags.insert(TAG_AFFILIATE_COMMISSION.to_string());
            }
            if breakdown.leve_mais_pague_menos {
                row.payment.tags.insert(TAG_LEVE_MAIS_PAGUE_MENOS.to_string());
            }
        }

        row.escrow = order
            .escrow_amount
            .as_ref()
            .map(|escrow| breakdown.compare_escrow(escrow, &self.escrow));
        row.expected_net = Some(breakdown.net_value.clone());
        row.fee_breakdown = Some(breakdown);
    }
}

/// Apply the same overrides to every selected row.
///
/// Fields set in `overrides` replace a row's existing values; applying the
/// same overrides twice yields the same rows.
pub fn apply_bulk_overrides(
    payments: &[PaymentRecord],
    payment_ids: &[String],
    overrides: &FeeOverrides,
) -> Vec<PaymentRecord> {
    let selected: HashSet<&str> = payment_ids.iter().map(String::as_str).collect();

    payments
        .iter()
        .map(|payment| {
            if !selected.contains(payment.id.as_str()) {
                return payment.clone();
            }
            let merged = payment
                .fee_overrides
                .clone()
                .unwrap_or_default()
                .merged_with(overrides);
            let mut updated = payment.clone();
            updated.fee_overrides = (!merged.is_empty()).then_some(merged);
            updated
        })
        .collect()
}
