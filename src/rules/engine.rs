//! Rule evaluation
//!
//! Rules run in `(priority desc, sequence asc)` order. Matched rules apply
//! their actions in declaration order; `set_*` actions overwrite earlier
//! values, so the last matching rule wins. A matched rule with
//! `stop_on_match` ends evaluation for the row.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeSet;
use tracing::debug;

use crate::rules::matcher::ConditionMatcher;
use crate::rules::model::{Action, ConditionField, ConditionLogic, Rule, RulePayload, RuleStatus};
use crate::types::{Marketplace, PaymentRecord};

/// Tag that marks a row as a refund
pub const REFUND_TAG: &str = "reembolso";
/// Tag that marks a row as an adjustment
pub const ADJUSTMENT_TAG: &str = "ajuste";

/// The payment fields rules can inspect
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleInput {
    pub description: String,
    pub transaction_type: String,
    pub amount: BigDecimal,
    pub order_id: Option<String>,
}

impl RuleInput {
    pub fn new(
        description: impl Into<String>,
        transaction_type: impl Into<String>,
        amount: BigDecimal,
    ) -> Self {
        Self {
            description: description.into(),
            transaction_type: transaction_type.into(),
            amount,
            order_id: None,
        }
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn from_payment(payment: &PaymentRecord) -> Self {
        Self {
            description: payment.transaction_description.clone(),
            transaction_type: payment.transaction_type.clone(),
            amount: payment.net_amount.clone(),
            order_id: Some(payment.marketplace_order_id.clone()),
        }
    }

    /// Description and type joined by a space
    pub fn full_text(&self) -> String {
        format!("{} {}", self.description, self.transaction_type)
    }
}

/// How one rule fared against one row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTrace {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    pub matched_conditions: usize,
    pub total_conditions: usize,
    pub stopped_processing: bool,
}

/// Accumulated effect of all matched rules on one row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub applied_tags: BTreeSet<String>,
    pub type_override: Option<String>,
    pub description_override: Option<String>,
    pub category_override: Option<String>,
    /// `Some(true)` for expense, `Some(false)` for income
    pub expense_flag: Option<bool>,
    pub skipped: bool,
    pub flagged_for_review: bool,
    pub review_note: Option<String>,
    pub matched_rule_ids: Vec<String>,
    pub rules_evaluated: usize,
    pub trace: Vec<RuleTrace>,
}

impl RuleOutcome {
    pub fn matched(&self) -> bool {
        !self.matched_rule_ids.is_empty()
    }

    fn apply_actions(&mut self, actions: &[Action]) {
        for action in actions {
            match action {
                Action::AddTags { tags } => self.applied_tags.extend(tags.iter().cloned()),
                Action::SetType { transaction_type } => {
                    self.type_override = Some(transaction_type.clone())
                }
                Action::SetDescription { description } => {
                    self.description_override = Some(description.clone())
                }
                Action::SetCategory { category } => self.category_override = Some(category.clone()),
                Action::MarkExpense => self.expense_flag = Some(true),
                Action::MarkIncome => self.expense_flag = Some(false),
                Action::Skip => self.skipped = true,
                Action::FlagReview { note } => {
                    self.flagged_for_review = true;
                    if note.is_some() {
                        self.review_note = note.clone();
                    }
                }
            }
        }
    }

    /// Produce a new payment record with this outcome applied
    pub fn apply_to(&self, payment: &PaymentRecord) -> PaymentRecord {
        let mut updated = payment.clone();
        updated.tags.extend(self.applied_tags.iter().cloned());
        if let Some(transaction_type) = &self.type_override {
            updated.transaction_type = transaction_type.clone();
        }
        if let Some(description) = &self.description_override {
            updated.transaction_description = description.clone();
        }
        if let Some(category) = &self.category_override {
            updated.category = Some(category.clone());
        }
        if let Some(is_expense) = self.expense_flag {
            updated.is_expense = is_expense;
        }
        updated.is_refund |= self.applied_tags.contains(REFUND_TAG);
        updated.is_adjustment |= self.applied_tags.contains(ADJUSTMENT_TAG);
        updated
    }
}

/// A rule with its conditions prepared for evaluation
#[derive(Debug, Clone)]
struct CompiledRule {
    rule: Rule,
    matchers: Vec<ConditionMatcher>,
}

impl CompiledRule {
    fn compile(rule: Rule) -> Self {
        let matchers = rule.conditions.iter().map(ConditionMatcher::compile).collect();
        Self { rule, matchers }
    }

    /// Returns whether the rule matched and how many conditions held
    fn check(&self, input: &RuleInput) -> (bool, usize) {
        if self.matchers.is_empty() {
            return (false, 0);
        }

        let held = self.matchers.iter().filter(|m| m.matches(input)).count();
        let matched = match self.rule.condition_logic {
            ConditionLogic::And => held == self.matchers.len(),
            ConditionLogic::Or => held > 0,
        };
        (matched, held)
    }
}

fn run<'a>(rules: impl Iterator<Item = &'a CompiledRule>, input: &RuleInput) -> RuleOutcome {
    let mut outcome = RuleOutcome::default();

    for compiled in rules {
        let rule = &compiled.rule;
        let (matched, held) = compiled.check(input);
        let stopped = matched && rule.stop_on_match;

        outcome.rules_evaluated += 1;
        outcome.trace.push(RuleTrace {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            matched,
            matched_conditions: held,
            total_conditions: compiled.matchers.len(),
            stopped_processing: stopped,
        });

        if matched {
            outcome.matched_rule_ids.push(rule.id.clone());
            outcome.apply_actions(&rule.actions);
        }
        if stopped {
            debug!(rule_id = %rule.id, "stop_on_match halted evaluation");
            break;
        }
    }

    outcome
}

/// Evaluates published, enabled rules against payment rows
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Build an engine from a rule set; drafts and disabled rules are dropped
    pub fn new(rules: impl IntoIterator<Item = Rule>) -> Self {
        let mut rules: Vec<Rule> = rules
            .into_iter()
            .filter(|rule| rule.enabled && rule.status == RuleStatus::Published)
            .collect();
        rules.sort_by_key(|rule| (Reverse(rule.priority), rule.sequence));

        Self {
            rules: rules.into_iter().map(CompiledRule::compile).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rule ids in evaluation order
    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|c| c.rule.id.as_str()).collect()
    }

    pub fn evaluate(&self, input: &RuleInput, marketplace: Marketplace) -> RuleOutcome {
        run(
            self.rules.iter().filter(|c| c.rule.applies_to(marketplace)),
            input,
        )
    }

    /// Evaluate a payment and return the updated copy alongside the outcome
    pub fn apply(
        &self,
        payment: &PaymentRecord,
        marketplace: Marketplace,
    ) -> (PaymentRecord, RuleOutcome) {
        let outcome = self.evaluate(&RuleInput::from_payment(payment), marketplace);
        (outcome.apply_to(payment), outcome)
    }
}

/// One-shot evaluation of free text against a rule set
pub fn evaluate(
    text: &str,
    transaction_type: &str,
    amount: BigDecimal,
    rules: &[Rule],
    marketplace: Marketplace,
) -> RuleOutcome {
    RuleEngine::new(rules.iter().cloned())
        .evaluate(&RuleInput::new(text, transaction_type, amount), marketplace)
}

/// Result of previewing a rule against one sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTestResult {
    pub matched: bool,
    pub applied_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTestReport {
    pub results: Vec<RuleTestResult>,
    pub match_count: usize,
    pub total_tested: usize,
}

fn preview_rule(payload: &RulePayload) -> CompiledRule {
    let mut rule = Rule::from_payload(
        "preview",
        0,
        payload,
        RuleStatus::Published,
        chrono::Utc::now().naive_utc(),
    );
    rule.enabled = true;
    CompiledRule::compile(rule)
}

fn preview_result(compiled: &CompiledRule, input: &RuleInput) -> RuleTestResult {
    let outcome = run(std::iter::once(compiled), input);
    RuleTestResult {
        matched: outcome.matched(),
        applied_tags: outcome.applied_tags.into_iter().collect(),
    }
}

/// Preview a rule against sample text, using the production evaluation path
pub fn test_rule(payload: &RulePayload, sample_text: &str) -> RuleTestResult {
    let input = RuleInput::new(sample_text, "", BigDecimal::from(0));
    preview_result(&preview_rule(payload), &input)
}

/// Preview a rule against a batch of sample rows
pub fn test_rule_against(payload: &RulePayload, samples: &[RuleInput]) -> RuleTestReport {
    let compiled = preview_rule(payload);
    let results: Vec<RuleTestResult> = samples
        .iter()
        .map(|input| preview_result(&compiled, input))
        .collect();
    let match_count = results.iter().filter(|r| r.matched).count();

    RuleTestReport {
        total_tested: results.len(),
        match_count,
        results,
    }
}

/// Two rules whose first conditions overlap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConflict {
    pub rule_id: String,
    pub rule_name: String,
    pub conflicting_rule_id: String,
    pub conflicting_rule_name: String,
    pub field: ConditionField,
    pub reason: String,
}

/// Flag enabled rule pairs whose first conditions share a field and where
/// one value contains the other. Advisory only.
pub fn detect_conflicts(rules: &[Rule]) -> Vec<RuleConflict> {
    let candidates: Vec<(&Rule, ConditionField, String)> = rules
        .iter()
        .filter(|rule| rule.enabled)
        .filter_map(|rule| {
            rule.conditions
                .first()
                .map(|c| (rule, c.field, c.value.trim().to_lowercase()))
        })
        .filter(|(_, _, value)| !value.is_empty())
        .collect();

    let mut conflicts = Vec::new();
    for (i, (rule, field, value)) in candidates.iter().enumerate() {
        for (other, other_field, other_value) in &candidates[i + 1..] {
            if field != other_field {
                continue;
            }
            if value.contains(other_value.as_str()) || other_value.contains(value.as_str()) {
                conflicts.push(RuleConflict {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    conflicting_rule_id: other.id.clone(),
                    conflicting_rule_name: other.name.clone(),
                    field: *field,
                    reason: format!("\"{value}\" overlaps \"{other_value}\""),
                });
            }
        }
    }
    conflicts
}
