//! Condition evaluation against a payment row
//!
//! Text comparisons lower-case both sides but do not fold accents, so
//! `anuncio` does not match `Anúncios`. Regex conditions compile once with
//! the case-insensitive flag; a pattern that fails to compile never matches.

use bigdecimal::BigDecimal;
use regex::{Regex, RegexBuilder};
use std::str::FromStr;
use tracing::warn;

use crate::rules::engine::RuleInput;
use crate::rules::model::{Condition, ConditionField, ConditionOperator};

/// Tolerance for numeric equality on amounts
fn cent() -> BigDecimal {
    BigDecimal::from(1) / BigDecimal::from(100)
}

fn parse_number(value: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(value.trim()).ok()
}

/// Compile a condition pattern with the same flags evaluation uses
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

/// A condition prepared for repeated evaluation
#[derive(Debug, Clone)]
pub struct ConditionMatcher {
    condition: Condition,
    expected: String,
    regex: Option<Regex>,
}

impl ConditionMatcher {
    pub fn compile(condition: &Condition) -> Self {
        let regex = match condition.operator {
            ConditionOperator::Regex => match compile_pattern(&condition.value) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    warn!(pattern = %condition.value, error = %e, "invalid rule regex, condition will not match");
                    None
                }
            },
            _ => None,
        };

        Self {
            condition: condition.clone(),
            expected: condition.value.trim().to_lowercase(),
            regex,
        }
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    pub fn matches(&self, input: &RuleInput) -> bool {
        if self.condition.field.is_numeric() && self.condition.operator.supports_numeric() {
            return self.matches_amount(&input.amount);
        }
        if self.condition.operator.is_numeric_only() {
            return false;
        }

        let actual = field_text(self.condition.field, input);
        self.matches_text(&actual)
    }

    fn matches_text(&self, actual: &str) -> bool {
        if self.condition.operator == ConditionOperator::Regex {
            return self
                .regex
                .as_ref()
                .is_some_and(|regex| regex.is_match(actual));
        }

        let actual = actual.trim().to_lowercase();
        let expected = self.expected.as_str();
        match self.condition.operator {
            ConditionOperator::Contains => actual.contains(expected),
            ConditionOperator::NotContains => !actual.contains(expected),
            ConditionOperator::Equals => actual == expected,
            ConditionOperator::NotEquals => actual != expected,
            ConditionOperator::StartsWith => actual.starts_with(expected),
            ConditionOperator::EndsWith => actual.ends_with(expected),
            _ => false,
        }
    }

    fn matches_amount(&self, amount: &BigDecimal) -> bool {
        let Some(expected) = parse_number(&self.condition.value) else {
            return false;
        };

        match self.condition.operator {
            ConditionOperator::Equals => (amount - &expected).abs() < cent(),
            ConditionOperator::NotEquals => (amount - &expected).abs() >= cent(),
            ConditionOperator::GreaterThan => *amount > expected,
            ConditionOperator::LessThan => *amount < expected,
            ConditionOperator::Between => self
                .condition
                .value2
                .as_deref()
                .and_then(parse_number)
                .is_some_and(|upper| *amount >= expected && *amount <= upper),
            _ => false,
        }
    }
}

fn field_text(field: ConditionField, input: &RuleInput) -> String {
    match field {
        ConditionField::FullText => input.full_text(),
        ConditionField::Description => input.description.clone(),
        ConditionField::TransactionType => input.transaction_type.clone(),
        ConditionField::Amount => input.amount.to_string(),
        ConditionField::OrderId => input.order_id.clone().unwrap_or_default(),
    }
}
