//! Validation utilities for rule payloads

use std::collections::BTreeSet;

use crate::rules::matcher::compile_pattern;
use crate::rules::model::{
    Action, Condition, ConditionOperator, RulePayload, MAX_PRIORITY, MIN_PRIORITY,
};
use crate::types::{ValidationCode, ValidationIssue};
use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Maximum rule name length, in characters
pub const MAX_NAME_LENGTH: usize = 100;

fn is_number(value: &str) -> bool {
    BigDecimal::from_str(value.trim()).is_ok()
}

fn validate_condition(condition: &Condition, index: usize) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let prefix = format!("conditions[{index}]");

    if condition.value.trim().is_empty() {
        issues.push(ValidationIssue::new(
            format!("{prefix}.value"),
            "Condition value is required",
            ValidationCode::Required,
        ));
        return issues;
    }

    if condition.operator == ConditionOperator::Regex {
        if let Err(e) = compile_pattern(&condition.value) {
            issues.push(ValidationIssue::new(
                format!("{prefix}.value"),
                format!("Invalid regular expression: {e}"),
                ValidationCode::InvalidRegex,
            ));
        }
    }

    if condition.operator.is_numeric_only() && !condition.field.is_numeric() {
        issues.push(ValidationIssue::new(
            format!("{prefix}.operator"),
            format!("Operator {:?} requires a numeric field", condition.operator),
            ValidationCode::InvalidValue,
        ));
    }

    if condition.field.is_numeric()
        && condition.operator.supports_numeric()
        && !is_number(&condition.value)
    {
        issues.push(ValidationIssue::new(
            format!("{prefix}.value"),
            "Value must be numeric for this operator",
            ValidationCode::InvalidValue,
        ));
    }

    if condition.operator == ConditionOperator::Between {
        match condition.value2.as_deref().map(str::trim) {
            None | Some("") => issues.push(ValidationIssue::new(
                format!("{prefix}.value2"),
                "Upper bound is required for between",
                ValidationCode::Required,
            )),
            Some(upper) if !is_number(upper) => issues.push(ValidationIssue::new(
                format!("{prefix}.value2"),
                "Upper bound must be numeric",
                ValidationCode::InvalidValue,
            )),
            Some(_) => {}
        }
    }

    issues
}

fn validate_action(action: &Action, index: usize) -> Option<ValidationIssue> {
    match action {
        Action::AddTags { tags } if tags.iter().all(|t| t.trim().is_empty()) => {
            Some(ValidationIssue::new(
                format!("actions[{index}].tags"),
                "At least one tag is required",
                ValidationCode::Required,
            ))
        }
        Action::SetCategory { category } if category.trim().is_empty() => {
            Some(ValidationIssue::new(
                format!("actions[{index}].category"),
                "Category is required",
                ValidationCode::Required,
            ))
        }
        Action::SetType { transaction_type } if transaction_type.trim().is_empty() => {
            Some(ValidationIssue::new(
                format!("actions[{index}].transaction_type"),
                "Transaction type is required",
                ValidationCode::Required,
            ))
        }
        _ => None,
    }
}

/// Collect every problem with a rule payload; empty when valid
pub fn validate_rule_payload(payload: &RulePayload) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if payload.name.trim().is_empty() {
        issues.push(ValidationIssue::new(
            "name",
            "Rule name is required",
            ValidationCode::Required,
        ));
    } else if payload.name.trim().chars().count() > MAX_NAME_LENGTH {
        issues.push(ValidationIssue::new(
            "name",
            format!("Rule name cannot exceed {MAX_NAME_LENGTH} characters"),
            ValidationCode::InvalidValue,
        ));
    }

    if payload.conditions.is_empty() {
        issues.push(ValidationIssue::new(
            "conditions",
            "At least one condition is required",
            ValidationCode::Required,
        ));
    }
    for (index, condition) in payload.conditions.iter().enumerate() {
        issues.extend(validate_condition(condition, index));
    }

    if payload.actions.is_empty() {
        issues.push(ValidationIssue::new(
            "actions",
            "At least one action is required",
            ValidationCode::Required,
        ));
    }
    issues.extend(
        payload
            .actions
            .iter()
            .enumerate()
            .filter_map(|(index, action)| validate_action(action, index)),
    );

    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&payload.priority) {
        issues.push(ValidationIssue::new(
            "priority",
            format!("Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"),
            ValidationCode::InvalidValue,
        ));
    }

    issues
}

fn sanitize_action(action: &Action) -> Action {
    match action {
        Action::AddTags { tags } => Action::AddTags {
            tags: tags
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect::<BTreeSet<_>>(),
        },
        Action::SetType { transaction_type } => Action::SetType {
            transaction_type: transaction_type.trim().to_string(),
        },
        Action::SetDescription { description } => Action::SetDescription {
            description: description.trim().to_string(),
        },
        Action::SetCategory { category } => Action::SetCategory {
            category: category.trim().to_string(),
        },
        other => other.clone(),
    }
}

/// Normalize a payload for storage: trimmed text, lower-case tags, clamped priority
pub fn sanitize_payload(payload: &RulePayload) -> RulePayload {
    RulePayload {
        name: payload.name.trim().to_string(),
        description: payload
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string),
        marketplaces: payload.marketplaces.clone(),
        conditions: payload
            .conditions
            .iter()
            .map(|c| Condition {
                value: c.value.trim().to_string(),
                value2: c.value2.as_deref().map(|v| v.trim().to_string()),
                ..c.clone()
            })
            .collect(),
        condition_logic: payload.condition_logic,
        actions: payload.actions.iter().map(sanitize_action).collect(),
        priority: payload.priority.clamp(MIN_PRIORITY, MAX_PRIORITY),
        enabled: payload.enabled,
        stop_on_match: payload.stop_on_match,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::ConditionField;

    fn valid() -> RulePayload {
        RulePayload::new("Frete")
            .with_condition(Condition::contains(ConditionField::FullText, "frete"))
            .with_action(Action::add_tags(["frete"]))
    }

    fn codes(payload: &RulePayload) -> Vec<(String, ValidationCode)> {
        validate_rule_payload(payload)
            .into_iter()
            .map(|i| (i.field, i.code))
            .collect()
    }

    #[test]
    fn test_valid_payload_has_no_issues() {
        assert!(validate_rule_payload(&valid()).is_empty());
    }

    #[test]
    fn test_empty_condition_value_is_required() {
        let mut payload = valid();
        payload.conditions[0].value = "  ".into();
        assert_eq!(
            codes(&payload),
            vec![("conditions[0].value".to_string(), ValidationCode::Required)]
        );
    }

    #[test]
    fn test_add_tags_without_tags_is_rejected() {
        let mut payload = valid();
        payload.actions = vec![Action::add_tags(Vec::<String>::new())];
        assert_eq!(
            codes(&payload),
            vec![("actions[0].tags".to_string(), ValidationCode::Required)]
        );
    }

    #[test]
    fn test_invalid_regex_is_reported() {
        let payload =
            valid().with_condition(Condition::regex(ConditionField::Description, "(open"));
        assert_eq!(
            codes(&payload),
            vec![("conditions[1].value".to_string(), ValidationCode::InvalidRegex)]
        );
    }

    #[test]
    fn test_between_requires_numeric_bounds() {
        let mut between = Condition::between("10", "x");
        let payload = valid().with_condition(between.clone());
        assert_eq!(
            codes(&payload),
            vec![("conditions[1].value2".to_string(), ValidationCode::InvalidValue)]
        );

        between.value2 = None;
        let payload = valid().with_condition(between);
        assert_eq!(
            codes(&payload),
            vec![("conditions[1].value2".to_string(), ValidationCode::Required)]
        );
    }

    #[test]
    fn test_numeric_operator_on_text_field() {
        let payload = valid().with_condition(Condition::new(
            ConditionField::Description,
            ConditionOperator::GreaterThan,
            "10",
        ));
        assert_eq!(
            codes(&payload),
            vec![("conditions[1].operator".to_string(), ValidationCode::InvalidValue)]
        );
    }

    #[test]
    fn test_missing_name_conditions_actions_and_bad_priority() {
        let payload = RulePayload::new(" ").with_priority(0);
        let fields: Vec<String> = codes(&payload).into_iter().map(|(f, _)| f).collect();
        assert_eq!(fields, vec!["name", "conditions", "actions", "priority"]);
    }

    #[test]
    fn test_long_name_is_rejected() {
        let mut payload = valid();
        payload.name = "x".repeat(MAX_NAME_LENGTH + 1);
        assert_eq!(
            codes(&payload),
            vec![("name".to_string(), ValidationCode::InvalidValue)]
        );
    }

    #[test]
    fn test_sanitize_trims_and_lowercases() {
        let payload = RulePayload::new("  Frete  ")
            .with_condition(Condition::contains(ConditionField::FullText, " frete "))
            .with_action(Action::add_tags([" Frete ", "LOGÍSTICA", " "]))
            .with_priority(300);

        let clean = sanitize_payload(&payload);

        assert_eq!(clean.name, "Frete");
        assert_eq!(clean.conditions[0].value, "frete");
        assert_eq!(
            clean.actions[0],
            Action::add_tags(["frete", "logística"])
        );
        assert_eq!(clean.priority, 100);
    }
}
