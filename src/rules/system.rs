//! Built-in system rules
//!
//! System rules carry stable `system_*` ids and may only be enabled or
//! disabled once installed.

use crate::rules::model::{
    Action, Condition, ConditionField, ConditionLogic, RulePayload, RuleScope,
};

pub const SYSTEM_RULE_PREFIX: &str = "system_";

pub fn is_system_rule_id(rule_id: &str) -> bool {
    rule_id.starts_with(SYSTEM_RULE_PREFIX)
}

struct SystemRuleDef {
    key: &'static str,
    name: &'static str,
    description: &'static str,
    pattern: &'static str,
    regex: bool,
    tags: &'static [&'static str],
    expense: bool,
    priority: i32,
}

const SYSTEM_RULES: &[SystemRuleDef] = &[
    SystemRuleDef {
        key: "reembolso",
        name: "Reembolso",
        description: "Refunds, returns and chargebacks",
        pattern: "reembolso|devolu[çc][ãa]o|estorno|chargeback",
        regex: true,
        tags: &["reembolso"],
        expense: false,
        priority: 100,
    },
    SystemRuleDef {
        key: "ajuste",
        name: "Ajuste",
        description: "Adjustments, compensations and corrections",
        pattern: "ajuste|compensa[çc][ãa]o|corre[çc][ãa]o",
        regex: true,
        tags: &["ajuste"],
        expense: false,
        priority: 90,
    },
    SystemRuleDef {
        key: "marketing_ads",
        name: "Marketing e ADS",
        description: "Advertising spend",
        pattern: "ads|an[úu]ncio|publicidade|recarga.*compra.*ads",
        regex: true,
        tags: &["marketing", "ads"],
        expense: true,
        priority: 85,
    },
    SystemRuleDef {
        key: "taxas",
        name: "Taxas e Tarifas",
        description: "Marketplace fees and commissions",
        pattern: "taxa|tarifa|comiss[ãa]o|mdr",
        regex: true,
        tags: &["taxa"],
        expense: false,
        priority: 80,
    },
    SystemRuleDef {
        key: "frete",
        name: "Frete",
        description: "Shipping charges",
        pattern: "frete",
        regex: false,
        tags: &["frete"],
        expense: false,
        priority: 80,
    },
    SystemRuleDef {
        key: "saque",
        name: "Saque",
        description: "Withdrawals and transfers",
        pattern: "saque|retirada|transfer[êe]ncia",
        regex: true,
        tags: &["saque", "retirada"],
        expense: true,
        priority: 70,
    },
    SystemRuleDef {
        key: "desconto",
        name: "Desconto",
        description: "Discounts and coupons",
        pattern: "desconto|cupom|abatimento",
        regex: true,
        tags: &["desconto"],
        expense: false,
        priority: 60,
    },
];

impl SystemRuleDef {
    fn payload(&self) -> RulePayload {
        let condition = if self.regex {
            Condition::regex(ConditionField::FullText, self.pattern)
        } else {
            Condition::contains(ConditionField::FullText, self.pattern)
        };

        let mut payload = RulePayload::new(self.name)
            .scoped_to([RuleScope::All])
            .with_condition(condition)
            .with_logic(ConditionLogic::Or)
            .with_action(Action::add_tags(self.tags.iter().copied()))
            .with_priority(self.priority);
        payload.description = Some(self.description.to_string());
        if self.expense {
            payload = payload.with_action(Action::MarkExpense);
        }
        payload
    }
}

/// Built-in rules as `(id, payload)` pairs, highest priority first
pub fn system_rules() -> Vec<(String, RulePayload)> {
    SYSTEM_RULES
        .iter()
        .map(|def| (format!("{SYSTEM_RULE_PREFIX}{}", def.key), def.payload()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::engine::test_rule;
    use crate::utils::validation::validate_rule_payload;

    #[test]
    fn test_system_rules_are_valid_and_prefixed() {
        let rules = system_rules();
        assert_eq!(rules.len(), 7);
        for (id, payload) in &rules {
            assert!(is_system_rule_id(id));
            assert!(validate_rule_payload(payload).is_empty(), "{id}");
        }
    }

    #[test]
    fn test_system_rule_patterns() {
        let rules = system_rules();
        let find = |id: &str| {
            rules
                .iter()
                .find(|(rule_id, _)| rule_id == id)
                .map(|(_, payload)| payload.clone())
                .unwrap()
        };

        assert!(test_rule(&find("system_reembolso"), "Devolução do pedido").matched);
        assert!(test_rule(&find("system_marketing_ads"), "Recarga de Anúncios").matched);
        assert!(test_rule(&find("system_saque"), "Transferência para conta").matched);
        assert!(!test_rule(&find("system_frete"), "Venda").matched);
        assert_eq!(
            test_rule(&find("system_marketing_ads"), "Shopee Ads").applied_tags,
            vec!["ads", "marketing"]
        );
    }
}
