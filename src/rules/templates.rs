//! Ready-made rule templates
//!
//! Unlike system rules, templates are never installed by themselves. A user
//! picks one, optionally renames and rescopes it, and creates a normal rule
//! from the resulting payload.

use serde::{Deserialize, Serialize};

use crate::rules::model::{
    Action, Condition, ConditionField, ConditionLogic, ConditionOperator, RulePayload, RuleScope,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    Expenses,
    Adjustments,
    Income,
    Alerts,
}

impl TemplateCategory {
    pub const ALL: [TemplateCategory; 4] = [
        TemplateCategory::Expenses,
        TemplateCategory::Adjustments,
        TemplateCategory::Income,
        TemplateCategory::Alerts,
    ];

    /// Display label
    pub fn label(&self) -> &'static str {
        match self {
            TemplateCategory::Expenses => "Despesas",
            TemplateCategory::Adjustments => "Ajustes",
            TemplateCategory::Income => "Receitas",
            TemplateCategory::Alerts => "Alertas",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    /// Case-insensitive regex over the full text
    Text(&'static str),
    /// Numeric comparison on the amount
    Amount(ConditionOperator, &'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Effect {
    /// Mark as expense and set this category
    Expense(&'static str),
    Income,
    Review(&'static str),
    TagOnly,
}

/// A predefined rule pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleTemplate {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: TemplateCategory,
    trigger: Trigger,
    tags: &'static [&'static str],
    effect: Effect,
    priority: i32,
}

const TEMPLATES: &[RuleTemplate] = &[
    RuleTemplate {
        key: "ads",
        name: "Custos com Anúncios",
        description: "Detecta gastos com publicidade e anúncios patrocinados",
        category: TemplateCategory::Expenses,
        trigger: Trigger::Text("an[úu]ncio|publicidade|ads|patrocinado|impulsiona"),
        tags: &["anúncios", "marketing"],
        effect: Effect::Expense("anuncios"),
        priority: 70,
    },
    RuleTemplate {
        key: "shipping",
        name: "Custos de Frete",
        description: "Identifica cobranças de frete e logística",
        category: TemplateCategory::Expenses,
        trigger: Trigger::Text("frete|envio|entrega|log[íi]stica|shipping|transporte"),
        tags: &["frete"],
        effect: Effect::Expense("frete"),
        priority: 65,
    },
    RuleTemplate {
        key: "fees",
        name: "Taxas e Comissões",
        description: "Detecta taxas de marketplace, comissões e tarifas",
        category: TemplateCategory::Expenses,
        trigger: Trigger::Text("taxa|tarifa|comiss[ãa]o|fee|rate"),
        tags: &["taxas"],
        effect: Effect::Expense("taxas"),
        priority: 60,
    },
    RuleTemplate {
        key: "storage",
        name: "Armazenagem",
        description: "Custos de armazenamento em fulfillment",
        category: TemplateCategory::Expenses,
        trigger: Trigger::Text("armazen|storage|fulfillment|estoque|dep[óo]sito"),
        tags: &["armazenagem", "fulfillment"],
        effect: Effect::Expense("armazenagem"),
        priority: 55,
    },
    RuleTemplate {
        key: "refund",
        name: "Reembolsos e Devoluções",
        description: "Identifica reembolsos, chargebacks e devoluções",
        category: TemplateCategory::Adjustments,
        trigger: Trigger::Text("reembolso|devolu[çc][ãa]o|estorno|chargeback|reversa"),
        tags: &["reembolso"],
        effect: Effect::TagOnly,
        priority: 80,
    },
    RuleTemplate {
        key: "adjustment",
        name: "Ajustes Financeiros",
        description: "Detecta ajustes, correções e compensações",
        category: TemplateCategory::Adjustments,
        trigger: Trigger::Text("ajuste|corre[çc][ãa]o|compensa[çc][ãa]o|cr[ée]dito"),
        tags: &["ajuste"],
        effect: Effect::TagOnly,
        priority: 75,
    },
    RuleTemplate {
        key: "withdrawal",
        name: "Saques e Transferências",
        description: "Identifica retiradas e transferências para conta",
        category: TemplateCategory::Adjustments,
        trigger: Trigger::Text("saque|retirada|transfer|repasse|libera[çc][ãa]o"),
        tags: &["saque", "transferência"],
        effect: Effect::TagOnly,
        priority: 50,
    },
    RuleTemplate {
        key: "bonus",
        name: "Bônus e Incentivos",
        description: "Detecta bônus de vendedor, cashback e incentivos",
        category: TemplateCategory::Income,
        trigger: Trigger::Text("b[ôo]nus|incentivo|cashback|pr[êe]mio|recompensa"),
        tags: &["bônus", "incentivo"],
        effect: Effect::Income,
        priority: 70,
    },
    RuleTemplate {
        key: "high_value",
        name: "Valores Altos",
        description: "Sinaliza transações acima de R$ 500 para revisão",
        category: TemplateCategory::Alerts,
        trigger: Trigger::Amount(ConditionOperator::GreaterThan, "500"),
        tags: &["alto-valor"],
        effect: Effect::Review("Valor acima de R$ 500"),
        priority: 90,
    },
    RuleTemplate {
        key: "negative",
        name: "Valores Negativos",
        description: "Sinaliza qualquer transação negativa para análise",
        category: TemplateCategory::Alerts,
        trigger: Trigger::Amount(ConditionOperator::LessThan, "0"),
        tags: &["negativo"],
        effect: Effect::Review("Valor negativo - verificar"),
        priority: 85,
    },
];

impl RuleTemplate {
    /// Build a rule payload from this template.
    ///
    /// `name` replaces the template name; empty `scopes` means all marketplaces.
    pub fn into_payload(self, name: Option<&str>, scopes: &[RuleScope]) -> RulePayload {
        let (condition, logic) = match self.trigger {
            Trigger::Text(pattern) => (
                Condition::regex(ConditionField::FullText, pattern),
                ConditionLogic::Or,
            ),
            Trigger::Amount(operator, value) => (
                Condition::new(ConditionField::Amount, operator, value),
                ConditionLogic::And,
            ),
        };
        let scopes = if scopes.is_empty() {
            vec![RuleScope::All]
        } else {
            scopes.to_vec()
        };

        let mut payload = RulePayload::new(name.unwrap_or(self.name))
            .scoped_to(scopes)
            .with_condition(condition)
            .with_logic(logic)
            .with_action(Action::add_tags(self.tags.iter().copied()))
            .with_priority(self.priority);
        payload.description = Some(self.description.to_string());

        match self.effect {
            Effect::Expense(category) => {
                payload = payload
                    .with_action(Action::MarkExpense)
                    .with_action(Action::SetCategory {
                        category: category.to_string(),
                    });
            }
            Effect::Income => payload = payload.with_action(Action::MarkIncome),
            Effect::Review(note) => {
                payload = payload.with_action(Action::FlagReview {
                    note: Some(note.to_string()),
                });
            }
            Effect::TagOnly => {}
        }
        payload
    }
}

pub fn rule_templates() -> &'static [RuleTemplate] {
    TEMPLATES
}

pub fn templates_in(category: TemplateCategory) -> impl Iterator<Item = &'static RuleTemplate> {
    TEMPLATES.iter().filter(move |t| t.category == category)
}

pub fn find_template(key: &str) -> Option<&'static RuleTemplate> {
    TEMPLATES.iter().find(|t| t.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::engine::{test_rule_against, RuleInput};
    use crate::utils::validation::validate_rule_payload;
    use bigdecimal::BigDecimal;

    #[test]
    fn test_every_template_builds_a_valid_payload() {
        for template in rule_templates() {
            let payload = template.into_payload(None, &[]);
            let issues = validate_rule_payload(&payload);
            assert!(issues.is_empty(), "{}: {:?}", template.key, issues);
            assert_eq!(payload.name, template.name);
        }
    }

    #[test]
    fn test_every_category_has_templates() {
        for category in TemplateCategory::ALL {
            assert!(templates_in(category).count() > 0, "{}", category.label());
        }
    }

    #[test]
    fn test_payload_overrides_name_and_scope() {
        let template = find_template("shipping").unwrap();
        let payload = template.into_payload(Some("Frete ML"), &[RuleScope::MercadoLivre]);

        assert_eq!(payload.name, "Frete ML");
        assert!(payload.marketplaces.contains(&RuleScope::MercadoLivre));
        assert!(!payload.marketplaces.contains(&RuleScope::All));
        assert!(payload.actions.contains(&Action::SetCategory {
            category: "frete".into()
        }));
    }

    #[test]
    fn test_amount_templates_match_on_amount() {
        let high = find_template("high_value").unwrap().into_payload(None, &[]);
        let samples = [
            RuleInput::new("Venda", "", BigDecimal::from(750)),
            RuleInput::new("Venda", "", BigDecimal::from(120)),
        ];
        let report = test_rule_against(&high, &samples);

        assert!(report.results[0].matched);
        assert!(!report.results[1].matched);
        assert_eq!(report.results[0].applied_tags, vec!["alto-valor"]);
    }

    #[test]
    fn test_unknown_template_key() {
        assert!(find_template("nope").is_none());
    }
}
