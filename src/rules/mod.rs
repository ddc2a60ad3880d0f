//! Classification rules: model, evaluation, lifecycle and audit trail

pub mod audit;
pub mod engine;
pub mod matcher;
pub mod model;
pub mod store;
pub mod system;
pub mod templates;
pub mod transfer;

pub use audit::{structural_diff, AuditAction, AuditEntry, FieldChange};
pub use engine::{
    detect_conflicts, test_rule, test_rule_against, RuleConflict, RuleEngine, RuleInput,
    RuleOutcome, RuleTestReport, RuleTestResult, RuleTrace,
};
pub use model::*;
pub use store::RuleStore;
pub use system::{is_system_rule_id, system_rules, SYSTEM_RULE_PREFIX};
pub use templates::{find_template, rule_templates, templates_in, RuleTemplate, TemplateCategory};
pub use transfer::{export_rules, export_rules_to_json, parse_imported_rules, ImportedRules, RulesExport};
