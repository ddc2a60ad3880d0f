//! JSON export and import of user rules

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rules::model::{Rule, RulePayload};
use crate::types::{Marketplace, ReconError, ReconResult};
use crate::utils::validation::{sanitize_payload, validate_rule_payload};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Portable rule set; system rules are never included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesExport {
    pub version: String,
    pub exported_at: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace: Option<Marketplace>,
    pub rules: Vec<RulePayload>,
}

pub fn export_rules(rules: &[Rule], marketplace: Option<Marketplace>) -> RulesExport {
    RulesExport {
        version: EXPORT_FORMAT_VERSION.to_string(),
        exported_at: chrono::Utc::now().naive_utc(),
        marketplace,
        rules: rules
            .iter()
            .filter(|rule| !rule.is_system_rule)
            .map(Rule::payload)
            .collect(),
    }
}

pub fn export_rules_to_json(rules: &[Rule], marketplace: Option<Marketplace>) -> ReconResult<String> {
    Ok(serde_json::to_string_pretty(&export_rules(rules, marketplace))?)
}

/// Outcome of importing a rule set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportedRules {
    /// Sanitised payloads that passed validation
    pub rules: Vec<RulePayload>,
    /// One message per rejected entry
    pub errors: Vec<String>,
}

#[derive(Deserialize)]
struct RawExport {
    version: String,
    rules: Vec<Value>,
}

/// Parse an exported rule set, validating each entry independently.
///
/// A document that is not a rule export fails as a whole; individual bad
/// entries are reported in [`ImportedRules::errors`].
pub fn parse_imported_rules(json: &str) -> ReconResult<ImportedRules> {
    let raw: RawExport = serde_json::from_str(json)?;
    if raw.version.trim().is_empty() {
        return Err(ReconError::invalid("version", "Export version is missing"));
    }

    let mut imported = ImportedRules::default();
    for (index, mut entry) in raw.rules.into_iter().enumerate() {
        let position = index + 1;

        if let Value::Object(map) = &mut entry {
            let missing_name = map
                .get("name")
                .and_then(Value::as_str)
                .is_none_or(|name| name.trim().is_empty());
            if missing_name {
                map.insert(
                    "name".to_string(),
                    Value::String(format!("Imported rule {position}")),
                );
            }
        }

        let payload: RulePayload = match serde_json::from_value(entry) {
            Ok(payload) => payload,
            Err(e) => {
                imported.errors.push(format!("Rule {position}: {e}"));
                continue;
            }
        };

        let issues = validate_rule_payload(&payload);
        if issues.is_empty() {
            imported.rules.push(sanitize_payload(&payload));
        } else {
            let messages: Vec<String> = issues.iter().map(ToString::to_string).collect();
            imported.errors.push(format!(
                "Rule {position} ({}): {}",
                payload.name,
                messages.join(", ")
            ));
        }
    }

    Ok(imported)
}
