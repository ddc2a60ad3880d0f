//! Engine configuration loaded from TOML
//!
//! ```toml
//! [fees.shopee]
//! commission_rate = "14"
//! campaign_rate = "2.5"
//! fixed_cost_per_unit = "4"
//!
//! [escrow]
//! tolerance = "0.02"
//! significant = "0.10"
//!
//! [reconcile]
//! lookup_concurrency = 8
//! ```
//!
//! Decimal values are quoted so they parse exactly.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::fees::{EscrowTolerance, FeeSchedule};
use crate::types::{ReconError, ReconResult};

fn default_lookup_concurrency() -> usize {
    4
}

/// Options for batch reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileOptions {
    /// Maximum order lookups in flight at once
    #[serde(default = "default_lookup_concurrency")]
    pub lookup_concurrency: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            lookup_concurrency: default_lookup_concurrency(),
        }
    }
}

/// Top-level configuration for the reconciliation engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub escrow: EscrowTolerance,
    #[serde(default)]
    pub reconcile: ReconcileOptions,
}

impl EngineConfig {
    pub fn from_toml(input: &str) -> ReconResult<Self> {
        let config: EngineConfig =
            toml::from_str(input).map_err(|e| ReconError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ReconResult<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)
            .map_err(|e| ReconError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&input)
    }

    pub fn validate(&self) -> ReconResult<()> {
        self.fees.validate().map_err(ReconError::Config)?;

        let zero = bigdecimal::BigDecimal::from(0);
        if self.escrow.tolerance < zero {
            return Err(ReconError::Config(
                "escrow tolerance must not be negative".into(),
            ));
        }
        if self.escrow.significant < self.escrow.tolerance {
            return Err(ReconError::Config(format!(
                "significant threshold {} is below tolerance {}",
                self.escrow.significant, self.escrow.tolerance
            )));
        }

        if self.reconcile.lookup_concurrency == 0 {
            return Err(ReconError::Config(
                "lookup_concurrency must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fees::FixedCostBasis;
    use crate::types::Marketplace;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.reconcile.lookup_concurrency, 4);
    }

    #[test]
    fn test_parse_partial_fee_table() {
        let input = r#"
[fees.shopee]
commission_rate = "20"
fixed_cost_per_unit = "6"

[[fees.shopee.campaigns]]
name = "11.11"
start = "2024-11-01"
end = "2024-11-30"
rate = "3.5"

[fees.magalu]
commission_rate = "12"
fixed_cost_per_unit = "5"
fixed_cost_basis = "per_order"

[reconcile]
lookup_concurrency = 2
"#;
        let config = EngineConfig::from_toml(input).unwrap();

        let shopee = config.fees.get(Marketplace::Shopee);
        assert_eq!(shopee.commission_rate, BigDecimal::from(20));
        assert_eq!(shopee.fixed_cost_basis, FixedCostBasis::PerUnit);
        assert_eq!(shopee.campaigns.len(), 1);
        assert_eq!(shopee.campaigns[0].rate, BigDecimal::from_str("3.5").unwrap());

        let magalu = config.fees.get(Marketplace::Magalu);
        assert_eq!(magalu.fixed_cost_basis, FixedCostBasis::PerOrder);

        // untouched tables keep their defaults
        assert_eq!(
            config.fees.mercado_livre,
            FeeSchedule::default().mercado_livre
        );
        assert_eq!(config.reconcile.lookup_concurrency, 2);
    }

    #[test]
    fn test_rejects_inverted_escrow_thresholds() {
        let input = r#"
[escrow]
tolerance = "0.50"
significant = "0.10"
"#;
        let err = EngineConfig::from_toml(input).unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn test_rejects_negative_rate() {
        let input = r#"
[fees.magalu]
commission_rate = "-1"
"#;
        assert!(EngineConfig::from_toml(input).is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml("[fees.shopee\n").unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }
}
