//! Marketplace fee rate tables
//!
//! Rates live in configuration, not in the calculator: the calculator only
//! applies `base × rate / 100` and `fixed cost per unit × units`. This module
//! resolves which rate or per-unit cost applies to a given order.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::Marketplace;

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

fn yes() -> bool {
    true
}

/// Build an exact decimal from an integer amount of hundredths
fn hundredths(value: i64) -> BigDecimal {
    BigDecimal::from(value) / BigDecimal::from(100)
}

/// Rate inputs that may be supplied per order or per override.
///
/// Percentages are expressed as whole numbers (14 = 14%).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeRates {
    #[serde(default)]
    pub commission_rate: Option<BigDecimal>,
    #[serde(default)]
    pub campaign_rate: Option<BigDecimal>,
    #[serde(default)]
    pub fixed_cost_per_unit: Option<BigDecimal>,
}

/// How the fixed cost is multiplied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedCostBasis {
    /// Charged once per unit sold
    #[default]
    PerUnit,
    /// Charged once per order
    PerOrder,
}

/// A price band with its own fixed cost. `min` is inclusive, `max` exclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedCostTier {
    #[serde(default)]
    pub min: Option<BigDecimal>,
    #[serde(default)]
    pub max: Option<BigDecimal>,
    pub cost: BigDecimal,
}

impl FixedCostTier {
    pub fn contains(&self, value: &BigDecimal) -> bool {
        let min_ok = self.min.as_ref().is_none_or(|min| value >= min);
        let max_ok = self.max.as_ref().is_none_or(|max| value < max);
        min_ok && max_ok
    }
}

/// A dated campaign with its own campaign fee rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignPeriod {
    #[serde(default)]
    pub name: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub rate: BigDecimal,
    #[serde(default = "yes")]
    pub active: bool,
}

impl CampaignPeriod {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.active && date >= self.start && date <= self.end
    }
}

/// Rate table for one marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketplaceFeeConfig {
    /// Default commission percentage
    pub commission_rate: BigDecimal,
    /// Default campaign percentage, charged only on campaign orders
    #[serde(default = "zero")]
    pub campaign_rate: BigDecimal,
    /// Fixed cost used when no tier matches
    #[serde(default = "zero")]
    pub fixed_cost_per_unit: BigDecimal,
    #[serde(default)]
    pub fixed_cost_basis: FixedCostBasis,
    #[serde(default)]
    pub fixed_cost_tiers: Vec<FixedCostTier>,
    /// Orders below this value pay half the fixed cost
    #[serde(default)]
    pub low_value_threshold: Option<BigDecimal>,
    #[serde(default)]
    pub campaigns: Vec<CampaignPeriod>,
}

impl MarketplaceFeeConfig {
    /// A flat config with no tiers or campaigns
    pub fn flat(
        commission_rate: BigDecimal,
        fixed_cost_per_unit: BigDecimal,
        fixed_cost_basis: FixedCostBasis,
    ) -> Self {
        Self {
            commission_rate,
            campaign_rate: zero(),
            fixed_cost_per_unit,
            fixed_cost_basis,
            fixed_cost_tiers: Vec::new(),
            low_value_threshold: None,
            campaigns: Vec::new(),
        }
    }

    /// Fixed cost per unit (or per order) for an order of the given value
    pub fn fixed_cost_for(&self, order_value: &BigDecimal) -> BigDecimal {
        let base = self
            .fixed_cost_tiers
            .iter()
            .find(|tier| tier.contains(order_value))
            .map(|tier| tier.cost.clone())
            .unwrap_or_else(|| self.fixed_cost_per_unit.clone());

        match &self.low_value_threshold {
            Some(threshold) if order_value < threshold => base / BigDecimal::from(2),
            _ => base,
        }
    }

    /// Campaign rate in force on the given order date
    pub fn campaign_rate_on(&self, order_date: Option<NaiveDate>) -> BigDecimal {
        order_date
            .and_then(|date| self.campaigns.iter().find(|c| c.covers(date)))
            .map(|c| c.rate.clone())
            .unwrap_or_else(|| self.campaign_rate.clone())
    }

    /// Check that no rate or cost is negative
    pub fn validate(&self, marketplace: Marketplace) -> Result<(), String> {
        let negative = |v: &BigDecimal| *v < zero();

        if negative(&self.commission_rate) || negative(&self.campaign_rate) {
            return Err(format!("{marketplace}: rates must not be negative"));
        }
        if negative(&self.fixed_cost_per_unit) {
            return Err(format!("{marketplace}: fixed cost must not be negative"));
        }
        for tier in &self.fixed_cost_tiers {
            if negative(&tier.cost) {
                return Err(format!("{marketplace}: tier cost must not be negative"));
            }
            if let (Some(min), Some(max)) = (&tier.min, &tier.max) {
                if min >= max {
                    return Err(format!(
                        "{marketplace}: tier min {min} must be below max {max}"
                    ));
                }
            }
        }
        for campaign in &self.campaigns {
            if campaign.end < campaign.start || negative(&campaign.rate) {
                return Err(format!(
                    "{marketplace}: invalid campaign period {}..{}",
                    campaign.start, campaign.end
                ));
            }
        }
        Ok(())
    }
}

/// Rate tables for every supported marketplace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeSchedule {
    pub shopee: MarketplaceFeeConfig,
    pub mercado_livre: MarketplaceFeeConfig,
    pub magalu: MarketplaceFeeConfig,
}

impl FeeSchedule {
    pub fn get(&self, marketplace: Marketplace) -> &MarketplaceFeeConfig {
        match marketplace {
            Marketplace::Shopee => &self.shopee,
            Marketplace::MercadoLivre => &self.mercado_livre,
            Marketplace::Magalu => &self.magalu,
        }
    }

    pub fn get_mut(&mut self, marketplace: Marketplace) -> &mut MarketplaceFeeConfig {
        match marketplace {
            Marketplace::Shopee => &mut self.shopee,
            Marketplace::MercadoLivre => &mut self.mercado_livre,
            Marketplace::Magalu => &mut self.magalu,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for marketplace in Marketplace::ALL {
            self.get(marketplace).validate(marketplace)?;
        }
        Ok(())
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        let shopee = MarketplaceFeeConfig {
            commission_rate: BigDecimal::from(14),
            campaign_rate: hundredths(250),
            fixed_cost_per_unit: BigDecimal::from(4),
            fixed_cost_basis: FixedCostBasis::PerUnit,
            fixed_cost_tiers: Vec::new(),
            low_value_threshold: None,
            campaigns: Vec::new(),
        };

        let mercado_livre = MarketplaceFeeConfig {
            commission_rate: hundredths(1650),
            campaign_rate: zero(),
            fixed_cost_per_unit: zero(),
            fixed_cost_basis: FixedCostBasis::PerOrder,
            fixed_cost_tiers: vec![
                FixedCostTier {
                    min: None,
                    max: Some(BigDecimal::from(79)),
                    cost: BigDecimal::from(5),
                },
                FixedCostTier {
                    min: Some(BigDecimal::from(79)),
                    max: Some(BigDecimal::from(140)),
                    cost: BigDecimal::from(9),
                },
                FixedCostTier {
                    min: Some(BigDecimal::from(140)),
                    max: None,
                    cost: BigDecimal::from(13),
                },
            ],
            low_value_threshold: Some(hundredths(1250)),
            campaigns: Vec::new(),
        };

        let magalu = MarketplaceFeeConfig::flat(
            hundredths(1450),
            BigDecimal::from(4),
            FixedCostBasis::PerOrder,
        );

        Self {
            shopee,
            mercado_livre,
            magalu,
        }
    }
}
