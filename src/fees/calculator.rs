//! Fee computation engine for marketplace orders

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

use crate::fees::schedule::{FeeSchedule, FixedCostBasis};
use crate::types::{Marketplace, OrderRecord};

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Round a monetary amount to cents
fn to_cents(value: BigDecimal) -> BigDecimal {
    value.round(2)
}

/// Apply a percentage rate to a base amount
fn percent_of(base: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    to_cents((base * rate) / BigDecimal::from(100))
}

/// User-supplied values that replace computed fee components.
///
/// For commission, campaign and fixed cost, an absolute value wins over a
/// rate, which wins over the order's rates and then the marketplace default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeeOverrides {
    #[serde(default)]
    pub commission_fee: Option<BigDecimal>,
    #[serde(default)]
    pub commission_rate: Option<BigDecimal>,
    #[serde(default)]
    pub campaign_fee: Option<BigDecimal>,
    #[serde(default)]
    pub campaign_rate: Option<BigDecimal>,
    #[serde(default)]
    pub fixed_cost: Option<BigDecimal>,
    #[serde(default)]
    pub fixed_cost_per_unit: Option<BigDecimal>,
    #[serde(default)]
    pub seller_voucher: Option<BigDecimal>,
    #[serde(default)]
    pub ams_commission_fee: Option<BigDecimal>,
}

impl FeeOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Layer `newer` on top of these overrides; fields set in `newer` win
    pub fn merged_with(&self, newer: &FeeOverrides) -> FeeOverrides {
        fn pick(old: &Option<BigDecimal>, new: &Option<BigDecimal>) -> Option<BigDecimal> {
            new.clone().or_else(|| old.clone())
        }

        FeeOverrides {
            commission_fee: pick(&self.commission_fee, &newer.commission_fee),
            commission_rate: pick(&self.commission_rate, &newer.commission_rate),
            campaign_fee: pick(&self.campaign_fee, &newer.campaign_fee),
            campaign_rate: pick(&self.campaign_rate, &newer.campaign_rate),
            fixed_cost: pick(&self.fixed_cost, &newer.fixed_cost),
            fixed_cost_per_unit: pick(&self.fixed_cost_per_unit, &newer.fixed_cost_per_unit),
            seller_voucher: pick(&self.seller_voucher, &newer.seller_voucher),
            ams_commission_fee: pick(&self.ams_commission_fee, &newer.ams_commission_fee),
        }
    }

    fn validate(&self) -> Result<(), FeeError> {
        let fields = [
            ("commission_fee", &self.commission_fee),
            ("commission_rate", &self.commission_rate),
            ("campaign_fee", &self.campaign_fee),
            ("campaign_rate", &self.campaign_rate),
            ("fixed_cost", &self.fixed_cost),
            ("fixed_cost_per_unit", &self.fixed_cost_per_unit),
            ("seller_voucher", &self.seller_voucher),
            ("ams_commission_fee", &self.ams_commission_fee),
        ];
        for (name, value) in fields {
            if let Some(v) = value {
                if *v < zero() {
                    return Err(FeeError::InvalidOverride(format!(
                        "{name} must not be negative, got {v}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Rates actually used for a breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedRates {
    pub commission_rate: BigDecimal,
    pub campaign_rate: BigDecimal,
    pub fixed_cost_per_unit: BigDecimal,
    pub units: i64,
}

/// Detailed fee breakdown and expected net value for an order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Order value after refunds
    pub gross_value: BigDecimal,
    pub commission_fee: BigDecimal,
    pub campaign_fee: BigDecimal,
    pub fixed_cost: BigDecimal,
    pub seller_voucher: BigDecimal,
    pub ams_commission_fee: BigDecimal,
    /// Sum of all fee components
    pub total_fees: BigDecimal,
    /// `gross_value - total_fees`; negative for high-cost orders
    pub net_value: BigDecimal,
    /// Base the percentage fees were applied to
    pub percentage_base: BigDecimal,
    /// Seller discount treated as "Leve Mais Pague Menos"
    pub leve_mais_pague_menos: bool,
    /// Order value before refunds, for display
    pub original_value: BigDecimal,
    pub rates: AppliedRates,
}

impl FeeBreakdown {
    /// Check the breakdown's arithmetic invariants
    pub fn is_consistent(&self) -> bool {
        let components = &self.commission_fee
            + &self.campaign_fee
            + &self.fixed_cost
            + &self.seller_voucher
            + &self.ams_commission_fee;
        components == self.total_fees && &self.gross_value - &self.total_fees == self.net_value
    }

    /// Compare the computed net value with the marketplace-reported payout
    pub fn compare_escrow(
        &self,
        escrow_amount: &BigDecimal,
        tolerance: &EscrowTolerance,
    ) -> EscrowComparison {
        let difference = &self.net_value - escrow_amount;
        let magnitude = difference.abs();

        let status = if magnitude > tolerance.significant {
            EscrowStatus::Significant
        } else if magnitude > tolerance.tolerance {
            EscrowStatus::Discrepancy
        } else {
            EscrowStatus::Matches
        };

        EscrowComparison {
            escrow_amount: escrow_amount.clone(),
            expected_net: self.net_value.clone(),
            difference,
            status,
        }
    }
}

/// Thresholds for escrow comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowTolerance {
    /// Differences up to this amount are rounding noise
    pub tolerance: BigDecimal,
    /// Differences above this amount are significant
    pub significant: BigDecimal,
}

impl Default for EscrowTolerance {
    fn default() -> Self {
        Self {
            tolerance: BigDecimal::from(2) / BigDecimal::from(100),
            significant: BigDecimal::from(10) / BigDecimal::from(100),
        }
    }
}

/// Outcome of comparing expected net value to the escrow payout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Matches,
    Discrepancy,
    Significant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowComparison {
    pub escrow_amount: BigDecimal,
    pub expected_net: BigDecimal,
    /// `expected_net - escrow_amount`
    pub difference: BigDecimal,
    pub status: EscrowStatus,
}

impl EscrowComparison {
    pub fn is_discrepancy(&self) -> bool {
        self.status != EscrowStatus::Matches
    }
}

/// Fee calculation engine.
///
/// Pure: identical inputs always produce identical breakdowns.
#[derive(Debug, Clone, Default)]
pub struct FeeCalculator {
    schedule: FeeSchedule,
}

impl FeeCalculator {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &FeeSchedule {
        &self.schedule
    }

    /// Compute the fee breakdown and expected net value of an order
    pub fn compute(
        &self,
        marketplace: Marketplace,
        order: &OrderRecord,
        overrides: Option<&FeeOverrides>,
    ) -> Result<FeeBreakdown, FeeError> {
        validate_order(order)?;
        let empty = FeeOverrides::default();
        let overrides = overrides.unwrap_or(&empty);
        overrides.validate()?;

        let config = self.schedule.get(marketplace);
        let order_rates = order.rates.clone().unwrap_or_default();

        let leve_mais_pague_menos =
            marketplace == Marketplace::Shopee && is_leve_mais_pague_menos(order);
        let percentage_base = if leve_mais_pague_menos {
            let base = &order.gross_value - &order.seller_discount;
            if base < zero() {
                zero()
            } else {
                base
            }
        } else {
            order.gross_value.clone()
        };

        // Commission
        let commission_rate = overrides
            .commission_rate
            .clone()
            .or(order_rates.commission_rate)
            .unwrap_or_else(|| config.commission_rate.clone());
        let commission_fee = match &overrides.commission_fee {
            Some(fee) => to_cents(fee.clone()),
            None => percent_of(&percentage_base, &commission_rate),
        };

        // Campaign
        let campaign_rate = overrides
            .campaign_rate
            .clone()
            .or(order_rates.campaign_rate)
            .or_else(|| {
                order
                    .is_campaign_order
                    .then(|| config.campaign_rate_on(order.order_date))
            })
            .unwrap_or_else(zero);
        let campaign_fee = match &overrides.campaign_fee {
            Some(fee) => to_cents(fee.clone()),
            None => percent_of(&percentage_base, &campaign_rate),
        };

        // Fixed cost
        let units = match config.fixed_cost_basis {
            _ if order.is_kit => 1,
            FixedCostBasis::PerOrder => 1,
            FixedCostBasis::PerUnit => order.unit_count,
        };
        let fixed_cost_per_unit = overrides
            .fixed_cost_per_unit
            .clone()
            .or(order_rates.fixed_cost_per_unit)
            .unwrap_or_else(|| config.fixed_cost_for(&order.gross_value));
        let fixed_cost = match &overrides.fixed_cost {
            Some(cost) => to_cents(cost.clone()),
            None => to_cents(&fixed_cost_per_unit * BigDecimal::from(units)),
        };

        // Seller-side deductions do not touch the percentage base
        let seller_voucher = to_cents(
            overrides
                .seller_voucher
                .clone()
                .unwrap_or_else(|| order.seller_voucher.clone()),
        );
        let ams_commission_fee = to_cents(
            overrides
                .ams_commission_fee
                .clone()
                .unwrap_or_else(|| order.ams_commission_fee.clone()),
        );

        let total_fees =
            &commission_fee + &campaign_fee + &fixed_cost + &seller_voucher + &ams_commission_fee;
        let net_value = &order.gross_value - &total_fees;

        Ok(FeeBreakdown {
            gross_value: order.gross_value.clone(),
            commission_fee,
            campaign_fee,
            fixed_cost,
            seller_voucher,
            ams_commission_fee,
            total_fees,
            net_value,
            percentage_base,
            leve_mais_pague_menos,
            original_value: order.display_original_value(),
            rates: AppliedRates {
                commission_rate,
                campaign_rate,
                fixed_cost_per_unit,
                units,
            },
        })
    }
}

/// A seller discount of at most 5% of the selling price
pub fn is_leve_mais_pague_menos(order: &OrderRecord) -> bool {
    let selling_price = order
        .selling_price
        .clone()
        .unwrap_or_else(|| &order.gross_value + &order.seller_discount);

    order.seller_discount > zero()
        && selling_price > zero()
        && &order.seller_discount * BigDecimal::from(100) <= selling_price * BigDecimal::from(5)
}

fn validate_order(order: &OrderRecord) -> Result<(), FeeError> {
    if order.unit_count < 0 {
        return Err(FeeError::InvalidOrder(format!(
            "order {} has negative unit count {}",
            order.id, order.unit_count
        )));
    }

    let amounts = [
        ("gross value", &order.gross_value),
        ("seller discount", &order.seller_discount),
        ("seller voucher", &order.seller_voucher),
        ("affiliate commission", &order.ams_commission_fee),
        ("refund amount", &order.refund_amount),
    ];
    for (name, value) in amounts {
        if *value < zero() {
            return Err(FeeError::InvalidOrder(format!(
                "order {} has negative {name} {value}",
                order.id
            )));
        }
    }

    if let Some(rates) = &order.rates {
        let negative = [
            &rates.commission_rate,
            &rates.campaign_rate,
            &rates.fixed_cost_per_unit,
        ]
        .into_iter()
        .flatten()
        .any(|r| *r < zero());
        if negative {
            return Err(FeeError::InvalidOrder(format!(
                "order {} carries a negative fee rate",
                order.id
            )));
        }
    }

    Ok(())
}

/// Fee-related errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FeeError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),
    #[error("Invalid fee override: {0}")]
    InvalidOverride(String),
}
