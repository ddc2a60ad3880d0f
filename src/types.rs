//! Core types and data structures for marketplace reconciliation

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::fees::{FeeOverrides, FeeRates};

/// Marketplaces whose payment extracts can be reconciled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marketplace {
    Shopee,
    MercadoLivre,
    Magalu,
}

impl Marketplace {
    /// All supported marketplaces
    pub const ALL: [Marketplace; 3] = [
        Marketplace::Shopee,
        Marketplace::MercadoLivre,
        Marketplace::Magalu,
    ];

    /// Stable lowercase key used in configuration and scopes
    pub fn as_str(&self) -> &'static str {
        match self {
            Marketplace::Shopee => "shopee",
            Marketplace::MercadoLivre => "mercado_livre",
            Marketplace::Magalu => "magalu",
        }
    }

    /// Parse a marketplace key, accepting the common aliases seen in ERP channel names
    pub fn parse(value: &str) -> Option<Self> {
        let lower = value.trim().to_lowercase();
        if lower.contains("shopee") {
            Some(Marketplace::Shopee)
        } else if lower.contains("mercado") || lower.contains("meli") {
            Some(Marketplace::MercadoLivre)
        } else if lower.contains("magalu") || lower.contains("magazine") {
            Some(Marketplace::Magalu)
        } else {
            None
        }
    }
}

impl fmt::Display for Marketplace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One settlement/transaction line from a marketplace extract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    /// Row identifier, unique within a batch
    pub id: String,
    /// Marketplace-scoped order id as it appears in the extract (may carry suffixes like `_AJUSTE`)
    pub marketplace_order_id: String,
    pub payment_date: Option<NaiveDate>,
    pub settlement_date: Option<NaiveDate>,
    /// Gross amount reported for the line
    pub gross_amount: BigDecimal,
    /// Net amount actually settled for the line
    pub net_amount: BigDecimal,
    /// Fees the marketplace reports for the line
    pub fees: BigDecimal,
    /// Transaction type as reported (free text)
    pub transaction_type: String,
    /// Transaction description as reported (free text)
    pub transaction_description: String,
    pub is_adjustment: bool,
    pub is_refund: bool,
    pub is_expense: bool,
    pub tags: BTreeSet<String>,
    /// Expense category assigned by rules
    pub category: Option<String>,
    /// User-supplied fee overrides for this row
    pub fee_overrides: Option<FeeOverrides>,
}

impl PaymentRecord {
    /// Create a payment line with no flags, tags or overrides
    pub fn new(
        id: impl Into<String>,
        marketplace_order_id: impl Into<String>,
        net_amount: BigDecimal,
    ) -> Self {
        Self {
            id: id.into(),
            marketplace_order_id: marketplace_order_id.into(),
            payment_date: None,
            settlement_date: None,
            gross_amount: net_amount.clone(),
            net_amount,
            fees: BigDecimal::from(0),
            transaction_type: String::new(),
            transaction_description: String::new(),
            is_adjustment: false,
            is_refund: false,
            is_expense: false,
            tags: BTreeSet::new(),
            category: None,
            fee_overrides: None,
        }
    }

    /// Set the free-text type and description
    pub fn with_text(
        mut self,
        transaction_type: impl Into<String>,
        transaction_description: impl Into<String>,
    ) -> Self {
        self.transaction_type = transaction_type.into();
        self.transaction_description = transaction_description.into();
        self
    }

    /// Set the payment date
    pub fn with_payment_date(mut self, date: NaiveDate) -> Self {
        self.payment_date = Some(date);
        self
    }

    /// Attach fee overrides
    pub fn with_overrides(mut self, overrides: FeeOverrides) -> Self {
        self.fee_overrides = Some(overrides);
        self
    }
}

/// ERP-side order projection supplied by an [`OrderLookup`](crate::traits::OrderLookup)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// ERP order id
    pub id: String,
    /// Human-facing ERP order number
    pub order_number: Option<String>,
    pub customer_name: Option<String>,
    /// Marketplace order id stored in the ERP ecommerce channel field
    pub marketplace_order_id: String,
    pub order_date: Option<NaiveDate>,
    /// Order value after refunds, the base for percentage fees
    pub gross_value: BigDecimal,
    /// Number of units sold; negative values are rejected at fee time
    pub unit_count: i64,
    /// Kits are charged fixed cost once regardless of units
    pub is_kit: bool,
    /// Whether the order took part in a marketplace campaign
    pub is_campaign_order: bool,
    /// Rates effective for this order (e.g. at the order date), overriding the schedule
    pub rates: Option<FeeRates>,
    /// Selling price before seller discount (Shopee)
    pub selling_price: Option<BigDecimal>,
    /// Discount granted by the seller (Shopee)
    pub seller_discount: BigDecimal,
    /// Voucher funded by the seller
    pub seller_voucher: BigDecimal,
    /// Affiliate (AMS) commission charged to the seller
    pub ams_commission_fee: BigDecimal,
    /// Amount refunded to the buyer
    pub refund_amount: BigDecimal,
    /// Order value before refunds, when known
    pub original_value: Option<BigDecimal>,
    /// Net payout reported by the marketplace
    pub escrow_amount: Option<BigDecimal>,
}

impl OrderRecord {
    /// Create an order projection with no deductions
    pub fn new(
        id: impl Into<String>,
        marketplace_order_id: impl Into<String>,
        gross_value: BigDecimal,
        unit_count: i64,
    ) -> Self {
        Self {
            id: id.into(),
            order_number: None,
            customer_name: None,
            marketplace_order_id: marketplace_order_id.into(),
            order_date: None,
            gross_value,
            unit_count,
            is_kit: false,
            is_campaign_order: false,
            rates: None,
            selling_price: None,
            seller_discount: BigDecimal::from(0),
            seller_voucher: BigDecimal::from(0),
            ams_commission_fee: BigDecimal::from(0),
            refund_amount: BigDecimal::from(0),
            original_value: None,
            escrow_amount: None,
        }
    }

    /// Whether part of the order was refunded
    pub fn is_refunded(&self) -> bool {
        self.refund_amount > BigDecimal::from(0)
    }

    /// Value shown to users as the order's original value
    pub fn display_original_value(&self) -> BigDecimal {
        if let Some(original) = &self.original_value {
            return original.clone();
        }
        if self.is_refunded() {
            &self.gross_value + &self.refund_amount
        } else {
            self.gross_value.clone()
        }
    }
}

/// Machine-readable classification of a validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    InvalidRegex,
    InvalidValue,
}

/// A single problem found while validating a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Path of the offending field, e.g. `conditions[0].value`
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: ValidationCode) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors that can occur in the reconciliation core
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Rule not found: {0}")]
    RuleNotFound(String),
    #[error("Audit entry not found: {0}")]
    AuditEntryNotFound(String),
    #[error("Validation failed: {}", join_issues(.0))]
    Validation(Vec<ValidationIssue>),
    #[error("System rule {0} can only be enabled or disabled")]
    SystemRule(String),
    #[error("Order lookup failed: {0}")]
    Lookup(String),
    #[error("Rate limited by order lookup, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ReconError {
    /// Build a validation error from a single issue
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ReconError::Validation(vec![ValidationIssue::new(
            field,
            message,
            ValidationCode::InvalidValue,
        )])
    }

    /// Server-provided backoff, when this error is a rate-limit signal
    pub fn retry_after(&self) -> Option<std::time::Duration> {
        match self {
            ReconError::RateLimited {
                retry_after_seconds,
            } => Some(std::time::Duration::from_secs(*retry_after_seconds)),
            _ => None,
        }
    }
}

/// Result type for reconciliation operations
pub type ReconResult<T> = Result<T, ReconError>;
