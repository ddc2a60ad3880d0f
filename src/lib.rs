//! # Marketplace Recon
//!
//! Reconciliation of marketplace payment extracts (Shopee, Mercado Livre,
//! Magalu) against ERP orders.
//!
//! ## Features
//!
//! - **Order matching**: Suffix-aware grouping of split settlements with one ERP lookup per order
//! - **Fee calculation**: Commission, campaign and fixed-cost breakdowns with per-row overrides
//! - **Escrow comparison**: Expected net value checked against the marketplace payout
//! - **Classification rules**: Prioritised, auditable tagging rules with drafts and restore
//! - **Storage abstraction**: Order lookup and rule persistence behind async traits
//!
//! ## Quick Start
//!
//! ```rust
//! use marketplace_recon::{FeeCalculator, Marketplace, OrderRecord};
//! use bigdecimal::BigDecimal;
//!
//! let calculator = FeeCalculator::default();
//! let order = OrderRecord::new("erp-1", "240101ABC", BigDecimal::from(100), 1);
//! let breakdown = calculator.compute(Marketplace::Shopee, &order, None).unwrap();
//! assert!(breakdown.is_consistent());
//! ```

pub mod config;
pub mod fees;
pub mod matching;
pub mod reconciliation;
pub mod rules;
pub mod traits;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::*;
pub use fees::*;
pub use matching::{base_order_id, LookupFailure, MatchEngine, MatchResult, MatchStatus};
pub use reconciliation::*;
pub use rules::{Rule, RuleEngine, RulePayload, RuleStore, RuleUpdate};
pub use traits::*;
pub use types::*;
