//! Reconcile a small Shopee extract against in-memory ERP orders

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use marketplace_recon::utils::MemoryStorage;
use marketplace_recon::{
    EngineConfig, Marketplace, MatchStatus, OrderRecord, PaymentRecord, ReconciliationEngine,
    RuleStore,
};
use std::str::FromStr;

const CONFIG: &str = r#"
[fees.shopee]
commission_rate = "14"
fixed_cost_per_unit = "6"

[escrow]
tolerance = "0.02"
significant = "0.10"
"#;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🛒 Marketplace Recon - Batch Reconciliation Example\n");

    let config = EngineConfig::from_toml(CONFIG)?;
    let engine = ReconciliationEngine::new(config);

    // 1. ERP orders the lookup can find
    let storage = MemoryStorage::new();
    let mut voucher_order = OrderRecord::new("erp-1001", "240301AAA", BigDecimal::from(150), 2);
    voucher_order.seller_voucher = BigDecimal::from(10);
    voucher_order.escrow_amount = Some(BigDecimal::from_str("94.50")?);
    storage.add_order(Marketplace::Shopee, voucher_order)?;
    storage.add_order(
        Marketplace::Shopee,
        OrderRecord::new("erp-1002", "240301BBB", BigDecimal::from(80), 1),
    )?;

    // 2. Built-in classification rules
    let mut rules = RuleStore::new(storage.clone());
    let installed = rules.install_system_rules().await?;
    println!("📚 Installed {} system rules", installed.len());

    // 3. The extract, including a split settlement for 240301BBB
    let date = NaiveDate::from_ymd_opt(2024, 3, 4).ok_or("invalid date")?;
    let payments = vec![
        PaymentRecord::new("row-1", "240301AAA", BigDecimal::from_str("96.00")?)
            .with_text("Renda do pedido", "Pedido 240301AAA")
            .with_payment_date(date),
        PaymentRecord::new("row-2", "240301BBB", BigDecimal::from_str("62.80")?)
            .with_text("Renda do pedido", "Pedido 240301BBB")
            .with_payment_date(date),
        PaymentRecord::new("row-3", "240301BBB_AJUSTE", BigDecimal::from_str("-2.80")?)
            .with_text("Ajuste", "Ajuste de frete")
            .with_payment_date(date),
        PaymentRecord::new("row-4", "", BigDecimal::from(-50))
            .with_text("Débito", "Recarga de ADS")
            .with_payment_date(date),
    ];

    let report = engine
        .reconcile(&payments, Marketplace::Shopee, &storage, &rules)
        .await?;

    println!("\n🔎 Rows:");
    for row in &report.rows {
        let status = match row.match_result.status {
            MatchStatus::Linked => "linked",
            MatchStatus::Unmatched => "unmatched",
            MatchStatus::MultipleEntries => "multi-entry",
        };
        println!(
            "  {} [{}] net R$ {} tags {:?}",
            row.payment.id, status, row.payment.net_amount, row.payment.tags
        );
        if let Some(expected) = &row.expected_net {
            println!("      expected net R$ {expected}");
        }
        if let Some(escrow) = &row.escrow {
            println!(
                "      escrow R$ {} ({:?}, difference {})",
                escrow.escrow_amount, escrow.status, escrow.difference
            );
        }
        if let Some(balance) = &row.match_result.net_balance {
            println!("      group balance R$ {balance}");
        }
    }

    let summary = &report.summary;
    println!("\n📊 Summary");
    println!("  Rows:        {}", summary.total);
    println!("  Linked:      {}", summary.linked);
    println!("  Multi-entry: {}", summary.multi_entry);
    println!("  Unmatched:   {}", summary.unmatched);
    println!("  Match rate:  {:.1}%", summary.match_rate());
    println!("  Net total:   R$ {}", summary.total_net_amount);

    Ok(())
}
