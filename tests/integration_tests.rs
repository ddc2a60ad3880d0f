//! Integration tests for marketplace-recon

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use marketplace_recon::{
    apply_bulk_overrides,
    rules::{
        engine, Action, AuditAction, Condition, ConditionField, ConditionLogic, ConditionOperator,
        RuleScope,
    },
    utils::MemoryStorage,
    EngineConfig, FeeCalculator, FeeOverrides, FeeSchedule, FixedCostBasis, Marketplace,
    MarketplaceFeeConfig, MatchStatus, OrderRecord, PaymentRecord, ReconError,
    ReconciliationEngine, RuleEngine, RulePayload, RuleStore, RuleUpdate,
};
use std::str::FromStr;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

fn shopee_schedule() -> FeeSchedule {
    let mut fees = FeeSchedule::default();
    fees.shopee = MarketplaceFeeConfig::flat(dec("14"), dec("6"), FixedCostBasis::PerUnit);
    fees
}

fn tag_rule(name: &str, needle: &str, tag: &str) -> RulePayload {
    RulePayload::new(name)
        .with_condition(Condition::contains(ConditionField::FullText, needle))
        .with_action(Action::add_tags([tag]))
}

#[test]
fn test_shopee_single_unit_order() {
    let calculator = FeeCalculator::new(shopee_schedule());
    let order = OrderRecord::new("erp-1", "240101ABC", dec("100"), 1);

    let breakdown = calculator
        .compute(Marketplace::Shopee, &order, None)
        .unwrap();

    assert_eq!(breakdown.commission_fee, dec("14"));
    assert_eq!(breakdown.fixed_cost, dec("6"));
    assert_eq!(breakdown.total_fees, dec("20"));
    assert_eq!(breakdown.net_value, dec("80"));
    assert!(breakdown.is_consistent());
}

#[test]
fn test_override_precedence() {
    let calculator = FeeCalculator::new(shopee_schedule());
    let order = OrderRecord::new("erp-1", "240101ABC", dec("200"), 2);

    // An absolute fee beats a rate override for the same component
    let overrides = FeeOverrides {
        commission_fee: Some(dec("5")),
        commission_rate: Some(dec("50")),
        fixed_cost_per_unit: Some(dec("1")),
        ..Default::default()
    };
    let breakdown = calculator
        .compute(Marketplace::Shopee, &order, Some(&overrides))
        .unwrap();

    assert_eq!(breakdown.commission_fee, dec("5"));
    assert_eq!(breakdown.fixed_cost, dec("2"));
    assert_eq!(breakdown.net_value, dec("193"));
}

#[tokio::test]
async fn test_priority_and_stop_on_match() {
    let storage = MemoryStorage::new();
    let mut store = RuleStore::new(storage.clone());

    store
        .create(tag_rule("Low", "pix", "low").with_priority(10))
        .await
        .unwrap();
    store
        .create(
            tag_rule("High", "pix", "high")
                .with_priority(90)
                .stopping_on_match(),
        )
        .await
        .unwrap();

    let outcome = engine::evaluate(
        "Transferência PIX",
        "",
        dec("-50"),
        &store.list().await.unwrap(),
        Marketplace::Shopee,
    );

    assert_eq!(outcome.applied_tags.len(), 1);
    assert!(outcome.applied_tags.contains("high"));
    assert_eq!(outcome.matched_rule_ids.len(), 1);
}

#[tokio::test]
async fn test_equal_priority_runs_in_creation_order() {
    let mut store = RuleStore::new(MemoryStorage::new());

    let first = store
        .create(
            RulePayload::new("First")
                .with_condition(Condition::contains(ConditionField::FullText, "venda"))
                .with_action(Action::set_type("first")),
        )
        .await
        .unwrap();
    let second = store
        .create(
            RulePayload::new("Second")
                .with_condition(Condition::contains(ConditionField::FullText, "venda"))
                .with_action(Action::set_type("second")),
        )
        .await
        .unwrap();

    let rules = RuleEngine::new(store.list().await.unwrap());
    assert_eq!(rules.rule_ids(), vec![first.id.as_str(), second.id.as_str()]);

    let payment = PaymentRecord::new("p1", "A1", dec("10")).with_text("", "Venda");
    let (updated, outcome) = rules.apply(&payment, Marketplace::Magalu);

    assert_eq!(outcome.matched_rule_ids, vec![first.id, second.id]);
    assert_eq!(updated.transaction_type, "second");
}

#[test]
fn test_accent_sensitive_matching() {
    let contains = RulePayload::new("Ads")
        .with_condition(Condition::contains(ConditionField::FullText, "anuncio"))
        .with_action(Action::add_tags(["ads"]));
    let accent_class = RulePayload::new("Ads")
        .with_condition(Condition::regex(ConditionField::FullText, "an[úu]ncio"))
        .with_action(Action::add_tags(["ads"]));

    assert!(!engine::test_rule(&contains, "Recarga de Anúncios").matched);
    assert!(engine::test_rule(&accent_class, "Recarga de Anúncios").matched);
    assert!(engine::test_rule(&accent_class, "RECARGA DE ANUNCIOS").matched);
}

#[test]
fn test_amount_condition_between() {
    let payload = RulePayload::new("Small debits")
        .with_condition(Condition::between("-20", "-5"))
        .with_condition(Condition::new(
            ConditionField::Description,
            ConditionOperator::Contains,
            "tarifa",
        ))
        .with_logic(ConditionLogic::And)
        .with_action(Action::add_tags(["tarifa"]));

    let samples = vec![
        engine::RuleInput::new("Tarifa de saque", "", dec("-5")),
        engine::RuleInput::new("Tarifa de saque", "", dec("-25")),
        engine::RuleInput::new("Venda", "", dec("-10")),
    ];
    let report = engine::test_rule_against(&payload, &samples);

    assert_eq!(report.total_tested, 3);
    assert_eq!(report.match_count, 1);
    assert!(report.results[0].matched);
}

#[tokio::test]
async fn test_restore_round_trip() {
    let storage = MemoryStorage::new();
    let mut store = RuleStore::new(storage.clone()).with_actor("ana");

    let rule = store.create(tag_rule("A", "frete", "frete")).await.unwrap();
    store
        .update(
            &rule.id,
            RuleUpdate {
                name: Some("B".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let history = store.history(&rule.id, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    let update_entry = &history[0];
    assert_eq!(update_entry.action, AuditAction::Updated);
    assert_eq!(update_entry.changed_by.as_deref(), Some("ana"));

    let restored = store.restore(&update_entry.id, false).await.unwrap();
    assert_eq!(restored.name, "A");

    let history = store.history(&rule.id, 10).await.unwrap();
    assert_eq!(history.len(), 3);
    let restore_entry = &history[0];
    assert_eq!(
        restore_entry.previous_data.as_ref().map(|s| s.name.as_str()),
        Some("B")
    );
    assert!(restore_entry
        .change_reason
        .as_deref()
        .is_some_and(|reason| reason.contains(&update_entry.id)));
}

#[tokio::test]
async fn test_deleted_rule_can_be_restored() {
    let mut store = RuleStore::new(MemoryStorage::new());
    let rule = store.create(tag_rule("Saque", "saque", "saque")).await.unwrap();
    store.delete(&rule.id).await.unwrap();
    assert!(store.get(&rule.id).await.unwrap().is_none());

    let deleted = store.history(&rule.id, 1).await.unwrap().remove(0);
    assert_eq!(deleted.action, AuditAction::Deleted);
    assert!(deleted.new_data.is_none());

    let restored = store.restore(&deleted.id, false).await.unwrap();
    assert_eq!(restored.id, rule.id);
    assert_eq!(restored.name, "Saque");
    assert!(store.get(&rule.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_system_rules_are_protected() {
    let mut store = RuleStore::new(MemoryStorage::new());
    let installed = store.install_system_rules().await.unwrap();
    assert_eq!(installed.len(), 7);
    assert!(store.install_system_rules().await.unwrap().is_empty());

    let refund = installed
        .iter()
        .find(|rule| rule.id == "system_reembolso")
        .unwrap();
    assert!(matches!(
        store.delete(&refund.id).await,
        Err(ReconError::SystemRule(_))
    ));

    let disabled = store
        .update(&refund.id, RuleUpdate::enabled(false))
        .await
        .unwrap();
    assert!(!disabled.enabled);
}

#[tokio::test]
async fn test_split_settlement_is_grouped() {
    let storage = MemoryStorage::new()
        .with_orders(
            Marketplace::Shopee,
            [OrderRecord::new("erp-1", "X", dec("100"), 1)],
        )
        .unwrap();
    let payments = vec![
        PaymentRecord::new("p1", "X", dec("80")),
        PaymentRecord::new("p2", "X_AJUSTE", dec("-5")),
        PaymentRecord::new("p3", "X_REEMBOLSO", dec("-10")),
        PaymentRecord::new("p4", "Y", dec("12")),
    ];

    let engine = ReconciliationEngine::new(EngineConfig {
        fees: shopee_schedule(),
        ..Default::default()
    });
    let report = engine
        .reconcile(&payments, Marketplace::Shopee, &storage, &storage)
        .await
        .unwrap();

    assert_eq!(storage.lookup_calls(), 2);
    for row in &report.rows[..3] {
        assert_eq!(row.match_result.status, MatchStatus::MultipleEntries);
        assert_eq!(row.match_result.net_balance, Some(dec("65")));
        assert_eq!(row.match_result.related_payment_ids.len(), 2);
        assert!(row.payment.tags.contains("multi-entry"));
    }
    assert_eq!(report.rows[3].match_result.status, MatchStatus::Unmatched);
    assert_eq!(report.summary.multi_entry, 3);
    assert_eq!(report.summary.unmatched, 1);
    assert_eq!(report.summary.match_rate(), 75.0);
}

#[tokio::test]
async fn test_full_reconcile_with_system_rules() {
    let mut order = OrderRecord::new("erp-1", "240101ABC", dec("100"), 1);
    order.escrow_amount = Some(dec("80"));
    let storage = MemoryStorage::new()
        .with_orders(Marketplace::Shopee, [order])
        .unwrap();
    storage.fail_lookup_for("BROKEN").unwrap();

    let mut store = RuleStore::new(storage.clone());
    store.install_system_rules().await.unwrap();
    store
        .create(tag_rule("Magalu only", "venda", "magalu").scoped_to([RuleScope::Magalu]))
        .await
        .unwrap();

    let day = |d| NaiveDate::from_ymd_opt(2024, 3, d).unwrap();
    let payments = vec![
        PaymentRecord::new("p1", "240101ABC", dec("80"))
            .with_text("Venda", "Pagamento do pedido")
            .with_payment_date(day(5)),
        PaymentRecord::new("p2", "", dec("-30"))
            .with_text("Débito", "Recarga de ads")
            .with_payment_date(day(2)),
        PaymentRecord::new("p3", "BROKEN", dec("40"))
            .with_text("Venda", "Reembolso parcial")
            .with_payment_date(day(9)),
    ];

    let engine = ReconciliationEngine::new(EngineConfig {
        fees: shopee_schedule(),
        ..Default::default()
    });
    let report = engine
        .reconcile(&payments, Marketplace::Shopee, &storage, &store)
        .await
        .unwrap();

    let sale = &report.rows[0];
    assert_eq!(sale.match_result.status, MatchStatus::Linked);
    assert_eq!(sale.expected_net, Some(dec("80")));
    assert!(!sale.has_escrow_discrepancy());
    assert!(!sale.payment.tags.contains("magalu"));

    let ads = &report.rows[1];
    assert!(ads.payment.tags.contains("marketing"));
    assert!(ads.payment.is_expense);

    let refund = &report.rows[2];
    assert!(refund.payment.is_refund);
    assert_eq!(refund.match_result.status, MatchStatus::Unmatched);

    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].base_order_id, "BROKEN");
    assert_eq!(report.summary.period_start, Some(day(2)));
    assert_eq!(report.summary.period_end, Some(day(9)));
}

#[tokio::test]
async fn test_manual_search_rate_limit_is_surfaced() {
    let storage = MemoryStorage::new();
    storage.rate_limit_manual_search(45).unwrap();

    let engine = ReconciliationEngine::default();
    let err = engine
        .match_engine()
        .search_manual("maria", Marketplace::MercadoLivre, &storage)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconError::RateLimited {
            retry_after_seconds: 45
        }
    ));
}

#[test]
fn test_bulk_override_then_recompute() {
    let payments = vec![
        PaymentRecord::new("p1", "A", dec("80")),
        PaymentRecord::new("p2", "B", dec("80")),
    ];
    let overrides = FeeOverrides {
        commission_rate: Some(dec("10")),
        ..Default::default()
    };
    let updated = apply_bulk_overrides(&payments, &["p1".to_string()], &overrides);

    let calculator = FeeCalculator::new(shopee_schedule());
    let order = OrderRecord::new("erp-1", "A", dec("100"), 1);
    let with_override = calculator
        .compute(
            Marketplace::Shopee,
            &order,
            updated[0].fee_overrides.as_ref(),
        )
        .unwrap();
    let without = calculator
        .compute(
            Marketplace::Shopee,
            &order,
            updated[1].fee_overrides.as_ref(),
        )
        .unwrap();

    assert_eq!(with_override.net_value, dec("84"));
    assert_eq!(without.net_value, dec("80"));
}
