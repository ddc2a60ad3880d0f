//! Create, edit, audit and restore a classification rule

use marketplace_recon::rules::{
    engine, export_rules_to_json, parse_imported_rules, Action, Condition, ConditionField,
    RulePayload, RuleScope, RuleUpdate,
};
use marketplace_recon::utils::MemoryStorage;
use marketplace_recon::{Marketplace, RuleStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🧩 Marketplace Recon - Rule Lifecycle Example\n");

    let mut store = RuleStore::new(MemoryStorage::new()).with_actor("finance@example.com");

    // 1. Preview before saving
    let payload = RulePayload::new("Mercado Envios")
        .scoped_to([RuleScope::MercadoLivre])
        .with_condition(Condition::regex(ConditionField::FullText, "mercado ?envios"))
        .with_action(Action::add_tags(["frete", "logistica"]))
        .with_action(Action::MarkExpense)
        .with_priority(75);

    let preview = engine::test_rule(&payload, "Tarifa Mercado Envios Flex");
    println!("👀 Preview matched: {} tags {:?}", preview.matched, preview.applied_tags);

    // 2. Create and edit
    let rule = store.create(payload).await?;
    println!("  ✓ Created rule {} (v{})", rule.id, rule.version);

    store
        .update(
            &rule.id,
            RuleUpdate {
                name: Some("Frete Mercado Envios".to_string()),
                ..Default::default()
            },
        )
        .await?;

    // 3. Stage a draft and publish it
    let mut draft = store
        .get(&rule.id)
        .await?
        .ok_or("rule disappeared")?
        .payload();
    draft.priority = 95;
    store.save_draft(&rule.id, draft).await?;
    let published = store.publish(&rule.id).await?;
    println!(
        "  ✓ Published v{} with priority {}",
        published.version, published.priority
    );

    // 4. Audit trail
    println!("\n📜 History:");
    let history = store.history(&rule.id, 10).await?;
    for entry in &history {
        println!("  {:?} at {}", entry.action, entry.changed_at);
        for change in entry.changes()? {
            println!("      {}: {:?} -> {:?}", change.field, change.before, change.after);
        }
    }

    // 5. Restore the original name
    let rename = history.iter().find(|entry| {
        entry
            .previous_data
            .as_ref()
            .is_some_and(|previous| previous.name == "Mercado Envios")
    });
    if let Some(rename) = rename {
        let restored = store.restore(&rename.id, false).await?;
        println!("\n↩️  Restored name: {}", restored.name);
    }

    // 6. Export and re-import
    let json = export_rules_to_json(&store.list().await?, Some(Marketplace::MercadoLivre))?;
    let imported = parse_imported_rules(&json)?;
    println!(
        "\n📦 Exported {} bytes, re-imported {} rules ({} errors)",
        json.len(),
        imported.rules.len(),
        imported.errors.len()
    );

    Ok(())
}
