mod common;

use std::sync::Arc;

use common::*;
use remate::{
    data::domain::{CotId, ItemsPerRenglon, Margin, RenglonId},
    engine::derive::{apply_user_costs, CostInput},
    store::{LineItemCostsRecord, LineItemRecord},
    MemoryStore, Monitor, MonitorConfig, Store,
};

fn seeded_store() -> (Arc<MemoryStore>, CotId, RenglonId) {
    let store = Arc::new(MemoryStore::new());
    let id_cot = CotId::from("22053");
    let id_renglon = RenglonId::from("836160");
    store
        .upsert_auction(&id_cot, "https://portal/cotizacion/22053")
        .unwrap();
    store
        .upsert_line_item(&LineItemRecord {
            id_cot: id_cot.clone(),
            id_renglon: id_renglon.clone(),
            descripcion: "Guantes de nitrilo".to_string(),
            items_per_renglon: ItemsPerRenglon(1),
            quantity: 10.0,
            min_margin: Margin(0.0),
        })
        .unwrap();
    (store, id_cot, id_renglon)
}

/// S4: the bidirectional pair resolves with TOTAL winning, and fills the
/// missing half when only one side arrives.
#[test]
fn s4_bidirectional_cost_resolution() {
    let (store, id_cot, id_renglon) = seeded_store();

    let record = apply_user_costs(
        store.as_ref(),
        &id_cot,
        &id_renglon,
        CostInput {
            unit_cost_ars: Some(100.0),
            total_cost_ars: Some(1500.0),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(record.unit_cost_ars, Some(150.0));
    assert_eq!(record.total_cost_ars, Some(1500.0));

    let record = apply_user_costs(
        store.as_ref(),
        &id_cot,
        &id_renglon,
        CostInput {
            unit_cost_ars: Some(200.0),
            total_cost_ars: None,
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(record.unit_cost_ars, Some(200.0));
    assert_eq!(record.total_cost_ars, Some(2000.0));

    // Pair consistency holds in the store after processing.
    let stored = store.costs(&id_cot, &id_renglon).unwrap().unwrap();
    let (cu, ct) = (
        stored.unit_cost_ars.unwrap(),
        stored.total_cost_ars.unwrap(),
    );
    assert!((cu * 10.0 - ct).abs() <= 0.01);
}

/// S5: margins round-trip through the percent convention exactly, and the
/// acceptable price applies the stored fraction.
#[test]
fn s5_margin_round_trip_and_acceptable_price() {
    let (store, id_cot, id_renglon) = seeded_store();

    let record = apply_user_costs(
        store.as_ref(),
        &id_cot,
        &id_renglon,
        CostInput {
            unit_cost_ars: Some(100.0),
            min_margin: Some(30.0),
            ..Default::default()
        },
    )
    .unwrap();

    let stored_margin = record.min_margin.unwrap();
    assert_eq!(stored_margin, Margin(0.30));

    // Store -> export -> re-import is exact for hundredths.
    let exported = stored_margin.export();
    assert_eq!(exported, 30.0);
    assert_eq!(Margin::ingest(exported), stored_margin);

    assert_eq!(record.price_unit_acceptable, Some(130.0));
}

/// The engine re-derives the metrics whenever an UPDATE lands, so the costs
/// row tracks the latest minimum-to-beat.
#[test]
fn engine_rederives_costs_against_fresh_observations() {
    let store = Arc::new(MemoryStore::new());
    let id_cot = CotId::from("22053");
    let id_renglon = RenglonId::from("836160");
    store
        .upsert_auction(&id_cot, "https://portal/cotizacion/22053")
        .unwrap();
    store
        .upsert_line_item(&LineItemRecord {
            id_cot: id_cot.clone(),
            id_renglon: id_renglon.clone(),
            descripcion: "Guantes de nitrilo".to_string(),
            items_per_renglon: ItemsPerRenglon(1),
            quantity: 10.0,
            min_margin: Margin(0.0),
        })
        .unwrap();
    store
        .upsert_costs(
            &id_cot,
            &id_renglon,
            &LineItemCostsRecord {
                unit_cost_ars: Some(1_000_000.0),
                min_margin: Some(Margin(0.30)),
                ..Default::default()
            },
        )
        .unwrap();

    let handle = Monitor::builder()
        .with_store(store.clone())
        .with_config(MonitorConfig::default())
        .with_replay(scenario_s1())
        .build()
        .unwrap()
        .start()
        .unwrap();
    handle.wait().unwrap();

    let costs = store.costs(&id_cot, &id_renglon).unwrap().unwrap();

    // Final minimum-to-beat in S1 is one peso under the last best offer;
    // equivalent quantity is 10.
    let expected_mejora = (19_600_000.0 - 1.0) / 10.0;
    assert_eq!(costs.price_unit_mejora, Some(expected_mejora));

    let expected_renta = expected_mejora / 1_000_000.0 - 1.0;
    let renta = costs.renta_para_mejorar.unwrap();
    assert!((renta - expected_renta).abs() < 1e-9);

    // User fields survived the collector run untouched.
    assert_eq!(costs.unit_cost_ars, Some(1_000_000.0));
    assert_eq!(costs.min_margin, Some(Margin(0.30)));
}
