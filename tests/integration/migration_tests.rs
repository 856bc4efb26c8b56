use serde_json::json;

use shelfkeeper::import::MigrationEngine;
use shelfkeeper::test_utils::InventoryFixture;
use shelfkeeper::ShelfError;

use crate::assert_command_success;
use crate::fixture::TestFixture;

fn base_export() -> serde_json::Value {
    json!({
        "stores": [{"name": "Fresh Mart", "location": "Main St"}],
        "categories": [{"name": "Dairy"}],
        "products": [{
            "name": "Milk",
            "category": "Dairy",
            "brands": ["Arla"],
            "prices": [
                {"store": "Fresh Mart", "price": 1.49, "unit": "1l"},
                {"store": "Fresh Mart", "price": "2.59", "unit": "2l"}
            ]
        }]
    })
}

#[test]
fn migrating_the_same_file_twice_is_a_no_op() {
    let fx = InventoryFixture::new();
    let source = fx.create_file("legacy.json", &base_export().to_string());
    let mut engine = MigrationEngine::new(fx.open_db());

    let first = engine.migrate(&source).unwrap();
    assert_eq!(
        (
            first.stores_upserted,
            first.products_upserted,
            first.prices_upserted,
            first.skipped
        ),
        (1, 1, 2, 0)
    );

    let second = engine.migrate(&source).unwrap();
    assert_eq!(second.prices_upserted, 0);
    assert_eq!(second.already_migrated, 2);
    assert_eq!(second.stores_upserted, first.stores_upserted);
    assert_eq!(second.products_upserted, first.products_upserted);
    assert_eq!(second.categories_upserted, first.categories_upserted);

    let db = fx.open_db();
    assert_eq!(db.row_count("store_products").unwrap(), Some(2));
    assert_eq!(db.row_count("migration_ledger").unwrap(), Some(2));
}

#[test]
fn superset_export_only_adds_the_delta() {
    let fx = InventoryFixture::new();
    let source = fx.create_file("legacy.json", &base_export().to_string());
    let mut engine = MigrationEngine::new(fx.open_db());
    engine.migrate(&source).unwrap();

    let mut bigger = base_export();
    bigger["stores"]
        .as_array_mut()
        .unwrap()
        .push(json!({"name": "Corner Shop"}));
    bigger["store_products"] = json!([
        {"store": "corner shop", "product": "milk", "price": 1.79, "unit": "1L"},
        // Same key as an existing price, spelled differently.
        {"store": " FRESH MART ", "product": "Milk", "price": 9.99, "unit": "1L "}
    ]);
    let superset = fx.create_file("legacy-v2.json", &bigger.to_string());

    let summary = engine.migrate(&superset).unwrap();
    assert_eq!(summary.stores_upserted, 2);
    assert_eq!(summary.prices_upserted, 1);
    assert_eq!(summary.already_migrated, 3);

    let price: f64 = fx
        .open_db()
        .conn()
        .query_row(
            "SELECT sp.price FROM store_products sp JOIN stores s ON s.id = sp.store_id \
             WHERE s.name = 'Fresh Mart' AND sp.unit = '1l'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert!((price - 1.49).abs() < f64::EPSILON);
}

#[test]
fn malformed_records_are_skipped_not_fatal() {
    let fx = InventoryFixture::new();
    let source = fx.create_file(
        "legacy.json",
        &json!({
            "stores": [{"name": "Fresh Mart"}, {"location": "nowhere"}],
            "products": [{
                "name": "Bread",
                "prices": [
                    {"store": "Fresh Mart", "price": -1, "unit": "loaf"},
                    {"store": "Fresh Mart", "price": 2.10, "unit": "loaf"},
                    {"store": "Ghost Store", "price": 1.00, "unit": "loaf"}
                ]
            }]
        })
        .to_string(),
    );

    let summary = MigrationEngine::new(fx.open_db()).migrate(&source).unwrap();
    assert_eq!(summary.stores_upserted, 1);
    assert_eq!(summary.prices_upserted, 1);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.skipped_records.len(), 3);
}

#[test]
fn unreadable_source_fails_the_run() {
    let fx = InventoryFixture::new();
    let mut engine = MigrationEngine::new(fx.open_db());

    let missing = engine.migrate(&fx.root.join("nope.json")).unwrap_err();
    assert!(matches!(missing, ShelfError::SourceUnreadable(_)));

    let garbage = fx.create_file("garbage.json", "{not json");
    let err = engine.migrate(&garbage).unwrap_err();
    assert!(matches!(err, ShelfError::SourceUnreadable(_)));
}

#[test]
fn cli_migrate_reports_summary_in_envelope() {
    let fixture = TestFixture::new("cli_migrate_reports_summary_in_envelope");
    let source = fixture.write_legacy("legacy.json", &base_export());

    let first = fixture.run_shelf(&["--json", "migrate", source.to_str().unwrap()]);
    assert_command_success!(first);
    let json = first.json();
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["prices_upserted"], 2);

    let second = fixture.run_shelf(&["--json", "migrate", source.to_str().unwrap()]);
    assert_command_success!(second);
    assert_eq!(second.json()["data"]["prices_upserted"], 0);
    assert_eq!(fixture.count("store_products"), 2);
}
