//! # Relationship Integration Tests
//!
//! Validation rules, integrity index creation, the generated naming
//! schemes, and persistence of relationship records.

use jetdb::{ColumnDef, Database, DataType, RelationshipBuilder};
use tempfile::TempDir;

fn create_test_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::create(dir.path().join("test.jet")).unwrap();
    (dir, db)
}

/// orders(id, code, alt, note) and lines(order_id, code, qty).
fn orders_and_lines(db: &Database) {
    db.create_table(
        "orders",
        vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("code", DataType::Int),
            ColumnDef::new("alt", DataType::Int),
            ColumnDef::new("note", DataType::Text),
        ],
    )
    .unwrap();
    db.create_table(
        "lines",
        vec![
            ColumnDef::new("order_id", DataType::Int),
            ColumnDef::new("code", DataType::Int),
            ColumnDef::new("qty", DataType::Float),
        ],
    )
    .unwrap();
}

#[test]
fn missing_table_is_rejected() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "nope").add_columns("id", "order_id");
    let result = db.create_relationship(&builder);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("two tables are required in relationship"));
}

#[test]
fn missing_columns_are_rejected() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines");
    let result = db.create_relationship(&builder);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("missing columns in relationship"));
}

#[test]
fn mismatched_column_counts_are_rejected() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines")
        .with_primary_columns(vec!["id"])
        .with_secondary_columns(vec!["order_id", "code"]);
    let result = db.create_relationship(&builder);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("must have same number of columns on each side of relationship"));
}

#[test]
fn mismatched_column_types_are_rejected() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    // id is Int, qty is Float: the pair must not validate.
    let builder = RelationshipBuilder::new("orders", "lines").add_columns("id", "qty");
    let result = db.create_relationship(&builder);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("matched columns must have the same data type"));
}

#[test]
fn unknown_column_is_rejected() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines").add_columns("id", "missing");
    let result = db.create_relationship(&builder);
    assert!(result
        .unwrap_err()
        .to_string()
        .contains("table 'lines' has no column 'missing'"));
}

#[test]
fn relationship_without_integrity_creates_no_indexes() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines").add_columns("id", "order_id");
    let rel = db.create_relationship(&builder).unwrap();

    assert_eq!(rel.primary_table(), "orders");
    assert_eq!(rel.secondary_table(), "lines");
    assert_eq!(rel.primary_columns(), ["id"]);
    assert_eq!(rel.secondary_columns(), ["order_id"]);
    assert!(!rel.has_referential_integrity());

    assert!(db.table("orders").unwrap().indexes().is_empty());
    assert!(db.table("lines").unwrap().indexes().is_empty());

    assert_eq!(db.relationships().len(), 1);
    assert_eq!(db.relationships()[0], rel);
}

#[test]
fn integrity_creates_primary_unique_and_secondary_index() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "order_id")
        .with_referential_integrity();
    let rel = db.create_relationship(&builder).unwrap();
    assert!(rel.has_referential_integrity());

    let orders_indexes = db.table("orders").unwrap().indexes();
    assert_eq!(orders_indexes.len(), 1);
    assert_eq!(orders_indexes[0].name(), ".rC");
    assert!(orders_indexes[0].is_unique());
    assert_eq!(orders_indexes[0].columns(), ["id"]);

    // The secondary-side index is over the secondary columns.
    let lines_indexes = db.table("lines").unwrap().indexes();
    assert_eq!(lines_indexes.len(), 1);
    assert_eq!(lines_indexes[0].name(), "orderslines");
    assert!(!lines_indexes[0].is_unique());
    assert_eq!(lines_indexes[0].columns(), ["order_id"]);
}

#[test]
fn primary_index_names_advance_per_relationship() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    // Three integrity relationships over distinct primary columns. With
    // {".rC", ".rD"} taken, the next primary-side name is ".rE".
    for pair in [("id", "order_id"), ("code", "code"), ("alt", "order_id")] {
        let builder = RelationshipBuilder::new("orders", "lines")
            .add_columns(pair.0, pair.1)
            .with_referential_integrity();
        db.create_relationship(&builder).unwrap();
    }

    let names: Vec<String> = db
        .table("orders")
        .unwrap()
        .indexes()
        .iter()
        .map(|idx| idx.name().to_string())
        .collect();
    assert_eq!(names, [".rC", ".rD", ".rE"]);
}

#[test]
fn secondary_index_names_append_counters() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    for pair in [("id", "order_id"), ("code", "code")] {
        let builder = RelationshipBuilder::new("orders", "lines")
            .add_columns(pair.0, pair.1)
            .with_referential_integrity();
        db.create_relationship(&builder).unwrap();
    }

    let names: Vec<String> = db
        .table("lines")
        .unwrap()
        .indexes()
        .iter()
        .map(|idx| idx.name().to_string())
        .collect();
    assert_eq!(names, ["orderslines", "orderslines1"]);
}

#[test]
fn existing_unique_primary_index_is_reused() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let first = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "order_id")
        .with_referential_integrity();
    db.create_relationship(&first).unwrap();

    // Same primary columns again: the unique index already exists, so
    // only the secondary side gains an index.
    let second = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "code")
        .with_referential_integrity();
    db.create_relationship(&second).unwrap();

    assert_eq!(db.table("orders").unwrap().indexes().len(), 1);
    assert_eq!(db.table("lines").unwrap().indexes().len(), 2);
}

#[test]
fn relationship_names_are_generated_uniquely() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines").add_columns("id", "order_id");
    let first = db.create_relationship(&builder).unwrap();
    let second = db.create_relationship(&builder).unwrap();

    assert_eq!(first.name(), "orderslines");
    assert_eq!(second.name(), "orderslines1");

    let named = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "order_id")
        .with_name("order_fk");
    let third = db.create_relationship(&named).unwrap();
    assert_eq!(third.name(), "order_fk");
}

#[test]
fn flags_round_trip() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "order_id")
        .with_referential_integrity()
        .one_to_one()
        .cascade_updates()
        .cascade_deletes();
    let rel = db.create_relationship(&builder).unwrap();

    assert!(rel.has_referential_integrity());
    assert!(rel.is_one_to_one());
    assert!(rel.cascades_updates());
    assert!(rel.cascades_deletes());
}

#[test]
fn multi_column_relationship() {
    let (_dir, db) = create_test_db();
    orders_and_lines(&db);

    let builder = RelationshipBuilder::new("orders", "lines")
        .add_columns("id", "order_id")
        .add_columns("code", "code")
        .with_referential_integrity();
    let rel = db.create_relationship(&builder).unwrap();

    assert_eq!(rel.column_count(), 2);
    assert_eq!(rel.primary_columns(), ["id", "code"]);
    assert_eq!(rel.secondary_columns(), ["order_id", "code"]);

    let orders_indexes = db.table("orders").unwrap().indexes();
    assert_eq!(orders_indexes[0].columns(), ["id", "code"]);
    let lines_indexes = db.table("lines").unwrap().indexes();
    assert_eq!(lines_indexes[0].columns(), ["order_id", "code"]);
}
