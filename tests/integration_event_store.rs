//! Integration tests for the write side: unit-of-work commits, optimistic
//! concurrency, slug uniqueness and the event/snapshot invariants.

use serde_json::{json, Value};

use commerce_admin::aggregate::product::{
    FulfillmentType, NewProduct, ProductMetadata, ProductState, TaxInfo, VariantOption,
};
use commerce_admin::aggregate::slug_reservation::SlugReservationState;
use commerce_admin::aggregate::positions::VariantPositionsState;
use commerce_admin::aggregate::Product;
use commerce_admin::event_store::EventStore;
use commerce_admin::handlers::{
    CreateProductCommand, CreateVariantCommand, ProductHandler, ScheduleDropCommand,
    ScheduleHandler, UpdateProductSlugCommand, VariantHandler,
};
use commerce_admin::uow::UnitOfWork;
use commerce_admin::{AppError, OperationContext};

mod common;

fn context() -> OperationContext {
    OperationContext::new().with_correlation_id(uuid::Uuid::new_v4())
}

fn product_params(id: &str, slug: &str) -> NewProduct {
    NewProduct {
        id: id.to_string(),
        name: "Shirt".to_string(),
        slug: slug.to_string(),
        collections: vec![],
        variant_options: vec![],
        metadata: ProductMetadata::default(),
        tags: vec![],
        fulfillment_type: FulfillmentType::Digital,
        dropship: None,
        dropship_safety_buffer: None,
        variant_positions_id: format!("{}-pos", id),
        tax: TaxInfo::default(),
        vendor: None,
    }
}

fn create_command(id: &str, slug: &str) -> CreateProductCommand {
    serde_json::from_value(json!({
        "id": id,
        "slug": slug,
        "name": "Shirt",
        "collections": ["col-1"],
        "fulfillmentType": "digital",
        "variantOptions": [{ "name": "Size", "values": ["S", "M"] }]
    }))
    .expect("valid command")
}

#[tokio::test]
async fn test_uow_commit_and_reload() {
    let pool = common::setup_test_db().await;
    let ctx = context();

    let mut uow = UnitOfWork::begin(&pool, &ctx).await.unwrap();
    let mut product = Product::create(product_params("prod-1", "t-shirt")).unwrap();
    uow.save(&mut product).unwrap();
    let summary = uow.commit().await.unwrap();

    assert_eq!(summary.version_of("prod-1"), Some(1));

    // Reload through a fresh unit of work
    let mut uow = UnitOfWork::begin(&pool, &ctx).await.unwrap();
    let reloaded = uow.get::<ProductState>("prod-1").await.unwrap();
    assert_eq!(reloaded.version(), 1);
    assert_eq!(reloaded.state().slug, "t-shirt");
    uow.rollback().await.unwrap();

    // The log holds the genesis event at version 0
    let store = EventStore::new(pool);
    let events = store.events_for_aggregate("prod-1").await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_name, "product.created");
    assert_eq!(events[0].version, 0);
    assert_eq!(events[0].payload["priorState"], json!({}));
}

#[tokio::test]
async fn test_optimistic_conflict_second_writer_loses() {
    let pool = common::setup_test_db().await;
    let ctx = context();

    let mut uow = UnitOfWork::begin(&pool, &ctx).await.unwrap();
    let mut product = Product::create(product_params("prod-1", "t-shirt")).unwrap();
    uow.save(&mut product).unwrap();
    uow.commit().await.unwrap();

    // Both writers load at version 1
    let mut uow_a = UnitOfWork::begin(&pool, &ctx).await.unwrap();
    let mut product_a = uow_a.get::<ProductState>("prod-1").await.unwrap();
    let mut uow_b = UnitOfWork::begin(&pool, &ctx).await.unwrap();
    let mut product_b = uow_b.get::<ProductState>("prod-1").await.unwrap();

    // Writer A wins
    product_a.publish().unwrap();
    uow_a.save(&mut product_a).unwrap();
    uow_a.commit().await.unwrap();

    // Writer B must fail, leaving A's state intact
    product_b.archive().unwrap();
    uow_b.save(&mut product_b).unwrap();
    let err = uow_b.commit().await.unwrap_err();
    assert!(matches!(err, AppError::Conflict { .. }));

    let store = EventStore::new(pool);
    let snapshot = store.load_snapshot("prod-1").await.unwrap().unwrap();
    assert_eq!(snapshot.version, 2);
    assert_eq!(snapshot.payload["status"], "active");

    // Writer B's event never made it into the log
    let events = store.events_for_aggregate("prod-1").await.unwrap();
    assert_eq!(events.len(), 2);
    let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![0, 1]);
}

#[tokio::test]
async fn test_create_product_commits_three_aggregates() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let handler = ProductHandler::new(pool.clone(), state.images.clone());

    let result = handler
        .create(create_command("prod-1", "t-shirt"), &context())
        .await
        .unwrap();
    assert_eq!(result.product_id, "prod-1");
    assert_eq!(result.version, 1);

    let store = EventStore::new(pool.clone());

    // Genesis events at version 0 on all three aggregates
    for (id, name) in [
        ("prod-1", "product.created"),
        ("t-shirt", "slugReservation.created"),
    ] {
        let events = store.events_for_aggregate(id).await.unwrap();
        assert_eq!(events.len(), 1, "{} events", id);
        assert_eq!(events[0].event_name, name);
        assert_eq!(events[0].version, 0);
    }
    let positions_events = store
        .events_for_aggregate(&result.variant_positions_id)
        .await
        .unwrap();
    assert_eq!(
        positions_events[0].event_name,
        "variantPositionsWithinProduct.created"
    );

    // Snapshot versions are 1 each
    for id in ["prod-1", "t-shirt", result.variant_positions_id.as_str()] {
        let snapshot = store.load_snapshot(id).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 1, "{} snapshot version", id);
    }

    // Outbox carries one entry per event
    let outbox_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(outbox_count, 3);
}

#[tokio::test]
async fn test_duplicate_slug_rejected() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let handler = ProductHandler::new(pool.clone(), state.images.clone());

    handler
        .create(create_command("prod-1", "t-shirt"), &context())
        .await
        .unwrap();

    let err = handler
        .create(create_command("prod-2", "t-shirt"), &context())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "constraint_violated");
    assert!(err.to_string().contains("t-shirt"));

    // Nothing was persisted for the loser
    let store = EventStore::new(pool);
    assert!(store.load_snapshot("prod-2").await.unwrap().is_none());
    assert!(store.events_for_aggregate("prod-2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_slug_rename_releases_and_frees_old_slug() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let handler = ProductHandler::new(pool.clone(), state.images.clone());

    handler
        .create(create_command("prod-1", "t-shirt"), &context())
        .await
        .unwrap();

    handler
        .update_slug(
            UpdateProductSlugCommand {
                product_id: "prod-1".to_string(),
                new_slug: "tee".to_string(),
                expected_version: 1,
            },
            &context(),
        )
        .await
        .unwrap();

    let mut uow = UnitOfWork::begin(&pool, &context()).await.unwrap();
    let old = uow.get::<SlugReservationState>("t-shirt").await.unwrap();
    assert!(!old.is_active());
    assert_eq!(old.state().new_slug.as_deref(), Some("tee"));
    let new = uow.get::<SlugReservationState>("tee").await.unwrap();
    assert!(new.is_active());
    assert_eq!(new.state().entity_id, "prod-1");
    uow.rollback().await.unwrap();

    // The released slug can now be claimed by another product
    let result = handler
        .create(create_command("prod-2", "t-shirt"), &context())
        .await
        .unwrap();
    assert_eq!(result.slug, "t-shirt");

    let mut uow = UnitOfWork::begin(&pool, &context()).await.unwrap();
    let reclaimed = uow.get::<SlugReservationState>("t-shirt").await.unwrap();
    assert!(reclaimed.is_active());
    assert_eq!(reclaimed.state().entity_id, "prod-2");
    uow.rollback().await.unwrap();
}

#[tokio::test]
async fn test_create_variant_validates_options_and_appends_position() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let products = ProductHandler::new(pool.clone(), state.images.clone());
    let variants = VariantHandler::new(pool.clone(), state.images.clone());

    let created = products
        .create(create_command("prod-1", "t-shirt"), &context())
        .await
        .unwrap();

    let result = variants
        .create(
            serde_json::from_value(json!({
                "id": "var-1",
                "productId": "prod-1",
                "sku": "SKU-1",
                "options": { "Size": "M" },
                "listPrice": "19.99",
                "inventory": 10,
                "expectedVersion": 1
            }))
            .unwrap(),
            &context(),
        )
        .await
        .unwrap();
    assert_eq!(result.version, 1);
    assert_eq!(result.position, 0);

    let mut uow = UnitOfWork::begin(&pool, &context()).await.unwrap();
    let positions = uow
        .get::<VariantPositionsState>(&created.variant_positions_id)
        .await
        .unwrap();
    assert_eq!(positions.state().variant_ids, vec!["var-1".to_string()]);
    assert_eq!(positions.version(), 2);

    let sku = uow.get::<SlugReservationState>("SKU-1").await.unwrap();
    assert!(sku.is_active());
    assert_eq!(sku.state().entity_id, "var-1");
    uow.rollback().await.unwrap();

    // Invalid option value is rejected before anything is written
    let err = variants
        .create(
            serde_json::from_value::<CreateVariantCommand>(json!({
                "productId": "prod-1",
                "sku": "SKU-2",
                "options": { "Size": "XL" },
                "listPrice": "19.99",
                "inventory": 10,
                "expectedVersion": 1
            }))
            .unwrap(),
            &context(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation_failed");
    assert!(err.to_string().contains("not valid for this product"));
}

#[tokio::test]
async fn test_schedule_visible_drop() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let products = ProductHandler::new(pool.clone(), state.images.clone());
    let schedules = ScheduleHandler::new(pool.clone());

    products
        .create(
            serde_json::from_value(json!({
                "id": "prod-1",
                "name": "Drop Shirt",
                "slug": "drop-shirt",
                "fulfillmentType": "dropship",
                "dropship": {
                    "supplierCost": "7.50",
                    "supplierSku": "SUP-1",
                    "fulfillmentProviderId": "provider-1"
                },
                "dropshipSafetyBuffer": 5
            }))
            .unwrap(),
            &context(),
        )
        .await
        .unwrap();

    let scheduled_for = chrono::Utc::now() + chrono::Duration::hours(24);
    let result = schedules
        .schedule_visible_drop(
            ScheduleDropCommand {
                product_id: "prod-1".to_string(),
                scheduled_for,
                expected_version: 1,
            },
            &context(),
        )
        .await
        .unwrap();

    let store = EventStore::new(pool.clone());

    // Product moved to the transitional state
    let snapshot = store.load_snapshot("prod-1").await.unwrap().unwrap();
    assert_eq!(snapshot.payload["status"], "visible_pending_drop");

    // Schedule aggregate targets the deferred publish
    let schedule = store
        .load_snapshot(&result.schedule_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.payload["commandType"], "publishDropshipProduct");
    assert_eq!(schedule.payload["targetAggregateId"], "prod-1");
    assert_eq!(schedule.payload["status"], "pending");

    // The drop event is on the product's stream
    let events = store.events_for_aggregate("prod-1").await.unwrap();
    assert!(events
        .iter()
        .any(|e| e.event_name == "dropshipProduct.visible_drop_scheduled"));
}

/// Replaying all of an aggregate's event deltas from version 0 reproduces
/// the stored snapshot payload.
#[tokio::test]
async fn test_event_replay_reproduces_snapshot() {
    let pool = common::setup_test_db().await;
    let state = common::test_state(pool.clone());
    let handler = ProductHandler::new(pool.clone(), state.images.clone());

    handler
        .create(create_command("prod-1", "t-shirt"), &context())
        .await
        .unwrap();
    handler
        .update_details(
            serde_json::from_value(json!({
                "productId": "prod-1",
                "expectedVersion": 1,
                "name": "Better Shirt",
                "tags": ["summer"]
            }))
            .unwrap(),
            &context(),
        )
        .await
        .unwrap();
    handler
        .publish(
            serde_json::from_value(json!({ "productId": "prod-1", "expectedVersion": 2 }))
                .unwrap(),
            &context(),
        )
        .await
        .unwrap();

    let store = EventStore::new(pool);
    let events = store.events_for_aggregate("prod-1").await.unwrap();

    // Versions are contiguous from 0
    let versions: Vec<i64> = events.iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![0, 1, 2]);

    // Fold the newState patches over the genesis state
    let mut replayed = json!({});
    for event in &events {
        merge_patch(&mut replayed, &event.payload["newState"]);
    }

    let snapshot = store.load_snapshot("prod-1").await.unwrap().unwrap();
    assert_eq!(replayed, snapshot.payload);
}

fn merge_patch(state: &mut Value, patch: &Value) {
    if let (Some(state_map), Some(patch_map)) = (state.as_object_mut(), patch.as_object()) {
        for (key, value) in patch_map {
            state_map.insert(key.clone(), value.clone());
        }
    }
}
