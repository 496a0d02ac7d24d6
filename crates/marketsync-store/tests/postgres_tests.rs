#![cfg(feature = "postgres")]

//! Runs against a live Postgres when MARKETSYNC_TEST_DATABASE_URL is set:
//! `cargo test -p marketsync-store -- --ignored`

use chrono::{Duration, Utc};
use marketsync_core::{
    Address, AdminStore, Customer, InsertOutcome, LeaseStore, LineItem, NewOrder, OrderExtras,
    OrderStatus, PaymentStatus, TenantStore,
};
use marketsync_store::SqlStore;
use rust_decimal::Decimal;
use serde_json::json;
use uuid::Uuid;

async fn create_test_store() -> SqlStore {
    let url = std::env::var("MARKETSYNC_TEST_DATABASE_URL")
        .expect("MARKETSYNC_TEST_DATABASE_URL must be set for ignored tests");
    SqlStore::new(&url).await.expect("Failed to connect test database")
}

async fn seed_integration(store: &SqlStore, tenant_id: Uuid, provider: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO tenant_integrations (id, tenant_id, provider_name, status, encrypted_credentials)
        VALUES ($1, $2, $3, 'active', 'blob')
        "#,
    )
    .bind(id)
    .bind(tenant_id)
    .bind(provider)
    .execute(store.pool())
    .await
    .expect("Failed to seed integration");
    id
}

fn new_order(tenant_id: Uuid, integration_id: Uuid, provider: &str, external_id: &str) -> NewOrder {
    NewOrder {
        id: Uuid::new_v4(),
        tenant_id,
        integration_id,
        source_provider: provider.to_string(),
        external_id: external_id.to_string(),
        external_status: "NEW".to_string(),
        status: OrderStatus::Pending,
        customer: Customer {
            name: "Jan Kowalski".to_string(),
            email: Some("jan@example.com".to_string()),
            phone: None,
        },
        shipping_address: Address {
            name: "Jan Kowalski".to_string(),
            street: "Prosta 1".to_string(),
            city: "Warszawa".to_string(),
            postal_code: "00-001".to_string(),
            country_code: "PL".to_string(),
            ..Default::default()
        },
        billing_address: None,
        line_items: vec![LineItem {
            external_id: "li-1".to_string(),
            sku: Some("SKU-1".to_string()),
            name: "Mug".to_string(),
            quantity: 2,
            unit_price: Decimal::new(2500, 2),
        }],
        total_amount: Decimal::new(5000, 2),
        currency: "PLN".to_string(),
        payment_status: PaymentStatus::Paid,
        payment_method: None,
        ordered_at: Utc::now(),
        extras: OrderExtras::default(),
        raw_data: json!({"id": external_id}),
    }
}

#[tokio::test]
#[ignore]
async fn test_insert_order_is_idempotent() {
    let store = create_test_store().await;
    let tenant_id = Uuid::new_v4();
    let provider = format!("test-{}", Uuid::new_v4());
    let integration_id = seed_integration(&store, tenant_id, &provider).await;
    let tenant = store.tenant();

    let first = tenant
        .insert_order_if_absent(&new_order(tenant_id, integration_id, &provider, "A-1"))
        .await
        .expect("Failed to insert order");
    let second = tenant
        .insert_order_if_absent(&new_order(tenant_id, integration_id, &provider, "A-1"))
        .await
        .expect("Failed to re-insert order");

    assert_eq!(first, InsertOutcome::Inserted);
    assert_eq!(second, InsertOutcome::AlreadyExists);
}

#[tokio::test]
#[ignore]
async fn test_cursor_update_and_listing() {
    let store = create_test_store().await;
    let tenant_id = Uuid::new_v4();
    let provider = format!("test-{}", Uuid::new_v4());
    let integration_id = seed_integration(&store, tenant_id, &provider).await;
    let admin = store.admin();

    admin
        .update_sync_cursor(integration_id, "evt-42", Utc::now())
        .await
        .expect("Failed to update cursor");

    let integrations = admin
        .list_active_integrations(&provider)
        .await
        .expect("Failed to list integrations");
    assert_eq!(integrations.len(), 1);
    assert_eq!(integrations[0].cursor(), "evt-42");
    assert!(integrations[0].last_sync_at.is_some());
}

#[tokio::test]
#[ignore]
async fn test_lease_is_exclusive() {
    let store = create_test_store().await;
    let leases = store.leases();
    let name = format!("lease-{}", Uuid::new_v4());

    assert!(leases.try_acquire(&name, "a", Duration::seconds(30)).await.unwrap());
    assert!(!leases.try_acquire(&name, "b", Duration::seconds(30)).await.unwrap());
    leases.release(&name, "a").await.unwrap();
    assert!(leases.try_acquire(&name, "b", Duration::seconds(30)).await.unwrap());
}
