mod common;

use common::{order, Harness, MARKETPLACE};
use marketsync_core::{NewOrder, OrderExtras, OrderStatus, TenantStore};
use marketsync_sync::{IntegrationPoll, OrderPoller, SyncError, Task};
use serde_json::json;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn poller(harness: &Harness) -> OrderPoller {
    OrderPoller::new(MARKETPLACE, harness.ctx.clone(), Duration::from_secs(60))
}

#[tokio::test]
async fn first_sync_then_redelivery_is_idempotent() {
    let harness = Harness::new();
    let integration = harness.add_integration(json!({"api_token": "t"}), None).await;
    let batch = vec![order("A", "NEW"), order("B", "PAID"), order("C", "SENT")];
    harness.orders.respond("", batch.clone(), Some("c1"));
    harness.orders.respond("c1", batch, Some("c1"));
    let poller = poller(&harness);
    let cancel = CancellationToken::new();

    let first = poller.poll_all(&cancel).await.expect("first poll");
    assert_eq!(first.inserted, 3);
    let stored = harness.store.integration(integration.integration_id).await.expect("integration");
    assert_eq!(stored.sync_cursor.as_deref(), Some("c1"));
    assert!(stored.last_sync_at.is_some());

    let second = poller.poll_all(&cancel).await.expect("second poll");
    assert_eq!(second.inserted, 0);
    assert_eq!(second.duplicates, 3);
    let stored = harness.store.integration(integration.integration_id).await.expect("integration");
    assert_eq!(stored.sync_cursor.as_deref(), Some("c1"));

    assert_eq!(harness.store.orders().await.len(), 3);
    assert_eq!(harness.store.cursor_writes().await, 1);
}

#[tokio::test]
async fn existing_orders_are_skipped() {
    let harness = Harness::new();
    let integration = harness.add_integration(json!({"api_token": "t"}), Some("c4")).await;
    for id in ["1", "2"] {
        let existing = NewOrder::from_normalized(
            &integration,
            &order(id, "NEW"),
            OrderStatus::Pending,
            OrderExtras::default(),
        );
        harness.store.insert_order_if_absent(&existing).await.expect("seed");
    }
    let batch = ["1", "2", "3", "4", "5"].iter().map(|id| order(id, "PAID")).collect();
    harness.orders.respond("c4", batch, Some("c5"));

    let poll = poller(&harness)
        .poll_integration(&integration, &CancellationToken::new())
        .await
        .expect("poll");

    assert_eq!(poll.fetched, 5);
    assert_eq!(poll.inserted, 3);
    assert_eq!(poll.duplicates, 2);
    assert_eq!(poll.new_cursor.as_deref(), Some("c5"));
    assert_eq!(harness.store.orders().await.len(), 5);
}

#[tokio::test]
async fn empty_poll_leaves_cursor_alone() {
    let harness = Harness::new();
    let integration = harness.add_integration(json!({"api_token": "t"}), Some("c9")).await;
    harness.orders.respond("c9", vec![], None);

    let poll = poller(&harness)
        .poll_integration(&integration, &CancellationToken::new())
        .await
        .expect("poll");

    assert_eq!(poll, IntegrationPoll::default());
    assert_eq!(harness.store.cursor_writes().await, 0);
    let stored = harness.store.integration(integration.integration_id).await.expect("integration");
    assert_eq!(stored.sync_cursor.as_deref(), Some("c9"));
}

#[tokio::test]
async fn undecodable_orders_are_skipped_and_cursor_moves() {
    let harness = Harness::new();
    let integration = harness.add_integration(json!({"api_token": "t"}), Some("c1")).await;
    harness.orders.respond_with_rejected(
        "c1",
        vec![order("A", "NEW"), order("C", "PAID")],
        &["B"],
        Some("c2"),
    );

    let poll = poller(&harness)
        .poll_integration(&integration, &CancellationToken::new())
        .await
        .expect("poll");

    assert_eq!(poll.fetched, 2);
    assert_eq!(poll.inserted, 2);
    assert_eq!(poll.rejected, 1);
    assert_eq!(poll.new_cursor.as_deref(), Some("c2"));
    let stored: Vec<String> =
        harness.store.orders().await.into_iter().map(|o| o.external_id).collect();
    assert_eq!(stored, vec!["A", "C"]);
}

#[tokio::test]
async fn failed_insert_holds_cursor_until_retried() {
    let harness = Harness::new();
    let integration = harness.add_integration(json!({"api_token": "t"}), Some("c1")).await;
    let batch = vec![order("A", "NEW"), order("B", "NEW"), order("C", "NEW")];
    harness.orders.respond("c1", batch, Some("c2"));
    harness.store.fail_inserts_for("B").await;
    let poller = poller(&harness);
    let cancel = CancellationToken::new();

    let poll = poller.poll_integration(&integration, &cancel).await.expect("poll");

    assert_eq!(poll.inserted, 2);
    assert_eq!(poll.failed_inserts, 1);
    assert_eq!(poll.new_cursor, None);
    assert_eq!(harness.store.cursor_writes().await, 0);
    let stored = harness.store.integration(integration.integration_id).await.expect("integration");
    assert_eq!(stored.sync_cursor.as_deref(), Some("c1"));

    harness.store.clear_insert_failures().await;
    let retry = poller.poll_integration(&stored, &cancel).await.expect("retry");

    assert_eq!(retry.inserted, 1);
    assert_eq!(retry.duplicates, 2);
    assert_eq!(retry.new_cursor.as_deref(), Some("c2"));
    assert_eq!(harness.store.cursor_writes().await, 1);
    assert_eq!(harness.store.orders().await.len(), 3);
}

#[tokio::test]
async fn broken_integration_does_not_block_others() {
    let harness = Harness::new();
    let broken = harness.add_integration(json!({"api_token": "t"}), None).await;
    let mut tampered = broken.clone();
    tampered.encrypted_credentials = "bm90IGEgdmF1bHQgYmxvYg==".to_string();
    harness.store.insert_integration(tampered).await;
    harness.add_integration(json!({"api_token": ""}), None).await;
    let healthy = harness.add_integration(json!({"api_token": "t"}), None).await;
    harness.orders.respond("", vec![order("X", "NEW")], Some("c1"));

    let summary = poller(&harness).poll_all(&CancellationToken::new()).await.expect("poll");

    assert_eq!(summary.integrations, 3);
    assert_eq!(summary.failed_integrations, 2);
    assert_eq!(summary.inserted, 1);
    let stored = harness.store.integration(healthy.integration_id).await.expect("integration");
    assert_eq!(stored.sync_cursor.as_deref(), Some("c1"));
}

#[tokio::test]
async fn status_and_extras_are_mapped() {
    let harness = Harness::new();
    harness.add_integration(json!({"api_token": "t"}), None).await;
    harness.orders.respond("", vec![order("P", "PAID"), order("Q", "ON_HOLD")], Some("c1"));

    poller(&harness).poll_all(&CancellationToken::new()).await.expect("poll");

    let stored = harness.store.orders().await;
    assert_eq!(stored[0].status, OrderStatus::Confirmed);
    assert_eq!(stored[1].status, OrderStatus::Pending);
    assert_eq!(stored[1].external_status, "ON_HOLD");
    assert_eq!(stored[0].extras.delivery_method.as_deref(), Some("locker"));
    assert_eq!(stored[0].source_provider, MARKETPLACE);
}

#[tokio::test]
async fn cancelled_run_writes_nothing() {
    let harness = Harness::new();
    harness.add_integration(json!({"api_token": "t"}), None).await;
    harness.orders.respond("", vec![order("A", "NEW")], Some("c1"));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let poller = poller(&harness);
    let err = poller.run(cancel).await.unwrap_err();

    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(harness.orders.polls(), 0);
    assert_eq!(harness.store.cursor_writes().await, 0);
    assert_eq!(poller.name(), "order_poller:fakemarket");
}
