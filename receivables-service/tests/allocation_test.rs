//! Allocation ledger integration tests: the partial/full payment scenarios,
//! over-allocation rejection, idempotent replay, the last-balance race, and
//! receipt immutability.
//!
//! These tests need a PostgreSQL instance; set `TEST_DATABASE_URL` and run
//! with `cargo test -- --ignored`.

mod common;

use common::TestApp;
use serde_json::{json, Value};
use serial_test::serial;
use uuid::Uuid;

async fn allocate(app: &TestApp, payment_id: Uuid, invoice_id: Uuid, amount: i64) -> reqwest::Response {
    app.post(
        &format!("/payments/{}/allocations", payment_id),
        &json!({"invoice_id": invoice_id, "amount": amount}),
    )
    .await
}

async fn allocate_with_key(
    app: &TestApp,
    payment_id: Uuid,
    invoice_id: Uuid,
    amount: i64,
    key: &str,
) -> reqwest::Response {
    app.post(
        &format!("/payments/{}/allocations", payment_id),
        &json!({"invoice_id": invoice_id, "amount": amount, "idempotency_key": key}),
    )
    .await
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn partial_then_full_then_over() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await; // total 2835
    let payment_id = app.create_payment(5000).await;

    // Partial: 2000 of 2835.
    let response = allocate(&app, payment_id, invoice_id, 2000).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "partially_paid");
    assert_eq!(body["invoice"]["amount_paid"], 2000);
    assert_eq!(body["invoice"]["balance_due"], 835);
    assert!(body["receipt_id"].is_string());

    // Remainder: 835.
    let response = allocate(&app, payment_id, invoice_id, 835).await;
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "paid");
    assert_eq!(body["invoice"]["balance_due"], 0);

    // One more minor unit must fail without changing anything.
    let response = allocate(&app, payment_id, invoice_id, 1).await;
    assert_eq!(response.status(), 409);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "over_allocation");

    let response = app.get(&format!("/invoices/{}", invoice_id)).await;
    let invoice: Value = response.json().await.unwrap();
    assert_eq!(invoice["status"], "paid");
    assert_eq!(invoice["balance_due"], 0);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn allocation_exceeding_payment_remainder_fails() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(1000).await;

    let response = allocate(&app, payment_id, invoice_id, 1001).await;
    assert_eq!(response.status(), 409);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "over_allocation");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn cancelled_invoice_rejects_allocation() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(1000).await;

    app.post(&format!("/invoices/{}/cancel", invoice_id), &json!({}))
        .await;

    let response = allocate(&app, payment_id, invoice_id, 500).await;
    assert_eq!(response.status(), 422);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "invalid_state");

    // Cancelled invoices never appear in the outstanding report.
    let response = app.get("/reports/outstanding").await;
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["count"], 0);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn deallocation_restores_balance() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(5000).await;

    allocate(&app, payment_id, invoice_id, 2000).await;
    let response = allocate(&app, payment_id, invoice_id, 835).await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["invoice"]["status"], "paid");
    let allocation_id = body["allocation"]["allocation_id"].as_str().unwrap().to_string();

    // Reversing the 835 moves paid back to partially_paid.
    let response = app.delete(&format!("/allocations/{}", allocation_id)).await;
    assert_eq!(response.status(), 200);
    let invoice: Value = response.json().await.unwrap();
    assert_eq!(invoice["status"], "partially_paid");
    assert_eq!(invoice["amount_paid"], 2000);
    assert_eq!(invoice["balance_due"], 835);

    // Reversing an already reversed allocation is a 404.
    let response = app.delete(&format!("/allocations/{}", allocation_id)).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn idempotency_key_replays_allocation() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(5000).await;

    let body = json!({
        "invoice_id": invoice_id,
        "amount": 1000,
        "idempotency_key": "webhook-retry-1"
    });

    let response = app
        .post(&format!("/payments/{}/allocations", payment_id), &body)
        .await;
    assert_eq!(response.status(), 201);
    let first: Value = response.json().await.unwrap();
    assert_eq!(first["replayed"], false);
    let allocation_id = first["allocation"]["allocation_id"].clone();

    // The retry returns the original allocation without writing anything.
    let response = app
        .post(&format!("/payments/{}/allocations", payment_id), &body)
        .await;
    assert_eq!(response.status(), 200);
    let second: Value = response.json().await.unwrap();
    assert_eq!(second["replayed"], true);
    assert_eq!(second["allocation"]["allocation_id"], allocation_id);
    assert_eq!(second["invoice"]["amount_paid"], 1000);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn idempotency_keys_are_scoped_per_tenant() {
    let mut app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(5000).await;

    let response = allocate_with_key(&app, payment_id, invoice_id, 1000, "shared-key").await;
    assert_eq!(response.status(), 201);
    let first: Value = response.json().await.unwrap();

    // Another tenant reusing the same key gets its own allocation, not a
    // replay of the first tenant's and not an error.
    app.tenant_id = Uuid::new_v4();
    let other_invoice_id = app.create_sent_invoice().await;
    let other_payment_id = app.create_payment(5000).await;

    let response =
        allocate_with_key(&app, other_payment_id, other_invoice_id, 1000, "shared-key").await;
    assert_eq!(response.status(), 201);
    let second: Value = response.json().await.unwrap();
    assert_eq!(second["replayed"], false);
    assert_ne!(
        second["allocation"]["allocation_id"],
        first["allocation"]["allocation_id"]
    );
}

// Serialized so pool contention from parallel tests cannot mask the race.
#[tokio::test]
#[serial]
#[ignore = "requires TEST_DATABASE_URL"]
async fn race_for_last_balance_admits_one_winner() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await; // total 2835
    let first_payment = app.create_payment(5000).await;
    let second_payment = app.create_payment(5000).await;

    allocate(&app, first_payment, invoice_id, 2000).await;

    // Two payments race for the remaining 835.
    let a = allocate(&app, first_payment, invoice_id, 835);
    let b = allocate(&app, second_payment, invoice_id, 835);
    let (ra, rb) = tokio::join!(a, b);

    let statuses = [ra.status().as_u16(), rb.status().as_u16()];
    assert!(
        statuses.contains(&201) && statuses.contains(&409),
        "expected exactly one winner, got {:?}",
        statuses
    );

    let response = app.get(&format!("/invoices/{}", invoice_id)).await;
    let invoice: Value = response.json().await.unwrap();
    assert_eq!(invoice["status"], "paid");
    assert_eq!(invoice["amount_paid"], 2835);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn cross_currency_allocation_rejected() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await; // GHS

    let body = json!({
        "amount": 1000,
        "currency": "USD",
        "payment_method": "card",
        "payment_date": "2026-01-20"
    });
    let response = app.post("/payments", &body).await;
    let payment: Value = response.json().await.unwrap();
    let payment_id: Uuid = serde_json::from_value(payment["payment_id"].clone()).unwrap();

    let response = allocate(&app, payment_id, invoice_id, 500).await;
    assert_eq!(response.status(), 400);
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "validation");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn allocation_freezes_line_items_and_blocks_delete() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(1000).await;

    allocate(&app, payment_id, invoice_id, 500).await;

    // Line items are frozen once money is allocated.
    let body = json!({
        "line_items": [{
            "description": "Rewrite",
            "quantity": "1",
            "unit_price": 9999
        }]
    });
    let response = app
        .put(&format!("/invoices/{}/line-items", invoice_id), &body)
        .await;
    assert_eq!(response.status(), 422);

    // And deletion is blocked.
    let response = app.delete(&format!("/invoices/{}", invoice_id)).await;
    assert_eq!(response.status(), 422);

    // And cancellation is blocked too, until deallocated.
    let response = app
        .post(&format!("/invoices/{}/cancel", invoice_id), &json!({}))
        .await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn receipt_survives_deallocation() {
    let app = TestApp::spawn().await;
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(5000).await;

    let response = allocate(&app, payment_id, invoice_id, 2000).await;
    let body: Value = response.json().await.unwrap();
    let receipt_id = body["receipt_id"].as_str().unwrap().to_string();
    let allocation_id = body["allocation"]["allocation_id"].as_str().unwrap().to_string();

    let response = app.get(&format!("/receipts/{}", receipt_id)).await;
    assert_eq!(response.status(), 200);
    let receipt: Value = response.json().await.unwrap();
    assert_eq!(receipt["receipt_number"], "RCT-000001");
    assert_eq!(receipt["snapshot_data"]["allocation"]["amount"], 2000);
    assert_eq!(receipt["snapshot_data"]["invoice"]["balance_due"], 835);

    // The snapshot is frozen: deallocating leaves it untouched.
    app.delete(&format!("/allocations/{}", allocation_id)).await;

    let response = app.get(&format!("/receipts/{}", receipt_id)).await;
    assert_eq!(response.status(), 200);
    let after: Value = response.json().await.unwrap();
    assert_eq!(after["snapshot_data"]["invoice"]["balance_due"], 835);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn outstanding_report_flags_overdue() {
    let app = TestApp::spawn().await;

    // Standard invoice is due 2026-02-10, in the past for this test run.
    let invoice_id = app.create_sent_invoice().await;
    let payment_id = app.create_payment(1000).await;
    allocate(&app, payment_id, invoice_id, 1000).await;

    let response = app.get("/reports/outstanding").await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();

    assert_eq!(report["count"], 1);
    let row = &report["invoices"][0];
    assert_eq!(row["balance_due"], 1835);
    assert_eq!(row["display_status"], "overdue");
    assert_eq!(report["totals_by_currency"]["GHS"], 1835);
}
