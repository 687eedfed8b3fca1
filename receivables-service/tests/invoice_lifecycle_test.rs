//! Invoice lifecycle integration tests: creation totals, send/viewed/cancel
//! transitions, draft guards, and optimistic concurrency.
//!
//! These tests need a PostgreSQL instance; set `TEST_DATABASE_URL` and run
//! with `cargo test -- --ignored`.

mod common;

use common::TestApp;
use serde_json::{json, Value};
use uuid::Uuid;

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn health_endpoints_respond() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").await;
    assert_eq!(response.status(), 200);

    let response = app.get("/ready").await;
    assert_eq!(response.status(), 200);

    let response = app.get("/metrics").await;
    assert_eq!(response.status(), 200);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn metrics_track_invoices_payments_and_errors() {
    let app = TestApp::spawn().await;
    app.create_standard_invoice().await;
    app.create_payment(2500).await;

    // A miss feeds the error counter.
    let response = app.get(&format!("/invoices/{}", Uuid::new_v4())).await;
    assert_eq!(response.status(), 404);

    let body = app.get("/metrics").await.text().await.unwrap();
    assert!(body.contains("receivables_invoices_total{status=\"draft\"}"));
    assert!(body.contains("receivables_payment_amount_minor_total{currency=\"GHS\"}"));
    assert!(body.contains("receivables_errors_total{error_type=\"not_found\"}"));
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn create_invoice_computes_totals() {
    let app = TestApp::spawn().await;

    // 3 x 1000 = 3000, 10% discount = 300, 5% tax on 2700 = 135.
    let invoice = app.create_standard_invoice().await;

    assert_eq!(invoice["status"], "draft");
    assert_eq!(invoice["subtotal"], 3000);
    assert_eq!(invoice["discount_total"], 300);
    assert_eq!(invoice["tax_total"], 135);
    assert_eq!(invoice["total"], 2835);
    assert_eq!(invoice["amount_paid"], 0);
    assert_eq!(invoice["balance_due"], 2835);
    assert!(invoice["invoice_number"].is_null());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn rejects_invalid_line_items() {
    let app = TestApp::spawn().await;

    let body = json!({
        "currency": "GHS",
        "issue_date": "2026-01-10",
        "line_items": [{
            "description": "Bad line",
            "quantity": "-1",
            "unit_price": 1000
        }]
    });
    let response = app.post("/invoices", &body).await;
    assert_eq!(response.status(), 400);

    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "validation");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn send_assigns_number_and_status() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();

    let response = app.post(&format!("/invoices/{}/send", id), &json!({})).await;
    assert_eq!(response.status(), 200);

    let sent: Value = response.json().await.unwrap();
    assert_eq!(sent["status"], "sent");
    assert_eq!(sent["invoice_number"], "INV-000001");
    assert!(sent["sent_at"].is_string());

    // Sending again is an invalid transition.
    let response = app.post(&format!("/invoices/{}/send", id), &json!({})).await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn send_rejects_empty_invoice() {
    let app = TestApp::spawn().await;

    let body = json!({
        "currency": "GHS",
        "issue_date": "2026-01-10"
    });
    let response = app.post("/invoices", &body).await;
    assert_eq!(response.status(), 201);
    let invoice: Value = response.json().await.unwrap();
    let id = invoice["invoice_id"].as_str().unwrap();

    let response = app.post(&format!("/invoices/{}/send", id), &json!({})).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn viewed_requires_sent() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();

    // Draft cannot be viewed.
    let response = app.post(&format!("/invoices/{}/viewed", id), &json!({})).await;
    assert_eq!(response.status(), 422);

    app.post(&format!("/invoices/{}/send", id), &json!({})).await;

    let response = app.post(&format!("/invoices/{}/viewed", id), &json!({})).await;
    assert_eq!(response.status(), 200);
    let viewed: Value = response.json().await.unwrap();
    assert_eq!(viewed["status"], "viewed");
    let first_viewed_at = viewed["viewed_at"].clone();

    // Repeat views keep the first timestamp.
    let response = app.post(&format!("/invoices/{}/viewed", id), &json!({})).await;
    assert_eq!(response.status(), 200);
    let viewed_again: Value = response.json().await.unwrap();
    assert_eq!(viewed_again["viewed_at"], first_viewed_at);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn update_rejected_after_send() {
    let app = TestApp::spawn().await;
    let id = app.create_sent_invoice().await;

    let response = app
        .patch(
            &format!("/invoices/{}", id),
            &json!({"customer_name": "New Name"}),
        )
        .await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn stale_version_is_a_conflict() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();
    let version = invoice["version"].as_i64().unwrap();

    // A concurrent writer bumps the version.
    let response = app
        .patch(
            &format!("/invoices/{}", id),
            &json!({"notes": "first writer", "expected_version": version}),
        )
        .await;
    assert_eq!(response.status(), 200);

    // The stale writer loses with 409 and a Retry-After hint.
    let response = app
        .patch(
            &format!("/invoices/{}", id),
            &json!({"notes": "second writer", "expected_version": version}),
        )
        .await;
    assert_eq!(response.status(), 409);
    assert!(response.headers().get("retry-after").is_some());

    let error: Value = response.json().await.unwrap();
    assert_eq!(error["kind"], "concurrency_conflict");
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn replace_line_items_recomputes_totals() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();

    let body = json!({
        "line_items": [{
            "description": "Flat fee",
            "quantity": "1",
            "unit_price": 5000
        }]
    });
    let response = app.put(&format!("/invoices/{}/line-items", id), &body).await;
    assert_eq!(response.status(), 200);

    let updated: Value = response.json().await.unwrap();
    assert_eq!(updated["subtotal"], 5000);
    assert_eq!(updated["discount_total"], 0);
    assert_eq!(updated["tax_total"], 0);
    assert_eq!(updated["total"], 5000);
    assert_eq!(updated["line_items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn delete_draft_invoice() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();

    let response = app.delete(&format!("/invoices/{}", id)).await;
    assert_eq!(response.status(), 204);

    let response = app.get(&format!("/invoices/{}", id)).await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn cancel_then_no_further_transitions() {
    let app = TestApp::spawn().await;
    let id = app.create_sent_invoice().await;

    let response = app.post(&format!("/invoices/{}/cancel", id), &json!({})).await;
    assert_eq!(response.status(), 200);
    let cancelled: Value = response.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    let response = app.post(&format!("/invoices/{}/cancel", id), &json!({})).await;
    assert_eq!(response.status(), 422);

    let response = app.post(&format!("/invoices/{}/viewed", id), &json!({})).await;
    assert_eq!(response.status(), 422);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn tenants_are_isolated() {
    let app = TestApp::spawn().await;
    let invoice = app.create_standard_invoice().await;
    let id = invoice["invoice_id"].as_str().unwrap();

    // Same invoice, different tenant header: not found.
    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, id))
        .header("X-Tenant-ID", Uuid::new_v4().to_string())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    // Missing tenant header is a validation failure.
    let response = app
        .client
        .get(format!("{}/invoices/{}", app.address, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}
