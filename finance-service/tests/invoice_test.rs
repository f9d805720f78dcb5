//! Invoice lifecycle and numbering integration tests.

mod common;

use common::{
    create_invoice, decimal_field, delete, expected_number, get, post_json, TestApp,
    OTHER_INSTITUTION_ID, TEST_INSTITUTION_ID, TEST_STUDENT_ID,
};
use rust_decimal::Decimal;

#[tokio::test]
async fn first_invoice_of_month_gets_sequence_one() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let invoice = create_invoice(&app, TEST_INSTITUTION_ID, "1500.00", "issued").await;

    assert_eq!(
        invoice["invoice_number"].as_str().unwrap(),
        expected_number("INV", 1)
    );
    assert_eq!(invoice["status"], "issued");
    assert_eq!(decimal_field(&invoice, "paid_amount"), Decimal::ZERO);
    assert_eq!(decimal_field(&invoice, "total_amount"), Decimal::from(1500));

    app.cleanup().await;
}

#[tokio::test]
async fn invoice_numbers_increment_within_institution_and_month() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let first = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "issued").await;
    let second = create_invoice(&app, TEST_INSTITUTION_ID, "2000.00", "issued").await;

    assert_eq!(
        first["invoice_number"].as_str().unwrap(),
        expected_number("INV", 1)
    );
    assert_eq!(
        second["invoice_number"].as_str().unwrap(),
        expected_number("INV", 2)
    );

    app.cleanup().await;
}

#[tokio::test]
async fn invoice_numbering_is_scoped_per_institution() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let first = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "issued").await;
    let other = create_invoice(&app, OTHER_INSTITUTION_ID, "1000.00", "issued").await;

    // Both institutions start their own sequence at 0001
    assert_eq!(
        first["invoice_number"].as_str().unwrap(),
        expected_number("INV", 1)
    );
    assert_eq!(
        other["invoice_number"].as_str().unwrap(),
        expected_number("INV", 1)
    );

    app.cleanup().await;
}

#[tokio::test]
async fn concurrent_invoice_creation_yields_unique_numbers() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let mut handles = Vec::new();
    for _ in 0..5 {
        let address = app.address.clone();
        handles.push(tokio::spawn(async move {
            let response = reqwest::Client::new()
                .post(format!("{}/invoices", address))
                .header("X-Institution-ID", TEST_INSTITUTION_ID)
                .json(&serde_json::json!({
                    "student_id": TEST_STUDENT_ID,
                    "academic_year_id": common::TEST_ACADEMIC_YEAR_ID,
                    "issue_date": "2025-06-01",
                    "due_date": "2025-07-01",
                    "total_amount": "500.00",
                }))
                .send()
                .await
                .expect("Failed to execute request");
            assert_eq!(response.status(), 201);
            let body: serde_json::Value = response.json().await.unwrap();
            body["invoice_number"].as_str().unwrap().to_string()
        }));
    }

    let mut numbers = std::collections::HashSet::new();
    for handle in handles {
        numbers.insert(handle.await.unwrap());
    }

    assert_eq!(numbers.len(), 5, "invoice numbers must be unique");

    app.cleanup().await;
}

#[tokio::test]
async fn due_date_before_issue_date_is_rejected() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = post_json(
        &app,
        TEST_INSTITUTION_ID,
        "/invoices",
        serde_json::json!({
            "student_id": TEST_STUDENT_ID,
            "academic_year_id": common::TEST_ACADEMIC_YEAR_ID,
            "issue_date": "2025-06-10",
            "due_date": "2025-06-01",
            "total_amount": "1000.00",
        }),
    )
    .await;

    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn derived_initial_status_is_rejected() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let response = post_json(
        &app,
        TEST_INSTITUTION_ID,
        "/invoices",
        serde_json::json!({
            "student_id": TEST_STUDENT_ID,
            "academic_year_id": common::TEST_ACADEMIC_YEAR_ID,
            "issue_date": "2025-06-01",
            "due_date": "2025-07-01",
            "total_amount": "1000.00",
            "status": "paid",
        }),
    )
    .await;

    assert_eq!(response.status(), 422);

    app.cleanup().await;
}

#[tokio::test]
async fn get_invoice_from_other_institution_is_not_found() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let invoice = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "issued").await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let response = get(
        &app,
        OTHER_INSTITUTION_ID,
        &format!("/invoices/{}", invoice_id),
    )
    .await;

    assert_eq!(response.status(), 404);

    app.cleanup().await;
}

#[tokio::test]
async fn list_invoices_filters_by_status() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "issued").await;
    create_invoice(&app, TEST_INSTITUTION_ID, "2000.00", "draft").await;

    let response = get(&app, TEST_INSTITUTION_ID, "/invoices?status=draft").await;
    assert_eq!(response.status(), 200);
    let invoices: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["status"], "draft");

    let response = get(&app, TEST_INSTITUTION_ID, "/invoices").await;
    let invoices: Vec<serde_json::Value> = response.json().await.unwrap();
    assert_eq!(invoices.len(), 2);

    app.cleanup().await;
}

#[tokio::test]
async fn cancel_invoice_works_and_is_idempotent() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let invoice = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "issued").await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap();

    let response = post_json(
        &app,
        TEST_INSTITUTION_ID,
        &format!("/invoices/{}/cancel", invoice_id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), 200);
    let cancelled: serde_json::Value = response.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    // Second cancel is a no-op, not an error
    let response = post_json(
        &app,
        TEST_INSTITUTION_ID,
        &format!("/invoices/{}/cancel", invoice_id),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), 200);

    app.cleanup().await;
}

#[tokio::test]
async fn delete_is_limited_to_draft_invoices() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let draft = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "draft").await;
    let issued = create_invoice(&app, TEST_INSTITUTION_ID, "2000.00", "issued").await;

    let response = delete(
        &app,
        TEST_INSTITUTION_ID,
        &format!("/invoices/{}", draft["invoice_id"].as_str().unwrap()),
    )
    .await;
    assert_eq!(response.status(), 204);

    let response = delete(
        &app,
        TEST_INSTITUTION_ID,
        &format!("/invoices/{}", issued["invoice_id"].as_str().unwrap()),
    )
    .await;
    assert_eq!(response.status(), 400);

    app.cleanup().await;
}

#[tokio::test]
async fn delete_draft_invoice_with_payments_is_rejected() {
    let Some(app) = TestApp::spawn().await else {
        return;
    };

    let draft = create_invoice(&app, TEST_INSTITUTION_ID, "1000.00", "draft").await;
    let invoice_id = draft["invoice_id"].as_str().unwrap();

    let response = post_json(
        &app,
        TEST_INSTITUTION_ID,
        "/payments",
        serde_json::json!({
            "invoice_id": invoice_id,
            "payment_mode": "cash",
            "amount_paid": "100.00",
            "status": "pending",
        }),
    )
    .await;
    assert_eq!(response.status(), 201);

    let response = delete(
        &app,
        TEST_INSTITUTION_ID,
        &format!("/invoices/{}", invoice_id),
    )
    .await;
    assert_eq!(response.status(), 400);

    // The invoice survives the rejected delete
    let response = get(&app, TEST_INSTITUTION_ID, &format!("/invoices/{}", invoice_id)).await;
    assert_eq!(response.status(), 200);

    app.cleanup().await;
}
