use actix_web::test::TestRequest;
use actix_web::{App, test, web};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::json;
use sha2::Sha512;
use sqlx::Row;
use uuid::Uuid;

use clientportal_backend::api::transactions::store_transaction;
use clientportal_backend::api::webhooks_paystack::paystack_webhook;

mod support;

fn tx_payload(
    user_id: Uuid,
    reference: &str,
    plan: &str,
    site_name: &str,
    external_id: i64,
) -> serde_json::Value {
    json!({
        "user_id": user_id.to_string(),
        "payment_reference": reference,
        "plan": plan,
        "first_name": "Ada",
        "last_name": "Obi",
        "email": "ada@example.com",
        "payment_status": "paid",
        "phone": "+2348000000000",
        "country": "NG",
        "company_name": "Acme",
        "organization": "Acme Corp",
        "site_name": site_name,
        "quantity": 5,
        "amount": 499.0,
        "training_and_setup": true,
        "transaction_id": external_id,
        "message": "first purchase",
        // Client-supplied validity must be ignored by the server.
        "valid_from": "2020-01-01",
        "valid_upto": "2020-12-31"
    })
}

fn mock_paystack_success(server: &MockServer, reference: &str, external_id: i64) {
    let path = format!("/transaction/verify/{reference}");
    server.mock(|when, then| {
        when.method(GET)
            .path(path)
            .header("Authorization", "Bearer sk_test_secret");
        then.status(200).json_body(json!({
            "status": true,
            "data": { "id": external_id, "reference": reference, "amount": 49900 }
        }));
    });
}

#[actix_web::test]
async fn store_transaction_happy_path_initiates_site_creation() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let server = MockServer::start_async().await;
    std::env::set_var("PAYSTACK_API_BASE_URL", server.url(""));
    mock_paystack_success(&server, "ref-ok", 789);

    let frappe_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/method/clientportalapp_admin.sites.create_new_site");
        then.status(200).json_body(json!({
            "message": { "job_id": "job-1", "status": "queued" }
        }));
    });

    let user_id = support::insert_user(pool, "ada_happy@example.com").await;
    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(store_transaction)).await;

    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(tx_payload(user_id, "ref-ok", "standard", "Acme Corp", 789))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["transaction"]["site_name"], "acmecorp.purpledove.net");
    assert_eq!(body["transaction"]["original_site_name"], "Acme Corp");
    assert_eq!(body["transaction"]["paystack_status"], "success");
    assert_eq!(body["transaction"]["site_creation_status"], "initiated");
    assert_eq!(body["transaction"]["site_creation_job_id"], "job-1");
    frappe_mock.assert();

    let row = sqlx::query(
        r#"SELECT site_name, site_creation_status, site_creation_job_id, valid_from, valid_upto
           FROM transactions WHERE transaction_id = 789"#,
    )
    .fetch_one(pool)
    .await
    .expect("select tx");
    let site_name: String = row.get("site_name");
    assert_eq!(site_name, "acmecorp.purpledove.net");
    let status: Option<String> = row.get("site_creation_status");
    assert_eq!(status.as_deref(), Some("initiated"));
    let job_id: Option<String> = row.get("site_creation_job_id");
    assert_eq!(job_id.as_deref(), Some("job-1"));

    // Validity is computed server-side from the plan, not from the payload.
    let valid_from: DateTime<Utc> = row.get("valid_from");
    let valid_upto: DateTime<Utc> = row.get("valid_upto");
    assert_eq!(valid_upto - valid_from, Duration::days(365));
    assert!((Utc::now() - valid_from) < Duration::minutes(5));
}

#[actix_web::test]
async fn free_plan_gets_two_week_validity() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let server = MockServer::start_async().await;
    std::env::set_var("PAYSTACK_API_BASE_URL", server.url(""));
    mock_paystack_success(&server, "ref-free", 790);
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/method/clientportalapp_admin.sites.create_new_site");
        then.status(200).json_body(json!({ "message": {} }));
    });

    let user_id = support::insert_user(pool, "ada_free@example.com").await;
    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(store_transaction)).await;

    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(tx_payload(user_id, "ref-free", "free", "freebie", 790))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let row = sqlx::query("SELECT valid_from, valid_upto FROM transactions WHERE transaction_id = 790")
        .fetch_one(pool)
        .await
        .expect("select tx");
    let valid_from: DateTime<Utc> = row.get("valid_from");
    let valid_upto: DateTime<Utc> = row.get("valid_upto");
    assert_eq!(valid_upto - valid_from, Duration::days(14));
}

#[actix_web::test]
async fn failed_payment_returns_400_and_persists_nothing() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let server = MockServer::start_async().await;
    std::env::set_var("PAYSTACK_API_BASE_URL", server.url(""));
    server.mock(|when, then| {
        when.method(GET).path("/transaction/verify/ref-declined");
        then.status(200).json_body(json!({
            "status": false,
            "data": { "id": 791, "reference": "ref-declined" }
        }));
    });
    let frappe_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/method/clientportalapp_admin.sites.create_new_site");
        then.status(200).json_body(json!({ "message": {} }));
    });

    let user_id = support::insert_user(pool, "ada_declined@example.com").await;
    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(store_transaction)).await;

    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(tx_payload(user_id, "ref-declined", "standard", "declined", 791))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM transactions WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("count")
        .get("n");
    assert_eq!(count, 0);
    assert_eq!(frappe_mock.hits(), 0);
}

#[actix_web::test]
async fn provisioning_failure_never_blocks_payment_success() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let server = MockServer::start_async().await;
    std::env::set_var("PAYSTACK_API_BASE_URL", server.url(""));
    mock_paystack_success(&server, "ref-prov", 792);
    server.mock(|when, then| {
        when.method(POST)
            .path("/api/method/clientportalapp_admin.sites.create_new_site");
        then.status(503).body("bench unavailable");
    });

    let user_id = support::insert_user(pool, "ada_prov@example.com").await;
    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(store_transaction)).await;

    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(tx_payload(user_id, "ref-prov", "standard", "provfail", 792))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["transaction"]["paystack_status"], "success");
    assert_eq!(body["transaction"]["site_creation_status"], "failed");

    let row = sqlx::query(
        r#"SELECT paystack_status, site_creation_status, site_creation_error
           FROM transactions WHERE transaction_id = 792"#,
    )
    .fetch_one(pool)
    .await
    .expect("select tx");
    let paystack_status: Option<String> = row.get("paystack_status");
    assert_eq!(paystack_status.as_deref(), Some("success"));
    let creation_status: Option<String> = row.get("site_creation_status");
    assert_eq!(creation_status.as_deref(), Some("failed"));
    let creation_error: Option<String> = row.get("site_creation_error");
    assert!(creation_error.unwrap_or_default().contains("status=503"));
}

#[actix_web::test]
async fn store_transaction_rejects_missing_and_mistyped_fields() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let user_id = support::insert_user(pool, "ada_invalid@example.com").await;
    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(store_transaction)).await;

    let mut missing = tx_payload(user_id, "ref-x", "standard", "acme", 1);
    missing.as_object_mut().unwrap().remove("quantity");
    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(missing)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Missing required field: quantity");

    let mut mistyped = tx_payload(user_id, "ref-x", "standard", "acme", 1);
    mistyped["quantity"] = json!("a lot");
    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(mistyped)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "Invalid type for quantity. Expected int");

    let mut bad_uuid = tx_payload(user_id, "ref-x", "standard", "acme", 1);
    bad_uuid["user_id"] = json!("not-a-uuid");
    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(bad_uuid)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let unknown_user = tx_payload(Uuid::new_v4(), "ref-x", "standard", "acme", 1);
    let req = TestRequest::post()
        .uri("/store-transaction")
        .set_json(unknown_user)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 404);
}

type HmacSha512 = Hmac<Sha512>;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[actix_web::test]
async fn paystack_webhook_updates_transaction_and_dedupes_redelivery() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let server = MockServer::start_async().await;
    std::env::set_var("PAYSTACK_API_BASE_URL", server.url(""));
    mock_paystack_success(&server, "ref-hook", 555);

    let user_id = support::insert_user(pool, "ada_hook@example.com").await;
    let tx_id =
        support::insert_transaction(pool, user_id, "hooked.purpledove.net", 555, None).await;

    let state = web::Data::new(support::build_state(pool.clone(), &server.url("")));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(paystack_webhook)).await;

    let body = serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": { "id": 555, "reference": "ref-hook" }
    }))
    .expect("encode body");
    let signature = sign("sk_test_secret", &body);

    let req = TestRequest::post()
        .uri("/verify-webhook-payload/webhookpaystack")
        .insert_header(("x-paystack-signature", signature.clone()))
        .insert_header(("content-type", "application/json"))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let row = sqlx::query("SELECT payment_status, paystack_status FROM transactions WHERE id = $1")
        .bind(tx_id)
        .fetch_one(pool)
        .await
        .expect("select tx");
    let payment_status: String = row.get("payment_status");
    assert_eq!(payment_status, "success");

    // Redelivery of the same event is acknowledged without re-applying.
    let req = TestRequest::post()
        .uri("/verify-webhook-payload/webhookpaystack")
        .insert_header(("x-paystack-signature", signature))
        .insert_header(("content-type", "application/json"))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());
    let dup: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(dup["duplicate"], true);
}

#[actix_web::test]
async fn paystack_webhook_rejects_bad_signature() {
    let Some(test_db) = support::try_init_test_db("transactions").await else {
        return;
    };
    let pool = &test_db.pool;

    let state = web::Data::new(support::build_state(pool.clone(), "http://127.0.0.1:9"));
    let app =
        test::init_service(App::new().app_data(state.clone()).service(paystack_webhook)).await;

    let body = serde_json::to_vec(&json!({
        "event": "charge.success",
        "data": { "id": 1, "reference": "ref" }
    }))
    .expect("encode body");

    let req = TestRequest::post()
        .uri("/verify-webhook-payload/webhookpaystack")
        .insert_header(("x-paystack-signature", sign("wrong_secret", &body)))
        .insert_header(("content-type", "application/json"))
        .set_payload(body.clone())
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);

    let req = TestRequest::post()
        .uri("/verify-webhook-payload/webhookpaystack")
        .insert_header(("content-type", "application/json"))
        .set_payload(body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}
