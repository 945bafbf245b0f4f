//! API contract tests against the real router and an in-memory database.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use db::DBService;
use hmac::{Hmac, Mac};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{AppState, router};
use services::services::{
    config::Config,
    crawler::{CrawlTarget, CrawlerSettings},
    mailer::MailerConfig,
    payments::StripeConfig,
};
use sha2::Sha256;
use tower::ServiceExt;

const WEBHOOK_SECRET: &str = "whsec_test123secret456";

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        stripe: Some(StripeConfig {
            secret_key: "sk_test_xxx".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            price_id_pro: "price_pro".to_string(),
            price_id_enterprise: "price_ent".to_string(),
        }),
        square: None,
        mailer: MailerConfig::default(),
        crawler_enabled: false,
        crawler: CrawlerSettings {
            targets: vec![CrawlTarget {
                vendor: "acme-solar".to_string(),
                page_urls: vec!["https://acme.example/catalog".to_string()],
            }],
            ..CrawlerSettings::default()
        },
        pro_price_cents: 2_900,
        enterprise_price_cents: 9_900,
        checkout_success_url: "http://localhost/success".to_string(),
        checkout_cancel_url: "http://localhost/cancel".to_string(),
    }
}

async fn test_app() -> Router {
    let db = DBService::new_in_memory().await.unwrap();
    let state = AppState::new(db, test_config()).unwrap();
    router(state)
}

fn request(
    method: &str,
    uri: &str,
    api_key: Option<&str>,
    body: Option<Value>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {key}"));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn signup(app: &Router, name: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/companies",
            None,
            Some(json!({ "name": name, "contact_email": "ops@example.com" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "signup failed: {body}");
    body["data"]["api_key"].as_str().unwrap().to_string()
}

async fn create_customer(app: &Router, key: &str, name: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/customers",
            Some(key),
            Some(json!({ "name": name, "email": "c@example.com" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "create customer failed: {body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

fn stripe_signature(payload: &[u8], secret: &str) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let timestamp = Utc::now().timestamp().to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, String::from_utf8_lossy(payload)).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

async fn upgrade_to_pro(app: &Router, company_id: &str) {
    let payload = json!({
        "id": format!("evt_{company_id}"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_1",
            "payment_status": "paid",
            "subscription": format!("sub_{company_id}"),
            "metadata": { "company_id": company_id, "plan": "pro" }
        }}
    });
    let bytes = serde_json::to_vec(&payload).unwrap();
    let signature = stripe_signature(&bytes, WEBHOOK_SECRET);
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json")
        .header("stripe-signature", signature)
        .body(Body::from(bytes))
        .unwrap();
    let (status, body) = send(app, req).await;
    assert_eq!(status, StatusCode::OK, "upgrade webhook failed: {body}");
}

async fn company_id_for(app: &Router, key: &str) -> String {
    let (_, body) = send(app, request("GET", "/api/company", Some(key), None)).await;
    body["data"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_needs_no_auth() {
    let app = test_app().await;
    let (status, body) = send(&app, request("GET", "/api/health", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn auth_is_required_and_validated() {
    let app = test_app().await;

    let (status, body) = send(&app, request("GET", "/api/customers", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = send(&app, request("GET", "/api/customers", Some("qc_bogus"), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn signup_returns_key_and_rejects_duplicates() {
    let app = test_app().await;
    let key = signup(&app, "Sunbeam Solar").await;
    assert!(key.starts_with("qc_"));

    // Same name → same slug → conflict.
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/companies",
            None,
            Some(json!({ "name": "Sunbeam Solar", "contact_email": "x@example.com" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/companies",
            None,
            Some(json!({ "name": "", "contact_email": "x@example.com" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn customers_are_tenant_scoped() {
    let app = test_app().await;
    let key_a = signup(&app, "Tenant A").await;
    let key_b = signup(&app, "Tenant B").await;

    let customer_id = create_customer(&app, &key_a, "Jordan Reyes").await;

    // The owner sees it.
    let (status, body) = send(
        &app,
        request("GET", &format!("/api/customers/{customer_id}"), Some(&key_a), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Jordan Reyes");

    // Another tenant gets a 404, not a 403 — ids must not leak existence.
    let (status, _) = send(
        &app,
        request("GET", &format!("/api/customers/{customer_id}"), Some(&key_b), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn free_plan_customer_quota_is_enforced() {
    let app = test_app().await;
    let key = signup(&app, "Quota Co").await;

    for i in 0..10 {
        create_customer(&app, &key, &format!("Customer {i}")).await;
    }

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/customers",
            Some(&key),
            Some(json!({ "name": "One Too Many" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("limit"), "unexpected message: {message}");
}

#[tokio::test]
async fn quote_flow_totals_and_lifecycle() {
    let app = test_app().await;
    let key = signup(&app, "Quote Co").await;
    let customer_id = create_customer(&app, &key, "Buyer").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/quotes",
            Some(&key),
            Some(json!({
                "customer_id": customer_id,
                "items": [
                    { "description": "400W Panel", "unit_price_cents": 45000, "quantity": 2 },
                    { "description": "Install kit", "unit_price_cents": 12050, "quantity": 1 }
                ],
                "discount_cents": 2050,
                "shipping_cents": 4999,
                "tax_rate_bps": 825
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let quote_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["quote_number"], "Q-00001");
    assert_eq!(body["data"]["totals"]["subtotal_cents"], 102_050);
    assert_eq!(body["data"]["totals"]["tax_cents"], 8_250);
    assert_eq!(body["data"]["totals"]["total_cents"], 113_249);
    assert_eq!(body["data"]["status"], "draft");

    // Draft cannot be accepted.
    let (status, _) = send(
        &app,
        request("POST", &format!("/api/quotes/{quote_id}/accept"), Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Send (mailer is disabled in tests, so this is a logged no-op) → sent.
    let (status, body) = send(
        &app,
        request("POST", &format!("/api/quotes/{quote_id}/send"), Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "sent");

    // Sent quotes cannot be edited or deleted.
    let (status, _) = send(
        &app,
        request(
            "PUT",
            &format!("/api/quotes/{quote_id}"),
            Some(&key),
            Some(json!({ "discount_cents": 0 })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(
        &app,
        request("DELETE", &format!("/api/quotes/{quote_id}"), Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // viewed → accepted, with timestamps.
    let (status, _) = send(
        &app,
        request("POST", &format!("/api/quotes/{quote_id}/view"), Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(
        &app,
        request("POST", &format!("/api/quotes/{quote_id}/accept"), Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "accepted");
    assert!(body["data"]["responded_at"].is_string());

    // The rendered document is plain HTML.
    let response = app
        .clone()
        .oneshot(request(
            "GET",
            &format!("/api/quotes/{quote_id}/document"),
            Some(&key),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8_lossy(&html);
    assert!(html.contains("Q-00001"));
    assert!(html.contains("400W Panel"));
}

#[tokio::test]
async fn quote_with_bad_arithmetic_is_rejected() {
    let app = test_app().await;
    let key = signup(&app, "Validation Co").await;
    let customer_id = create_customer(&app, &key, "Buyer").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/quotes",
            Some(&key),
            Some(json!({
                "customer_id": customer_id,
                "items": [
                    { "description": "Panel", "unit_price_cents": 100, "quantity": 0 }
                ]
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("quantity"));

    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/quotes",
            Some(&key),
            Some(json!({ "customer_id": customer_id, "items": [] })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stripe_webhook_upgrades_plan_and_handles_replays() {
    let app = test_app().await;
    let key = signup(&app, "Webhook Co").await;
    let company_id = company_id_for(&app, &key).await;

    // Before: free plan.
    let (_, body) = send(&app, request("GET", "/api/subscriptions", Some(&key), None)).await;
    assert_eq!(body["data"]["plan"], "free");

    upgrade_to_pro(&app, &company_id).await;

    let (_, body) = send(&app, request("GET", "/api/subscriptions", Some(&key), None)).await;
    assert_eq!(body["data"]["plan"], "pro");
    assert_eq!(body["data"]["status"], "active");
    assert_eq!(body["data"]["provider"], "stripe");

    // Redelivery of the same event is acknowledged without re-applying.
    let payload = json!({
        "id": format!("evt_{company_id}"),
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_1",
            "payment_status": "paid",
            "subscription": format!("sub_{company_id}"),
            "metadata": { "company_id": company_id, "plan": "pro" }
        }}
    });
    let bytes = serde_json::to_vec(&payload).unwrap();
    let signature = stripe_signature(&bytes, WEBHOOK_SECRET);
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("stripe-signature", signature)
        .body(Body::from(bytes))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "already processed");
}

#[tokio::test]
async fn stripe_webhook_rejects_bad_signatures() {
    let app = test_app().await;

    let payload = json!({ "id": "evt_x", "type": "invoice.paid", "data": { "object": {} } });
    let bytes = serde_json::to_vec(&payload).unwrap();

    // No header at all.
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .body(Body::from(bytes.clone()))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Signed with the wrong secret.
    let signature = stripe_signature(&bytes, "wrong_secret");
    let req = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("stripe-signature", signature)
        .body(Body::from(bytes))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn crawler_is_plan_gated_and_validates_vendor() {
    let app = test_app().await;
    let key = signup(&app, "Crawler Co").await;

    // Free plan: feature not included.
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/crawler/jobs",
            Some(&key),
            Some(json!({ "vendor": "acme-solar" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let company_id = company_id_for(&app, &key).await;
    upgrade_to_pro(&app, &company_id).await;

    // Unknown vendor.
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/crawler/jobs",
            Some(&key),
            Some(json!({ "vendor": "nobody" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    // Configured vendor queues a pending job, which can then be canceled.
    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/crawler/jobs",
            Some(&key),
            Some(json!({ "vendor": "acme-solar" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "pending");
    let job_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            "POST",
            &format!("/api/crawler/jobs/{job_id}/cancel"),
            Some(&key),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "canceled");

    let (status, _) = send(
        &app,
        request(
            "POST",
            &format!("/api/crawler/jobs/{job_id}/cancel"),
            Some(&key),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn product_list_filters() {
    let app = test_app().await;
    let key = signup(&app, "Catalog Co").await;

    for (sku, name, category) in [
        ("SPR-400", "SunPower 400W Panel", "panel"),
        ("IQ8-PLUS", "Enphase IQ8+ Microinverter", "inverter"),
    ] {
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/products",
                Some(&key),
                Some(json!({
                    "sku": sku,
                    "name": name,
                    "category": category,
                    "unit_price_cents": 10000
                })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }

    let (status, body) = send(
        &app,
        request("GET", "/api/products?category=panel", Some(&key), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let products = body["data"].as_array().unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0]["sku"], "SPR-400");

    let (_, body) = send(
        &app,
        request("GET", "/api/products?search=enphase", Some(&key), None),
    )
    .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
