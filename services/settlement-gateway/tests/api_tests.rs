use actix_web::{test, web, App};
use ledger_core::{AccountKind, Currency, TenantId};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use settlement::FaultPlan;
use settlement_gateway::{handlers, AppState, Config};
use std::sync::Arc;
use webhooks::MemoryTransport;

fn test_state() -> AppState {
    let mut config = Config::default();
    config.settlement.simulation.latency_ms = 0;
    config.settlement.simulation.fault_plan = FaultPlan::Never;
    AppState::build(&config, Arc::new(MemoryTransport::default()))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(handlers::configure_routes),
        )
        .await
    };
}

#[actix_web::test]
async fn test_health_check() {
    let state = test_state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "healthy");
}

#[actix_web::test]
async fn test_missing_tenant_is_unauthorized() {
    let state = test_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .set_json(json!({ "from_account_id": uuid::Uuid::new_v4(), "amount": "10" }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 401);
}

#[actix_web::test]
async fn test_internal_transfer_moves_balances() {
    let state = test_state();
    let tenant = TenantId::new();
    let from = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(500))
        .await
        .unwrap();
    let to = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(200))
        .await
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "from_account_id": from.id,
            "to_account_id": to.id,
            "amount": "100"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["transfer"]["status"], "completed");
    assert_eq!(state.ledger.account(from.id).unwrap().balance_available, dec!(400));
    assert_eq!(state.ledger.account(to.id).unwrap().balance_available, dec!(300));
}

#[actix_web::test]
async fn test_idempotent_replay_and_conflict() {
    let state = test_state();
    let tenant = TenantId::new();
    let from = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(500))
        .await
        .unwrap();
    let to = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(0))
        .await
        .unwrap();
    let app = app!(state);

    let payload = json!({
        "from_account_id": from.id,
        "to_account_id": to.id,
        "amount": "50"
    });
    let send = |uri: &str| {
        test::TestRequest::post()
            .uri(uri)
            .insert_header(("X-Tenant-Id", tenant.to_string()))
            .insert_header(("Idempotency-Key", "transfer-001"))
            .set_json(payload.clone())
            .to_request()
    };

    let first = test::call_service(&app, send("/transfers")).await;
    assert_eq!(first.status().as_u16(), 201);
    assert!(first.headers().get("Idempotent-Replayed").is_none());
    let first_body: Value = test::read_body_json(first).await;

    let second = test::call_service(&app, send("/transfers")).await;
    assert_eq!(second.status().as_u16(), 201);
    assert_eq!(second.headers().get("Idempotent-Replayed").unwrap(), "true");
    let second_body: Value = test::read_body_json(second).await;
    assert_eq!(first_body["transfer"]["id"], second_body["transfer"]["id"]);

    // Money moved once
    assert_eq!(state.ledger.account(from.id).unwrap().balance_available, dec!(450));

    let conflict = test::call_service(&app, send("/settlement/execute")).await;
    assert_eq!(conflict.status().as_u16(), 409);
    let body: Value = test::read_body_json(conflict).await;
    assert_eq!(body["error"]["kind"], "idempotency_conflict");
    assert_eq!(body["error"]["details"]["originalPath"], "/transfers");
}

#[actix_web::test]
async fn test_insufficient_balance_reports_shortfall() {
    let state = test_state();
    let tenant = TenantId::new();
    let from = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(100))
        .await
        .unwrap();
    let to = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(0))
        .await
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "from_account_id": from.id,
            "to_account_id": to.id,
            "amount": "150"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 422);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"]["kind"], "insufficient_balance");
    assert_eq!(body["error"]["details"]["shortfall"], "50");
    assert_eq!(state.ledger.account(from.id).unwrap().balance_available, dec!(100));
}

#[actix_web::test]
async fn test_cross_border_transfer_settles_on_pix() {
    let state = test_state();
    let tenant = TenantId::new();
    let from = state
        .ledger
        .open_account(tenant, Currency::USD, AccountKind::Customer, dec!(1000))
        .await
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "from_account_id": from.id,
            "amount": "100",
            "destination_currency": "BRL",
            "destination_country": "BR",
            "recipient": {
                "type": "pix",
                "pix_key": "maria@example.com",
                "pix_key_type": "email",
                "name": "Maria Silva"
            }
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["settlement"]["success"], true);
    assert_eq!(body["settlement"]["rail"], "pix");
    assert_eq!(body["transfer"]["status"], "completed");

    // 100 plus the 0.5% Pix fee
    assert_eq!(state.ledger.account(from.id).unwrap().balance_available, dec!(899.5));

    let transfer_id = body["transfer"]["id"].as_str().unwrap().to_string();
    let req = test::TestRequest::get()
        .uri(&format!("/settlement/transfers/{}/attempts", transfer_id))
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let attempts: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(attempts.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn test_other_tenants_transfer_is_not_found() {
    let state = test_state();
    let owner = TenantId::new();
    let from = state
        .ledger
        .open_account(owner, Currency::USD, AccountKind::Customer, dec!(100))
        .await
        .unwrap();
    let to = state
        .ledger
        .open_account(owner, Currency::USD, AccountKind::Customer, dec!(0))
        .await
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Tenant-Id", owner.to_string()))
        .set_json(json!({ "from_account_id": from.id, "to_account_id": to.id, "amount": "10" }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let transfer_id = body["transfer"]["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri(&format!("/transfers/{}", transfer_id))
        .insert_header(("X-Tenant-Id", owner.to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 200);

    let req = test::TestRequest::get()
        .uri(&format!("/transfers/{}", transfer_id))
        .insert_header(("X-Tenant-Id", TenantId::new().to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 404);
}

#[actix_web::test]
async fn test_rails_and_route_quote() {
    let state = test_state();
    let tenant = TenantId::new();
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/settlement/rails")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let rails: Value = test::call_and_read_body_json(&app, req).await;
    assert!(rails.as_array().unwrap().iter().any(|r| r["rail"] == "pix"));

    let req = test::TestRequest::post()
        .uri("/settlement/route")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "amount": "250",
            "currency": "USD",
            "destination_currency": "MXN",
            "destination_country": "MX"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 200);
    let decision: Value = test::read_body_json(resp).await;
    assert_eq!(decision["selected_rail"], "spei");
}

#[actix_web::test]
async fn test_webhook_endpoint_lifecycle() {
    let state = test_state();
    let tenant = TenantId::new();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/webhooks")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "url": "https://hooks.example.com/settlement",
            "event_types": ["transfer.completed"]
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);
    let endpoint: Value = test::read_body_json(resp).await;
    let id = endpoint["id"].as_str().unwrap().to_string();

    let req = test::TestRequest::get()
        .uri("/webhooks")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let list: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let req = test::TestRequest::post()
        .uri(&format!("/webhooks/{}/test", id))
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let delivery: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(delivery["status"], "delivered");

    let req = test::TestRequest::get()
        .uri("/webhooks/stats")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["delivered"], 1);

    // Invisible to another tenant
    let req = test::TestRequest::get()
        .uri(&format!("/webhooks/{}", id))
        .insert_header(("X-Tenant-Id", TenantId::new().to_string()))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status().as_u16(), 404);

    let req = test::TestRequest::delete()
        .uri(&format!("/webhooks/{}", id))
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .to_request();
    let deleted: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(deleted["deleted"], true);
}

#[actix_web::test]
async fn test_invalid_webhook_url_is_rejected() {
    let state = test_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/webhooks")
        .insert_header(("X-Tenant-Id", TenantId::new().to_string()))
        .set_json(json!({ "url": "ftp://hooks.example.com" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 400);
}

#[actix_web::test]
async fn test_cross_currency_fixed_fee_is_charged_in_source_currency() {
    let state = test_state();
    let tenant = TenantId::new();
    let from = state
        .ledger
        .open_account(tenant, Currency::EUR, AccountKind::Customer, dec!(5000))
        .await
        .unwrap();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/transfers")
        .insert_header(("X-Tenant-Id", tenant.to_string()))
        .set_json(json!({
            "from_account_id": from.id,
            "amount": "1000",
            "destination_currency": "USD",
            "destination_country": "CA"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 201);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["settlement"]["rail"], "wire");
    assert_eq!(body["settlement"]["queued"], true);
    assert_eq!(body["transfer"]["destination_amount"], "1090.00");

    // Wire fee is 15 USD + 0.1% of 1090 USD = 16.09 USD, i.e. 14.76 EUR at 1.09
    assert_eq!(body["transfer"]["fee_amount"], "14.76");
    assert_eq!(state.ledger.account(from.id).unwrap().balance_available, dec!(3985.24));
}
