use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use migration::MigratorTrait;
use sea_orm::Database;
use serde_json::{Value, json};
use tower::ServiceExt;

use engine::{
    AccessKey, AuthorityOutcome, Authorization, AuthorizationClient, DocumentSigner, Engine,
    EngineError, IssuanceSettings,
};

#[derive(Default)]
struct ScriptedAuthority {
    outcomes: Mutex<VecDeque<AuthorityOutcome>>,
}

#[async_trait]
impl AuthorizationClient for ScriptedAuthority {
    async fn submit(&self, access_key: &AccessKey, _signed_xml: &str) -> AuthorityOutcome {
        self.next(access_key)
    }

    async fn query(&self, access_key: &AccessKey) -> AuthorityOutcome {
        self.next(access_key)
    }
}

impl ScriptedAuthority {
    fn next(&self, access_key: &AccessKey) -> AuthorityOutcome {
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
            AuthorityOutcome::Authorized(Authorization {
                number: access_key.as_str().to_string(),
                authorized_at: chrono::Utc::now(),
                authorized_xml: Some("<autorizacion>ok</autorizacion>".to_string()),
            })
        })
    }
}

struct PassthroughSigner;

#[async_trait]
impl DocumentSigner for PassthroughSigner {
    async fn sign(&self, xml: &str) -> Result<String, EngineError> {
        Ok(xml.replace("</factura>", "<ds:Signature></ds:Signature></factura>"))
    }
}

async fn test_app(outcomes: Vec<AuthorityOutcome>) -> Router {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    let engine = Engine::builder()
        .database(db)
        .issuance(IssuanceSettings::default())
        .authority(Arc::new(ScriptedAuthority {
            outcomes: Mutex::new(outcomes.into()),
        }))
        .signer(Arc::new(PassthroughSigner))
        .build()
        .await
        .unwrap();
    server::app(Arc::new(engine))
}

fn sale_body(sale_id: i64) -> Value {
    json!({
        "sale_id": sale_id,
        "issuer": {
            "ruc": "1790012345001",
            "legal_name": "Lubricadora El Pana S.A.",
            "trade_name": null,
            "head_office_address": "Av. Amazonas N34-12",
            "establishment_address": "Av. Amazonas N34-12",
            "establishment": "001",
            "emission_point": "002",
            "accounting_required": false,
            "rimpe_legend": null
        },
        "buyer": {
            "identification_type": "cedula",
            "identification": "1712345678",
            "name": "María Pérez",
            "address": null,
            "email": "maria@example.com"
        },
        "line_items": [{
            "code": "LAV-01",
            "description": "Lavado completo",
            "quantity": 1,
            "unit_price_minor": 2000,
            "tax_rate": "fifteen",
            "source": { "kind": "service", "service_id": 3 }
        }],
        "subtotal_minor": 2000,
        "tax_minor": 300,
        "total_minor": 2300,
        "emission_date": "2026-03-01"
    })
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create(app: &Router, sale_id: i64) -> String {
    let (status, body) = send(app, "POST", "/facturas-electronicas", Some(sale_body(sale_id))).await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn create_returns_the_generated_invoice() {
    let app = test_app(Vec::new()).await;

    let (status, body) = send(&app, "POST", "/facturas-electronicas", Some(sale_body(42))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["state"], "GENERATED");
    assert_eq!(body["number"], "001-002-000000001");
    assert_eq!(body["total_minor"], 2300);
    assert_eq!(body["access_key"].as_str().unwrap().len(), 49);

    let (status, body) = send(&app, "POST", "/facturas-electronicas", Some(sale_body(42))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "duplicate_invoice");
}

#[tokio::test]
async fn mismatched_totals_are_unprocessable() {
    let app = test_app(Vec::new()).await;
    let mut sale = sale_body(1);
    sale["total_minor"] = json!(2500);

    let (status, body) = send(&app, "POST", "/facturas-electronicas", Some(sale)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn submit_authorizes_and_serves_the_authorized_xml() {
    let app = test_app(Vec::new()).await;
    let id = create(&app, 1).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/procesar-sri"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "AUTHORIZED");
    assert_eq!(body["attempts"], 1);
    assert_eq!(body["authorization"]["number"], body["access_key"]);

    let request = Request::builder()
        .uri(format!("/facturas-electronicas/{id}/xml"))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap().to_string();
    assert!(content_type.starts_with("application/xml"));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"<autorizacion>ok</autorizacion>");
}

#[tokio::test]
async fn rejection_then_resend() {
    let app = test_app(vec![AuthorityOutcome::Rejected {
        errors: vec!["RUC inválido".to_string()],
    }])
    .await;
    let id = create(&app, 1).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/procesar-sri"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "authority_rejected");
    assert_eq!(body["errors"], json!(["RUC inválido"]));

    let (_, detail) = send(&app, "GET", &format!("/facturas-electronicas/{id}"), None).await;
    assert_eq!(detail["state"], "REJECTED");
    assert_eq!(detail["authority_messages"], json!(["RUC inválido"]));

    let (status, body) = send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/reenviar"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "AUTHORIZED");
    assert_eq!(body["access_key"], detail["access_key"]);
    assert_eq!(body["attempts"], 2);
}

#[tokio::test]
async fn unavailable_authority_is_service_unavailable() {
    let app = test_app(vec![AuthorityOutcome::Unavailable {
        reason: "timeout".to_string(),
    }])
    .await;
    let id = create(&app, 1).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/procesar-sri"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "authority_unavailable");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/consultar"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "AUTHORIZED");
}

#[tokio::test]
async fn annul_only_authorized_invoices() {
    let app = test_app(Vec::new()).await;
    let id = create(&app, 1).await;
    let uri = format!("/facturas-electronicas/{id}/anular");

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "reason": "error" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "invalid_transition");

    send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{id}/procesar-sri"),
        None,
    )
    .await;

    let (status, body) = send(&app, "POST", &uri, Some(json!({ "reason": "  " }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "validation");

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "reason": "servicio no prestado" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "ANNULLED");
    assert_eq!(body["annulment_reason"], "servicio no prestado");
}

#[tokio::test]
async fn batch_reports_per_item_results() {
    let app = test_app(vec![
        AuthorityOutcome::Rejected {
            errors: vec!["Error 43: clave registrada".to_string()],
        },
    ])
    .await;
    let first = create(&app, 1).await;
    create(&app, 2).await;

    let (status, body) = send(
        &app,
        "POST",
        "/facturas-electronicas/procesar-lote",
        Some(json!({ "limit": 5 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["errors"][0]["invoice_id"], first.as_str());
    assert_eq!(body["errors"][0]["kind"], "authority_rejected");

    let (status, body) = send(&app, "POST", "/facturas-electronicas/procesar-lote", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["failed"], 0);
}

#[tokio::test]
async fn list_filters_by_state() {
    let app = test_app(Vec::new()).await;
    let authorized = create(&app, 1).await;
    create(&app, 2).await;
    send(
        &app,
        "POST",
        &format!("/facturas-electronicas/{authorized}/procesar-sri"),
        None,
    )
    .await;

    let (status, body) = send(&app, "GET", "/facturas-electronicas", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["invoices"].as_array().unwrap().len(), 2);

    let (_, body) = send(&app, "GET", "/facturas-electronicas?state=authorized", None).await;
    let invoices = body["invoices"].as_array().unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0]["id"], authorized.as_str());

    let (status, body) = send(&app, "GET", "/facturas-electronicas?state=PAID", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "bad_request");
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let app = test_app(Vec::new()).await;
    let (status, body) = send(
        &app,
        "GET",
        &format!("/facturas-electronicas/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");
}
