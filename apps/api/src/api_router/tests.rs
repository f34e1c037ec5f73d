use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mirrorline_application::{DescriptorRegistry, IntegrationRepository, RetryPolicy};
use mirrorline_core::TenantId;
use mirrorline_domain::{
    CREDENTIAL_BACKFILL_KEY, CREDENTIAL_WEBHOOK_PASSWORD, CREDENTIAL_WEBHOOK_USERNAME,
    Integration, ResourceType, catalog,
};
use mirrorline_infrastructure::{
    InMemoryIntegrationRepository, InMemoryRecordChangePublisher, InMemoryRecordRepository,
    InMemorySyncJobQueue, ReqwestVendorClient,
};
use serde_json::{Value, json};
use tower::ServiceExt;

use super::build_router;
use crate::state::{AppState, ServicePorts};

const SECRET: &str = "test-shared-secret-0123456789abcdef";
const BASE: &str = "https://sync.example";

struct Harness {
    integrations: Arc<InMemoryIntegrationRepository>,
    jobs: Arc<InMemorySyncJobQueue>,
    publisher: Arc<InMemoryRecordChangePublisher>,
    router: Router,
}

fn harness() -> Harness {
    let integrations = Arc::new(InMemoryIntegrationRepository::new());
    let jobs = Arc::new(InMemorySyncJobQueue::new());
    let publisher = Arc::new(InMemoryRecordChangePublisher::new());
    let ports = ServicePorts {
        integrations: integrations.clone(),
        records: Arc::new(InMemoryRecordRepository::new()),
        jobs: jobs.clone(),
        vendor: Arc::new(
            ReqwestVendorClient::with_timeout(std::time::Duration::from_secs(1))
                .unwrap_or_else(|_| unreachable!()),
        ),
        publisher: publisher.clone(),
    };
    let state = AppState::from_ports(
        DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!()),
        ports,
        BASE,
        RetryPolicy {
            max_retries: 0,
            backoff_ms: 0,
        },
        SECRET,
    );

    Harness {
        integrations,
        jobs,
        publisher,
        router: build_router(state),
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .unwrap_or_else(|_| unreachable!());
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|_| unreachable!());
    (status, body.to_vec())
}

fn json_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap_or_else(|_| unreachable!())
}

fn internal(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {SECRET}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| unreachable!())
}

async fn helpdesk(harness: &Harness) -> Integration {
    let mut integration = Integration::new(
        TenantId::new(),
        ResourceType::new(catalog::HELPDESK_TICKET).unwrap_or_else(|_| unreachable!()),
    );
    integration.set_credential(CREDENTIAL_WEBHOOK_USERNAME, "vendor");
    integration.set_credential(CREDENTIAL_WEBHOOK_PASSWORD, "hunter2");
    harness
        .integrations
        .save_integration(&integration)
        .await
        .unwrap_or_else(|_| unreachable!());
    integration
}

fn webhook(opaque_id: &str, authorization: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/webhooks/{opaque_id}"))
        .header(header::AUTHORIZATION, authorization)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_else(|_| unreachable!())
}

#[tokio::test]
async fn health_reports_disabled_dependencies_as_ready() {
    let harness = harness();
    let (status, body) = send(
        &harness.router,
        Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap_or_else(|_| unreachable!()),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let body = json_body(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["postgres"]["status"], "disabled");
}

#[tokio::test]
async fn internal_routes_require_the_shared_secret() {
    let harness = harness();
    let uri = format!("/api/internal/tenants/{}/integrations", TenantId::new());

    let missing = Request::builder()
        .method("POST")
        .uri(uri.as_str())
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"resource_type": catalog::HELPDESK_TICKET}).to_string()))
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(send(&harness.router, missing).await.0, StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .method("POST")
        .uri(uri.as_str())
        .header(header::AUTHORIZATION, "Bearer not-the-secret")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"resource_type": catalog::HELPDESK_TICKET}).to_string()))
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(send(&harness.router, wrong).await.0, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn created_integration_walks_its_backfill_setup() {
    let harness = harness();
    let tenant_id = TenantId::new();

    let (status, body) = send(
        &harness.router,
        internal(
            "POST",
            &format!("/api/internal/tenants/{tenant_id}/integrations"),
            json!({"resource_type": catalog::HELPDESK_TICKET}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let created = json_body(&body);
    let opaque_id = created["opaque_id"]
        .as_str()
        .unwrap_or_else(|| unreachable!())
        .to_owned();
    assert_eq!(created["webhook_url"], format!("{BASE}/webhooks/{opaque_id}"));

    let (status, body) = send(
        &harness.router,
        internal(
            "GET",
            &format!("/api/setup/{opaque_id}/backfill"),
            Value::Null,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let step = json_body(&body);
    assert_eq!(step["needs_input"], true);
    assert_eq!(
        step["post_to_url"],
        format!("{BASE}/api/setup/{opaque_id}/transition/{CREDENTIAL_BACKFILL_KEY}")
    );

    let (status, body) = send(
        &harness.router,
        internal(
            "POST",
            &format!("/api/setup/{opaque_id}/transition/{CREDENTIAL_BACKFILL_KEY}"),
            json!({"value": "agent@example.com/token"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["prompt_is_secret"], true);

    let (status, _) = send(
        &harness.router,
        internal(
            "POST",
            &format!("/api/setup/{opaque_id}/transition/not_a_field"),
            json!({"value": "x"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_responses_follow_verification_outcome() {
    let harness = harness();
    let integration = helpdesk(&harness).await;
    let body = json!({"ticket": {
        "id": 77,
        "updated_at": "2024-02-01T08:00:00Z",
        "subject": "Screen flickers",
        "tags": ["hardware"]
    }});

    let authorized = format!("Basic {}", STANDARD.encode("vendor:hunter2"));
    let (status, response) = send(
        &harness.router,
        webhook(integration.opaque_id().as_str(), &authorized, &body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response, b"ok");
    assert_eq!(harness.publisher.wait_for_changes(1).await.len(), 1);

    let forged = format!("Basic {}", STANDARD.encode("vendor:wrong"));
    let (status, _) = send(
        &harness.router,
        webhook(integration.opaque_id().as_str(), &forged, &body),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(harness.publisher.wait_for_changes(1).await.len(), 1);

    let (status, response) = send(
        &harness.router,
        webhook("0000ffff", &authorized, &body),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(response, b"not found");
}

#[tokio::test]
async fn manual_trigger_queues_a_backfill() {
    let harness = harness();
    let integration = helpdesk(&harness).await;

    let (status, body) = send(
        &harness.router,
        internal(
            "POST",
            &format!("/api/internal/integrations/{}/backfill", integration.opaque_id()),
            json!({"mode": "incremental"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(json_body(&body)["job_id"].is_string());

    let pending = harness.jobs.pending_requests().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].integration_id, integration.id());
    assert!(!pending[0].cascade);
}

#[tokio::test]
async fn delete_is_refused_while_dependents_exist() {
    let harness = harness();
    let tenant_id = TenantId::new();
    let create = |resource_type: &'static str| {
        internal(
            "POST",
            &format!("/api/internal/tenants/{tenant_id}/integrations"),
            json!({"resource_type": resource_type}),
        )
    };

    let item = json_body(&send(&harness.router, create(catalog::BANK_ITEM)).await.1);
    let transactions = json_body(
        &send(&harness.router, create(catalog::BANK_TRANSACTION))
            .await
            .1,
    );
    let item_id = item["id"].as_str().unwrap_or_else(|| unreachable!());
    let transactions_id = transactions["id"].as_str().unwrap_or_else(|| unreachable!());

    let (status, body) = send(
        &harness.router,
        internal(
            "PUT",
            &format!(
                "/api/internal/tenants/{tenant_id}/integrations/{transactions_id}/dependency"
            ),
            json!({"depends_on": item_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["depends_on"], item_id);

    let (status, _) = send(
        &harness.router,
        internal(
            "DELETE",
            &format!("/api/internal/tenants/{tenant_id}/integrations/{item_id}"),
            Value::Null,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}
