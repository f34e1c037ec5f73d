use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderValue};
use mirrorline_core::{AppError, TenantId};
use mirrorline_domain::{
    BackfillMode, CREDENTIAL_WEBHOOK_PASSWORD, CREDENTIAL_WEBHOOK_SECRET,
    CREDENTIAL_WEBHOOK_USERNAME, Integration, OpaqueId, ResourceType, VerificationFailure,
    catalog,
};
use serde_json::{Value, json};
use sha2::Sha256;

use super::{InboundWebhook, WebhookAck, WebhookService};
use crate::test_support::{
    FakeChangePublisher, FakeIntegrationRepository, FakeRecordRepository, FakeSyncJobQueue,
    StalledChangePublisher,
};
use crate::{DescriptorRegistry, RecordChangeKind, RecordRepository};

const SECRET: &str = "whsec_test";

struct Harness {
    integrations: Arc<FakeIntegrationRepository>,
    records: Arc<FakeRecordRepository>,
    jobs: Arc<FakeSyncJobQueue>,
    publisher: Arc<FakeChangePublisher>,
    service: WebhookService,
}

fn harness() -> Harness {
    let integrations = Arc::new(FakeIntegrationRepository::default());
    let records = Arc::new(FakeRecordRepository::default());
    let jobs = Arc::new(FakeSyncJobQueue::default());
    let publisher = Arc::new(FakeChangePublisher::default());
    let service = WebhookService::new(
        DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!()),
        integrations.clone(),
        records.clone(),
        jobs.clone(),
        publisher.clone(),
    );

    Harness {
        integrations,
        records,
        jobs,
        publisher,
        service,
    }
}

fn resource(raw: &str) -> ResourceType {
    ResourceType::new(raw).unwrap_or_else(|_| unreachable!())
}

fn hmac(parts: &[&[u8]]) -> Vec<u8> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap_or_else(|_| unreachable!());
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().to_vec()
}

fn request(headers: &[(&'static str, String)], body: &Value) -> InboundWebhook {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            *name,
            HeaderValue::from_str(value).unwrap_or_else(|_| unreachable!()),
        );
    }

    InboundWebhook {
        headers: map,
        body: body.to_string().into_bytes(),
    }
}

fn storefront_request(body: &Value) -> InboundWebhook {
    let signature = STANDARD.encode(hmac(&[body.to_string().as_bytes()]));
    request(&[("x-storefront-hmac-sha256", signature)], body)
}

async fn configured(harness: &Harness, resource_type: &str) -> Integration {
    let mut integration = Integration::new(TenantId::new(), resource(resource_type));
    integration.set_credential(CREDENTIAL_WEBHOOK_SECRET, SECRET);
    harness.integrations.insert(integration.clone()).await;
    integration
}

async fn bank_pair(harness: &Harness) -> Integration {
    let tenant_id = TenantId::new();
    let mut item = Integration::new(tenant_id, resource(catalog::BANK_ITEM));
    item.set_credential(catalog::CREDENTIAL_ACCESS_TOKEN, "access-sandbox");
    let mut transactions = Integration::new(tenant_id, resource(catalog::BANK_TRANSACTION));
    transactions
        .set_dependency(Some(item.id()))
        .unwrap_or_else(|_| unreachable!());
    harness.integrations.insert(item).await;
    harness.integrations.insert(transactions.clone()).await;
    transactions
}

#[tokio::test]
async fn redelivered_webhook_stores_one_unchanged_record() {
    let harness = harness();
    let integration = configured(&harness, catalog::STOREFRONT_ORDER).await;
    let body = json!({
        "id": 1001,
        "updated_at": "2024-03-01T10:00:00Z",
        "total_price": "19.99",
        "line_items": [{"id": 1, "title": "Mug"}]
    });

    for _ in 0..2 {
        let ack = harness
            .service
            .handle(integration.opaque_id(), storefront_request(&body))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(ack, WebhookAck::Ok);
        assert_eq!(ack.status_code(), 200);
    }

    assert_eq!(harness.records.count().await, 1);
    let stored = harness
        .records
        .find_record(integration.tenant_id(), integration.id(), "1001")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(stored.payload, body);
    assert_eq!(stored.projections["total_price"], json!("19.99"));

    let changes = harness.publisher.received(1).await;
    assert!(!changes.is_empty());
    assert_eq!(changes[0].kind, RecordChangeKind::Upserted);
    assert_eq!(changes[0].external_id, "1001");
}

#[tokio::test]
async fn stalled_notification_channel_does_not_delay_the_acknowledgment() {
    let integrations = Arc::new(FakeIntegrationRepository::default());
    let records = Arc::new(FakeRecordRepository::default());
    let service = WebhookService::new(
        DescriptorRegistry::reference().unwrap_or_else(|_| unreachable!()),
        integrations.clone(),
        records.clone(),
        Arc::new(FakeSyncJobQueue::default()),
        Arc::new(StalledChangePublisher),
    );
    let mut integration = Integration::new(TenantId::new(), resource(catalog::STOREFRONT_ORDER));
    integration.set_credential(CREDENTIAL_WEBHOOK_SECRET, SECRET);
    integrations.insert(integration.clone()).await;
    let body = json!({"id": 5, "updated_at": "2024-03-01T10:00:00Z"});

    let ack = tokio::time::timeout(
        Duration::from_secs(1),
        service.handle(integration.opaque_id(), storefront_request(&body)),
    )
    .await
    .unwrap_or_else(|_| unreachable!())
    .unwrap_or_else(|_| unreachable!());

    assert_eq!(ack, WebhookAck::Ok);
    assert_eq!(records.count().await, 1);
}

#[tokio::test]
async fn older_webhook_does_not_overwrite_newer_record() {
    let harness = harness();
    let integration = configured(&harness, catalog::STOREFRONT_ORDER).await;
    let newer = json!({"id": 7, "updated_at": "2024-03-02T00:00:00Z", "note": "new"});
    let older = json!({"id": 7, "updated_at": "2024-03-01T00:00:00Z", "note": "old"});

    for body in [&newer, &older] {
        harness
            .service
            .handle(integration.opaque_id(), storefront_request(body))
            .await
            .unwrap_or_else(|_| unreachable!());
    }

    let stored = harness
        .records
        .find_record(integration.tenant_id(), integration.id(), "7")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert_eq!(stored.payload["note"], json!("new"));
    assert_eq!(harness.publisher.received(1).await.len(), 1);
}

#[tokio::test]
async fn verification_failures_answer_401_without_storage() {
    let harness = harness();
    let integration = configured(&harness, catalog::STOREFRONT_ORDER).await;
    let body = json!({"id": 1, "updated_at": "2024-03-01T10:00:00Z"});

    let missing = harness
        .service
        .handle(integration.opaque_id(), request(&[], &body))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(missing, WebhookAck::Rejected(VerificationFailure::MissingSignature));
    assert_eq!(missing.status_code(), 401);
    assert_eq!(missing.body(), "missing hmac");

    let forged = harness
        .service
        .handle(
            integration.opaque_id(),
            request(
                &[("x-storefront-hmac-sha256", STANDARD.encode(b"forged"))],
                &body,
            ),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(forged.body(), "invalid hmac");

    assert_eq!(harness.records.count().await, 0);
    assert!(harness.publisher.changes.lock().await.is_empty());
}

#[tokio::test]
async fn timestamped_signature_unwraps_the_event_envelope() {
    let harness = harness();
    let integration = configured(&harness, catalog::BILLING_SUBSCRIPTION).await;
    let body = json!({
        "type": "customer.subscription.updated",
        "data": {"object": {"id": "sub_9", "status": "canceled", "updated": 1_700_000_000}}
    });
    let raw = body.to_string();

    let timestamp = Utc::now().timestamp().to_string();
    let signature = hex::encode(hmac(&[timestamp.as_bytes(), b".", raw.as_bytes()]));
    let ack = harness
        .service
        .handle(
            integration.opaque_id(),
            request(
                &[("billing-signature", format!("t={timestamp},v1={signature}"))],
                &body,
            ),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);

    let stored = harness
        .records
        .find_record(integration.tenant_id(), integration.id(), "sub_9")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert!(stored.payload["cancelled_at"].is_string());

    let stale = (Utc::now().timestamp() - 3_600).to_string();
    let stale_signature = hex::encode(hmac(&[stale.as_bytes(), b".", raw.as_bytes()]));
    let replay = harness
        .service
        .handle(
            integration.opaque_id(),
            request(
                &[("billing-signature", format!("t={stale},v1={stale_signature}"))],
                &body,
            ),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(replay, WebhookAck::Rejected(VerificationFailure::InvalidSignature));
}

#[tokio::test]
async fn basic_auth_webhook_is_accepted_with_matching_credentials() {
    let harness = harness();
    let mut integration = Integration::new(TenantId::new(), resource(catalog::HELPDESK_TICKET));
    integration.set_credential(CREDENTIAL_WEBHOOK_USERNAME, "vendor");
    integration.set_credential(CREDENTIAL_WEBHOOK_PASSWORD, "hunter2");
    harness.integrations.insert(integration.clone()).await;

    let body = json!({"ticket": {
        "id": 55,
        "updated_at": "2024-02-01T08:00:00Z",
        "subject": "Printer on fire",
        "tags": ["urgent", "hardware", "urgent"]
    }});
    let authorization = format!("Basic {}", STANDARD.encode("vendor:hunter2"));
    let ack = harness
        .service
        .handle(
            integration.opaque_id(),
            request(&[("authorization", authorization)], &body),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);

    let tags = harness
        .records
        .list_enrichments(integration.tenant_id(), integration.id(), "55")
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(tags.len(), 2);

    let wrong = format!("Basic {}", STANDARD.encode("vendor:wrong"));
    let rejected = harness
        .service
        .handle(
            integration.opaque_id(),
            request(&[("authorization", wrong)], &body),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(rejected.status_code(), 401);
}

#[tokio::test]
async fn malformed_payloads_are_acknowledged_and_skipped() {
    let harness = harness();
    let integration = configured(&harness, catalog::STOREFRONT_ORDER).await;

    let no_primary_key = json!({"updated_at": "2024-03-01T10:00:00Z"});
    let ack = harness
        .service
        .handle(integration.opaque_id(), storefront_request(&no_primary_key))
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);

    let raw = b"not json".to_vec();
    let signature = STANDARD.encode(hmac(&[raw.as_slice()]));
    let mut headers = HeaderMap::new();
    headers.insert(
        "x-storefront-hmac-sha256",
        HeaderValue::from_str(&signature).unwrap_or_else(|_| unreachable!()),
    );
    let ack = harness
        .service
        .handle(integration.opaque_id(), InboundWebhook { headers, body: raw })
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);

    assert_eq!(harness.records.count().await, 0);
}

#[tokio::test]
async fn operation_codes_dispatch_to_backfill_or_removal() {
    let harness = harness();
    let transactions = bank_pair(&harness).await;

    let ack = harness
        .service
        .handle(
            transactions.opaque_id(),
            request(&[], &json!({"webhook_code": "SYNC_UPDATES_AVAILABLE"})),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Accepted);
    assert_eq!(ack.status_code(), 202);

    let ack = harness
        .service
        .handle(
            transactions.opaque_id(),
            request(&[], &json!({"webhook_code": "HISTORICAL_UPDATE"})),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Accepted);

    let modes: Vec<BackfillMode> = harness
        .jobs
        .enqueued
        .lock()
        .await
        .iter()
        .map(|job| job.mode)
        .collect();
    assert_eq!(modes, vec![BackfillMode::Incremental, BackfillMode::Full]);

    let descriptor = catalog::bank_transaction().unwrap_or_else(|_| unreachable!());
    for id in ["t1", "t2"] {
        harness
            .records
            .apply_candidate(
                transactions.tenant_id(),
                transactions.id(),
                &descriptor,
                json!({"transaction_id": id, "authorized_date": "2024-01-01"}),
                Utc::now(),
            )
            .await
            .unwrap_or_else(|_| unreachable!());
    }

    let ack = harness
        .service
        .handle(
            transactions.opaque_id(),
            request(
                &[],
                &json!({"webhook_code": "TRANSACTIONS_REMOVED", "removed_transactions": ["t1", "t9"]}),
            ),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);

    let removed = harness
        .records
        .find_record(transactions.tenant_id(), transactions.id(), "t1")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert!(removed.removed_at.is_some());
    let kept = harness
        .records
        .find_record(transactions.tenant_id(), transactions.id(), "t2")
        .await
        .unwrap_or_else(|_| unreachable!())
        .unwrap_or_else(|| unreachable!());
    assert!(kept.removed_at.is_none());

    let changes = harness.publisher.received(1).await;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].kind, RecordChangeKind::Removed);
    assert_eq!(changes[0].external_id, "t1");
}

#[tokio::test]
async fn unknown_operation_code_is_ignored() {
    let harness = harness();
    let transactions = bank_pair(&harness).await;

    let ack = harness
        .service
        .handle(
            transactions.opaque_id(),
            request(&[], &json!({"webhook_code": "WEBHOOK_UPDATE_ACKNOWLEDGED"})),
        )
        .await
        .unwrap_or_else(|_| unreachable!());
    assert_eq!(ack, WebhookAck::Ok);
    assert!(harness.jobs.enqueued.lock().await.is_empty());
}

#[tokio::test]
async fn webhook_for_unlinked_dependent_is_dependency_missing() {
    let harness = harness();
    let transactions = Integration::new(TenantId::new(), resource(catalog::BANK_TRANSACTION));
    harness.integrations.insert(transactions.clone()).await;

    let result = harness
        .service
        .handle(
            transactions.opaque_id(),
            request(&[], &json!({"webhook_code": "DEFAULT_UPDATE"})),
        )
        .await;
    assert!(matches!(result, Err(AppError::DependencyMissing(_))));
    assert!(harness.jobs.enqueued.lock().await.is_empty());
}

#[tokio::test]
async fn unknown_opaque_id_is_not_found() {
    let harness = harness();
    let result = harness
        .service
        .handle(&OpaqueId::generate(), request(&[], &json!({})))
        .await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
