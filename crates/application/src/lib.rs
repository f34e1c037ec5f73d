//! Application services and ports.

#![forbid(unsafe_code)]

mod backfill_service;
mod dependency_graph;
mod descriptor_registry;
mod integration_service;
mod setup_service;
mod sync_job_service;
mod sync_ports;
mod webhook_service;

#[cfg(test)]
mod test_support;

pub use backfill_service::{BackfillReport, BackfillService, RetryPolicy};
pub use dependency_graph::{DependencyGraph, MAX_ANCESTOR_DEPTH};
pub use descriptor_registry::DescriptorRegistry;
pub use integration_service::IntegrationService;
pub use setup_service::SetupService;
pub use sync_job_service::SyncJobService;
pub use sync_ports::{
    ClaimedSyncJob, IntegrationRepository, RecordChange, RecordChangeKind, RecordChangePublisher,
    RecordRepository, SyncJobQueue, SyncJobRequest, UpsertResult, VendorClient, VendorMethod,
    VendorRequest,
};
pub use webhook_service::{InboundWebhook, WebhookAck, WebhookService};
