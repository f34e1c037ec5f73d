mod change_publisher;
mod integration_repository;
mod job_queue;
mod record_repository;
mod vendor_client;

pub use change_publisher::{RecordChange, RecordChangeKind, RecordChangePublisher};
pub use integration_repository::IntegrationRepository;
pub use job_queue::{ClaimedSyncJob, SyncJobQueue, SyncJobRequest};
pub use record_repository::{RecordRepository, UpsertResult};
pub use vendor_client::{VendorClient, VendorMethod, VendorRequest};
