//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_credential_cipher;
mod in_memory_integration_repository;
mod in_memory_record_repository;
mod in_memory_sync_job_queue;
mod postgres_integration_repository;
mod postgres_record_repository;
mod postgres_sync_job_queue;
mod redis_record_change_publisher;
mod reqwest_vendor_client;
mod tracing_record_change_publisher;

pub use aes_credential_cipher::AesCredentialCipher;
pub use in_memory_integration_repository::InMemoryIntegrationRepository;
pub use in_memory_record_repository::InMemoryRecordRepository;
pub use in_memory_sync_job_queue::InMemorySyncJobQueue;
pub use postgres_integration_repository::PostgresIntegrationRepository;
pub use postgres_record_repository::PostgresRecordRepository;
pub use postgres_sync_job_queue::PostgresSyncJobQueue;
pub use redis_record_change_publisher::RedisRecordChangePublisher;
pub use reqwest_vendor_client::ReqwestVendorClient;
pub use tracing_record_change_publisher::{
    InMemoryRecordChangePublisher, TracingRecordChangePublisher,
};
