//! Domain entities and invariants for vendor record synchronization.

#![forbid(unsafe_code)]

pub mod catalog;
mod conflict;
mod descriptor;
mod field_path;
mod integration;
mod pagination;
mod recency;
mod record;
mod setup;
mod transform;
mod verification;

pub use conflict::{Resolution, WritePlan, plan_write, resolve};
pub use descriptor::{
    BackfillMode, BackfillSpec, CredentialPlacement, DependencySpec, DependencyWalk,
    EnrichmentSpec, HistoryHorizon, ListMethod, OperationTable, OutboundAuth, Projection,
    RemovalMarker, ResourceDescriptor, ResourceDescriptorBuilder, WebhookMode, WebhookOperation,
    WebhookSpec,
};
pub use field_path::{FieldPath, scalar_key};
pub use integration::{
    CREDENTIAL_BACKFILL_KEY, CREDENTIAL_BACKFILL_SECRET, CREDENTIAL_BASE_URL,
    CREDENTIAL_SESSION_TOKEN, CREDENTIAL_WEBHOOK_PASSWORD, CREDENTIAL_WEBHOOK_SECRET,
    CREDENTIAL_WEBHOOK_USERNAME, CredentialSet, Integration, IntegrationId, IntegrationParts,
    OpaqueId, ResourceType,
};
pub use pagination::{
    IdCursorParams, LinkHeaderParams, OffsetLimitParams, OffsetNumbering, OpaqueTokenParams,
    PageNext, PageRequest, PageResult, PaginationCursor, PaginationStrategy, Paginator,
    VendorPage, next_link, paginator_for,
};
pub use recency::{RecencyOrdering, RecencyRule, RecencyValue};
pub use record::{EnrichmentDraft, EnrichmentRecord, RecordDraft, SyncedRecord, UpsertOutcome};
pub use setup::{
    AncestorStatus, DerivedCredential, RegistrationSpec, SetupField, SetupSpec, SetupStep,
    SetupTrack, SetupTrackSpec, step, transition_url, webhook_url,
};
pub use transform::{PayloadTransform, StatusTransitionTimestamp};
pub use verification::{
    DEFAULT_SIGNATURE_TOLERANCE_SECONDS, SignatureEncoding, VerificationFailure,
    VerificationScheme,
};
