//! Integration entity and its identifiers.

use std::collections::BTreeMap;
use std::fmt::{Debug, Display, Formatter};

use chrono::{DateTime, Utc};
use mirrorline_core::{AppError, AppResult, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::RecencyValue;

/// Credential key holding the webhook signing secret.
pub const CREDENTIAL_WEBHOOK_SECRET: &str = "webhook_secret";
/// Credential key holding the backfill API key or username.
pub const CREDENTIAL_BACKFILL_KEY: &str = "backfill_key";
/// Credential key holding the backfill API secret or password.
pub const CREDENTIAL_BACKFILL_SECRET: &str = "backfill_secret";
/// Credential key holding the vendor API base URL.
pub const CREDENTIAL_BASE_URL: &str = "base_url";
/// Credential key holding a vendor session artifact obtained by login.
pub const CREDENTIAL_SESSION_TOKEN: &str = "session_token";
/// Credential key holding the expected webhook Basic-Auth username.
pub const CREDENTIAL_WEBHOOK_USERNAME: &str = "webhook_username";
/// Credential key holding the expected webhook Basic-Auth password.
pub const CREDENTIAL_WEBHOOK_PASSWORD: &str = "webhook_password";

/// Unique identifier for an integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IntegrationId(Uuid);

impl IntegrationId {
    /// Creates a new random integration identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an integration identifier from an existing UUID value.
    #[must_use]
    pub fn from_uuid(value: Uuid) -> Self {
        Self(value)
    }

    /// Returns the underlying UUID value.
    #[must_use]
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for IntegrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for IntegrationId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Stable public identifier used in webhook and setup URLs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpaqueId(String);

impl OpaqueId {
    /// Generates a fresh random opaque identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validates an opaque identifier received from a URL or storage.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let valid_length = (8..=64).contains(&value.len());
        let valid_chars = value
            .chars()
            .all(|character| character.is_ascii_alphanumeric() || matches!(character, '-' | '_'));

        if !valid_length || !valid_chars {
            return Err(AppError::Validation(format!(
                "opaque id '{value}' must be 8-64 url-safe characters"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for OpaqueId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Versioned resource type name selecting a descriptor, e.g. `billing_subscription_v1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType(String);

impl ResourceType {
    /// Creates a validated resource type name.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let valid = !value.is_empty()
            && value.chars().all(|character| {
                character.is_ascii_lowercase() || character.is_ascii_digit() || character == '_'
            });

        if !valid {
            return Err(AppError::Validation(format!(
                "resource type '{value}' must contain only lowercase letters, digits and '_'"
            )));
        }

        Ok(Self(value))
    }

    /// Returns the resource type text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for ResourceType {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.0.as_str())
    }
}

/// Opaque key/value credential bag. Values are never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    /// Creates an empty credential set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a non-blank credential value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Returns whether a non-blank value is present for the key.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Stores a credential value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Returns the keys that are missing from the given list.
    #[must_use]
    pub fn missing<'a>(&self, keys: &'a [String]) -> Vec<&'a str> {
        keys.iter()
            .map(String::as_str)
            .filter(|key| !self.contains(key))
            .collect()
    }

    /// Returns the stored keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns whether the set holds no credentials.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for CredentialSet {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_map()
            .entries(self.0.keys().map(|key| (key, "<redacted>")))
            .finish()
    }
}

/// Stored fields used to rebuild an integration from persistence.
#[derive(Debug, Clone)]
pub struct IntegrationParts {
    /// Integration identifier.
    pub id: IntegrationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Descriptor selector.
    pub resource_type: ResourceType,
    /// Public URL identifier.
    pub opaque_id: OpaqueId,
    /// Stored credentials.
    pub credentials: CredentialSet,
    /// Parent integration, when linked.
    pub depends_on: Option<IntegrationId>,
    /// Recency low-water-mark of the last fully successful backfill.
    pub last_backfilled_cursor: Option<RecencyValue>,
    /// Completion time of the last fully successful backfill.
    pub last_backfilled_at: Option<DateTime<Utc>>,
}

/// One configured connection to one vendor resource type for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Integration {
    id: IntegrationId,
    tenant_id: TenantId,
    resource_type: ResourceType,
    opaque_id: OpaqueId,
    credentials: CredentialSet,
    depends_on: Option<IntegrationId>,
    last_backfilled_cursor: Option<RecencyValue>,
    last_backfilled_at: Option<DateTime<Utc>>,
}

impl Integration {
    /// Creates a new unconfigured integration with a fresh opaque id.
    #[must_use]
    pub fn new(tenant_id: TenantId, resource_type: ResourceType) -> Self {
        Self {
            id: IntegrationId::new(),
            tenant_id,
            resource_type,
            opaque_id: OpaqueId::generate(),
            credentials: CredentialSet::new(),
            depends_on: None,
            last_backfilled_cursor: None,
            last_backfilled_at: None,
        }
    }

    /// Rebuilds an integration from stored fields.
    #[must_use]
    pub fn from_parts(parts: IntegrationParts) -> Self {
        Self {
            id: parts.id,
            tenant_id: parts.tenant_id,
            resource_type: parts.resource_type,
            opaque_id: parts.opaque_id,
            credentials: parts.credentials,
            depends_on: parts.depends_on,
            last_backfilled_cursor: parts.last_backfilled_cursor,
            last_backfilled_at: parts.last_backfilled_at,
        }
    }

    /// Returns the integration identifier.
    #[must_use]
    pub fn id(&self) -> IntegrationId {
        self.id
    }

    /// Returns the owning tenant.
    #[must_use]
    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the public opaque id.
    #[must_use]
    pub fn opaque_id(&self) -> &OpaqueId {
        &self.opaque_id
    }

    /// Returns the stored credentials.
    #[must_use]
    pub fn credentials(&self) -> &CredentialSet {
        &self.credentials
    }

    /// Returns the parent integration id, when linked.
    #[must_use]
    pub fn depends_on(&self) -> Option<IntegrationId> {
        self.depends_on
    }

    /// Returns the stored backfill low-water-mark.
    #[must_use]
    pub fn last_backfilled_cursor(&self) -> Option<RecencyValue> {
        self.last_backfilled_cursor
    }

    /// Returns when the last fully successful backfill finished.
    #[must_use]
    pub fn last_backfilled_at(&self) -> Option<DateTime<Utc>> {
        self.last_backfilled_at
    }

    /// Stores one credential value.
    pub fn set_credential(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.credentials.insert(key, value);
    }

    /// Clears every credential and the backfill watermark, returning the
    /// integration to its unconfigured state.
    pub fn reset_credentials(&mut self) {
        self.credentials = CredentialSet::new();
        self.last_backfilled_cursor = None;
        self.last_backfilled_at = None;
    }

    /// Links or unlinks the parent integration.
    pub fn set_dependency(&mut self, parent: Option<IntegrationId>) -> AppResult<()> {
        if parent == Some(self.id) {
            return Err(AppError::Validation(format!(
                "integration '{}' cannot depend on itself",
                self.id
            )));
        }

        self.depends_on = parent;
        Ok(())
    }

    /// Records a fully successful backfill run.
    pub fn record_backfill_success(
        &mut self,
        watermark: Option<RecencyValue>,
        finished_at: DateTime<Utc>,
    ) {
        if watermark.is_some() {
            self.last_backfilled_cursor = watermark.max(self.last_backfilled_cursor);
        }
        self.last_backfilled_at = Some(finished_at);
    }
}
