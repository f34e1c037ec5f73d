//! Resource descriptors.
//!
//! A descriptor is immutable, versioned metadata describing one vendor
//! resource: how to identify and order its records, how to crawl it, how to
//! authenticate inbound webhooks and outbound calls, what it depends on, and
//! which setup fields it needs. Every engine component reads descriptors and
//! none mutate them.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use mirrorline_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    CredentialSet, EnrichmentDraft, FieldPath, PaginationStrategy, PayloadTransform, RecencyRule,
    ResourceType, SetupSpec, VerificationScheme,
};

/// Scalar column projected from a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    /// Column name.
    pub column: String,
    /// Source path.
    pub path: FieldPath,
}

/// One-to-many child rows materialized from a nested array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentSpec {
    /// Enrichment name.
    pub name: String,
    /// Location of the array in the payload.
    pub array_path: FieldPath,
    /// Natural key within each element. Scalar elements are their own key.
    pub child_key_path: Option<FieldPath>,
}

impl EnrichmentSpec {
    /// Extracts the full child set from a parent payload.
    ///
    /// Duplicate child keys keep the first element.
    pub fn extract(&self, parent: &Value) -> AppResult<Vec<EnrichmentDraft>> {
        let Some(located) = self.array_path.resolve(parent) else {
            return Ok(Vec::new());
        };
        let Value::Array(elements) = located else {
            return Err(AppError::MalformedPayload(format!(
                "enrichment '{}' at '{}' is not an array",
                self.name, self.array_path
            )));
        };

        let mut seen = BTreeSet::new();
        let mut drafts = Vec::with_capacity(elements.len());
        for element in elements {
            let child_key = match &self.child_key_path {
                Some(path) => path.resolve_key(element),
                None => crate::field_path::scalar_key(element),
            }
            .ok_or_else(|| {
                AppError::MalformedPayload(format!(
                    "enrichment '{}' element has no child key",
                    self.name
                ))
            })?;

            if seen.insert(child_key.clone()) {
                drafts.push(EnrichmentDraft {
                    enrichment: self.name.clone(),
                    child_key,
                    payload: element.clone(),
                });
            }
        }

        Ok(drafts)
    }
}

/// Payload marker meaning the vendor removed the record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalMarker {
    /// Marker location.
    pub path: FieldPath,
    /// Value signalling removal.
    pub equals: Value,
}

/// How a dependency is located from the integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyWalk {
    /// The linked parent must be of the required type.
    DirectParent,
    /// Walk the parent chain to the nearest integration of the required type.
    NearestOfType,
}

/// Required ancestor of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencySpec {
    /// Required ancestor type.
    pub resource_type: ResourceType,
    /// Lookup walk.
    pub walk: DependencyWalk,
}

/// Where an outbound credential is placed on the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialPlacement {
    /// Header value with an optional prefix such as `Bearer `.
    Header {
        /// Header name.
        name: String,
        /// Prefix prepended to the credential.
        prefix: String,
    },
    /// Cookie value.
    Cookie {
        /// Cookie name.
        name: String,
    },
}

impl CredentialPlacement {
    fn render(&self, value: &str) -> (String, String) {
        match self {
            Self::Header { name, prefix } => (name.clone(), format!("{prefix}{value}")),
            Self::Cookie { name } => (
                http::header::COOKIE.as_str().to_owned(),
                format!("{name}={value}"),
            ),
        }
    }
}

/// Outbound vendor authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAuth {
    /// No authentication.
    None,
    /// HTTP Basic with two credential keys.
    Basic {
        /// Username credential key.
        username_key: String,
        /// Password credential key.
        password_key: String,
    },
    /// One of the integration's own credentials.
    Credential {
        /// Credential key.
        credential_key: String,
        /// Request placement.
        placement: CredentialPlacement,
    },
    /// A credential borrowed from the resolved dependency, such as a session.
    Delegated {
        /// Credential key on the ancestor.
        credential_key: String,
        /// Request placement.
        placement: CredentialPlacement,
    },
}

impl OutboundAuth {
    /// Returns whether the auth reads from the dependency.
    #[must_use]
    pub fn is_delegated(&self) -> bool {
        matches!(self, Self::Delegated { .. })
    }

    /// Builds the authentication headers for a request.
    pub fn headers(
        &self,
        own: &CredentialSet,
        delegated: Option<&CredentialSet>,
    ) -> AppResult<Vec<(String, String)>> {
        match self {
            Self::None => Ok(Vec::new()),
            Self::Basic {
                username_key,
                password_key,
            } => {
                let username = required(own, username_key)?;
                let password = required(own, password_key)?;
                let encoded = STANDARD.encode(format!("{username}:{password}"));
                Ok(vec![(
                    http::header::AUTHORIZATION.as_str().to_owned(),
                    format!("Basic {encoded}"),
                )])
            }
            Self::Credential {
                credential_key,
                placement,
            } => Ok(vec![placement.render(required(own, credential_key)?)]),
            Self::Delegated {
                credential_key,
                placement,
            } => {
                let ancestor = delegated.ok_or_else(|| {
                    AppError::DependencyMissing(format!(
                        "credential '{credential_key}' must come from a linked integration"
                    ))
                })?;
                let value = ancestor.get(credential_key).ok_or_else(|| {
                    AppError::DependencyMissing(format!(
                        "linked integration has no '{credential_key}' credential"
                    ))
                })?;
                Ok(vec![placement.render(value)])
            }
        }
    }
}

fn required<'a>(credentials: &'a CredentialSet, key: &str) -> AppResult<&'a str> {
    credentials
        .get(key)
        .ok_or_else(|| AppError::CredentialsMissing(format!("credential '{key}' is not set")))
}

/// HTTP method used by a list endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMethod {
    /// Parameters in the query string.
    Get,
    /// Parameters in a JSON body. Safe to repeat.
    PostJson,
}

/// Fixed historical bound sent on full runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryHorizon {
    /// Query parameter carrying the bound.
    pub param: String,
    /// Days of history to request.
    pub days: i64,
    /// `chrono` format string for the bound.
    pub format: String,
}

/// Backfill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillMode {
    /// Crawl the whole history window.
    Full,
    /// Stop at the stored low-water-mark.
    Incremental,
}

impl BackfillMode {
    /// Returns the stored name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }

    /// Parses a stored mode name.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            _ => Err(AppError::Validation(format!(
                "unknown backfill mode '{value}'"
            ))),
        }
    }
}

/// List endpoint crawled by the backfill engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSpec {
    /// Path appended to the base URL.
    pub list_path: String,
    /// Request method.
    pub method: ListMethod,
    /// Location of the item array; the body itself when `None`.
    pub items_path: Option<FieldPath>,
    /// Pagination strategy.
    pub pagination: PaginationStrategy,
    /// Extra parameters sent with every page.
    pub static_query: Vec<(String, String)>,
    /// Base URL used when the integration stores none.
    pub default_base_url: Option<String>,
    /// Whether the vendor lists newest first, enabling incremental runs.
    pub descending_recency: bool,
    /// Fixed historical bound for full runs.
    pub full_horizon: Option<HistoryHorizon>,
}

/// Webhook operation selected by a payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOperation {
    /// Upsert the (unwrapped) payload.
    Upsert,
    /// Acknowledge and enqueue a backfill of this integration.
    Backfill(BackfillMode),
    /// Soft-delete the listed external ids.
    RemoveRecords {
        /// Location of the id array.
        ids_path: FieldPath,
    },
    /// Acknowledge without work.
    Ignore,
}

/// Operation dispatch table keyed by a payload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationTable {
    /// Location of the operation code.
    pub type_path: FieldPath,
    /// Code to operation entries.
    pub entries: Vec<(String, WebhookOperation)>,
    /// Operation for unknown or missing codes.
    pub default: WebhookOperation,
}

impl OperationTable {
    /// Selects the operation for a payload.
    #[must_use]
    pub fn select(&self, payload: &Value) -> &WebhookOperation {
        self.type_path
            .resolve(payload)
            .and_then(Value::as_str)
            .and_then(|code| {
                self.entries
                    .iter()
                    .find(|(entry_code, _)| entry_code == code)
                    .map(|(_, operation)| operation)
            })
            .unwrap_or(&self.default)
    }
}

/// What a verified webhook does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookMode {
    /// The webhook embeds the full resource.
    Upsert,
    /// The webhook only signals a change.
    Signal(BackfillMode),
    /// The webhook names an operation.
    Operations(OperationTable),
}

/// Webhook ingestion behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookSpec {
    /// Authenticity scheme.
    pub verification: VerificationScheme,
    /// Location of the resource inside the vendor's event wrapper.
    pub envelope_path: Option<FieldPath>,
    /// Dispatch mode.
    pub mode: WebhookMode,
}

impl WebhookSpec {
    /// Extracts the resource from the vendor envelope.
    pub fn unwrap_envelope<'a>(&self, event: &'a Value) -> AppResult<&'a Value> {
        match &self.envelope_path {
            None => Ok(event),
            Some(path) => path.resolve(event).ok_or_else(|| {
                AppError::MalformedPayload(format!("webhook envelope has no '{path}'"))
            }),
        }
    }
}

/// Immutable metadata for one vendor resource type.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    resource_type: ResourceType,
    display_name: String,
    primary_key: FieldPath,
    recency: RecencyRule,
    projections: Vec<Projection>,
    enrichments: Vec<EnrichmentSpec>,
    removal_marker: Option<RemovalMarker>,
    transform: Option<Arc<dyn PayloadTransform>>,
    dependency: Option<DependencySpec>,
    required_credentials: Vec<String>,
    outbound_auth: OutboundAuth,
    backfill: Option<BackfillSpec>,
    webhook: Option<WebhookSpec>,
    setup: SetupSpec,
}

impl ResourceDescriptor {
    /// Starts building a descriptor.
    #[must_use]
    pub fn builder(
        resource_type: ResourceType,
        display_name: impl Into<String>,
        primary_key: FieldPath,
    ) -> ResourceDescriptorBuilder {
        ResourceDescriptorBuilder {
            descriptor: Self {
                resource_type,
                display_name: display_name.into(),
                primary_key,
                recency: RecencyRule::AlwaysReplace,
                projections: Vec::new(),
                enrichments: Vec::new(),
                removal_marker: None,
                transform: None,
                dependency: None,
                required_credentials: Vec::new(),
                outbound_auth: OutboundAuth::None,
                backfill: None,
                webhook: None,
                setup: SetupSpec::default(),
            },
        }
    }

    /// Returns the resource type.
    #[must_use]
    pub fn resource_type(&self) -> &ResourceType {
        &self.resource_type
    }

    /// Returns the operator-facing name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.display_name.as_str()
    }

    /// Returns the primary key path.
    #[must_use]
    pub fn primary_key(&self) -> &FieldPath {
        &self.primary_key
    }

    /// Returns the recency rule.
    #[must_use]
    pub fn recency(&self) -> &RecencyRule {
        &self.recency
    }

    /// Returns the enrichment extractors.
    #[must_use]
    pub fn enrichments(&self) -> &[EnrichmentSpec] {
        &self.enrichments
    }

    /// Returns the payload transform.
    #[must_use]
    pub fn transform(&self) -> Option<&dyn PayloadTransform> {
        self.transform.as_deref()
    }

    /// Returns the declared dependency.
    #[must_use]
    pub fn dependency(&self) -> Option<&DependencySpec> {
        self.dependency.as_ref()
    }

    /// Returns credentials that must be present before the integration is usable.
    #[must_use]
    pub fn required_credentials(&self) -> &[String] {
        &self.required_credentials
    }

    /// Returns outbound authentication.
    #[must_use]
    pub fn outbound_auth(&self) -> &OutboundAuth {
        &self.outbound_auth
    }

    /// Returns the backfill endpoint when the vendor can be crawled.
    #[must_use]
    pub fn backfill(&self) -> Option<&BackfillSpec> {
        self.backfill.as_ref()
    }

    /// Returns webhook behavior when the vendor sends webhooks.
    #[must_use]
    pub fn webhook(&self) -> Option<&WebhookSpec> {
        self.webhook.as_ref()
    }

    /// Returns the setup tracks.
    #[must_use]
    pub fn setup(&self) -> &SetupSpec {
        &self.setup
    }

    /// Returns whether an integration's credentials satisfy this descriptor.
    #[must_use]
    pub fn is_configured(&self, credentials: &CredentialSet) -> bool {
        credentials.missing(&self.required_credentials).is_empty()
    }

    /// Extracts the external id of a payload.
    pub fn external_id(&self, payload: &Value) -> AppResult<String> {
        self.primary_key.resolve_key(payload).ok_or_else(|| {
            AppError::MalformedPayload(format!(
                "{} payload has no primary key at '{}'",
                self.resource_type, self.primary_key
            ))
        })
    }

    /// Projects descriptor columns from a payload. Missing values are `null`.
    #[must_use]
    pub fn projections(&self, payload: &Value) -> Map<String, Value> {
        self.projections
            .iter()
            .map(|projection| {
                (
                    projection.column.clone(),
                    projection
                        .path
                        .resolve(payload)
                        .cloned()
                        .unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Returns whether the payload carries the removal marker.
    #[must_use]
    pub fn is_removed(&self, payload: &Value) -> bool {
        self.removal_marker
            .as_ref()
            .is_some_and(|marker| marker.path.resolve(payload) == Some(&marker.equals))
    }
}

/// Builder validating descriptor combinations.
#[derive(Debug)]
pub struct ResourceDescriptorBuilder {
    descriptor: ResourceDescriptor,
}

impl ResourceDescriptorBuilder {
    /// Sets the recency rule.
    #[must_use]
    pub fn recency(mut self, recency: RecencyRule) -> Self {
        self.descriptor.recency = recency;
        self
    }

    /// Adds a projected column.
    #[must_use]
    pub fn projection(mut self, column: impl Into<String>, path: FieldPath) -> Self {
        self.descriptor.projections.push(Projection {
            column: column.into(),
            path,
        });
        self
    }

    /// Adds an enrichment extractor.
    #[must_use]
    pub fn enrichment(mut self, enrichment: EnrichmentSpec) -> Self {
        self.descriptor.enrichments.push(enrichment);
        self
    }

    /// Sets the removal marker.
    #[must_use]
    pub fn removal_marker(mut self, path: FieldPath, equals: Value) -> Self {
        self.descriptor.removal_marker = Some(RemovalMarker { path, equals });
        self
    }

    /// Sets the payload transform.
    #[must_use]
    pub fn transform(mut self, transform: Arc<dyn PayloadTransform>) -> Self {
        self.descriptor.transform = Some(transform);
        self
    }

    /// Declares the required ancestor.
    #[must_use]
    pub fn depends_on(mut self, resource_type: ResourceType, walk: DependencyWalk) -> Self {
        self.descriptor.dependency = Some(DependencySpec {
            resource_type,
            walk,
        });
        self
    }

    /// Sets the credentials required before use.
    #[must_use]
    pub fn required_credentials(mut self, keys: &[&str]) -> Self {
        self.descriptor.required_credentials = keys.iter().map(|key| (*key).to_owned()).collect();
        self
    }

    /// Sets outbound authentication.
    #[must_use]
    pub fn outbound_auth(mut self, auth: OutboundAuth) -> Self {
        self.descriptor.outbound_auth = auth;
        self
    }

    /// Sets the backfill endpoint.
    #[must_use]
    pub fn backfill(mut self, backfill: BackfillSpec) -> Self {
        self.descriptor.backfill = Some(backfill);
        self
    }

    /// Sets webhook behavior.
    #[must_use]
    pub fn webhook(mut self, webhook: WebhookSpec) -> Self {
        self.descriptor.webhook = Some(webhook);
        self
    }

    /// Sets the setup tracks.
    #[must_use]
    pub fn setup(mut self, setup: SetupSpec) -> Self {
        self.descriptor.setup = setup;
        self
    }

    /// Validates and returns the descriptor.
    pub fn build(self) -> AppResult<ResourceDescriptor> {
        let descriptor = self.descriptor;
        let name = descriptor.resource_type.as_str();

        if let Some(backfill) = &descriptor.backfill {
            if backfill.descending_recency
                && matches!(descriptor.recency, RecencyRule::AlwaysReplace)
            {
                return Err(AppError::Validation(format!(
                    "descriptor '{name}' cannot allow incremental backfill without a recency field"
                )));
            }

            let page_size = match &backfill.pagination {
                PaginationStrategy::OffsetLimit(params) => Some(params.page_size),
                PaginationStrategy::IdCursor(params) => Some(params.page_size),
                PaginationStrategy::LinkHeader(params) => Some(params.page_size),
                PaginationStrategy::OpaqueToken(_) => None,
            };
            if page_size == Some(0) {
                return Err(AppError::Validation(format!(
                    "descriptor '{name}' must use a positive page size"
                )));
            }
        }

        if descriptor.outbound_auth.is_delegated() && descriptor.dependency.is_none() {
            return Err(AppError::Validation(format!(
                "descriptor '{name}' delegates authentication but declares no dependency"
            )));
        }

        if descriptor.webhook.is_some() != descriptor.setup.create.is_some() {
            return Err(AppError::Validation(format!(
                "descriptor '{name}' must declare a create setup track exactly when it accepts webhooks"
            )));
        }

        if descriptor
            .dependency
            .as_ref()
            .is_some_and(|dependency| dependency.resource_type == descriptor.resource_type)
        {
            return Err(AppError::Validation(format!(
                "descriptor '{name}' cannot depend on its own type"
            )));
        }

        Ok(descriptor)
    }
}
