//! Setup state machine.
//!
//! [`step`] is a pure function of an integration's stored configuration. It
//! reports the next field an operator must supply on one of two tracks, or
//! that the track is complete. Collaborators that act on a transition, such
//! as vendor registration, live outside this module.

use serde::{Deserialize, Serialize};

use crate::{FieldPath, Integration, ResourceDescriptor, ResourceType};

/// Independent setup sequences of one integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupTrack {
    /// Webhook configuration.
    Create,
    /// Backfill configuration.
    Backfill,
}

impl SetupTrack {
    /// Returns the URL segment for the track.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Backfill => "backfill",
        }
    }
}

/// Credential derived from an operator-supplied value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedCredential {
    /// Credential key to store.
    pub key: String,
    /// Template where `{value}` is replaced by the supplied value.
    pub template: String,
}

impl DerivedCredential {
    /// Renders the derived credential for a supplied value.
    #[must_use]
    pub fn render(&self, value: &str) -> String {
        self.template.replace("{value}", value.trim())
    }
}

/// One operator-supplied configuration field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupField {
    /// Credential key written by the transition.
    pub key: String,
    /// Prompt shown to the operator. `{webhook_url}` is substituted.
    pub prompt: String,
    /// Whether input should be masked.
    pub secret: bool,
    /// Optional credential derived from the supplied value.
    pub derives: Option<DerivedCredential>,
}

impl SetupField {
    /// Creates a plain field.
    #[must_use]
    pub fn new(key: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
            secret: false,
            derives: None,
        }
    }

    /// Marks the field as secret.
    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Derives another credential from this field's value.
    #[must_use]
    pub fn derives(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.derives = Some(DerivedCredential {
            key: key.into(),
            template: template.into(),
        });
        self
    }
}

/// Vendor-side registration run after the final field of a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationSpec {
    /// Ensure webhook subscriptions exist for every topic.
    WebhookSubscriptions {
        /// Path listing existing subscriptions.
        list_path: String,
        /// Path creating one subscription.
        create_path: String,
        /// Topics that must be subscribed.
        topics: Vec<String>,
        /// Field naming the topic in list items and create bodies.
        topic_field: String,
        /// Field naming the delivery address in list items and create bodies.
        address_field: String,
        /// Location of the subscription array in the list response.
        items_path: Option<FieldPath>,
    },
    /// Log in and store the returned session artifact.
    SessionLogin {
        /// Base URL used when the integration stores none.
        default_base_url: Option<String>,
        /// Login path.
        login_path: String,
        /// Body field carrying the username.
        username_field: String,
        /// Body field carrying the password.
        password_field: String,
        /// Location of the session token in the login response.
        token_path: FieldPath,
        /// Credential key the token is stored under.
        store_as: String,
    },
}

/// Fields and side effects of one track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupTrackSpec {
    /// Ordered required fields.
    pub fields: Vec<SetupField>,
    /// Registration run when the final field is supplied.
    pub registration: Option<RegistrationSpec>,
}

impl SetupTrackSpec {
    /// Creates a track from ordered fields.
    #[must_use]
    pub fn new(fields: Vec<SetupField>) -> Self {
        Self {
            fields,
            registration: None,
        }
    }

    /// Attaches a registration side effect.
    #[must_use]
    pub fn with_registration(mut self, registration: RegistrationSpec) -> Self {
        self.registration = Some(registration);
        self
    }

    /// Returns the field with the given key.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&SetupField> {
        self.fields.iter().find(|field| field.key == key)
    }

    /// Returns the first field without a stored value.
    #[must_use]
    pub fn next_missing(&self, integration: &Integration) -> Option<&SetupField> {
        self.fields
            .iter()
            .find(|field| !integration.credentials().contains(field.key.as_str()))
    }
}

/// Setup tracks declared by a descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupSpec {
    /// Webhook track. `None` for vendors without webhook support.
    pub create: Option<SetupTrackSpec>,
    /// Backfill track.
    pub backfill: SetupTrackSpec,
}

impl SetupSpec {
    /// Returns the field sequence for a track.
    #[must_use]
    pub fn track(&self, track: SetupTrack) -> Option<&SetupTrackSpec> {
        match track {
            SetupTrack::Create => self.create.as_ref(),
            SetupTrack::Backfill => Some(&self.backfill),
        }
    }
}

/// State of the required ancestor, resolved by the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AncestorStatus {
    /// The descriptor declares no dependency.
    NotRequired,
    /// No integration of the required type is linked.
    Missing(ResourceType),
    /// The linked ancestor exists but is not configured.
    Unconfigured(ResourceType),
    /// The ancestor is linked and configured.
    Ready,
}

/// Computed setup step returned to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetupStep {
    /// Whether the operator must supply a value.
    pub needs_input: bool,
    /// Prompt for the value, present when input is needed.
    pub prompt: Option<String>,
    /// Whether the prompt asks for a secret.
    pub prompt_is_secret: bool,
    /// Transition URL, present exactly when input is needed.
    pub post_to_url: Option<String>,
    /// Whether the track needs nothing further.
    pub complete: bool,
    /// Operator-facing message.
    pub output: Option<String>,
}

impl SetupStep {
    fn input(prompt: String, secret: bool, post_to_url: String) -> Self {
        Self {
            needs_input: true,
            prompt: Some(prompt),
            prompt_is_secret: secret,
            post_to_url: Some(post_to_url),
            complete: false,
            output: None,
        }
    }

    fn terminal(output: String) -> Self {
        Self {
            needs_input: false,
            prompt: None,
            prompt_is_secret: false,
            post_to_url: None,
            complete: true,
            output: Some(output),
        }
    }
}

/// Returns the public webhook URL of an integration.
#[must_use]
pub fn webhook_url(public_base_url: &str, integration: &Integration) -> String {
    format!(
        "{}/webhooks/{}",
        public_base_url.trim_end_matches('/'),
        integration.opaque_id()
    )
}

/// Returns the transition URL for one field.
#[must_use]
pub fn transition_url(public_base_url: &str, integration: &Integration, field: &str) -> String {
    format!(
        "{}/api/setup/{}/transition/{field}",
        public_base_url.trim_end_matches('/'),
        integration.opaque_id()
    )
}

/// Computes the current step of one setup track.
///
/// A blocked dependency yields a single terminal step naming what must be
/// configured first.
#[must_use]
pub fn step(
    track: SetupTrack,
    integration: &Integration,
    descriptor: &ResourceDescriptor,
    ancestor: &AncestorStatus,
    public_base_url: &str,
) -> SetupStep {
    match ancestor {
        AncestorStatus::Missing(required) => {
            return SetupStep::terminal(format!(
                "Link a {required} integration before configuring {}.",
                descriptor.display_name()
            ));
        }
        AncestorStatus::Unconfigured(required) => {
            return SetupStep::terminal(format!(
                "Finish setting up the linked {required} integration before configuring {}.",
                descriptor.display_name()
            ));
        }
        AncestorStatus::NotRequired | AncestorStatus::Ready => {}
    }

    let Some(spec) = descriptor.setup().track(track) else {
        return SetupStep::terminal(format!(
            "{} does not send webhooks. Use the backfill setup instead.",
            descriptor.display_name()
        ));
    };

    if let Some(field) = spec.next_missing(integration) {
        let prompt = field
            .prompt
            .replace("{webhook_url}", &webhook_url(public_base_url, integration));
        return SetupStep::input(
            prompt,
            field.secret,
            transition_url(public_base_url, integration, field.key.as_str()),
        );
    }

    let output = match track {
        SetupTrack::Create => format!(
            "Webhooks for {} are delivered to {}.",
            descriptor.display_name(),
            webhook_url(public_base_url, integration)
        ),
        SetupTrack::Backfill => format!("{} is ready to backfill.", descriptor.display_name()),
    };

    SetupStep::terminal(output)
}
