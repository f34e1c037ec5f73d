//! Built-in reference descriptors.
//!
//! Each descriptor is a fixed, versioned description of one vendor resource.
//! Together they cover every pagination strategy, verification scheme and
//! dependency shape the engine supports.

use std::sync::Arc;

use mirrorline_core::AppResult;
use serde_json::json;

use crate::{
    BackfillMode, BackfillSpec, CREDENTIAL_BACKFILL_KEY, CREDENTIAL_BACKFILL_SECRET,
    CREDENTIAL_BASE_URL, CREDENTIAL_SESSION_TOKEN, CREDENTIAL_WEBHOOK_PASSWORD,
    CREDENTIAL_WEBHOOK_SECRET, CREDENTIAL_WEBHOOK_USERNAME, CredentialPlacement,
    DEFAULT_SIGNATURE_TOLERANCE_SECONDS, DependencyWalk, EnrichmentSpec, FieldPath,
    HistoryHorizon, IdCursorParams, LinkHeaderParams, ListMethod, OffsetLimitParams,
    OffsetNumbering, OpaqueTokenParams, OperationTable, OutboundAuth, PaginationStrategy,
    RecencyOrdering, RecencyRule, RegistrationSpec, ResourceDescriptor, ResourceType,
    SetupField, SetupSpec, SetupTrackSpec, SignatureEncoding, StatusTransitionTimestamp,
    VerificationScheme, WebhookMode, WebhookOperation, WebhookSpec,
};

/// Credential key holding a bank item access token.
pub const CREDENTIAL_ACCESS_TOKEN: &str = "access_token";

/// Storefront orders resource type.
pub const STOREFRONT_ORDER: &str = "storefront_order_v1";
/// Billing subscriptions resource type.
pub const BILLING_SUBSCRIPTION: &str = "billing_subscription_v1";
/// Bank item resource type.
pub const BANK_ITEM: &str = "bank_item_v1";
/// Bank transactions resource type.
pub const BANK_TRANSACTION: &str = "bank_transaction_v1";
/// Helpdesk tickets resource type.
pub const HELPDESK_TICKET: &str = "helpdesk_ticket_v1";
/// Casebook session resource type.
pub const CASEBOOK_AUTH: &str = "casebook_auth_v1";
/// Casebook clients resource type.
pub const CASEBOOK_CLIENT: &str = "casebook_client_v1";
/// Casebook cases resource type.
pub const CASEBOOK_CASE: &str = "casebook_case_v1";

const CASEBOOK_BASE_URL: &str = "https://app.casebook.example";

fn path(raw: &str) -> AppResult<FieldPath> {
    FieldPath::new(raw)
}

fn resource(raw: &str) -> AppResult<ResourceType> {
    ResourceType::new(raw)
}

fn header(name: &str, prefix: &str) -> CredentialPlacement {
    CredentialPlacement::Header {
        name: name.to_owned(),
        prefix: prefix.to_owned(),
    }
}

fn key_secret_auth() -> OutboundAuth {
    OutboundAuth::Basic {
        username_key: CREDENTIAL_BACKFILL_KEY.to_owned(),
        password_key: CREDENTIAL_BACKFILL_SECRET.to_owned(),
    }
}

/// Returns every reference descriptor.
pub fn reference_catalog() -> AppResult<Vec<ResourceDescriptor>> {
    Ok(vec![
        storefront_order()?,
        billing_subscription()?,
        bank_item()?,
        bank_transaction()?,
        helpdesk_ticket()?,
        casebook_auth()?,
        casebook_client()?,
        casebook_case()?,
    ])
}

/// Commerce orders: link-header pages, base64 body HMAC, line item children,
/// and explicit webhook registration.
pub fn storefront_order() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(STOREFRONT_ORDER)?, "Storefront orders", path("id")?)
        .recency(RecencyRule::field(
            "updated_at",
            RecencyOrdering::IsoTimestamp,
        )?)
        .projection("order_number", path("order_number")?)
        .projection("financial_status", path("financial_status")?)
        .projection("total_price", path("total_price")?)
        .enrichment(EnrichmentSpec {
            name: "line_items".to_owned(),
            array_path: path("line_items")?,
            child_key_path: Some(path("id")?),
        })
        .required_credentials(&[
            CREDENTIAL_BACKFILL_KEY,
            CREDENTIAL_BACKFILL_SECRET,
            CREDENTIAL_BASE_URL,
        ])
        .outbound_auth(key_secret_auth())
        .backfill(BackfillSpec {
            list_path: "/orders.json".to_owned(),
            method: ListMethod::Get,
            items_path: Some(path("orders")?),
            pagination: PaginationStrategy::LinkHeader(LinkHeaderParams {
                page_size_param: Some("limit".to_owned()),
                page_size: 250,
            }),
            static_query: vec![
                ("status".to_owned(), "any".to_owned()),
                ("order".to_owned(), "updated_at desc".to_owned()),
            ],
            default_base_url: None,
            descending_recency: true,
            full_horizon: Some(HistoryHorizon {
                param: "created_at_min".to_owned(),
                days: 730,
                format: "%Y-%m-%dT%H:%M:%SZ".to_owned(),
            }),
        })
        .webhook(WebhookSpec {
            verification: VerificationScheme::BodyHmac {
                header: "x-storefront-hmac-sha256".to_owned(),
                encoding: SignatureEncoding::Base64,
                prefix: None,
            },
            envelope_path: None,
            mode: WebhookMode::Upsert,
        })
        .setup(SetupSpec {
            create: Some(
                SetupTrackSpec::new(vec![
                    SetupField::new(
                        CREDENTIAL_WEBHOOK_SECRET,
                        "Paste the webhook signing secret from the storefront admin",
                    )
                    .secret(),
                ])
                .with_registration(RegistrationSpec::WebhookSubscriptions {
                    list_path: "/webhooks.json".to_owned(),
                    create_path: "/webhooks.json".to_owned(),
                    topics: vec!["orders/create".to_owned(), "orders/updated".to_owned()],
                    topic_field: "topic".to_owned(),
                    address_field: "address".to_owned(),
                    items_path: Some(path("webhooks")?),
                }),
            ),
            backfill: SetupTrackSpec::new(vec![
                SetupField::new(CREDENTIAL_BACKFILL_KEY, "Enter the storefront API key"),
                SetupField::new(CREDENTIAL_BACKFILL_SECRET, "Enter the storefront API password")
                    .secret(),
                SetupField::new(
                    "shop_name",
                    "Enter the shop name as it appears in its admin URL",
                )
                .derives(
                    CREDENTIAL_BASE_URL,
                    "https://{value}.storefront.example/admin/api/2024-01",
                ),
            ]),
        })
        .build()
}

/// Billing subscriptions: id cursor, timestamped HMAC, event envelope and the
/// cancellation timestamp transform.
pub fn billing_subscription() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(
        resource(BILLING_SUBSCRIPTION)?,
        "Billing subscriptions",
        path("id")?,
    )
    .recency(RecencyRule::field("updated", RecencyOrdering::EpochSeconds)?)
    .projection("customer", path("customer")?)
    .projection("status", path("status")?)
    .projection("cancelled_at", path("cancelled_at")?)
    .enrichment(EnrichmentSpec {
        name: "items".to_owned(),
        array_path: path("items.data")?,
        child_key_path: Some(path("id")?),
    })
    .transform(Arc::new(StatusTransitionTimestamp::new(
        path("status")?,
        vec![
            "canceled".to_owned(),
            "unpaid".to_owned(),
            "incomplete_expired".to_owned(),
        ],
        "cancelled_at",
    )))
    .required_credentials(&[CREDENTIAL_BACKFILL_SECRET])
    .outbound_auth(OutboundAuth::Credential {
        credential_key: CREDENTIAL_BACKFILL_SECRET.to_owned(),
        placement: header("authorization", "Bearer "),
    })
    .backfill(BackfillSpec {
        list_path: "/v1/subscriptions".to_owned(),
        method: ListMethod::Get,
        items_path: Some(path("data")?),
        pagination: PaginationStrategy::IdCursor(IdCursorParams {
            cursor_param: "starting_after".to_owned(),
            limit_param: "limit".to_owned(),
            page_size: 100,
            has_more_path: Some(path("has_more")?),
        }),
        static_query: vec![("status".to_owned(), "all".to_owned())],
        default_base_url: Some("https://api.billing.example".to_owned()),
        descending_recency: false,
        full_horizon: None,
    })
    .webhook(WebhookSpec {
        verification: VerificationScheme::TimestampedHmac {
            header: "billing-signature".to_owned(),
            tolerance_seconds: DEFAULT_SIGNATURE_TOLERANCE_SECONDS,
        },
        envelope_path: Some(path("data.object")?),
        mode: WebhookMode::Upsert,
    })
    .setup(SetupSpec {
        create: Some(SetupTrackSpec::new(vec![
            SetupField::new(
                CREDENTIAL_WEBHOOK_SECRET,
                "Create an endpoint for {webhook_url} in the billing dashboard and paste its signing secret",
            )
            .secret(),
        ])),
        backfill: SetupTrackSpec::new(vec![
            SetupField::new(CREDENTIAL_BACKFILL_SECRET, "Enter a restricted billing API key").secret(),
        ]),
    })
    .build()
}

/// Bank items hold the access token borrowed by transactions.
pub fn bank_item() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(BANK_ITEM)?, "Bank items", path("item_id")?)
        .required_credentials(&[CREDENTIAL_ACCESS_TOKEN])
        .setup(SetupSpec {
            create: None,
            backfill: SetupTrackSpec::new(vec![
                SetupField::new(CREDENTIAL_ACCESS_TOKEN, "Enter the bank item access token")
                    .secret(),
            ]),
        })
        .build()
}

/// Bank transactions: opaque token pages, operation dispatch on
/// `webhook_code`, and removal by id list.
pub fn bank_transaction() -> AppResult<ResourceDescriptor> {
    let removal = WebhookOperation::RemoveRecords {
        ids_path: path("removed_transactions")?,
    };

    ResourceDescriptor::builder(
        resource(BANK_TRANSACTION)?,
        "Bank transactions",
        path("transaction_id")?,
    )
    .recency(RecencyRule::field("authorized_date", RecencyOrdering::IsoTimestamp)?)
    .projection("account_id", path("account_id")?)
    .projection("amount", path("amount")?)
    .projection("pending", path("pending")?)
    .removal_marker(path("removed")?, json!(true))
    .depends_on(resource(BANK_ITEM)?, DependencyWalk::DirectParent)
    .outbound_auth(OutboundAuth::Delegated {
        credential_key: CREDENTIAL_ACCESS_TOKEN.to_owned(),
        placement: header("authorization", "Bearer "),
    })
    .backfill(BackfillSpec {
        list_path: "/transactions/sync".to_owned(),
        method: ListMethod::PostJson,
        items_path: Some(path("added")?),
        pagination: PaginationStrategy::OpaqueToken(OpaqueTokenParams {
            token_param: "cursor".to_owned(),
            token_path: Some(path("next_cursor")?),
            page_param: None,
            current_page_path: None,
            total_pages_path: None,
        }),
        static_query: vec![("count".to_owned(), "500".to_owned())],
        default_base_url: Some("https://production.bank.example".to_owned()),
        descending_recency: false,
        full_horizon: None,
    })
    .webhook(WebhookSpec {
        verification: VerificationScheme::Unverified,
        envelope_path: None,
        mode: WebhookMode::Operations(OperationTable {
            type_path: path("webhook_code")?,
            entries: vec![
                (
                    "SYNC_UPDATES_AVAILABLE".to_owned(),
                    WebhookOperation::Backfill(BackfillMode::Incremental),
                ),
                (
                    "DEFAULT_UPDATE".to_owned(),
                    WebhookOperation::Backfill(BackfillMode::Incremental),
                ),
                (
                    "HISTORICAL_UPDATE".to_owned(),
                    WebhookOperation::Backfill(BackfillMode::Full),
                ),
                ("TRANSACTIONS_REMOVED".to_owned(), removal),
            ],
            default: WebhookOperation::Ignore,
        }),
    })
    .setup(SetupSpec {
        create: Some(SetupTrackSpec::default()),
        backfill: SetupTrackSpec::default(),
    })
    .build()
}

/// Helpdesk tickets: page/per_page, Basic-Auth webhooks and a soft-delete
/// marker.
pub fn helpdesk_ticket() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(HELPDESK_TICKET)?, "Helpdesk tickets", path("id")?)
        .recency(RecencyRule::field(
            "updated_at",
            RecencyOrdering::IsoTimestamp,
        )?)
        .projection("subject", path("subject")?)
        .projection("status", path("status")?)
        .enrichment(EnrichmentSpec {
            name: "tags".to_owned(),
            array_path: path("tags")?,
            child_key_path: None,
        })
        .removal_marker(path("deleted")?, json!(true))
        .required_credentials(&[
            CREDENTIAL_BACKFILL_KEY,
            CREDENTIAL_BACKFILL_SECRET,
            CREDENTIAL_BASE_URL,
        ])
        .outbound_auth(key_secret_auth())
        .backfill(BackfillSpec {
            list_path: "/api/v2/tickets.json".to_owned(),
            method: ListMethod::Get,
            items_path: Some(path("tickets")?),
            pagination: PaginationStrategy::OffsetLimit(OffsetLimitParams {
                offset_param: "page".to_owned(),
                limit_param: "per_page".to_owned(),
                page_size: 100,
                numbering: OffsetNumbering::Pages { first: 1 },
                total_pages_path: None,
            }),
            static_query: vec![
                ("sort_by".to_owned(), "updated_at".to_owned()),
                ("sort_order".to_owned(), "desc".to_owned()),
            ],
            default_base_url: None,
            descending_recency: true,
            full_horizon: None,
        })
        .webhook(WebhookSpec {
            verification: VerificationScheme::BasicAuth,
            envelope_path: Some(path("ticket")?),
            mode: WebhookMode::Upsert,
        })
        .setup(SetupSpec {
            create: Some(SetupTrackSpec::new(vec![
                SetupField::new(
                    CREDENTIAL_WEBHOOK_USERNAME,
                    "Choose a username for the helpdesk webhook at {webhook_url}",
                ),
                SetupField::new(CREDENTIAL_WEBHOOK_PASSWORD, "Choose a webhook password")
                    .secret(),
            ])),
            backfill: SetupTrackSpec::new(vec![
                SetupField::new(CREDENTIAL_BACKFILL_KEY, "Enter the agent email/token login"),
                SetupField::new(CREDENTIAL_BACKFILL_SECRET, "Enter the helpdesk API token")
                    .secret(),
                SetupField::new("subdomain", "Enter the helpdesk subdomain")
                    .derives(CREDENTIAL_BASE_URL, "https://{value}.helpdesk.example"),
            ]),
        })
        .build()
}

/// Casebook sessions. Configuring the password logs in and stores the
/// session used by clients and cases.
pub fn casebook_auth() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(CASEBOOK_AUTH)?, "Casebook login", path("id")?)
        .required_credentials(&[CREDENTIAL_SESSION_TOKEN])
        .setup(SetupSpec {
            create: None,
            backfill: SetupTrackSpec::new(vec![
                SetupField::new(CREDENTIAL_BACKFILL_KEY, "Enter the casebook username"),
                SetupField::new(CREDENTIAL_BACKFILL_SECRET, "Enter the casebook password")
                    .secret(),
            ])
            .with_registration(RegistrationSpec::SessionLogin {
                default_base_url: Some(CASEBOOK_BASE_URL.to_owned()),
                login_path: "/api/session".to_owned(),
                username_field: "username".to_owned(),
                password_field: "password".to_owned(),
                token_path: path("session.token")?,
                store_as: CREDENTIAL_SESSION_TOKEN.to_owned(),
            }),
        })
        .build()
}

fn casebook_pages() -> AppResult<PaginationStrategy> {
    Ok(PaginationStrategy::OpaqueToken(OpaqueTokenParams {
        token_param: "page_token".to_owned(),
        token_path: None,
        page_param: Some("page".to_owned()),
        current_page_path: Some(path("meta.current_page")?),
        total_pages_path: Some(path("meta.total_pages")?),
    }))
}

fn casebook_session() -> OutboundAuth {
    OutboundAuth::Delegated {
        credential_key: CREDENTIAL_SESSION_TOKEN.to_owned(),
        placement: CredentialPlacement::Cookie {
            name: "casebook_session".to_owned(),
        },
    }
}

/// Casebook clients, listed with the linked login's session.
pub fn casebook_client() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(CASEBOOK_CLIENT)?, "Casebook clients", path("id")?)
        .recency(RecencyRule::field(
            "updated_at",
            RecencyOrdering::IsoTimestamp,
        )?)
        .projection("name", path("name")?)
        .depends_on(resource(CASEBOOK_AUTH)?, DependencyWalk::DirectParent)
        .outbound_auth(casebook_session())
        .backfill(BackfillSpec {
            list_path: "/api/clients".to_owned(),
            method: ListMethod::Get,
            items_path: Some(path("clients")?),
            pagination: casebook_pages()?,
            static_query: Vec::new(),
            default_base_url: Some(CASEBOOK_BASE_URL.to_owned()),
            descending_recency: false,
            full_horizon: None,
        })
        .setup(SetupSpec::default())
        .build()
}

/// Casebook cases. Linked to a client, but the session lives on the login
/// two levels up.
pub fn casebook_case() -> AppResult<ResourceDescriptor> {
    ResourceDescriptor::builder(resource(CASEBOOK_CASE)?, "Casebook cases", path("id")?)
        .recency(RecencyRule::field(
            "updated_at",
            RecencyOrdering::IsoTimestamp,
        )?)
        .projection("client_id", path("client_id")?)
        .projection("status", path("status")?)
        .depends_on(resource(CASEBOOK_AUTH)?, DependencyWalk::NearestOfType)
        .outbound_auth(casebook_session())
        .backfill(BackfillSpec {
            list_path: "/api/cases".to_owned(),
            method: ListMethod::Get,
            items_path: Some(path("cases")?),
            pagination: casebook_pages()?,
            static_query: Vec::new(),
            default_base_url: Some(CASEBOOK_BASE_URL.to_owned()),
            descending_recency: false,
            full_horizon: None,
        })
        .setup(SetupSpec::default())
        .build()
}
