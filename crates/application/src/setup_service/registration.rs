use mirrorline_domain::{
    CREDENTIAL_BACKFILL_KEY, CREDENTIAL_BACKFILL_SECRET, CREDENTIAL_BASE_URL, FieldPath,
    RegistrationSpec, ResourceDescriptor, VendorPage, webhook_url,
};
use serde_json::{Map, Value};

use super::*;
use crate::{VendorMethod, VendorRequest};

impl SetupService {
    pub(super) async fn register(
        &self,
        integration: &mut Integration,
        descriptor: &ResourceDescriptor,
        registration: &RegistrationSpec,
    ) -> AppResult<()> {
        match registration {
            RegistrationSpec::WebhookSubscriptions {
                list_path,
                create_path,
                topics,
                topic_field,
                address_field,
                items_path,
            } => {
                let base_url = integration
                    .credentials()
                    .get(CREDENTIAL_BASE_URL)
                    .map(str::to_owned)
                    .or_else(|| {
                        descriptor
                            .backfill()
                            .and_then(|backfill| backfill.default_base_url.clone())
                    })
                    .ok_or_else(|| {
                        AppError::CredentialsMissing(
                            "complete the backfill setup before registering webhooks".to_owned(),
                        )
                    })?;
                let headers = descriptor
                    .outbound_auth()
                    .headers(integration.credentials(), None)
                    .map_err(|_| {
                        AppError::CredentialsMissing(
                            "complete the backfill setup before registering webhooks".to_owned(),
                        )
                    })?;
                let address = webhook_url(&self.public_base_url, integration);

                let existing = self
                    .send(VendorRequest {
                        method: VendorMethod::Get,
                        url: join(&base_url, list_path),
                        query: Vec::new(),
                        headers: headers.clone(),
                        json_body: None,
                    })
                    .await?;
                let subscribed = subscribed_topics(
                    &existing.body,
                    items_path.as_ref(),
                    topic_field,
                    address_field,
                    &address,
                );

                let mut created = 0_usize;
                for topic in topics.iter().filter(|topic| !subscribed.contains(topic)) {
                    let mut body = Map::new();
                    body.insert(topic_field.clone(), Value::String(topic.clone()));
                    body.insert(address_field.clone(), Value::String(address.clone()));
                    self.send(VendorRequest {
                        method: VendorMethod::Post,
                        url: join(&base_url, create_path),
                        query: Vec::new(),
                        headers: headers.clone(),
                        json_body: Some(Value::Object(body)),
                    })
                    .await?;
                    created += 1;
                }

                info!(
                    integration_id = %integration.id(),
                    created,
                    already_present = topics.len() - created,
                    "webhook subscriptions registered"
                );
                Ok(())
            }
            RegistrationSpec::SessionLogin {
                default_base_url,
                login_path,
                username_field,
                password_field,
                token_path,
                store_as,
            } => {
                let credentials = integration.credentials();
                let base_url = credentials
                    .get(CREDENTIAL_BASE_URL)
                    .map(str::to_owned)
                    .or_else(|| default_base_url.clone())
                    .ok_or_else(|| {
                        AppError::CredentialsMissing(format!(
                            "integration '{}' has no base URL",
                            integration.id()
                        ))
                    })?;
                let (Some(username), Some(password)) = (
                    credentials.get(CREDENTIAL_BACKFILL_KEY),
                    credentials.get(CREDENTIAL_BACKFILL_SECRET),
                ) else {
                    return Err(AppError::CredentialsMissing(
                        "session login needs a username and password".to_owned(),
                    ));
                };

                let mut body = Map::new();
                body.insert(username_field.clone(), Value::String(username.to_owned()));
                body.insert(password_field.clone(), Value::String(password.to_owned()));
                let response = self
                    .send(VendorRequest {
                        method: VendorMethod::Post,
                        url: join(&base_url, login_path),
                        query: Vec::new(),
                        headers: Vec::new(),
                        json_body: Some(Value::Object(body)),
                    })
                    .await?;

                let token = session_token(&response.body, token_path)?;
                integration.set_credential(store_as.as_str(), token);
                info!(integration_id = %integration.id(), "vendor session established");
                Ok(())
            }
        }
    }

    async fn send(&self, request: VendorRequest) -> AppResult<VendorPage> {
        let page = self.vendor.send(&request).await?;
        if (200..300).contains(&page.status) {
            Ok(page)
        } else {
            Err(AppError::Transport(format!(
                "vendor registration call to '{}' failed with status {}",
                request.url, page.status
            )))
        }
    }
}

fn join(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn subscribed_topics(
    body: &Value,
    items_path: Option<&FieldPath>,
    topic_field: &str,
    address_field: &str,
    address: &str,
) -> Vec<String> {
    let items = match items_path {
        Some(path) => path.resolve(body),
        None => Some(body),
    };

    items
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter(|item| item.get(address_field).and_then(Value::as_str) == Some(address))
                .filter_map(|item| item.get(topic_field).and_then(Value::as_str))
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn session_token(body: &Value, token_path: &FieldPath) -> AppResult<String> {
    token_path
        .resolve(body)
        .and_then(Value::as_str)
        .filter(|token| !token.trim().is_empty())
        .map(str::to_owned)
        .ok_or_else(|| {
            AppError::MalformedPayload(format!("login response has no '{token_path}'"))
        })
}
