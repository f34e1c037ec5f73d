use mirrorline_domain::{
    ListMethod, PageNext, PageRequest, PaginationCursor, VendorPage, paginator_for,
};
use serde_json::{Map, Value};

use super::*;
use crate::{VendorMethod, VendorRequest};

pub(super) struct CrawlOutcome {
    pub(super) report: BackfillReport,
    pub(super) high_water_mark: Option<RecencyValue>,
}

enum PageVerdict {
    Continue,
    ReachedLowWaterMark,
}

impl BackfillService {
    pub(super) async fn crawl(
        &self,
        integration: &Integration,
        plan: &CrawlPlan<'_>,
    ) -> AppResult<CrawlOutcome> {
        let paginator = paginator_for(
            &plan.backfill.pagination,
            plan.backfill.items_path.clone(),
            plan.descriptor.primary_key().clone(),
        );
        let horizon = self.horizon_param(plan);

        let mut outcome = CrawlOutcome {
            report: BackfillReport::new(integration.id(), plan.mode),
            high_water_mark: None,
        };
        let mut cursor = PaginationCursor::Start;

        loop {
            let request = vendor_request(plan, paginator.request(&cursor), horizon.as_ref());
            let page = self.fetch_with_retry(integration, &request).await?;
            outcome.report.pages = outcome.report.pages.saturating_add(1);

            let result = match paginator.advance(&cursor, &page) {
                Ok(result) => result,
                Err(AppError::MalformedPayload(message)) => {
                    warn!(
                        integration_id = %integration.id(),
                        page = outcome.report.pages,
                        error = %message,
                        "vendor page could not be read, ending crawl"
                    );
                    outcome.report.malformed_items += 1;
                    break;
                }
                Err(error) => return Err(error),
            };

            let verdict = self
                .store_page(integration, plan, result.items, &mut outcome)
                .await?;
            if matches!(verdict, PageVerdict::ReachedLowWaterMark) {
                outcome.report.stopped_early = true;
                break;
            }

            match result.next {
                PageNext::Done => break,
                PageNext::Continue(next) if next == cursor => {
                    warn!(
                        integration_id = %integration.id(),
                        "vendor repeated the pagination cursor, ending crawl"
                    );
                    break;
                }
                PageNext::Continue(next) => cursor = next,
            }
        }

        Ok(outcome)
    }

    async fn store_page(
        &self,
        integration: &Integration,
        plan: &CrawlPlan<'_>,
        items: Vec<Value>,
        outcome: &mut CrawlOutcome,
    ) -> AppResult<PageVerdict> {
        let observed_at = Utc::now();

        for item in items {
            let recency = match plan.descriptor.recency().extract(&item) {
                Ok(recency) => recency,
                Err(AppError::MalformedPayload(message)) => {
                    skip_rest_of_page(integration, &message, outcome);
                    return Ok(PageVerdict::Continue);
                }
                Err(error) => return Err(error),
            };

            if let (Some(low_water_mark), Some(recency)) = (plan.low_water_mark, recency)
                && recency <= low_water_mark
            {
                return Ok(PageVerdict::ReachedLowWaterMark);
            }

            match self
                .records
                .apply_candidate(
                    integration.tenant_id(),
                    integration.id(),
                    plan.descriptor,
                    item,
                    observed_at,
                )
                .await
            {
                Ok(result) => {
                    outcome.report.count(result.outcome);
                    if let Some(recency) = recency {
                        outcome.high_water_mark = outcome.high_water_mark.max(Some(recency));
                    }
                }
                Err(AppError::MalformedPayload(message)) => {
                    skip_rest_of_page(integration, &message, outcome);
                    return Ok(PageVerdict::Continue);
                }
                Err(error) => return Err(error),
            }
        }

        Ok(PageVerdict::Continue)
    }

    async fn fetch_with_retry(
        &self,
        integration: &Integration,
        request: &VendorRequest,
    ) -> AppResult<VendorPage> {
        let max_attempts = self.retry.max_retries.saturating_add(1);
        let mut attempt = 0_u32;
        let mut last_error: Option<String> = None;

        while attempt < max_attempts {
            attempt = attempt.saturating_add(1);

            match self.vendor.send(request).await {
                Ok(page) if (200..300).contains(&page.status) => return Ok(page),
                Ok(page) if page.status >= 500 || page.status == 429 => {
                    last_error = Some(format!(
                        "transient HTTP status {} from '{}'",
                        page.status, request.url
                    ));
                }
                Ok(page) => {
                    return Err(AppError::Transport(format!(
                        "vendor list request to '{}' failed with status {}: {}",
                        request.url, page.status, page.body
                    )));
                }
                Err(AppError::Transport(message)) => last_error = Some(message),
                Err(error) => return Err(error),
            }

            if attempt < max_attempts {
                warn!(
                    integration_id = %integration.id(),
                    attempt,
                    error = last_error.as_deref().unwrap_or_default(),
                    "vendor page fetch failed, retrying"
                );
                tokio::time::sleep(self.backoff(attempt)).await;
            }
        }

        Err(AppError::Transport(last_error.unwrap_or_else(|| {
            format!("vendor list request to '{}' exhausted retries", request.url)
        })))
    }

    fn horizon_param(&self, plan: &CrawlPlan<'_>) -> Option<(String, String)> {
        if plan.mode != BackfillMode::Full {
            return None;
        }

        plan.backfill.full_horizon.as_ref().map(|horizon| {
            let since = Utc::now() - chrono::Duration::days(horizon.days);
            (horizon.param.clone(), since.format(&horizon.format).to_string())
        })
    }
}

fn skip_rest_of_page(integration: &Integration, message: &str, outcome: &mut CrawlOutcome) {
    warn!(
        integration_id = %integration.id(),
        page = outcome.report.pages,
        error = %message,
        "malformed item, skipping the rest of the page"
    );
    outcome.report.malformed_items += 1;
}

fn vendor_request(
    plan: &CrawlPlan<'_>,
    page: PageRequest,
    horizon: Option<&(String, String)>,
) -> VendorRequest {
    let headers = plan.auth_headers.clone();

    if let Some(next_url) = page.next_url {
        return VendorRequest {
            method: VendorMethod::Get,
            url: next_url,
            query: Vec::new(),
            headers,
            json_body: None,
        };
    }

    let url = format!(
        "{}/{}",
        plan.base_url.trim_end_matches('/'),
        plan.backfill.list_path.trim_start_matches('/')
    );
    let params: Vec<(String, String)> = plan
        .backfill
        .static_query
        .iter()
        .cloned()
        .chain(horizon.cloned())
        .chain(page.query)
        .collect();

    match plan.backfill.method {
        ListMethod::Get => VendorRequest {
            method: VendorMethod::Get,
            url,
            query: params,
            headers,
            json_body: None,
        },
        ListMethod::PostJson => {
            let body: Map<String, Value> = params
                .into_iter()
                .map(|(key, value)| (key, Value::String(value)))
                .collect();
            VendorRequest {
                method: VendorMethod::Post,
                url,
                query: Vec::new(),
                headers,
                json_body: Some(Value::Object(body)),
            }
        }
    }
}
