//! Pagination strategies for vendor list endpoints.
//!
//! A paginator turns the current [`PaginationCursor`] into a request and a
//! fetched [`VendorPage`] into items plus the next cursor. Early stopping for
//! incremental runs is the caller's concern, so every strategy supports it.

use http::HeaderMap;
use mirrorline_core::{AppError, AppResult};
use serde_json::Value;

use crate::FieldPath;

/// Raw vendor response handed to a paginator.
#[derive(Debug, Clone)]
pub struct VendorPage {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HeaderMap,
    /// Parsed JSON body.
    pub body: Value,
}

/// Page-number convention for offset strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OffsetNumbering {
    /// The offset parameter counts items (`skip`/`take`).
    Items,
    /// The offset parameter counts pages starting at `first` (`page`/`per_page`).
    Pages {
        /// Number of the first page.
        first: u64,
    },
}

/// Offset/limit pagination parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetLimitParams {
    /// Offset or page query parameter.
    pub offset_param: String,
    /// Page size query parameter.
    pub limit_param: String,
    /// Requested page size.
    pub page_size: u32,
    /// Offset convention.
    pub numbering: OffsetNumbering,
    /// Optional total-pages counter in the body.
    pub total_pages_path: Option<FieldPath>,
}

/// Next-link header pagination parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHeaderParams {
    /// Optional page size query parameter for the first request.
    pub page_size_param: Option<String>,
    /// Requested page size.
    pub page_size: u32,
}

/// Opaque token pagination parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpaqueTokenParams {
    /// Query parameter carrying the continuation token.
    pub token_param: String,
    /// Location of the next token in the body.
    pub token_path: Option<FieldPath>,
    /// Optional page-number query parameter.
    pub page_param: Option<String>,
    /// Location of the current page counter.
    pub current_page_path: Option<FieldPath>,
    /// Location of the total pages counter.
    pub total_pages_path: Option<FieldPath>,
}

/// `starting_after` id cursor parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdCursorParams {
    /// Query parameter carrying the last seen id.
    pub cursor_param: String,
    /// Page size query parameter.
    pub limit_param: String,
    /// Requested page size.
    pub page_size: u32,
    /// Optional boolean "has more" flag in the body.
    pub has_more_path: Option<FieldPath>,
}

/// Pagination strategy declared by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationStrategy {
    /// `skip`/`take` or `page`/`per_page`.
    OffsetLimit(OffsetLimitParams),
    /// Follow `Link: <...>; rel="next"` verbatim.
    LinkHeader(LinkHeaderParams),
    /// Continuation token and/or page counters embedded in the body.
    OpaqueToken(OpaqueTokenParams),
    /// Last seen external id of the prior page.
    IdCursor(IdCursorParams),
}

/// Where a crawl resumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationCursor {
    /// First request.
    Start,
    /// Numeric offset or page number.
    Offset(u64),
    /// Next URL supplied by the vendor.
    NextUrl(String),
    /// Continuation token plus the page number being requested.
    Token {
        /// Token returned by the previous page.
        token: Option<String>,
        /// One-based page number.
        page: u64,
    },
    /// Last seen external id.
    AfterId(String),
}

/// Request shape for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageRequest {
    /// Absolute URL to request verbatim instead of the list endpoint.
    pub next_url: Option<String>,
    /// Strategy query parameters.
    pub query: Vec<(String, String)>,
}

/// Whether another page follows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageNext {
    /// Request the page at this cursor.
    Continue(PaginationCursor),
    /// The crawl is finished.
    Done,
}

/// Items and continuation extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult {
    /// Item payloads in vendor order.
    pub items: Vec<Value>,
    /// Next cursor or completion.
    pub next: PageNext,
}

/// Strategy object driving one crawl.
pub trait Paginator: Send + Sync {
    /// Builds the request for the given cursor.
    fn request(&self, cursor: &PaginationCursor) -> PageRequest;

    /// Extracts items and the next cursor from a fetched page.
    fn advance(&self, cursor: &PaginationCursor, page: &VendorPage) -> AppResult<PageResult>;
}

/// Builds the paginator for a strategy.
///
/// `items_path` locates the item array (the body itself when `None`) and
/// `primary_key` extracts the id used by id cursors.
#[must_use]
pub fn paginator_for(
    strategy: &PaginationStrategy,
    items_path: Option<FieldPath>,
    primary_key: FieldPath,
) -> Box<dyn Paginator> {
    let items = ItemsLocator { items_path };
    match strategy {
        PaginationStrategy::OffsetLimit(params) => Box::new(OffsetLimitPaginator {
            params: params.clone(),
            items,
        }),
        PaginationStrategy::LinkHeader(params) => Box::new(LinkHeaderPaginator {
            params: params.clone(),
            items,
        }),
        PaginationStrategy::OpaqueToken(params) => Box::new(OpaqueTokenPaginator {
            params: params.clone(),
            items,
        }),
        PaginationStrategy::IdCursor(params) => Box::new(IdCursorPaginator {
            params: params.clone(),
            items,
            primary_key,
        }),
    }
}

#[derive(Debug, Clone)]
struct ItemsLocator {
    items_path: Option<FieldPath>,
}

impl ItemsLocator {
    fn extract(&self, body: &Value) -> AppResult<Vec<Value>> {
        let located = match &self.items_path {
            Some(path) => path.resolve(body),
            None => Some(body),
        };

        match located {
            Some(Value::Array(items)) => Ok(items.clone()),
            None => Ok(Vec::new()),
            Some(_) => Err(AppError::MalformedPayload(format!(
                "page items at '{}' are not an array",
                self.items_path
                    .as_ref()
                    .map_or("<body>", |path| path.as_str())
            ))),
        }
    }
}

fn counter(body: &Value, path: Option<&FieldPath>) -> Option<u64> {
    path.and_then(|path| path.resolve(body)).and_then(|value| match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn non_empty_string(body: &Value, path: Option<&FieldPath>) -> Option<String> {
    path.and_then(|path| path.resolve(body))
        .and_then(Value::as_str)
        .filter(|token| !token.trim().is_empty())
        .map(str::to_owned)
}

struct OffsetLimitPaginator {
    params: OffsetLimitParams,
    items: ItemsLocator,
}

impl OffsetLimitPaginator {
    fn first_offset(&self) -> u64 {
        match self.params.numbering {
            OffsetNumbering::Items => 0,
            OffsetNumbering::Pages { first } => first,
        }
    }

    fn offset(&self, cursor: &PaginationCursor) -> u64 {
        match cursor {
            PaginationCursor::Offset(offset) => *offset,
            _ => self.first_offset(),
        }
    }
}

impl Paginator for OffsetLimitPaginator {
    fn request(&self, cursor: &PaginationCursor) -> PageRequest {
        PageRequest {
            next_url: None,
            query: vec![
                (self.params.offset_param.clone(), self.offset(cursor).to_string()),
                (self.params.limit_param.clone(), self.params.page_size.to_string()),
            ],
        }
    }

    fn advance(&self, cursor: &PaginationCursor, page: &VendorPage) -> AppResult<PageResult> {
        let items = self.items.extract(&page.body)?;
        let offset = self.offset(cursor);
        let page_size = u64::from(self.params.page_size);

        let (page_number, next_offset) = match self.params.numbering {
            OffsetNumbering::Items => (offset / page_size.max(1) + 1, offset + page_size),
            OffsetNumbering::Pages { first } => (offset - first + 1, offset + 1),
        };

        let short_page = (items.len() as u64) < page_size;
        let last_counted_page = counter(&page.body, self.params.total_pages_path.as_ref())
            .is_some_and(|total_pages| page_number >= total_pages);

        let next = if short_page || last_counted_page {
            PageNext::Done
        } else {
            PageNext::Continue(PaginationCursor::Offset(next_offset))
        };

        Ok(PageResult { items, next })
    }
}

struct LinkHeaderPaginator {
    params: LinkHeaderParams,
    items: ItemsLocator,
}

impl Paginator for LinkHeaderPaginator {
    fn request(&self, cursor: &PaginationCursor) -> PageRequest {
        match cursor {
            PaginationCursor::NextUrl(url) => PageRequest {
                next_url: Some(url.clone()),
                query: Vec::new(),
            },
            _ => PageRequest {
                next_url: None,
                query: self
                    .params
                    .page_size_param
                    .iter()
                    .map(|param| (param.clone(), self.params.page_size.to_string()))
                    .collect(),
            },
        }
    }

    fn advance(&self, _cursor: &PaginationCursor, page: &VendorPage) -> AppResult<PageResult> {
        let items = self.items.extract(&page.body)?;
        let next = match next_link(&page.headers) {
            Some(url) => PageNext::Continue(PaginationCursor::NextUrl(url)),
            None => PageNext::Done,
        };

        Ok(PageResult { items, next })
    }
}

/// Returns the `rel="next"` target of the response's `Link` headers.
#[must_use]
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(http::header::LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|link| {
            let mut parts = link.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|parameter| {
                let parameter = parameter.trim();
                parameter
                    .strip_prefix("rel=")
                    .map(|relation| relation.trim_matches('"'))
                    .is_some_and(|relation| {
                        relation
                            .split_whitespace()
                            .any(|relation| relation.eq_ignore_ascii_case("next"))
                    })
            });

            let url = target.strip_prefix('<')?.strip_suffix('>')?;
            (is_next && !url.is_empty()).then(|| url.to_owned())
        })
}

struct OpaqueTokenPaginator {
    params: OpaqueTokenParams,
    items: ItemsLocator,
}

impl Paginator for OpaqueTokenPaginator {
    fn request(&self, cursor: &PaginationCursor) -> PageRequest {
        let (token, page) = match cursor {
            PaginationCursor::Token { token, page } => (token.clone(), *page),
            _ => (None, 1),
        };

        let mut query = Vec::new();
        if let Some(token) = token {
            query.push((self.params.token_param.clone(), token));
        }
        if let Some(page_param) = &self.params.page_param {
            query.push((page_param.clone(), page.to_string()));
        }

        PageRequest {
            next_url: None,
            query,
        }
    }

    fn advance(&self, cursor: &PaginationCursor, page: &VendorPage) -> AppResult<PageResult> {
        let items = self.items.extract(&page.body)?;
        let requested_page = match cursor {
            PaginationCursor::Token { page, .. } => *page,
            _ => 1,
        };

        let current_page = counter(&page.body, self.params.current_page_path.as_ref())
            .unwrap_or(requested_page);
        let counted_out = counter(&page.body, self.params.total_pages_path.as_ref())
            .is_some_and(|total_pages| current_page >= total_pages);
        let next_token = non_empty_string(&page.body, self.params.token_path.as_ref());
        let token_exhausted = self.params.token_path.is_some() && next_token.is_none();

        let next = if items.is_empty() || counted_out || token_exhausted {
            PageNext::Done
        } else {
            PageNext::Continue(PaginationCursor::Token {
                token: next_token,
                page: current_page + 1,
            })
        };

        Ok(PageResult { items, next })
    }
}

struct IdCursorPaginator {
    params: IdCursorParams,
    items: ItemsLocator,
    primary_key: FieldPath,
}

impl Paginator for IdCursorPaginator {
    fn request(&self, cursor: &PaginationCursor) -> PageRequest {
        let mut query = vec![(
            self.params.limit_param.clone(),
            self.params.page_size.to_string(),
        )];
        if let PaginationCursor::AfterId(last_seen) = cursor {
            query.push((self.params.cursor_param.clone(), last_seen.clone()));
        }

        PageRequest {
            next_url: None,
            query,
        }
    }

    fn advance(&self, _cursor: &PaginationCursor, page: &VendorPage) -> AppResult<PageResult> {
        let items = self.items.extract(&page.body)?;
        let has_more = self
            .params
            .has_more_path
            .as_ref()
            .and_then(|path| path.resolve(&page.body))
            .and_then(Value::as_bool);

        let Some(last_item) = items.last() else {
            return Ok(PageResult {
                items,
                next: PageNext::Done,
            });
        };

        if has_more == Some(false) {
            return Ok(PageResult {
                items,
                next: PageNext::Done,
            });
        }

        let last_seen = self.primary_key.resolve_key(last_item).ok_or_else(|| {
            AppError::MalformedPayload(format!(
                "last item on page has no '{}' to continue from",
                self.primary_key
            ))
        })?;

        Ok(PageResult {
            items,
            next: PageNext::Continue(PaginationCursor::AfterId(last_seen)),
        })
    }
}
