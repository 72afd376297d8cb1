//! Page-based pagination.
//!
//! The paginator runs last: it takes a [`FrozenQuery`], counts the filtered
//! and joined shape, fetches one page, and derives the link set.

use serde::Serialize;
use url::Url;

use crate::config::ListingConfig;
use crate::error::{CollectionError, CollectionResult};
use crate::executor::QueryExecutor;
use crate::query::FrozenQuery;
use crate::request::{ListRequest, PAGE_NUMBER_KEYS, PAGE_SIZE_KEYS};

/// Page numbers for first/last/prev/next navigation.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PaginationLinks {
    pub first: u32,
    pub last: u32,
    pub prev: Option<u32>,
    pub next: Option<u32>,
}

impl PaginationLinks {
    /// Compute links for `page` of `size` over `total_items`.
    ///
    /// `last` is at least 1, so an empty collection has a single empty page.
    pub fn new(page: u32, size: u32, total_items: u64) -> Self {
        let size = u64::from(size.max(1));
        let last = u32::try_from(total_items.div_ceil(size))
            .unwrap_or(u32::MAX)
            .max(1);

        Self {
            first: 1,
            last,
            prev: (page > 1).then(|| (page - 1).min(last)),
            next: (page < last).then(|| page + 1),
        }
    }

    /// Render the links as URLs on `base`, keeping the request's other
    /// parameters and rewriting the page parameters.
    pub fn to_urls(&self, base: &Url, request: &ListRequest, size: u32) -> LinkSet {
        let url_for = |page: u32| {
            let mut url = base.clone();
            url.set_query(None);
            {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in request.iter() {
                    if !PAGE_NUMBER_KEYS.contains(&key) && !PAGE_SIZE_KEYS.contains(&key) {
                        pairs.append_pair(key, value);
                    }
                }
                pairs.append_pair("page[number]", &page.to_string());
                pairs.append_pair("page[size]", &size.to_string());
            }
            url.to_string()
        };

        LinkSet {
            first: url_for(self.first),
            last: url_for(self.last),
            prev: self.prev.map(url_for),
            next: self.next.map(url_for),
        }
    }
}

/// JSON:API `links` object for a paginated collection.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct LinkSet {
    pub first: String,
    pub last: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Single-pass iterator over the rows of the current page.
#[derive(Debug)]
pub struct PageItems {
    rows: std::vec::IntoIter<serde_json::Value>,
}

impl Iterator for PageItems {
    type Item = serde_json::Value;

    fn next(&mut self) -> Option<Self::Item> {
        self.rows.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}

impl ExactSizeIterator for PageItems {}

#[derive(Debug)]
struct PageState {
    page: u32,
    size: u32,
    offset: u64,
    total_items: u64,
    links: PaginationLinks,
    items: Option<Vec<serde_json::Value>>,
}

/// Applies limit/offset, counts, and fetches one page.
#[derive(Debug)]
pub struct Paginator {
    default_size: u32,
    max_size: u32,
    state: Option<PageState>,
}

impl Paginator {
    pub fn new(default_size: u32, max_size: u32) -> Self {
        let max_size = max_size.max(1);
        Self {
            default_size: default_size.clamp(1, max_size),
            max_size,
            state: None,
        }
    }

    pub fn from_config(config: &ListingConfig) -> Self {
        Self::new(config.default_page_size, config.max_page_size)
    }

    /// Read and validate `(page, size)` from the request.
    ///
    /// Sizes above the configured maximum are capped.
    pub fn resolve_page(&self, request: &ListRequest) -> CollectionResult<(u32, u32)> {
        let page = match request.get_any(&PAGE_NUMBER_KEYS) {
            Some((key, raw)) => parse_positive(key, raw)?,
            None => 1,
        };

        let size = match request.get_any(&PAGE_SIZE_KEYS) {
            Some((key, raw)) => parse_positive(key, raw)?,
            None => self.default_size,
        };
        let size = if size > self.max_size {
            tracing::warn!(
                requested = size,
                capped = self.max_size,
                "page size exceeds maximum, capping"
            );
            self.max_size
        } else {
            size
        };

        Ok((page, size))
    }

    /// Count the query, fetch the requested page, and record the result.
    pub async fn handle_query(
        &mut self,
        query: &FrozenQuery,
        request: &ListRequest,
        executor: &dyn QueryExecutor,
    ) -> CollectionResult<()> {
        if self.state.is_some() {
            return Err(CollectionError::InvalidState(
                "pagination already computed for this request".to_string(),
            ));
        }

        let (page, size) = self.resolve_page(request)?;
        let offset = u64::from(page - 1) * u64::from(size);

        let total_items = executor.count(&query.count_sql()).await?;
        let mut rows = executor
            .fetch(&query.page_sql(u64::from(size), offset))
            .await?;

        rows.truncate(size as usize);
        if !query.sort_columns().is_empty() {
            for row in &mut rows {
                if let Some(object) = row.as_object_mut() {
                    for column in query.sort_columns() {
                        object.remove(column);
                    }
                }
            }
        }

        let links = PaginationLinks::new(page, size, total_items);
        tracing::debug!(
            page,
            size,
            offset,
            total_items,
            fetched = rows.len(),
            last = links.last,
            "page fetched"
        );

        self.state = Some(PageState {
            page,
            size,
            offset,
            total_items,
            links,
            items: Some(rows),
        });
        Ok(())
    }

    pub fn is_handled(&self) -> bool {
        self.state.is_some()
    }

    /// Total items matching the filters, across all pages.
    pub fn count(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.total_items)
    }

    pub fn page(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.page)
    }

    pub fn size(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.size)
    }

    pub fn offset(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.offset)
    }

    pub fn links(&self) -> Option<PaginationLinks> {
        self.state.as_ref().map(|s| s.links)
    }

    /// Take the current page's rows. Returns `None` before the query ran
    /// and after the rows were taken once.
    pub fn take_items(&mut self) -> Option<PageItems> {
        self.state
            .as_mut()
            .and_then(|s| s.items.take())
            .map(|rows| PageItems {
                rows: rows.into_iter(),
            })
    }
}

fn parse_positive(key: &str, raw: &str) -> CollectionResult<u32> {
    match raw.trim().parse::<u32>() {
        Ok(value) if value >= 1 => Ok(value),
        _ => Err(CollectionError::invalid_filter(
            key,
            "must be a positive integer",
        )),
    }
}
