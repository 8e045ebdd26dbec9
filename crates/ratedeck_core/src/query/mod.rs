//! Paginated, filtered, sorted reads over a single store.
//!
//! [`execute_query`] is the stateless core; [`QueryFacade`] wraps it with
//! page state, loading flags and error capture for UI layers.
//!
//! ## Ordering
//!
//! With a sort key the query first asks the engine for an index-ordered
//! scan. If the store has no index on the key, or the scan fails, the whole
//! filtered set is read, sorted with [`sort_records`] and sliced, so the
//! page always matches a sort of the full result.
//!
//! The matching count is taken before any offset or limit, so page
//! arithmetic stays stable even when the requested page is empty.

mod facade;
mod filter;
mod pagination;
mod sort;

pub use facade::{PageSnapshot, QueryFacade};
pub use filter::Filter;
pub use pagination::{clamp_page, offset_for, parse_page_input, total_pages};
pub use sort::{compare_for_sort, sort_records, SortDirection, SortSpec};

use crate::connection::Connection;
use crate::error::{CoreError, CoreResult};
use ratedeck_storage::{ScanRequest, StorageError};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A single page request.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    /// Store to read.
    pub store: String,
    /// Predicates, all of which must hold.
    pub filter: Filter,
    /// Optional ordering.
    pub sort: Option<SortSpec>,
    /// 1-based page number.
    pub page: usize,
    /// Records per page.
    pub page_size: usize,
}

impl QuerySpec {
    /// First page of `store`, unfiltered and unsorted.
    pub fn new(store: impl Into<String>, page_size: usize) -> Self {
        Self {
            store: store.into(),
            filter: Filter::new(),
            sort: None,
            page: 1,
            page_size,
        }
    }

    /// Sets the filter.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the ordering.
    #[must_use]
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Sets the page number.
    #[must_use]
    pub fn page(mut self, page: usize) -> Self {
        self.page = page;
        self
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq)]
pub struct PageResult<T> {
    /// Records of the page, at most `page_size` of them.
    pub items: Vec<T>,
    /// Records matching the filter across all pages.
    pub total_matching: usize,
}

impl<T> PageResult<T> {
    /// A result with no records.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total_matching: 0,
        }
    }
}

impl PageResult<Value> {
    /// Decodes every record into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> CoreResult<PageResult<T>> {
        let items = self
            .items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<T>, _>>()?;
        Ok(PageResult {
            items,
            total_matching: self.total_matching,
        })
    }
}

/// Runs `spec` against an open connection.
///
/// A missing store yields an empty page.
pub async fn execute_query(conn: &Connection, spec: &QuerySpec) -> CoreResult<PageResult<Value>> {
    let db = conn.name();
    let store = spec.store.as_str();
    let filter = spec.filter.to_record_filter();

    let total_matching = match conn.count(store, filter.clone()).await {
        Ok(total) => total,
        Err(StorageError::StoreNotFound { .. }) => return Ok(PageResult::empty()),
        Err(e) => return Err(CoreError::from_storage(db, store, e)),
    };

    let offset = offset_for(spec.page, spec.page_size);
    if spec.page_size == 0 || offset >= total_matching {
        return Ok(PageResult {
            items: Vec::new(),
            total_matching,
        });
    }

    let base = ScanRequest::all().filter(filter);
    let items = match &spec.sort {
        None => conn
            .scan(store, base.offset(offset).limit(spec.page_size))
            .await
            .map_err(|e| CoreError::from_storage(db, store, e))?,
        Some(sort) => {
            let indexed = base
                .clone()
                .order_by(sort.key.as_str())
                .reverse(sort.direction == SortDirection::Desc)
                .offset(offset)
                .limit(spec.page_size);
            match conn.scan(store, indexed).await {
                Ok(items) => items,
                Err(err) => {
                    tracing::debug!(db, store, key = %sort.key, error = %err, "index sort unavailable, sorting in memory");
                    let mut all = conn
                        .scan(store, base)
                        .await
                        .map_err(|e| CoreError::from_storage(db, store, e))?;
                    sort_records(&mut all, sort);
                    all.into_iter().skip(offset).take(spec.page_size).collect()
                }
            }
        }
    };

    Ok(PageResult {
        items,
        total_matching,
    })
}
