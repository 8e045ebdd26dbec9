//! Stateful paginated view over one store.
//!
//! The facade owns the page number, page size, sort, filter, last page of
//! items and total count, plus three independent loading flags:
//!
//! - `is_data_loading` while the underlying fetch runs
//! - `is_filtering` for a whole filter change, held for at least the
//!   configured minimum display time
//! - `is_page_loading` while a navigation call fetches a new page
//!
//! Fetch failures never escape except from [`QueryFacade::initialize`]:
//! they become a user-facing message with an empty, zero-count result.
//!
//! Every fetch carries a generation number; a response that arrives after
//! a newer fetch started is discarded.

use super::{clamp_page, execute_query, parse_page_input, total_pages, Filter, PageResult};
use super::{QuerySpec, SortDirection, SortSpec};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Point-in-time copy of a facade's state.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSnapshot<T> {
    /// Records of the current page.
    pub items: Vec<T>,
    /// Records matching the filter across all pages.
    pub total_matching: usize,
    /// 1-based current page.
    pub current_page: usize,
    /// Records per page.
    pub page_size: usize,
    /// Page count, at least 1.
    pub total_pages: usize,
    /// Current ordering.
    pub sort: Option<SortSpec>,
    /// User-facing message of the last failure.
    pub error: Option<String>,
    /// A fetch is in flight.
    pub is_data_loading: bool,
    /// A filter change is in progress.
    pub is_filtering: bool,
    /// A page navigation is in progress.
    pub is_page_loading: bool,
}

#[derive(Debug)]
struct FacadeState<T> {
    current_page: usize,
    page_size: usize,
    sort: Option<SortSpec>,
    filter: Filter,
    items: Vec<T>,
    total_matching: usize,
    error: Option<String>,
    is_data_loading: bool,
    is_filtering: bool,
    is_page_loading: bool,
    generation: u64,
}

/// Paginated, filtered, sorted view over `db/store`, decoded as `T`.
pub struct QueryFacade<T> {
    connections: Arc<ConnectionManager>,
    db: String,
    store: String,
    page_size_options: Vec<usize>,
    min_filter_display: Duration,
    state: Mutex<FacadeState<T>>,
}

impl<T> QueryFacade<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Creates a facade positioned on page 1 with the configured page size.
    pub fn new(
        connections: Arc<ConnectionManager>,
        db: impl Into<String>,
        store: impl Into<String>,
        config: &Config,
    ) -> Self {
        Self {
            connections,
            db: db.into(),
            store: store.into(),
            page_size_options: config.page_sizes(),
            min_filter_display: config.min_filter_display,
            state: Mutex::new(FacadeState {
                current_page: 1,
                page_size: config.default_page_size,
                sort: None,
                filter: Filter::new(),
                items: Vec::new(),
                total_matching: 0,
                error: None,
                is_data_loading: false,
                is_filtering: false,
                is_page_loading: false,
                generation: 0,
            }),
        }
    }

    /// Database name.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Loads the first page, returning any failure.
    ///
    /// The failure is also recorded like any other fetch failure.
    pub async fn initialize(&self) -> CoreResult<()> {
        self.state.lock().current_page = 1;
        self.load(1).await.map(|_| ())
    }

    /// Loads `page` with the current filter and sort.
    ///
    /// Failures yield an empty result and set [`QueryFacade::error`].
    pub async fn fetch_page(&self, page: usize) -> PageResult<T> {
        match self.load(page.max(1)).await {
            Ok(result) => result,
            Err(_) => PageResult::empty(),
        }
    }

    /// Replaces the filter, then loads `page`.
    pub async fn fetch_page_with(&self, page: usize, filter: Filter) -> PageResult<T> {
        self.state.lock().filter = filter;
        self.fetch_page(page).await
    }

    /// Replaces the filter and reloads from page 1.
    ///
    /// `is_filtering` stays raised for at least the minimum display time.
    pub async fn set_filters(&self, filter: Filter) {
        let started = Instant::now();
        {
            let mut state = self.state.lock();
            state.is_filtering = true;
            state.filter = filter;
            state.current_page = 1;
        }

        self.fetch_page(1).await;

        let remaining = self.min_filter_display.saturating_sub(started.elapsed());
        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }
        self.state.lock().is_filtering = false;
    }

    /// Removes every predicate and reloads from page 1.
    pub async fn clear_filters(&self) {
        self.set_filters(Filter::new()).await;
    }

    /// Sorts by `key` in `direction` and reloads from page 1.
    pub async fn set_sort(&self, key: impl Into<String>, direction: SortDirection) {
        {
            let mut state = self.state.lock();
            state.sort = Some(SortSpec {
                key: key.into(),
                direction,
            });
            state.current_page = 1;
        }
        self.fetch_page(1).await;
    }

    /// Flips the direction if already sorted by `key`, else sorts ascending.
    pub async fn toggle_sort(&self, key: impl Into<String>) {
        let key = key.into();
        let direction = match &self.state.lock().sort {
            Some(sort) if sort.key == key => sort.direction.toggled(),
            _ => SortDirection::Asc,
        };
        self.set_sort(key, direction).await;
    }

    /// Drops the ordering and reloads from page 1.
    pub async fn clear_sort(&self) {
        {
            let mut state = self.state.lock();
            state.sort = None;
            state.current_page = 1;
        }
        self.fetch_page(1).await;
    }

    /// Changes the page size and reloads from page 1.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `size` is not one of the
    /// offered page sizes.
    pub async fn set_page_size(&self, size: usize) -> CoreResult<()> {
        if !self.page_size_options.contains(&size) {
            return Err(CoreError::invalid_config(format!(
                "page size {size} is not one of {:?}",
                self.page_size_options
            )));
        }
        {
            let mut state = self.state.lock();
            state.page_size = size;
            state.current_page = 1;
        }
        self.fetch_page(1).await;
        Ok(())
    }

    /// Moves to `page`, clamped into `[1, total_pages]`.
    ///
    /// Returns false when the clamped page is already current.
    pub async fn go_to_page(&self, page: i64) -> bool {
        let target = {
            let state = self.state.lock();
            let target = clamp_page(page, total_pages(state.total_matching, state.page_size));
            if target == state.current_page {
                return false;
            }
            target
        };

        self.state.lock().is_page_loading = true;
        self.fetch_page(target).await;
        self.state.lock().is_page_loading = false;
        true
    }

    /// Moves to page 1.
    pub async fn go_to_first_page(&self) -> bool {
        self.go_to_page(1).await
    }

    /// Moves one page forward.
    pub async fn go_to_next_page(&self) -> bool {
        let current = self.current_page();
        self.go_to_page(page_number(current) + 1).await
    }

    /// Moves one page back.
    pub async fn go_to_previous_page(&self) -> bool {
        let current = self.current_page();
        self.go_to_page(page_number(current) - 1).await
    }

    /// Moves to the last page.
    pub async fn go_to_last_page(&self) -> bool {
        let last = self.total_pages();
        self.go_to_page(page_number(last)).await
    }

    /// Moves to a page typed by the user; unparsable input is ignored.
    pub async fn handle_direct_page_input(&self, input: &str) -> bool {
        match parse_page_input(input) {
            Some(page) => self.go_to_page(page).await,
            None => false,
        }
    }

    /// Reloads the current page.
    pub async fn refresh(&self) {
        let page = self.current_page();
        self.fetch_page(page).await;
    }

    /// Page count, at least 1.
    pub fn total_pages(&self) -> usize {
        let state = self.state.lock();
        total_pages(state.total_matching, state.page_size)
    }

    /// 1-based current page.
    pub fn current_page(&self) -> usize {
        self.state.lock().current_page
    }

    /// Records per page.
    pub fn page_size(&self) -> usize {
        self.state.lock().page_size
    }

    /// Page sizes accepted by [`QueryFacade::set_page_size`].
    pub fn page_size_options(&self) -> &[usize] {
        &self.page_size_options
    }

    /// Current ordering.
    pub fn sort(&self) -> Option<SortSpec> {
        self.state.lock().sort.clone()
    }

    /// Records of the current page.
    pub fn items(&self) -> Vec<T> {
        self.state.lock().items.clone()
    }

    /// Records matching the filter across all pages.
    pub fn total_matching(&self) -> usize {
        self.state.lock().total_matching
    }

    /// User-facing message of the last failure.
    pub fn error(&self) -> Option<String> {
        self.state.lock().error.clone()
    }

    /// A fetch is in flight.
    pub fn is_data_loading(&self) -> bool {
        self.state.lock().is_data_loading
    }

    /// A filter change is in progress.
    pub fn is_filtering(&self) -> bool {
        self.state.lock().is_filtering
    }

    /// A page navigation is in progress.
    pub fn is_page_loading(&self) -> bool {
        self.state.lock().is_page_loading
    }

    /// Copies the whole state.
    pub fn snapshot(&self) -> PageSnapshot<T> {
        let state = self.state.lock();
        PageSnapshot {
            items: state.items.clone(),
            total_matching: state.total_matching,
            current_page: state.current_page,
            page_size: state.page_size,
            total_pages: total_pages(state.total_matching, state.page_size),
            sort: state.sort.clone(),
            error: state.error.clone(),
            is_data_loading: state.is_data_loading,
            is_filtering: state.is_filtering,
            is_page_loading: state.is_page_loading,
        }
    }

    async fn load(&self, page: usize) -> CoreResult<PageResult<T>> {
        let (spec, generation) = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.is_data_loading = true;
            let spec = QuerySpec {
                store: self.store.clone(),
                filter: state.filter.clone(),
                sort: state.sort.clone(),
                page,
                page_size: state.page_size,
            };
            (spec, state.generation)
        };

        let result = self.run(&spec).await;

        let mut state = self.state.lock();
        if state.generation != generation {
            tracing::trace!(db = %self.db, store = %self.store, page, "stale page discarded");
            return result;
        }
        state.is_data_loading = false;
        match &result {
            Ok(page_result) => {
                state.current_page = page;
                state.items = page_result.items.clone();
                state.total_matching = page_result.total_matching;
                state.error = None;
            }
            Err(err) => {
                tracing::warn!(db = %self.db, store = %self.store, page, error = %err, "page fetch failed");
                state.items.clear();
                state.total_matching = 0;
                state.error = Some(err.user_message());
            }
        }
        result
    }

    async fn run(&self, spec: &QuerySpec) -> CoreResult<PageResult<T>> {
        let lease = self.connections.lease(&self.db).await?;
        execute_query(&lease, spec).await?.decode()
    }
}

fn page_number(page: usize) -> i64 {
    i64::try_from(page).unwrap_or(i64::MAX)
}

impl<T> std::fmt::Debug for QueryFacade<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFacade")
            .field("db", &self.db)
            .field("store", &self.store)
            .field("page_size_options", &self.page_size_options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RetryPolicy;
    use crate::registry::SchemaRegistry;
    use ratedeck_storage::{InMemoryEngine, SchemaMap, StorageEngine};
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Deserialize)]
    struct Code {
        npa: String,
        rate: f64,
    }

    async fn facade(rows: usize, config: &Config) -> QueryFacade<Code> {
        let engine = Arc::new(InMemoryEngine::new());
        let mut stores = SchemaMap::new();
        stores.insert("codes".into(), "++id, npa".parse().unwrap());
        engine.open("rates", 1, &stores).await.unwrap();
        let records = (0..rows)
            .map(|i| json!({"npa": format!("{}", 200 + i), "rate": (i % 3) as f64}))
            .collect();
        engine.put_batch("rates", "codes", records).await.unwrap();
        engine.close("rates");

        let connections = Arc::new(ConnectionManager::new(
            engine,
            Arc::new(SchemaRegistry::default()),
            RetryPolicy::no_retry(),
        ));
        QueryFacade::new(connections, "rates", "codes", config)
    }

    #[tokio::test]
    async fn initialize_loads_first_page() {
        let facade = facade(30, &Config::new().default_page_size(25)).await;
        facade.initialize().await.unwrap();

        let snapshot = facade.snapshot();
        assert_eq!(snapshot.items.len(), 25);
        assert_eq!(snapshot.total_matching, 30);
        assert_eq!(snapshot.total_pages, 2);
        assert!(!snapshot.is_data_loading);
    }

    #[tokio::test]
    async fn navigation_clamps_and_noops() {
        let facade = facade(30, &Config::new().default_page_size(25)).await;
        facade.initialize().await.unwrap();

        assert!(!facade.go_to_page(0).await);
        assert!(facade.go_to_page(99).await);
        assert_eq!(facade.current_page(), 2);
        assert_eq!(facade.items().len(), 5);
        assert!(!facade.go_to_next_page().await);
        assert!(facade.go_to_previous_page().await);
        assert_eq!(facade.current_page(), 1);
        assert!(facade.go_to_last_page().await);
        assert!(facade.go_to_first_page().await);
        assert!(!facade.handle_direct_page_input("abc").await);
        assert!(facade.handle_direct_page_input(" 2 ").await);
        assert!(!facade.is_page_loading());
    }

    #[tokio::test]
    async fn page_size_must_be_offered() {
        let facade = facade(30, &Config::new().default_page_size(25)).await;
        facade.initialize().await.unwrap();
        facade.go_to_page(2).await;

        assert!(facade.set_page_size(7).await.is_err());
        facade.set_page_size(50).await.unwrap();
        assert_eq!(facade.current_page(), 1);
        assert_eq!(facade.items().len(), 30);
        assert_eq!(facade.total_pages(), 1);
    }

    #[tokio::test]
    async fn toggle_sort_flips_direction() {
        let facade = facade(5, &Config::new()).await;
        facade.toggle_sort("npa").await;
        assert_eq!(facade.items()[0].npa, "200");

        facade.toggle_sort("npa").await;
        assert_eq!(facade.sort(), Some(SortSpec::desc("npa")));
        assert_eq!(facade.items()[0].npa, "204");
    }

    #[tokio::test(start_paused = true)]
    async fn filtering_flag_honors_floor() {
        let facade = facade(30, &Config::new()).await;
        let started = Instant::now();

        let probe = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            facade.is_filtering()
        };
        let ((), raised) = tokio::join!(facade.set_filters(Filter::new().eq("rate", 1.0)), probe);

        assert!(raised);
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert!(!facade.is_filtering());
        assert_eq!(facade.total_matching(), 10);
    }

    #[tokio::test]
    async fn failures_become_messages() {
        let facade = facade(3, &Config::new()).await;
        facade.initialize().await.unwrap();

        // Records that do not decode as Code.
        let broken: QueryFacade<u32> = QueryFacade::new(
            facade.connections.clone(),
            "rates",
            "codes",
            &Config::new(),
        );
        assert!(broken.initialize().await.is_err());
        assert_eq!(broken.total_matching(), 0);
        assert!(broken.items().is_empty());
        assert_eq!(broken.error().as_deref(), Some("Failed to read stored records"));

        let page = broken.fetch_page(1).await;
        assert_eq!(page, PageResult::empty());
    }

    #[tokio::test]
    async fn missing_store_reads_as_empty() {
        let facade = facade(0, &Config::new()).await;
        let missing: QueryFacade<Code> =
            QueryFacade::new(facade.connections.clone(), "rates", "nothing", &Config::new());

        missing.initialize().await.unwrap();
        assert_eq!(missing.total_pages(), 1);
        assert!(missing.error().is_none());
    }
}
