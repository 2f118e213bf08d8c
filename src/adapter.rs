//! Adapter
//!
//! The externally callable surface of one resource kind. An [`Adapter`] wraps
//! a [`Wrapper`] with result caching, splits composite queries, checks query
//! arity before any backend call and validates every item it hands back.
//!
//! Capabilities are detected once, at construction, from the capability
//! traits the wrapper exposes.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::cache::{Cache, CacheKey, CachedResult};
use crate::composite_key;
use crate::context::QueryContext;
use crate::error::{ErrorKind, QueryError, QueryResult};
use crate::item::{Item, QueryMethod};
use crate::sink::QuerySink;
use crate::wrapper::{validate_query_parts, ItemTypeLookup, TerraformMapping, Wrapper};

/// Default lifetime of cached results
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Optional operations supported by an adapter. `get` is always supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub list: bool,
    pub search: bool,
    pub list_stream: bool,
    pub search_stream: bool,
}

impl Capabilities {
    fn detect(wrapper: &dyn Wrapper) -> Self {
        Self {
            list: wrapper.as_lister().is_some(),
            search: wrapper.as_searcher().is_some(),
            list_stream: wrapper.as_list_streamer().is_some(),
            search_stream: wrapper.as_search_streamer().is_some(),
        }
    }
}

pub struct Adapter {
    wrapper: Arc<dyn Wrapper>,
    cache: Arc<dyn Cache>,
    cache_ttl: Duration,
    capabilities: Capabilities,
}

impl Adapter {
    pub fn new(wrapper: Arc<dyn Wrapper>, cache: Arc<dyn Cache>, cache_ttl: Duration) -> Self {
        let capabilities = Capabilities::detect(wrapper.as_ref());
        tracing::debug!(
            "adapter for {} with capabilities {:?}",
            wrapper.item_type(),
            capabilities
        );
        Self {
            wrapper,
            cache,
            cache_ttl,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    // =========================================================================
    // Static metadata
    // =========================================================================

    pub fn item_type(&self) -> &'static str {
        self.wrapper.item_type()
    }

    pub fn scopes(&self) -> Vec<String> {
        self.wrapper.scopes()
    }

    pub fn default_scope(&self) -> String {
        self.wrapper.default_scope()
    }

    pub fn get_lookups(&self) -> Vec<ItemTypeLookup> {
        self.wrapper.get_lookups()
    }

    pub fn search_lookups(&self) -> Vec<Vec<ItemTypeLookup>> {
        self.wrapper
            .as_searcher()
            .map(|s| s.search_lookups())
            .unwrap_or_default()
    }

    pub fn potential_links(&self) -> BTreeSet<&'static str> {
        self.wrapper.potential_links()
    }

    pub fn iam_permissions(&self) -> Vec<&'static str> {
        self.wrapper.iam_permissions()
    }

    pub fn predefined_role(&self) -> &'static str {
        self.wrapper.predefined_role()
    }

    pub fn terraform_mappings(&self) -> Vec<TerraformMapping> {
        self.wrapper.terraform_mappings()
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Look one item up by its (possibly composite) unique value
    pub async fn get(
        &self,
        ctx: &QueryContext,
        scope: &str,
        query: &str,
        ignore_cache: bool,
    ) -> QueryResult<Item> {
        let item_type = self.item_type();
        let key = CacheKey::new(scope, QueryMethod::Get, query, item_type);

        if !ignore_cache {
            match self.cache.lookup(&key).await {
                Some(CachedResult::Items(items)) => {
                    if let Some(item) = items.into_iter().next() {
                        tracing::debug!("{}: cache hit for GET {} in {}", item_type, query, scope);
                        return Ok(item);
                    }
                },
                Some(CachedResult::NotFound(err)) => {
                    tracing::debug!("{}: cached not-found for GET {} in {}", item_type, query, scope);
                    return Err(err);
                },
                None => {},
            }
        }

        let parts = composite_key::split(query);
        validate_query_parts(&parts, self.wrapper.get_lookups().len(), scope, item_type)?;

        match self.wrapper.get(ctx, scope, &parts).await {
            Ok(item) => {
                self.check_item(&item)?;
                self.cache
                    .store(key, CachedResult::Items(vec![item.clone()]), self.cache_ttl)
                    .await;
                Ok(item)
            },
            Err(err) if err.is_not_found() => {
                self.cache
                    .store(key, CachedResult::NotFound(err.clone()), self.cache_ttl)
                    .await;
                Err(err)
            },
            Err(err) => Err(err),
        }
    }

    /// Enumerate every item in a scope
    pub async fn list(
        &self,
        ctx: &QueryContext,
        scope: &str,
        ignore_cache: bool,
    ) -> QueryResult<Vec<Item>> {
        let lister = self
            .wrapper
            .as_lister()
            .ok_or_else(|| self.unsupported("list", scope))?;
        let key = CacheKey::new(scope, QueryMethod::List, "", self.item_type());

        if let Some(items) = self.cached_items(&key, ignore_cache).await {
            return Ok(items);
        }

        let items = lister.list(ctx, scope).await?;
        self.check_items(&items)?;
        self.store_items(key, &items).await;
        Ok(items)
    }

    /// Enumerate items matching a secondary key
    pub async fn search(
        &self,
        ctx: &QueryContext,
        scope: &str,
        query: &str,
        ignore_cache: bool,
    ) -> QueryResult<Vec<Item>> {
        let searcher = self
            .wrapper
            .as_searcher()
            .ok_or_else(|| self.unsupported("search", scope))?;
        let key = CacheKey::new(scope, QueryMethod::Search, query, self.item_type());

        if let Some(items) = self.cached_items(&key, ignore_cache).await {
            return Ok(items);
        }

        let parts = self.search_parts(query, scope)?;
        let items = searcher.search(ctx, scope, &parts).await?;
        self.check_items(&items)?;
        self.store_items(key, &items).await;
        Ok(items)
    }

    /// Enumerate every item in a scope, pushing each into `sink`
    pub async fn list_stream(
        &self,
        ctx: &QueryContext,
        scope: &str,
        ignore_cache: bool,
        sink: &dyn QuerySink,
    ) {
        let Some(streamer) = self.wrapper.as_list_streamer() else {
            sink.send_error(self.unsupported("list stream", scope));
            return;
        };
        let key = CacheKey::new(scope, QueryMethod::List, "", self.item_type());

        if let Some(items) = self.cached_items(&key, ignore_cache).await {
            items.into_iter().for_each(|item| sink.send_item(item));
            return;
        }

        let recording = ValidatingSink::new(sink, self.item_type());
        streamer.list_stream(ctx, scope, &recording).await;
        if let Some(items) = recording.into_items() {
            self.store_items(key, &items).await;
        }
    }

    /// Search, pushing each item into `sink`
    pub async fn search_stream(
        &self,
        ctx: &QueryContext,
        scope: &str,
        query: &str,
        ignore_cache: bool,
        sink: &dyn QuerySink,
    ) {
        let Some(streamer) = self.wrapper.as_search_streamer() else {
            sink.send_error(self.unsupported("search stream", scope));
            return;
        };
        let key = CacheKey::new(scope, QueryMethod::Search, query, self.item_type());

        if let Some(items) = self.cached_items(&key, ignore_cache).await {
            items.into_iter().for_each(|item| sink.send_item(item));
            return;
        }

        let parts = match self.search_parts(query, scope) {
            Ok(parts) => parts,
            Err(err) => {
                sink.send_error(err);
                return;
            },
        };

        let recording = ValidatingSink::new(sink, self.item_type());
        streamer.search_stream(ctx, scope, &parts, &recording).await;
        if let Some(items) = recording.into_items() {
            self.store_items(key, &items).await;
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn cached_items(&self, key: &CacheKey, ignore_cache: bool) -> Option<Vec<Item>> {
        if ignore_cache {
            return None;
        }
        match self.cache.lookup(key).await {
            Some(CachedResult::Items(items)) => {
                tracing::debug!(
                    "{}: cache hit for {} {:?} in {} ({} items)",
                    key.item_type,
                    key.method.as_str(),
                    key.query,
                    key.scope,
                    items.len()
                );
                Some(items)
            },
            _ => None,
        }
    }

    /// Cache a result set, and each item under its own GET key
    async fn store_items(&self, key: CacheKey, items: &[Item]) {
        for item in items {
            self.cache
                .store(
                    CacheKey::for_item(item),
                    CachedResult::Items(vec![item.clone()]),
                    self.cache_ttl,
                )
                .await;
        }
        self.cache
            .store(key, CachedResult::Items(items.to_vec()), self.cache_ttl)
            .await;
    }

    fn search_parts(&self, query: &str, scope: &str) -> QueryResult<Vec<String>> {
        let parts = composite_key::split(query);
        let shapes = self.search_lookups();
        let arity = shapes
            .iter()
            .map(Vec::len)
            .find(|len| *len == parts.len())
            .or_else(|| shapes.first().map(Vec::len))
            .unwrap_or(1);
        validate_query_parts(&parts, arity, scope, self.item_type())?;
        Ok(parts)
    }

    fn check_item(&self, item: &Item) -> QueryResult<()> {
        item.validate().map_err(|err| invalid_item(item, err))
    }

    fn check_items(&self, items: &[Item]) -> QueryResult<()> {
        items.iter().try_for_each(|item| self.check_item(item))
    }

    fn unsupported(&self, operation: &str, scope: &str) -> QueryError {
        QueryError::invalid_query(
            format!("{} does not support {}", self.item_type(), operation),
            scope,
            self.item_type(),
        )
    }
}

fn invalid_item(item: &Item, err: crate::item::ItemValidationError) -> QueryError {
    tracing::error!("{}: mapping produced an invalid item: {}", item.item_type, err);
    QueryError::new(
        ErrorKind::Internal,
        format!("invalid item: {}", err),
        &item.scope,
        &item.item_type,
    )
}

/// Validates items on their way to the caller's sink and remembers them so
/// a complete, error-free stream can be cached
struct ValidatingSink<'a> {
    inner: &'a dyn QuerySink,
    item_type: &'static str,
    state: Mutex<(Vec<Item>, bool)>,
}

impl<'a> ValidatingSink<'a> {
    fn new(inner: &'a dyn QuerySink, item_type: &'static str) -> Self {
        Self {
            inner,
            item_type,
            state: Mutex::new((Vec::new(), false)),
        }
    }

    /// Items seen, or `None` if any error went through
    fn into_items(self) -> Option<Vec<Item>> {
        let (items, failed) = self.state.into_inner().unwrap_or_else(PoisonError::into_inner);
        (!failed).then_some(items)
    }

    fn mark_failed(&self) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).1 = true;
    }
}

impl QuerySink for ValidatingSink<'_> {
    fn send_item(&self, item: Item) {
        if let Err(err) = item.validate() {
            self.mark_failed();
            self.inner.send_error(invalid_item(&item, err));
            return;
        }
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
            .push(item.clone());
        self.inner.send_item(item);
    }

    fn send_error(&self, error: QueryError) {
        tracing::debug!("{}: stream error: {}", self.item_type, error);
        self.mark_failed();
        self.inner.send_error(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, NoOpCache};
    use crate::testing::{CountingWrapper, FakeRecord};

    fn adapter(wrapper: CountingWrapper) -> (Arc<CountingWrapper>, Adapter) {
        let wrapper = Arc::new(wrapper);
        let adapter = Adapter::new(
            wrapper.clone(),
            Arc::new(MemoryCache::new()),
            DEFAULT_CACHE_TTL,
        );
        (wrapper, adapter)
    }

    #[tokio::test]
    async fn test_get_is_served_from_cache() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![FakeRecord::named("a")]));
        let ctx = QueryContext::new();

        let first = adapter.get(&ctx, "global", "a", false).await.unwrap();
        let second = adapter.get(&ctx, "global", "a", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(wrapper.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_ignore_cache_always_calls_backend() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![FakeRecord::named("a")]));
        let ctx = QueryContext::new();

        adapter.get(&ctx, "global", "a", false).await.unwrap();
        adapter.get(&ctx, "global", "a", true).await.unwrap();
        adapter.get(&ctx, "global", "a", true).await.unwrap();

        assert_eq!(wrapper.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_cached_but_backend_errors_are_not() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![]));
        let ctx = QueryContext::new();

        let err = adapter.get(&ctx, "global", "missing", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        let err = adapter.get(&ctx, "global", "missing", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(wrapper.get_calls(), 1);

        wrapper.fail_with(ErrorKind::BackendError);
        adapter.get(&ctx, "global", "other", false).await.unwrap_err();
        adapter.get(&ctx, "global", "other", false).await.unwrap_err();
        assert_eq!(wrapper.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_wrong_arity_never_reaches_wrapper() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![FakeRecord::named("a")]));
        let ctx = QueryContext::new();

        let err = adapter.get(&ctx, "global", "a|b", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidQuery);
        let err = adapter.get(&ctx, "global", "", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidQuery);

        assert_eq!(wrapper.get_calls(), 0);
    }

    #[tokio::test]
    async fn test_list_warms_get_cache() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![
            FakeRecord::named("a"),
            FakeRecord::named("b"),
        ]));
        let ctx = QueryContext::new();

        let items = adapter.list(&ctx, "global", false).await.unwrap();
        assert_eq!(items.len(), 2);

        adapter.get(&ctx, "global", "b", false).await.unwrap();
        assert_eq!(wrapper.get_calls(), 0);

        adapter.list(&ctx, "global", false).await.unwrap();
        assert_eq!(wrapper.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_list_is_cached() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![]));
        let ctx = QueryContext::new();

        assert!(adapter.list(&ctx, "global", false).await.unwrap().is_empty());
        assert!(adapter.list(&ctx, "global", false).await.unwrap().is_empty());
        assert_eq!(wrapper.list_calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_item_is_internal_error() {
        let (_, adapter) = adapter(CountingWrapper::new(vec![FakeRecord::named("a").without_scope()]));
        let ctx = QueryContext::new();

        let err = adapter.get(&ctx, "global", "a", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);

        let err = adapter.list(&ctx, "global", false).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_capabilities_follow_wrapper() {
        let (_, full) = adapter(CountingWrapper::new(vec![]));
        assert_eq!(
            full.capabilities(),
            Capabilities {
                list: true,
                search: false,
                list_stream: true,
                search_stream: false,
            }
        );

        let err = full
            .search(&QueryContext::new(), "global", "x", false)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidQuery);

        let get_only = Adapter::new(
            Arc::new(CountingWrapper::new(vec![]).get_only()),
            Arc::new(NoOpCache),
            DEFAULT_CACHE_TTL,
        );
        assert_eq!(get_only.capabilities(), Capabilities::default());
    }

    #[tokio::test]
    async fn test_stream_caches_only_clean_runs() {
        let (wrapper, adapter) = adapter(CountingWrapper::new(vec![FakeRecord::named("a")]));
        let ctx = QueryContext::new();

        let sink = crate::sink::CollectingSink::new();
        adapter.list_stream(&ctx, "global", false, &sink).await;
        adapter.list_stream(&ctx, "global", false, &sink).await;
        assert_eq!(sink.items().len(), 2);
        assert_eq!(wrapper.list_calls(), 1);

        wrapper.fail_with(ErrorKind::BackendError);
        let sink = crate::sink::CollectingSink::new();
        adapter.list_stream(&ctx, "other-project", false, &sink).await;
        adapter.list_stream(&ctx, "other-project", false, &sink).await;
        assert_eq!(sink.errors().len(), 2);
        assert_eq!(wrapper.list_calls(), 3);
    }
}
