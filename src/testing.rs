//! Test doubles
//!
//! Fakes for the backend seams so wrappers and adapters can be exercised
//! without network access: [`FakePager`] replays scripted pages,
//! [`FakeClient`] serves records and listings by URL, and
//! [`CountingWrapper`] is a minimal wrapper that counts backend calls.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::QueryContext;
use crate::error::{ErrorKind, QueryError, QueryResult};
use crate::gcp::client::{Endpoints, ResourceClient};
use crate::gcp::http::ApiError;
use crate::item::Item;
use crate::pager::{collect_pages, stream_pages, Page, Pager};
use crate::scope::GLOBAL_SCOPE;
use crate::sink::QuerySink;
use crate::wrapper::{query_parts, ItemTypeLookup, ListStreamer, Lister, Wrapper};

/// Pager that replays scripted pages in order
pub struct FakePager {
    pages: VecDeque<anyhow::Result<Page>>,
    fetched: usize,
    counter: Option<Arc<AtomicUsize>>,
}

impl FakePager {
    pub fn new(pages: Vec<anyhow::Result<Page>>) -> Self {
        Self {
            pages: pages.into(),
            fetched: 0,
            counter: None,
        }
    }

    fn counted(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.fetched
    }
}

#[async_trait]
impl Pager for FakePager {
    fn more(&self) -> bool {
        !self.pages.is_empty()
    }

    async fn next_page(&mut self) -> anyhow::Result<Page> {
        self.fetched += 1;
        if let Some(counter) = &self.counter {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.pages
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("no more pages")))
    }
}

/// A scripted page: records, or an error message
type ScriptedPage = Result<Page, String>;

/// Backend serving canned records and listings by URL
#[derive(Default)]
pub struct FakeClient {
    endpoints: Endpoints,
    records: HashMap<String, Value>,
    listings: HashMap<String, Vec<ScriptedPage>>,
    get_calls: Arc<AtomicUsize>,
    page_calls: Arc<AtomicUsize>,
}

impl FakeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `record` for GET `url`
    pub fn with_record(mut self, url: &str, record: Value) -> Self {
        self.records.insert(url.to_string(), record);
        self
    }

    /// Serve `pages` for a listing of `url`
    pub fn with_pages(mut self, url: &str, pages: Vec<Page>) -> Self {
        self.listings
            .insert(url.to_string(), pages.into_iter().map(Ok).collect());
        self
    }

    /// Serve `pages` and then fail the next page fetch
    pub fn with_failing_pages(mut self, url: &str, pages: Vec<Page>, error: &str) -> Self {
        let mut scripted: Vec<ScriptedPage> = pages.into_iter().map(Ok).collect();
        scripted.push(Err(error.to_string()));
        self.listings.insert(url.to_string(), scripted);
        self
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }

    /// Total backend round trips
    pub fn calls(&self) -> usize {
        self.get_calls() + self.page_calls()
    }
}

#[async_trait]
impl ResourceClient for FakeClient {
    fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn get(&self, url: &str) -> anyhow::Result<Value> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.records
            .get(url)
            .cloned()
            .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("{} not found", url)).into())
    }

    fn pager(&self, url: &str, _items_field: &str) -> Box<dyn Pager> {
        let pages = match self.listings.get(url) {
            Some(scripted) => scripted
                .iter()
                .map(|p| p.clone().map_err(|e| anyhow::anyhow!(e)))
                .collect(),
            // GCP answers an empty listing with an empty page
            None => vec![Ok(Vec::new())],
        };
        Box::new(FakePager::new(pages).counted(self.page_calls.clone()))
    }
}

pub const FAKE_TYPE: &str = "test-thing";

/// Record served by [`CountingWrapper`]
#[derive(Debug, Clone)]
pub struct FakeRecord {
    pub name: String,
    pub blank_scope: bool,
}

impl FakeRecord {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            blank_scope: false,
        }
    }

    /// Produce an item that fails validation
    pub fn without_scope(mut self) -> Self {
        self.blank_scope = true;
        self
    }

    fn to_value(&self) -> Value {
        json!({ "name": self.name })
    }
}

/// Minimal wrapper that counts how often the backend is reached.
/// It answers for any scope.
pub struct CountingWrapper {
    records: Vec<FakeRecord>,
    get_only: bool,
    failure: Mutex<Option<ErrorKind>>,
    get_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl CountingWrapper {
    pub fn new(records: Vec<FakeRecord>) -> Self {
        Self {
            records,
            get_only: false,
            failure: Mutex::new(None),
            get_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        }
    }

    /// Drop the list capabilities
    pub fn get_only(mut self) -> Self {
        self.get_only = true;
        self
    }

    /// Make every later backend call fail
    pub fn fail_with(&self, kind: ErrorKind) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(kind);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn failure(&self, scope: &str) -> QueryResult<()> {
        match *self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            Some(kind) => Err(QueryError::new(kind, "scripted failure", scope, FAKE_TYPE)),
            None => Ok(()),
        }
    }

    fn pager(&self) -> FakePager {
        FakePager::new(vec![Ok(self.records.iter().map(FakeRecord::to_value).collect())])
    }

    fn map_record(&self, record: &Value, scope: &str) -> QueryResult<Option<Item>> {
        let Some(name) = record.get("name").and_then(|v| v.as_str()) else {
            return Ok(None);
        };
        let blank = self
            .records
            .iter()
            .any(|r| r.name == name && r.blank_scope);
        let scope = if blank { "" } else { scope };
        Ok(Some(Item::from_record(FAKE_TYPE, "name", name, scope, record, "labels")))
    }
}

#[async_trait]
impl Wrapper for CountingWrapper {
    fn item_type(&self) -> &'static str {
        FAKE_TYPE
    }

    fn scopes(&self) -> Vec<String> {
        vec![GLOBAL_SCOPE.to_string()]
    }

    fn default_scope(&self) -> String {
        GLOBAL_SCOPE.to_string()
    }

    fn get_lookups(&self) -> Vec<ItemTypeLookup> {
        vec![ItemTypeLookup::new("name", FAKE_TYPE)]
    }

    fn potential_links(&self) -> BTreeSet<&'static str> {
        BTreeSet::new()
    }

    async fn get(&self, _ctx: &QueryContext, scope: &str, parts: &[String]) -> QueryResult<Item> {
        let [name] = query_parts::<1>(parts, scope, FAKE_TYPE)?;
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.failure(scope)?;

        let record = self
            .records
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| QueryError::not_found(format!("{} not found", name), scope, FAKE_TYPE))?;
        self.map_record(&record.to_value(), scope)?
            .ok_or_else(|| QueryError::not_found("record without identity", scope, FAKE_TYPE))
    }

    fn as_lister(&self) -> Option<&dyn Lister> {
        (!self.get_only).then_some(self as &dyn Lister)
    }

    fn as_list_streamer(&self) -> Option<&dyn ListStreamer> {
        (!self.get_only).then_some(self as &dyn ListStreamer)
    }
}

#[async_trait]
impl Lister for CountingWrapper {
    async fn list(&self, ctx: &QueryContext, scope: &str) -> QueryResult<Vec<Item>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.failure(scope)?;
        let mapper = |record: &Value, scope: &str| self.map_record(record, scope);
        collect_pages(ctx, &mut self.pager(), scope, FAKE_TYPE, &mapper).await
    }
}

#[async_trait]
impl ListStreamer for CountingWrapper {
    async fn list_stream(&self, ctx: &QueryContext, scope: &str, sink: &dyn QuerySink) {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.failure(scope) {
            sink.send_error(err);
            return;
        }
        let mapper = |record: &Value, scope: &str| self.map_record(record, scope);
        stream_pages(ctx, &mut self.pager(), scope, FAKE_TYPE, &mapper, sink).await;
    }
}
