//! Pagination
//!
//! Backends enumerate through a [`Pager`]. The loops here drive a pager for
//! every wrapper: [`collect_pages`] is all-or-nothing, [`stream_pages`]
//! pushes each record to a sink as soon as it is converted. Both stop as
//! soon as the query context is cancelled.

use async_trait::async_trait;
use serde_json::Value;

use crate::context::QueryContext;
use crate::error::QueryError;
use crate::item::Item;
use crate::sink::QuerySink;

/// One page of raw provider records
pub type Page = Vec<Value>;

#[async_trait]
pub trait Pager: Send {
    /// Whether another page can be fetched
    fn more(&self) -> bool;

    /// Fetch the next page
    async fn next_page(&mut self) -> anyhow::Result<Page>;
}

/// Converts one raw record. `Ok(None)` skips a record without identity.
pub trait RecordMapper: Send + Sync {
    fn map_record(&self, record: &Value, scope: &str) -> Result<Option<Item>, QueryError>;
}

impl<F> RecordMapper for F
where
    F: Fn(&Value, &str) -> Result<Option<Item>, QueryError> + Send + Sync,
{
    fn map_record(&self, record: &Value, scope: &str) -> Result<Option<Item>, QueryError> {
        self(record, scope)
    }
}

async fn fetch_page(
    ctx: &QueryContext,
    pager: &mut dyn Pager,
    scope: &str,
    item_type: &str,
) -> Result<Page, QueryError> {
    match ctx.run(pager.next_page()).await {
        Ok(Ok(page)) => Ok(page),
        Ok(Err(err)) => Err(QueryError::from_backend(&err, scope, item_type)),
        Err(stopped) => Err(stopped.into_error(scope, item_type)),
    }
}

/// Drain a pager and return every converted record. Any failure discards
/// what was collected so far.
pub async fn collect_pages(
    ctx: &QueryContext,
    pager: &mut dyn Pager,
    scope: &str,
    item_type: &str,
    mapper: &dyn RecordMapper,
) -> Result<Vec<Item>, QueryError> {
    let mut items = Vec::new();
    let mut page_count = 0usize;

    while pager.more() {
        ctx.check().map_err(|s| s.into_error(scope, item_type))?;

        let page = fetch_page(ctx, pager, scope, item_type).await?;
        page_count += 1;

        for record in &page {
            match mapper.map_record(record, scope)? {
                Some(item) => items.push(item),
                None => tracing::warn!("{}: skipping record without identity in {}", item_type, scope),
            }
        }
    }

    tracing::debug!(
        "{}: collected {} items from {} pages in {}",
        item_type,
        items.len(),
        page_count,
        scope
    );
    Ok(items)
}

/// Drain a pager into a sink. A failure is sent once and ends the stream.
pub async fn stream_pages(
    ctx: &QueryContext,
    pager: &mut dyn Pager,
    scope: &str,
    item_type: &str,
    mapper: &dyn RecordMapper,
    sink: &dyn QuerySink,
) {
    if let Err(err) = stream_pages_inner(ctx, pager, scope, item_type, mapper, sink).await {
        sink.send_error(err);
    }
}

async fn stream_pages_inner(
    ctx: &QueryContext,
    pager: &mut dyn Pager,
    scope: &str,
    item_type: &str,
    mapper: &dyn RecordMapper,
    sink: &dyn QuerySink,
) -> Result<(), QueryError> {
    while pager.more() {
        ctx.check().map_err(|s| s.into_error(scope, item_type))?;

        let page = fetch_page(ctx, pager, scope, item_type).await?;

        for record in &page {
            ctx.check().map_err(|s| s.into_error(scope, item_type))?;
            match mapper.map_record(record, scope)? {
                Some(item) => sink.send_item(item),
                None => tracing::warn!("{}: skipping record without identity in {}", item_type, scope),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::sink::CollectingSink;
    use crate::testing::FakePager;
    use serde_json::json;

    fn mapper(record: &Value, scope: &str) -> Result<Option<Item>, QueryError> {
        let Some(name) = record.get("name").and_then(|v| v.as_str()).filter(|s| !s.is_empty())
        else {
            return Ok(None);
        };
        Ok(Some(Item::from_record("t", "name", name, scope, record, "labels")))
    }

    #[tokio::test]
    async fn test_collect_follows_every_page() {
        let mut pager = FakePager::new(vec![
            Ok(vec![json!({"name": "a"}), json!({"name": "b"})]),
            Ok(vec![json!({"name": "c"})]),
        ]);
        let items = collect_pages(&QueryContext::new(), &mut pager, "global", "t", &mapper)
            .await
            .unwrap();
        let names: Vec<_> = items.iter().map(|i| i.unique_attribute_value.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_collect_second_page_failure_returns_nothing() {
        let mut pager = FakePager::new(vec![
            Ok(vec![json!({"name": "a"})]),
            Err(anyhow::anyhow!("page two exploded")),
        ]);
        let err = collect_pages(&QueryContext::new(), &mut pager, "global", "t", &mapper)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::BackendError);
        assert!(err.message.contains("page two exploded"));
    }

    #[tokio::test]
    async fn test_collect_skips_records_without_identity() {
        let mut pager = FakePager::new(vec![Ok(vec![json!({"name": ""}), json!({"name": "ok"})])]);
        let items = collect_pages(&QueryContext::new(), &mut pager, "global", "t", &mapper)
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_stops_after_failed_page() {
        let mut pager = FakePager::new(vec![
            Ok(vec![json!({"name": "a"})]),
            Err(anyhow::anyhow!("boom")),
            Ok(vec![json!({"name": "never"})]),
        ]);
        let sink = CollectingSink::new();
        stream_pages(&QueryContext::new(), &mut pager, "global", "t", &mapper, &sink).await;

        assert_eq!(sink.items().len(), 1);
        assert_eq!(sink.errors().len(), 1);
        assert_eq!(pager.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_context_fetches_nothing() {
        let ctx = QueryContext::new();
        ctx.cancel();
        let mut pager = FakePager::new(vec![Ok(vec![json!({"name": "a"})])]);
        let err = collect_pages(&ctx, &mut pager, "global", "t", &mapper)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(pager.pages_fetched(), 0);
    }
}
