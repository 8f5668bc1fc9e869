//! Scan queue
//!
//! Loads one page ("batch") of content items at a time and schedules the
//! follow-up batch when more pages remain.

mod memory;

pub use memory::MemoryContentRepository;

use crate::clock::Clock;
use crate::config::ScanConfig;
use crate::jobs::{schedule_or_report, EventSink, JobScheduler, ScanJob};
use crate::storage::StorageResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A piece of site content whose links and images get checked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    pub title: String,
    pub body_html: String,
    pub modified_at: DateTime<Utc>,
    pub content_type: String,
    pub status: String,
    #[serde(default)]
    pub permalink: Option<String>,
}

/// Filter and page for a content query
#[derive(Debug, Clone, PartialEq)]
pub struct ContentQuery {
    pub content_types: Vec<String>,
    pub statuses: Vec<String>,
    /// Only items modified strictly after this instant
    pub modified_after: Option<DateTime<Utc>>,
    pub offset: u64,
    pub limit: u32,
}

impl ContentQuery {
    /// Whether an item passes the filter, ignoring paging
    pub fn matches(&self, item: &ContentItem) -> bool {
        self.content_types.iter().any(|t| t == &item.content_type)
            && self.statuses.iter().any(|s| s == &item.status)
            && self.modified_after.map_or(true, |after| item.modified_at > after)
    }
}

/// One page of content plus the total number of matches
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentPage {
    pub items: Vec<ContentItem>,
    pub total: u64,
}

/// Read access to the site's content
pub trait ContentRepository: Send + Sync {
    /// Returns matching items ordered by id
    fn query(&self, query: &ContentQuery) -> StorageResult<ContentPage>;

    /// Canonical URL of an item
    fn permalink(&self, id: i64) -> StorageResult<Option<String>>;
}

/// One batch of content
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchResult {
    pub batch_index: u32,
    pub items: Vec<ContentItem>,
    pub has_more_pages: bool,
}

/// What happened to the follow-up batch
#[derive(Debug, Clone, PartialEq)]
pub enum NextBatch {
    /// This was the last page
    Done,
    Scheduled(ScanJob),
    /// The scheduler refused; an event was raised
    SchedulingFailed(ScanJob),
}

/// Pages through content in fixed-size batches
pub struct ScanQueue {
    repository: Arc<dyn ContentRepository>,
    scheduler: Arc<dyn JobScheduler>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    batch_size: u32,
    batch_delay: u64,
    content_types: Vec<String>,
    statuses: Vec<String>,
}

impl ScanQueue {
    pub fn new(
        config: &ScanConfig,
        repository: Arc<dyn ContentRepository>,
        scheduler: Arc<dyn JobScheduler>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            scheduler,
            events,
            clock,
            batch_size: config.batch_size.max(1),
            batch_delay: config.batch_delay,
            content_types: config.content_types.clone(),
            statuses: config.statuses.clone(),
        }
    }

    pub fn repository(&self) -> &Arc<dyn ContentRepository> {
        &self.repository
    }

    /// Loads one batch of content
    ///
    /// # Arguments
    ///
    /// * `batch_index` - Zero-based page number
    /// * `is_full_scan` - Scan everything instead of changes since `last_check`
    /// * `last_check` - UTC checkpoint of the previous completed scan
    pub fn load_batch(
        &self,
        batch_index: u32,
        is_full_scan: bool,
        last_check: Option<DateTime<Utc>>,
    ) -> StorageResult<BatchResult> {
        let offset = u64::from(batch_index) * u64::from(self.batch_size);
        let query = ContentQuery {
            content_types: self.content_types.clone(),
            statuses: self.statuses.clone(),
            modified_after: if is_full_scan { None } else { last_check },
            offset,
            limit: self.batch_size,
        };

        let page = self.repository.query(&query)?;
        let has_more_pages = offset + (page.items.len() as u64) < page.total;

        tracing::debug!(
            "Loaded batch {} ({} items of {}, more: {})",
            batch_index,
            page.items.len(),
            page.total,
            has_more_pages
        );

        Ok(BatchResult {
            batch_index,
            items: page.items,
            has_more_pages,
        })
    }

    /// Schedules the next batch after `batch-delay` seconds when pages remain
    ///
    /// A scheduler refusal is logged and raised as an event; it never
    /// invalidates the batch that was just processed.
    pub fn schedule_next_batch_if_needed(&self, job: &ScanJob, batch: &BatchResult) -> NextBatch {
        if !batch.has_more_pages {
            return NextBatch::Done;
        }

        let at = self.clock.now() + Duration::seconds(self.batch_delay as i64);
        let next = job.next_batch(at);

        if schedule_or_report(self.scheduler.as_ref(), self.events.as_ref(), &next, "next_batch") {
            NextBatch::Scheduled(next)
        } else {
            tracing::warn!("Could not schedule batch {}", next.batch_index);
            NextBatch::SchedulingFailed(next)
        }
    }
}
