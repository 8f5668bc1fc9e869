use crate::queue::{ContentItem, ContentPage, ContentQuery, ContentRepository};
use crate::storage::StorageResult;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// Content repository backed by a vector, for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryContentRepository {
    items: RwLock<Vec<ContentItem>>,
    queries: AtomicUsize,
}

impl MemoryContentRepository {
    pub fn new(mut items: Vec<ContentItem>) -> Self {
        items.sort_by_key(|item| item.id);
        Self {
            items: RwLock::new(items),
            queries: AtomicUsize::new(0),
        }
    }

    /// Number of `query` calls served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

impl ContentRepository for MemoryContentRepository {
    fn query(&self, query: &ContentQuery) -> StorageResult<ContentPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        let items = self.items.read().map_err(|_| {
            crate::storage::StorageError::Database("content lock poisoned".to_string())
        })?;
        let matching: Vec<&ContentItem> = items.iter().filter(|item| query.matches(item)).collect();

        Ok(ContentPage {
            total: matching.len() as u64,
            items: matching
                .into_iter()
                .skip(query.offset as usize)
                .take(query.limit as usize)
                .cloned()
                .collect(),
        })
    }

    fn permalink(&self, id: i64) -> StorageResult<Option<String>> {
        let items = self.items.read().map_err(|_| {
            crate::storage::StorageError::Database("content lock poisoned".to_string())
        })?;
        Ok(items
            .iter()
            .find(|item| item.id == id)
            .and_then(|item| item.permalink.clone()))
    }
}
