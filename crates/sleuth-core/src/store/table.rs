//! Durable table abstraction and the bundled table implementations.

use super::StoreError;
use super::attribute::{AttributeValue, Item};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Equality filter applied to scanned items.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFilter {
    pub attribute: String,
    pub equals: AttributeValue,
}

impl ScanFilter {
    pub fn attribute_eq(attribute: impl Into<String>, equals: impl Into<AttributeValue>) -> Self {
        Self {
            attribute: attribute.into(),
            equals: equals.into(),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        item.get(&self.attribute) == Some(&self.equals)
    }
}

/// One page of scan results.
///
/// `last_evaluated_key` is set while more items remain; pass it back as the
/// start key of the next call.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub items: Vec<Item>,
    pub last_evaluated_key: Option<String>,
}

/// A key-value table keyed by `job_id`.
#[async_trait]
pub trait JobTable: Send + Sync {
    /// Writes the item, replacing any existing item with the same key.
    async fn put_item(&self, item: Item) -> Result<(), StoreError>;

    async fn get_item(&self, job_id: &str) -> Result<Option<Item>, StoreError>;

    /// Returns one page of items matching `filter`, starting after `start_key`.
    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start_key: Option<&str>,
    ) -> Result<ScanPage, StoreError>;
}

fn item_key(item: &Item) -> Result<String, StoreError> {
    item.get(super::record::JOB_ID)
        .and_then(AttributeValue::as_s)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Backend("item has no job_id key".to_string()))
}

/// Evaluates one page the way a remote store does: `page_size` items are
/// read in key order, then filtered, so a page can be empty while more
/// items remain.
fn paginate(
    items: &BTreeMap<String, Item>,
    filter: &ScanFilter,
    start_key: Option<&str>,
    page_size: usize,
) -> ScanPage {
    let mut remaining = items
        .iter()
        .filter(|(key, _)| start_key.is_none_or(|start| key.as_str() > start))
        .peekable();

    let mut page = ScanPage::default();
    let mut last_read = None;
    for _ in 0..page_size {
        let Some((key, item)) = remaining.next() else {
            break;
        };
        if filter.matches(item) {
            page.items.push(item.clone());
        }
        last_read = Some(key.clone());
    }
    if remaining.peek().is_some() {
        page.last_evaluated_key = last_read;
    }
    page
}

/// In-process table. Used by tests and when no durable path is configured.
pub struct MemoryTable {
    items: Mutex<BTreeMap<String, Item>>,
    page_size: usize,
    scan_calls: AtomicUsize,
}

impl MemoryTable {
    pub fn new(page_size: usize) -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            page_size: page_size.max(1),
            scan_calls: AtomicUsize::new(0),
        }
    }

    /// Number of `scan_page` calls served so far.
    pub fn scan_calls(&self) -> usize {
        self.scan_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Item>> {
        self.items
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for MemoryTable {
    fn default() -> Self {
        Self::new(100)
    }
}

#[async_trait]
impl JobTable for MemoryTable {
    async fn put_item(&self, item: Item) -> Result<(), StoreError> {
        let key = item_key(&item)?;
        self.lock().insert(key, item);
        Ok(())
    }

    async fn get_item(&self, job_id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.lock().get(job_id).cloned())
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start_key: Option<&str>,
    ) -> Result<ScanPage, StoreError> {
        self.scan_calls.fetch_add(1, Ordering::Relaxed);
        Ok(paginate(&self.lock(), filter, start_key, self.page_size))
    }
}

/// Table persisted as a single JSON document.
///
/// Every write rewrites the document through a temporary file and a rename,
/// so readers never observe a partial file.
pub struct JsonFileTable {
    path: PathBuf,
    page_size: usize,
    write_lock: AsyncMutex<()>,
}

impl JsonFileTable {
    pub fn new(path: impl Into<PathBuf>, page_size: usize) -> Self {
        Self {
            path: path.into(),
            page_size: page_size.max(1),
            write_lock: AsyncMutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<BTreeMap<String, Item>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(BTreeMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, items: &BTreeMap<String, Item>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(items)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), items = items.len(), "Saved job table");
        Ok(())
    }
}

#[async_trait]
impl JobTable for JsonFileTable {
    async fn put_item(&self, item: Item) -> Result<(), StoreError> {
        let key = item_key(&item)?;
        let _guard = self.write_lock.lock().await;
        let mut items = self.load().await?;
        items.insert(key, item);
        self.save(&items).await
    }

    async fn get_item(&self, job_id: &str) -> Result<Option<Item>, StoreError> {
        Ok(self.load().await?.remove(job_id))
    }

    async fn scan_page(
        &self,
        filter: &ScanFilter,
        start_key: Option<&str>,
    ) -> Result<ScanPage, StoreError> {
        let items = self.load().await?;
        Ok(paginate(&items, filter, start_key, self.page_size))
    }
}
