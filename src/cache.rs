//! Result cache: memoizes executed statements by their text, parameters and page.
//!
//! The cache is never invalidated by reads. Whoever writes to the content
//! tables is expected to call [`ResultCache::clear`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use tracing::{trace, warn};

use crate::datatype::Value;
use crate::error::{RepositoryError, Result};
use crate::sql::{CompiledQuery, NameHasher};

pub type Rows = Arc<Vec<Vec<Value>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub datasource: String,
    pub sql: String,
    pub params: Vec<String>,
    pub start: usize,
    pub count: Option<usize>,
    pub counting: bool,
}

impl CacheKey {
    fn new(datasource: &str, query: &CompiledQuery, start: usize, count: Option<usize>, counting: bool) -> Self {
        Self {
            datasource: datasource.to_string(),
            sql: query.sql.clone(),
            params: query.params.iter().map(Value::cache_repr).collect(),
            start,
            count,
            counting,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CachedResult {
    Rows(Rows),
    Count(usize),
}

/// Storage behind the result cache. Shared between threads.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>>;
    fn put(&self, key: CacheKey, value: CachedResult) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Never stores anything.
#[derive(Debug, Default)]
pub struct DisabledCache;

impl CacheBackend for DisabledCache {
    fn get(&self, _key: &CacheKey) -> Result<Option<CachedResult>> {
        Ok(None)
    }
    fn put(&self, _key: CacheKey, _value: CachedResult) -> Result<()> {
        Ok(())
    }
    fn clear(&self) -> Result<()> {
        Ok(())
    }
}

/// In-process cache evicting the least recently used entries.
pub struct LruCacheBackend {
    entries: Mutex<LruCache<CacheKey, CachedResult, NameHasher>>,
}

impl LruCacheBackend {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::with_hasher(capacity, NameHasher::default())),
        }
    }
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheBackend for LruCacheBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RepositoryError::Cache(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }
    fn put(&self, key: CacheKey, value: CachedResult) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RepositoryError::Cache(e.to_string()))?;
        entries.put(key, value);
        Ok(())
    }
    fn clear(&self) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| RepositoryError::Cache(e.to_string()))?;
        entries.clear();
        Ok(())
    }
}

/// Wraps statement execution with the cache of one datasource. Backend
/// failures are logged and treated as misses.
///
/// The backend may be shared by several datasources; entries stay apart
/// because the datasource name is part of every key. Clearing empties the
/// whole backend.
pub struct ResultCache {
    datasource: String,
    backend: Arc<dyn CacheBackend>,
}

impl ResultCache {
    pub fn new(datasource: impl Into<String>, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            datasource: datasource.into(),
            backend,
        }
    }
    pub fn disabled(datasource: impl Into<String>) -> Self {
        Self::new(datasource, Arc::new(DisabledCache))
    }

    /// The rows of `query` for the page `start`/`count`, computed on a miss.
    pub fn rows<F>(&self, query: &CompiledQuery, start: usize, count: Option<usize>, compute: F) -> Result<Rows>
    where
        F: FnOnce() -> Result<Vec<Vec<Value>>>,
    {
        let key = CacheKey::new(&self.datasource, query, start, count, false);
        if let Some(CachedResult::Rows(rows)) = self.lookup(&key) {
            return Ok(rows);
        }
        let rows: Rows = Arc::new(compute()?);
        self.store(key, CachedResult::Rows(Arc::clone(&rows)));
        Ok(rows)
    }

    pub fn count<F>(&self, query: &CompiledQuery, compute: F) -> Result<usize>
    where
        F: FnOnce() -> Result<usize>,
    {
        let key = CacheKey::new(&self.datasource, query, 0, None, true);
        if let Some(CachedResult::Count(count)) = self.lookup(&key) {
            return Ok(count);
        }
        let count = compute()?;
        self.store(key, CachedResult::Count(count));
        Ok(count)
    }

    pub fn clear(&self) {
        if let Err(err) = self.backend.clear() {
            warn!(error = %err, datasource = %self.datasource, "clearing the result cache failed");
        }
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedResult> {
        match self.backend.get(key) {
            Ok(hit) => {
                trace!(hit = hit.is_some(), "result cache lookup");
                hit
            }
            Err(err) => {
                warn!(error = %err, "result cache lookup failed");
                None
            }
        }
    }

    fn store(&self, key: CacheKey, value: CachedResult) {
        if let Err(err) = self.backend.put(key, value) {
            warn!(error = %err, "result cache store failed");
        }
    }
}
