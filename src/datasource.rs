//! The read side of a content repository: compiles filters against one
//! database and returns content objects or counts.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheBackend, ResultCache};
use crate::catalog::{AttributeCatalog, MetadataSource, SqliteMetadata};
use crate::config::RepositoryConfig;
use crate::error::{RepositoryError, Result};
use crate::executor::{ContentObject, SqlExecutor, SqliteExecutor};
use crate::filter::Filter;
use crate::persist::Persistor;
use crate::query::{QueryBuilder, SelectPlan, Sort};
use crate::session::CompilerContext;
use crate::sql::CompiledQuery;
use crate::versioning::Versioning;

pub struct Datasource {
    name: String,
    context: CompilerContext,
    executor: Arc<dyn SqlExecutor>,
    cache: ResultCache,
    prefetch: Vec<String>,
}

impl Datasource {
    pub fn new(
        config: &RepositoryConfig,
        executor: impl SqlExecutor + 'static,
        metadata: impl MetadataSource + 'static,
        cache: Arc<dyn CacheBackend>,
    ) -> Result<Self> {
        let dialect = config.dialect_kind()?;
        let catalog = Arc::new(AttributeCatalog::new(metadata, config.refresh_window()));
        info!(datasource = %config.datasource, %dialect, cache = config.cache.enabled, "datasource created");
        Ok(Self {
            name: config.datasource.clone(),
            context: CompilerContext::new(catalog, dialect),
            executor: Arc::new(executor),
            cache: ResultCache::new(config.datasource.clone(), cache),
            prefetch: config.prefetch_attributes.clone(),
        })
    }

    /// Opens the configured SQLite database, creating the content tables when missing.
    pub fn open(config: &RepositoryConfig) -> Result<Self> {
        Self::open_with_cache(config, config.cache_backend())
    }

    /// Like [`Datasource::open`], storing results in a cache backend that
    /// other datasources may use as well.
    pub fn open_with_cache(config: &RepositoryConfig, cache: Arc<dyn CacheBackend>) -> Result<Self> {
        let executor = SqliteExecutor::open(&config.database)?;
        let connection = executor.connection();
        {
            let guard = connection
                .lock()
                .map_err(|e| RepositoryError::DatasourceUnavailable(e.to_string()))?;
            Persistor::new(&guard)?;
        }
        let metadata = SqliteMetadata::new(Arc::clone(&connection));
        Self::new(config, executor, metadata, cache)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn context(&self) -> &CompilerContext {
        &self.context
    }

    fn plan(
        &self,
        filter: &Filter,
        sorts: &[Sort],
        start: usize,
        count: Option<usize>,
        as_of: Option<i64>,
    ) -> Result<SelectPlan> {
        let versioning = Versioning::from_timestamp(as_of);
        let mut builder = QueryBuilder::new(&self.context, filter.expression(), versioning)?;
        // post filters drop rows, so pages can only be cut after them
        let native = !filter.has_post_filters();
        builder.select(sorts, &self.prefetch, start, count, native)
    }

    /// The SELECT statement `get_result` would run.
    pub fn compile_select(
        &self,
        filter: &Filter,
        sorts: &[Sort],
        start: usize,
        count: Option<usize>,
        as_of: Option<i64>,
    ) -> Result<CompiledQuery> {
        Ok(self.plan(filter, sorts, start, count, as_of)?.query)
    }

    /// The COUNT statement `count` would run when no post filter is attached.
    pub fn compile_count(&self, filter: &Filter, as_of: Option<i64>) -> Result<CompiledQuery> {
        let builder = QueryBuilder::new(&self.context, filter.expression(), Versioning::from_timestamp(as_of))?;
        Ok(builder.count())
    }

    pub fn get_result(
        &self,
        filter: &Filter,
        sorts: &[Sort],
        start: usize,
        count: Option<usize>,
        as_of: Option<i64>,
    ) -> Result<Vec<ContentObject>> {
        let plan = self.plan(filter, sorts, start, count, as_of)?;
        let rows = self
            .cache
            .rows(&plan.query, start, count, || self.executor.query(&plan.query))?;
        let mut objects = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            let object = ContentObject::from_row(row.clone(), &plan.layout)?;
            if filter.accepts(&object) {
                objects.push(object);
            }
        }
        let objects = match plan.slice {
            Some(slice) => slice.apply(objects),
            None => objects,
        };
        debug!(datasource = %self.name, objects = objects.len(), "result fetched");
        Ok(objects)
    }

    pub fn count(&self, filter: &Filter, as_of: Option<i64>) -> Result<usize> {
        if filter.has_post_filters() {
            return Ok(self.get_result(filter, &[], 0, None, as_of)?.len());
        }
        let query = self.compile_count(filter, as_of)?;
        self.cache.count(&query, || {
            let rows = self.executor.query(&query)?;
            rows.first()
                .and_then(|row| row.first())
                .and_then(|value| value.as_i64())
                .map(|count| count.max(0) as usize)
                .ok_or_else(|| RepositoryError::QueryFailed {
                    sql: query.sql.clone(),
                    params: query.params_display(),
                    message: "count returned no value".to_string(),
                })
        })
    }

    /// Drops every cached result. Called after writes.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Forces the attribute metadata to be reloaded on next use.
    pub fn refresh_metadata(&self) {
        self.context.catalog.invalidate();
    }
}
