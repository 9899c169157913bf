//! Attribute catalog: resolves attribute names to their descriptors.
//!
//! Descriptors come from a [`MetadataSource`] and are kept in a snapshot that
//! is reloaded once it is older than the configured refresh window, so that
//! compiling a filter never queries the metadata tables per attribute.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use tracing::{debug, warn};

use crate::datatype::AttributeType;
use crate::error::{RepositoryError, Result};
use crate::sql::{is_identifier, NameHasher};

/// Main table columns that can be filtered and sorted on like optimized attributes.
pub const META_ATTRIBUTES: [(&str, AttributeType); 6] = [
    ("contentid", AttributeType::Text),
    ("obj_id", AttributeType::Integer),
    ("obj_type", AttributeType::Integer),
    ("mother_obj_id", AttributeType::Integer),
    ("mother_obj_type", AttributeType::Integer),
    ("updatetimestamp", AttributeType::Integer),
];

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    pub name: String,
    pub attribute_type: AttributeType,
    pub multivalue: bool,
    /// Set for optimized attributes: the denormalized column on the main table.
    pub quick_column: Option<String>,
    pub linked_object_type: Option<i64>,
    pub foreign_link_attribute: Option<String>,
    pub filesystem: bool,
    pub meta: bool,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            multivalue: false,
            quick_column: None,
            linked_object_type: None,
            foreign_link_attribute: None,
            filesystem: false,
            meta: false,
        }
    }
    fn meta_column(name: &str, attribute_type: AttributeType) -> Self {
        Self {
            quick_column: Some(name.to_string()),
            meta: true,
            ..Self::new(name, attribute_type)
        }
    }
    pub fn optimized(mut self, quick_column: impl Into<String>) -> Self {
        self.quick_column = Some(quick_column.into());
        self
    }
    pub fn multivalue(mut self) -> Self {
        self.multivalue = true;
        self
    }
    pub fn linking(mut self, object_type: i64) -> Self {
        self.linked_object_type = Some(object_type);
        self
    }
    pub fn foreign_link(mut self, object_type: i64, attribute: impl Into<String>) -> Self {
        self.linked_object_type = Some(object_type);
        self.foreign_link_attribute = Some(attribute.into());
        self
    }
    pub fn filesystem(mut self) -> Self {
        self.filesystem = true;
        self
    }
    pub fn is_optimized(&self) -> bool {
        self.quick_column.is_some()
    }
}

pub trait MetadataSource: Send + Sync {
    fn load_attributes(&self) -> Result<Vec<AttributeDescriptor>>;
}

/// Metadata held in memory, mostly useful for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticMetadata {
    attributes: Vec<AttributeDescriptor>,
}
impl StaticMetadata {
    pub fn new(attributes: Vec<AttributeDescriptor>) -> Self {
        Self { attributes }
    }
}
impl MetadataSource for StaticMetadata {
    fn load_attributes(&self) -> Result<Vec<AttributeDescriptor>> {
        Ok(self.attributes.clone())
    }
}

/// Reads the `contentattributetype` table.
pub struct SqliteMetadata {
    connection: Arc<Mutex<Connection>>,
}
impl SqliteMetadata {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
}
impl MetadataSource for SqliteMetadata {
    fn load_attributes(&self) -> Result<Vec<AttributeDescriptor>> {
        let connection = self
            .connection
            .lock()
            .map_err(|e| RepositoryError::DatasourceUnavailable(e.to_string()))?;
        let mut statement = connection.prepare_cached(
            "
            select name,
                    attributetype,
                    optimized,
                    quickname,
                    multivalue,
                    linkedobjecttype,
                    foreignlinkattribute,
                    filesystem
                from contentattributetype
                order by objecttype, name
        ",
        )?;
        let rows = statement.query_map([], |row| {
            let code: i64 = row.get(1)?;
            let optimized: bool = row.get(2)?;
            let quick_column: Option<String> = row.get(3)?;
            let linked_object_type: Option<i64> = row.get(5)?;
            Ok((
                row.get::<_, String>(0)?,
                code,
                quick_column.filter(|q| optimized && !q.is_empty()),
                row.get::<_, bool>(4)?,
                linked_object_type.filter(|t| *t > 0),
                row.get::<_, Option<String>>(6)?.filter(|a| !a.is_empty()),
                row.get::<_, bool>(7)?,
            ))
        })?;
        let mut attributes = Vec::new();
        for row in rows {
            let (name, code, quick_column, multivalue, linked, foreign, filesystem) = row?;
            let attribute_type = AttributeType::from_code(code).ok_or_else(|| {
                RepositoryError::Config(format!(
                    "attribute '{name}' has unknown attribute type {code}"
                ))
            })?;
            attributes.push(AttributeDescriptor {
                name,
                attribute_type,
                multivalue,
                quick_column,
                linked_object_type: linked,
                foreign_link_attribute: foreign,
                filesystem,
                meta: false,
            });
        }
        Ok(attributes)
    }
}

type Descriptors = HashMap<String, Arc<AttributeDescriptor>, NameHasher>;

struct Snapshot {
    attributes: Arc<Descriptors>,
    loaded_at: Instant,
}

pub struct AttributeCatalog {
    source: Box<dyn MetadataSource>,
    refresh_window: Duration,
    snapshot: Mutex<Option<Snapshot>>,
}

impl AttributeCatalog {
    pub const DEFAULT_REFRESH: Duration = Duration::from_secs(60);

    pub fn new(source: impl MetadataSource + 'static, refresh_window: Duration) -> Self {
        Self {
            source: Box::new(source),
            refresh_window,
            snapshot: Mutex::new(None),
        }
    }
    /// Resolves an attribute for use in a filter or sort expression.
    /// Filesystem-stored attributes are rejected outright.
    pub fn resolve(&self, name: &str) -> Result<Arc<AttributeDescriptor>> {
        let descriptor = self.lookup(name)?;
        if descriptor.filesystem {
            return Err(RepositoryError::FilesystemAttributeInFilter(name.to_string()));
        }
        Ok(descriptor)
    }
    /// Resolves an attribute without the filter restrictions.
    pub fn lookup(&self, name: &str) -> Result<Arc<AttributeDescriptor>> {
        self.current()?
            .get(name)
            .cloned()
            .ok_or_else(|| RepositoryError::AttributeNotFound(name.to_string()))
    }
    /// Forces the next resolution to reload the metadata.
    pub fn invalidate(&self) {
        if let Ok(mut snapshot) = self.snapshot.lock() {
            *snapshot = None;
        }
    }
    fn current(&self) -> Result<Arc<Descriptors>> {
        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|e| RepositoryError::DatasourceUnavailable(e.to_string()))?;
        if let Some(current) = snapshot.as_ref() {
            if current.loaded_at.elapsed() < self.refresh_window {
                return Ok(Arc::clone(&current.attributes));
            }
        }
        match self.load() {
            Ok(attributes) => {
                let attributes = Arc::new(attributes);
                *snapshot = Some(Snapshot {
                    attributes: Arc::clone(&attributes),
                    loaded_at: Instant::now(),
                });
                Ok(attributes)
            }
            Err(err) => match snapshot.as_mut() {
                Some(stale) => {
                    warn!(error = %err, "reloading attribute metadata failed, keeping previous snapshot");
                    stale.loaded_at = Instant::now();
                    Ok(Arc::clone(&stale.attributes))
                }
                None => Err(err),
            },
        }
    }
    fn load(&self) -> Result<Descriptors> {
        let mut attributes = Descriptors::default();
        for (name, attribute_type) in META_ATTRIBUTES {
            attributes.insert(
                name.to_string(),
                Arc::new(AttributeDescriptor::meta_column(name, attribute_type)),
            );
        }
        for mut descriptor in self.source.load_attributes()? {
            if attributes.contains_key(&descriptor.name) {
                continue;
            }
            if let Some(quick) = &descriptor.quick_column {
                if !is_identifier(quick) {
                    return Err(RepositoryError::InvalidIdentifier(quick.clone()));
                }
                if descriptor.multivalue {
                    warn!(attribute = %descriptor.name, "multivalue attributes cannot be optimized, ignoring quick column");
                    descriptor.quick_column = None;
                }
            }
            if descriptor.attribute_type == AttributeType::ForeignLinkObject
                && (descriptor.linked_object_type.is_none() || descriptor.foreign_link_attribute.is_none())
            {
                return Err(RepositoryError::Config(format!(
                    "foreign link attribute '{}' needs a linked object type and a foreign link attribute",
                    descriptor.name
                )));
            }
            attributes.insert(descriptor.name.clone(), Arc::new(descriptor));
        }
        debug!(attributes = attributes.len(), "attribute metadata loaded");
        Ok(attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        loads: Arc<AtomicUsize>,
    }
    impl MetadataSource for CountingSource {
        fn load_attributes(&self) -> Result<Vec<AttributeDescriptor>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![
                AttributeDescriptor::new("name", AttributeType::Text),
                AttributeDescriptor::new("image", AttributeType::Binary).filesystem(),
            ])
        }
    }

    /// Succeeds for the first `healthy` loads, then fails.
    struct FlakySource {
        loads: Arc<AtomicUsize>,
        healthy: usize,
    }
    impl MetadataSource for FlakySource {
        fn load_attributes(&self) -> Result<Vec<AttributeDescriptor>> {
            if self.loads.fetch_add(1, Ordering::SeqCst) < self.healthy {
                Ok(vec![AttributeDescriptor::new("name", AttributeType::Text)])
            } else {
                Err(RepositoryError::DatasourceUnavailable("metadata offline".to_string()))
            }
        }
    }

    #[test]
    fn resolves_meta_and_source_attributes() {
        let catalog = AttributeCatalog::new(
            StaticMetadata::new(vec![AttributeDescriptor::new("name", AttributeType::Text)]),
            AttributeCatalog::DEFAULT_REFRESH,
        );
        assert!(catalog.resolve("obj_type").unwrap().meta);
        assert_eq!(catalog.resolve("name").unwrap().attribute_type, AttributeType::Text);
        assert!(matches!(
            catalog.resolve("missing"),
            Err(RepositoryError::AttributeNotFound(_))
        ));
    }

    #[test]
    fn filesystem_attributes_are_rejected_in_filters() {
        let loads = Arc::new(AtomicUsize::new(0));
        let catalog = AttributeCatalog::new(
            CountingSource { loads: Arc::clone(&loads) },
            AttributeCatalog::DEFAULT_REFRESH,
        );
        let err = catalog.resolve("image").unwrap_err();
        assert!(matches!(err, RepositoryError::FilesystemAttributeInFilter(_)));
        assert!(err.is_attribute_resolution());
        assert!(catalog.lookup("image").is_ok());
    }

    #[test]
    fn snapshot_is_reused_within_refresh_window() {
        let loads = Arc::new(AtomicUsize::new(0));
        let catalog = AttributeCatalog::new(
            CountingSource { loads: Arc::clone(&loads) },
            AttributeCatalog::DEFAULT_REFRESH,
        );
        catalog.resolve("name").unwrap();
        catalog.resolve("name").unwrap();
        let _ = catalog.resolve("unknown");
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        catalog.invalidate();
        catalog.resolve("name").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_reload_keeps_the_previous_snapshot() {
        let loads = Arc::new(AtomicUsize::new(0));
        let catalog = AttributeCatalog::new(
            FlakySource { loads: Arc::clone(&loads), healthy: 1 },
            Duration::ZERO,
        );
        assert_eq!(catalog.resolve("name").unwrap().attribute_type, AttributeType::Text);
        assert_eq!(catalog.resolve("name").unwrap().attribute_type, AttributeType::Text);
        assert!(catalog.resolve("obj_type").is_ok());
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn failed_first_load_is_an_error() {
        let loads = Arc::new(AtomicUsize::new(0));
        let catalog = AttributeCatalog::new(
            FlakySource { loads: Arc::clone(&loads), healthy: 0 },
            Duration::ZERO,
        );
        assert!(matches!(
            catalog.resolve("name"),
            Err(RepositoryError::DatasourceUnavailable(_))
        ));
        assert!(catalog.lookup("obj_type").is_err());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn zero_window_reloads_every_time() {
        let loads = Arc::new(AtomicUsize::new(0));
        let catalog = AttributeCatalog::new(
            CountingSource { loads: Arc::clone(&loads) },
            Duration::ZERO,
        );
        catalog.resolve("name").unwrap();
        catalog.resolve("name").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn multivalue_attributes_lose_their_quick_column() {
        let catalog = AttributeCatalog::new(
            StaticMetadata::new(vec![
                AttributeDescriptor::new("tags", AttributeType::Text)
                    .multivalue()
                    .optimized("quick_tags"),
            ]),
            AttributeCatalog::DEFAULT_REFRESH,
        );
        assert!(!catalog.resolve("tags").unwrap().is_optimized());
    }

    #[test]
    fn unsafe_quick_columns_are_refused() {
        let catalog = AttributeCatalog::new(
            StaticMetadata::new(vec![
                AttributeDescriptor::new("name", AttributeType::Text).optimized("quick; drop table x"),
            ]),
            AttributeCatalog::DEFAULT_REFRESH,
        );
        assert!(matches!(
            catalog.resolve("name"),
            Err(RepositoryError::InvalidIdentifier(_))
        ));
    }
}
