//! Schema creation and a simple loader for content objects and their history.
//!
//! The loader writes the rows the query compiler reads: the main row with
//! its quick columns, one attribute row per value and the `_nodeversion`
//! shadow rows. It is meant for seeding test and demo databases and gives
//! no transactional guarantees.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension, Statement, params};
use tracing::debug;

use crate::catalog::AttributeDescriptor;
use crate::datatype::{AttributeType, ContentId, Value};
use crate::error::{RepositoryError, Result};
use crate::sql::{NameHasher, is_identifier};

/// One object as written by [`Persistor::add_object`].
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    pub content_id: ContentId,
    pub mother: Option<ContentId>,
    pub update_timestamp: i64,
    /// Attribute values in sort order, per attribute name.
    pub attributes: Vec<(String, Vec<Value>)>,
}

impl ContentRecord {
    pub fn new(content_id: ContentId) -> Self {
        Self {
            content_id,
            mother: None,
            update_timestamp: 0,
            attributes: Vec::new(),
        }
    }
    pub fn mother(mut self, mother: ContentId) -> Self {
        self.mother = Some(mother);
        self
    }
    pub fn updated(mut self, timestamp: i64) -> Self {
        self.update_timestamp = timestamp;
        self
    }
    pub fn attribute(self, name: &str, value: impl Into<Value>) -> Self {
        self.values(name, vec![value.into()])
    }
    pub fn values(mut self, name: &str, values: Vec<Value>) -> Self {
        self.attributes.retain(|(existing, _)| existing != name);
        self.attributes.push((name.to_string(), values));
        self
    }
}

pub struct Persistor<'db> {
    pub db: &'db Connection,
    // Adders
    pub add_attribute: Statement<'db>,
    pub add_attribute_type: Statement<'db>,
    // Lookups
    pub get_object_id: Statement<'db>,
    pub attribute_types: HashMap<String, AttributeDescriptor, NameHasher>,
}

impl<'db> Persistor<'db> {
    pub fn new<'connection>(connection: &'connection Connection) -> Result<Persistor<'connection>> {
        connection.execute_batch(
            "
            create table if not exists contentmap (
                id integer primary key autoincrement,
                contentid text not null,
                obj_id integer not null,
                obj_type integer not null,
                mother_obj_id integer not null default 0,
                mother_obj_type integer not null default 0,
                updatetimestamp integer not null default 0,
                constraint unique_contentid unique (
                    contentid
                )
            );
            create table if not exists contentattribute (
                id integer primary key autoincrement,
                contentid text not null,
                name text not null,
                value_text text null,
                value_int integer null,
                value_blob blob null,
                value_clob text null,
                value_long integer null,
                value_double real null,
                value_date text null,
                sortorder integer null
            );
            create index if not exists contentattribute_lookup on contentattribute (
                contentid,
                name
            );
            create table if not exists contentattributetype (
                name text not null,
                attributetype integer not null,
                optimized integer not null default 0,
                quickname text null,
                multivalue integer not null default 0,
                objecttype integer not null,
                linkedobjecttype integer null,
                foreignlinkattribute text null,
                foreignlinkattributerule text null,
                exclude_versioning integer not null default 0,
                filesystem integer not null default 0
            );
            create table if not exists contentmap_nodeversion (
                id integer not null,
                contentid text not null,
                obj_id integer not null,
                obj_type integer not null,
                mother_obj_id integer not null default 0,
                mother_obj_type integer not null default 0,
                updatetimestamp integer not null default 0,
                nodeversiontimestamp integer not null,
                nodeversion_user text null,
                nodeversionlatest integer not null default 0,
                nodeversionremoved integer not null default 0,
                nodeversion_autoupdate integer not null default 0
            );
            create table if not exists contentattribute_nodeversion (
                id integer not null,
                contentid text not null,
                name text not null,
                value_text text null,
                value_int integer null,
                value_blob blob null,
                value_clob text null,
                value_long integer null,
                value_double real null,
                value_date text null,
                sortorder integer null,
                nodeversiontimestamp integer not null,
                nodeversion_user text null,
                nodeversionlatest integer not null default 0,
                nodeversionremoved integer not null default 0,
                nodeversion_autoupdate integer not null default 0
            );
            ",
        )?;
        let mut persistor = Persistor {
            db: connection,
            add_attribute: connection.prepare(
                "
                insert into contentattribute (
                    contentid,
                    name,
                    value_text,
                    value_int,
                    value_blob,
                    value_clob,
                    value_long,
                    value_double,
                    value_date,
                    sortorder
                ) values (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            )?,
            add_attribute_type: connection.prepare(
                "
                insert into contentattributetype (
                    name,
                    attributetype,
                    optimized,
                    quickname,
                    multivalue,
                    objecttype,
                    linkedobjecttype,
                    foreignlinkattribute,
                    filesystem
                ) values (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
            )?,
            get_object_id: connection.prepare(
                "
                select id
                    from contentmap
                    where contentid = ?
            ",
            )?,
            attribute_types: HashMap::default(),
        };
        persistor.restore_attribute_types()?;
        Ok(persistor)
    }

    fn restore_attribute_types(&mut self) -> Result<()> {
        let db = self.db;
        let mut statement = db.prepare(
            "
            select name,
                    attributetype,
                    optimized,
                    quickname,
                    multivalue
                from contentattributetype
        ",
        )?;
        let rows = statement.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, bool>(4)?,
            ))
        })?;
        for row in rows {
            let (name, code, optimized, quick_column, multivalue) = row?;
            let Some(attribute_type) = AttributeType::from_code(code) else {
                continue;
            };
            let mut descriptor = AttributeDescriptor::new(&name, attribute_type);
            descriptor.multivalue = multivalue;
            descriptor.quick_column = quick_column.filter(|q| optimized && !q.is_empty());
            self.attribute_types.insert(name, descriptor);
        }
        Ok(())
    }

    /// Registers an attribute for `object_type`. Optimized attributes get
    /// their quick column on the main table and its shadow.
    pub fn add_attribute_type(&mut self, object_type: i64, descriptor: &AttributeDescriptor) -> Result<()> {
        if let Some(quick) = &descriptor.quick_column {
            if !is_identifier(quick) {
                return Err(RepositoryError::InvalidIdentifier(quick.clone()));
            }
            for table in ["contentmap", "contentmap_nodeversion"] {
                if !self.has_column(table, quick)? {
                    self.db.execute_batch(&format!(
                        "alter table {table} add column {quick} {}",
                        descriptor.attribute_type.sql_type()
                    ))?;
                }
            }
        }
        self.add_attribute_type.execute(params![
            &descriptor.name,
            descriptor.attribute_type.code(),
            descriptor.quick_column.is_some(),
            &descriptor.quick_column,
            descriptor.multivalue,
            object_type,
            descriptor.linked_object_type,
            &descriptor.foreign_link_attribute,
            descriptor.filesystem,
        ])?;
        self.attribute_types
            .entry(descriptor.name.clone())
            .or_insert_with(|| descriptor.clone());
        Ok(())
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let mut statement = self.db.prepare(&format!("pragma table_info({table})"))?;
        let names = statement.query_map([], |row| row.get::<_, String>(1))?;
        for name in names {
            if name?.eq_ignore_ascii_case(column) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn descriptor(&self, name: &str) -> Result<&AttributeDescriptor> {
        self.attribute_types
            .get(name)
            .ok_or_else(|| RepositoryError::AttributeNotFound(name.to_string()))
    }

    /// Quick column names and values for the optimized attributes of `record`.
    fn quick_values(&self, record: &ContentRecord) -> Result<Vec<(String, Value)>> {
        let mut quick = Vec::new();
        for (name, values) in &record.attributes {
            let descriptor = self.descriptor(name)?;
            if let Some(column) = &descriptor.quick_column {
                let value = values
                    .first()
                    .cloned()
                    .unwrap_or(Value::Null)
                    .coerce(descriptor.attribute_type);
                quick.push((column.clone(), value));
            }
        }
        Ok(quick)
    }

    /// Stored attribute rows of `record`: name, value column, value and sort order.
    fn attribute_rows(&self, record: &ContentRecord) -> Result<Vec<(String, &'static str, Value, i64)>> {
        let mut rows = Vec::new();
        for (name, values) in &record.attributes {
            let descriptor = self.descriptor(name)?;
            // foreign links are computed from the linking side
            let Some(column) = descriptor.attribute_type.value_column() else {
                continue;
            };
            for (i, value) in values.iter().enumerate() {
                rows.push((
                    name.clone(),
                    column,
                    value.clone().coerce(descriptor.attribute_type),
                    i as i64 + 1,
                ));
            }
        }
        Ok(rows)
    }

    /// Writes the live rows of `record`, replacing a previous state of the object.
    pub fn add_object(&mut self, record: &ContentRecord) -> Result<()> {
        let contentid = record.content_id.to_string();
        let quick = self.quick_values(record)?;
        let rows = self.attribute_rows(record)?;
        let existing: Option<i64> = self
            .get_object_id
            .query_row(params![&contentid], |row| row.get(0))
            .optional()?;
        if existing.is_some() {
            self.db
                .execute("delete from contentmap where contentid = ?", params![&contentid])?;
            self.db
                .execute("delete from contentattribute where contentid = ?", params![&contentid])?;
        }
        let (mother_type, mother_id) = record
            .mother
            .map(|m| (m.object_type(), m.object_id()))
            .unwrap_or((0, 0));
        let mut columns = vec![
            "contentid".to_string(),
            "obj_id".to_string(),
            "obj_type".to_string(),
            "mother_obj_id".to_string(),
            "mother_obj_type".to_string(),
            "updatetimestamp".to_string(),
        ];
        let mut values = vec![
            Value::Text(contentid.clone()),
            Value::Integer(record.content_id.object_id()),
            Value::Integer(record.content_id.object_type()),
            Value::Integer(mother_id),
            Value::Integer(mother_type),
            Value::Integer(record.update_timestamp),
        ];
        if let Some(id) = existing {
            columns.push("id".to_string());
            values.push(Value::Integer(id));
        }
        for (column, value) in quick {
            columns.push(column);
            values.push(value);
        }
        insert(self.db, "contentmap", &columns, &values)?;
        for (name, column, value, sortorder) in rows {
            let mut slots: [Value; 7] = std::array::from_fn(|_| Value::Null);
            slots[value_slot(column)] = value;
            let [text, int, blob, clob, long, double, date] = slots;
            self.add_attribute.execute(params![
                &contentid, &name, text, int, blob, clob, long, double, date, sortorder
            ])?;
        }
        debug!(contentid = %contentid, "object stored");
        Ok(())
    }

    /// Appends a historical version of `record` valid from `timestamp`,
    /// optionally marked as removed at `removed`. Attribute values missing
    /// from `record` are marked as removed at `timestamp`.
    pub fn add_object_version(&mut self, record: &ContentRecord, timestamp: i64, removed: Option<i64>) -> Result<()> {
        let contentid = record.content_id.to_string();
        let quick = self.quick_values(record)?;
        let rows = self.attribute_rows(record)?;
        let removed = removed.unwrap_or(0);

        let object_id = self.shadow_id(
            "select id from contentmap_nodeversion where contentid = ? limit 1",
            params![&contentid],
            "contentmap_nodeversion",
        )?;
        self.db.execute(
            "update contentmap_nodeversion set nodeversionlatest = 0 where id = ?",
            params![object_id],
        )?;
        let (mother_type, mother_id) = record
            .mother
            .map(|m| (m.object_type(), m.object_id()))
            .unwrap_or((0, 0));
        let mut columns: Vec<String> = [
            "id",
            "contentid",
            "obj_id",
            "obj_type",
            "mother_obj_id",
            "mother_obj_type",
            "updatetimestamp",
            "nodeversiontimestamp",
            "nodeversionlatest",
            "nodeversionremoved",
        ]
        .iter()
        .map(|c| c.to_string())
        .collect();
        let mut values = vec![
            Value::Integer(object_id),
            Value::Text(contentid.clone()),
            Value::Integer(record.content_id.object_id()),
            Value::Integer(record.content_id.object_type()),
            Value::Integer(mother_id),
            Value::Integer(mother_type),
            Value::Integer(record.update_timestamp),
            Value::Integer(timestamp),
            Value::Integer(1),
            Value::Integer(removed),
        ];
        for (column, value) in quick {
            columns.push(column);
            values.push(value);
        }
        insert(self.db, "contentmap_nodeversion", &columns, &values)?;

        let mut written = Vec::with_capacity(rows.len());
        for (name, column, value, sortorder) in rows {
            let id = self.shadow_id(
                "select id from contentattribute_nodeversion where contentid = ? and name = ? and sortorder = ? limit 1",
                params![&contentid, &name, sortorder],
                "contentattribute_nodeversion",
            )?;
            self.db.execute(
                "update contentattribute_nodeversion set nodeversionlatest = 0 where id = ?",
                params![id],
            )?;
            let columns: Vec<String> = [
                "id",
                "contentid",
                "name",
                column,
                "sortorder",
                "nodeversiontimestamp",
                "nodeversionlatest",
                "nodeversionremoved",
            ]
            .iter()
            .map(|c| c.to_string())
            .collect();
            insert(
                self.db,
                "contentattribute_nodeversion",
                &columns,
                &[
                    Value::Integer(id),
                    Value::Text(contentid.clone()),
                    Value::Text(name),
                    value,
                    Value::Integer(sortorder),
                    Value::Integer(timestamp),
                    Value::Integer(1),
                    Value::Integer(removed),
                ],
            )?;
            written.push(id);
        }

        // values that disappeared with this version
        let mut statement = self.db.prepare(
            "
            select distinct id
                from contentattribute_nodeversion
                where contentid = ?
                and nodeversionremoved = 0
        ",
        )?;
        let ids = statement
            .query_map(params![&contentid], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        for id in ids.into_iter().filter(|id| !written.contains(id)) {
            self.db.execute(
                "update contentattribute_nodeversion set nodeversionremoved = ? where id = ? and nodeversionremoved = 0 and nodeversiontimestamp <= ?",
                params![timestamp, id, timestamp],
            )?;
        }
        debug!(contentid = %contentid, timestamp, "object version stored");
        Ok(())
    }

    /// The shadow id for the rows matched by `lookup`, or the next free one.
    fn shadow_id(&self, lookup: &str, lookup_params: &[&dyn rusqlite::ToSql], table: &str) -> Result<i64> {
        let found: Option<i64> = self
            .db
            .query_row(lookup, lookup_params, |row| row.get(0))
            .optional()?;
        match found {
            Some(id) => Ok(id),
            None => Ok(self.db.query_row(
                &format!("select coalesce(max(id), 0) + 1 from {table}"),
                [],
                |row| row.get(0),
            )?),
        }
    }
}

/// Position of `column` in the value column list of `contentattribute`.
fn value_slot(column: &str) -> usize {
    match column {
        "value_text" => 0,
        "value_int" => 1,
        "value_blob" => 2,
        "value_clob" => 3,
        "value_long" => 4,
        "value_double" => 5,
        _ => 6,
    }
}

fn insert(db: &Connection, table: &str, columns: &[String], values: &[Value]) -> Result<()> {
    let placeholders = vec!["?"; values.len()].join(", ");
    db.execute(
        &format!("insert into {table} ({}) values ({placeholders})", columns.join(", ")),
        rusqlite::params_from_iter(values.iter()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_and_quick_columns() {
        let connection = Connection::open_in_memory().unwrap();
        let mut persistor = Persistor::new(&connection).unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("age", AttributeType::Integer).optimized("quick_age"))
            .unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("name", AttributeType::Text))
            .unwrap();
        assert!(persistor.has_column("contentmap", "quick_age").unwrap());
        assert!(persistor.has_column("contentmap_nodeversion", "quick_age").unwrap());
        let bad = AttributeDescriptor::new("evil", AttributeType::Text).optimized("x; drop table contentmap");
        assert!(matches!(
            persistor.add_attribute_type(1, &bad),
            Err(RepositoryError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn objects_are_replaced() {
        let connection = Connection::open_in_memory().unwrap();
        let mut persistor = Persistor::new(&connection).unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("tags", AttributeType::Text).multivalue())
            .unwrap();
        let record = ContentRecord::new(ContentId::new(1, 1)).values("tags", vec!["a".into(), "b".into()]);
        persistor.add_object(&record).unwrap();
        persistor.add_object(&record.clone().values("tags", vec!["c".into()])).unwrap();
        let rows: i64 = connection
            .query_row("select count(*) from contentattribute", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
        let unknown = ContentRecord::new(ContentId::new(1, 2)).attribute("nothing", 1);
        assert!(persistor.add_object(&unknown).is_err());
    }

    #[test]
    fn versions_share_ids() {
        let connection = Connection::open_in_memory().unwrap();
        let mut persistor = Persistor::new(&connection).unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("name", AttributeType::Text))
            .unwrap();
        let record = ContentRecord::new(ContentId::new(1, 1));
        persistor.add_object_version(&record.clone().attribute("name", "v1"), 10, None).unwrap();
        persistor.add_object_version(&record.clone().attribute("name", "v2"), 20, None).unwrap();
        persistor.add_object_version(&record, 30, None).unwrap();
        let ids: i64 = connection
            .query_row("select count(distinct id) from contentattribute_nodeversion", [], |r| r.get(0))
            .unwrap();
        assert_eq!(ids, 1);
        let removed: i64 = connection
            .query_row(
                "select count(*) from contentattribute_nodeversion where nodeversionremoved = 30",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(removed, 2);
    }
}
