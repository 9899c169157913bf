//! Temporal overlay: reads the `_nodeversion` shadow tables as of a point in time.
//!
//! A shadow row is visible as of `T` when it carries the greatest
//! `nodeversiontimestamp <= T` among the rows of the same id that were not
//! removed by `T` (`nodeversionremoved = 0` or `> T`).

use crate::datatype::Value;
use crate::dialect::DialectKind;
use crate::sql::SqlFragment;

pub const SHADOW_SUFFIX: &str = "_nodeversion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Versioning {
    #[default]
    Live,
    AsOf(i64),
}

impl Versioning {
    /// Negative timestamps select the live tables.
    pub fn from_timestamp(timestamp: Option<i64>) -> Self {
        match timestamp {
            Some(t) if t >= 0 => Versioning::AsOf(t),
            _ => Versioning::Live,
        }
    }
    /// The table to read in place of the live `table`.
    pub fn table(&self, dialect: DialectKind, table: &str) -> String {
        match self {
            Versioning::Live => dialect.fold_identifier(table),
            Versioning::AsOf(_) => dialect.fold_identifier(&format!("{table}{SHADOW_SUFFIX}")),
        }
    }
    /// The visibility predicate for `alias`, reading from the shadow of `table`.
    /// Binds the timestamp twice.
    pub fn predicate(&self, dialect: DialectKind, table: &str, alias: &str) -> Option<SqlFragment> {
        let Versioning::AsOf(timestamp) = *self else {
            return None;
        };
        let column = |name: &str| dialect.fold_identifier(name);
        let mut predicate = SqlFragment::text(format!(
            "{alias}.{ts} = (SELECT max({ts}) FROM {shadow} WHERE {id} = {alias}.{id} AND {ts} <= ",
            ts = column("nodeversiontimestamp"),
            shadow = self.table(dialect, table),
            id = column("id"),
        ));
        predicate.push_param(Value::Integer(timestamp));
        predicate.push_text(format!(
            " AND ({removed} = 0 OR {removed} > ",
            removed = column("nodeversionremoved"),
        ));
        predicate.push_param(Value::Integer(timestamp));
        predicate.push_text("))");
        Some(predicate)
    }
}
