use std::fmt;

use crate::error::{RepositoryError, Result};

/// The relational backends the compiler knows how to talk to. Chosen once
/// at start-up and passed to every compilation as a capability object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    MySql,
    Oracle,
    Mssql,
    Hsql,
    Sqlite,
}

impl DialectKind {
    /// Picks the dialect from a database product name such as `"MySQL"` or
    /// `"Microsoft SQL Server"`.
    pub fn from_product_name(name: &str) -> Result<Self> {
        let name = name.trim().to_lowercase();
        if name.contains("mysql") || name.contains("mariadb") {
            Ok(DialectKind::MySql)
        } else if name.contains("oracle") {
            Ok(DialectKind::Oracle)
        } else if name.contains("sql server") || name == "mssql" {
            Ok(DialectKind::Mssql)
        } else if name.contains("hsql") {
            Ok(DialectKind::Hsql)
        } else if name.contains("sqlite") {
            Ok(DialectKind::Sqlite)
        } else {
            Err(RepositoryError::Config(format!(
                "unsupported database product '{name}'"
            )))
        }
    }
    /// Whether pagination can be pushed into the statement. Otherwise the
    /// whole result is fetched and sliced in memory.
    pub fn supports_limit(&self) -> bool {
        matches!(self, DialectKind::MySql | DialectKind::Hsql | DialectKind::Sqlite)
    }
    /// The trailing pagination clause, or `None` when nothing needs to be
    /// limited or the backend cannot express it.
    pub fn limit_clause(&self, start: usize, count: Option<usize>) -> Option<String> {
        if !self.supports_limit() || (start == 0 && count.is_none()) {
            return None;
        }
        Some(match (self, count) {
            (DialectKind::MySql, Some(count)) => format!(" LIMIT {start}, {count}"),
            (DialectKind::MySql, None) => format!(" LIMIT {start}, {}", u64::MAX),
            (DialectKind::Hsql, Some(count)) => format!(" LIMIT {count} OFFSET {start}"),
            (DialectKind::Hsql, None) => format!(" LIMIT 0 OFFSET {start}"),
            (_, Some(count)) => format!(" LIMIT {count} OFFSET {start}"),
            (_, None) => format!(" LIMIT -1 OFFSET {start}"),
        })
    }
    /// Case folding applied to unquoted identifiers by the backend.
    pub fn fold_identifier(&self, identifier: &str) -> String {
        match self {
            DialectKind::Oracle | DialectKind::Hsql => identifier.to_uppercase(),
            _ => identifier.to_string(),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            DialectKind::MySql => "mysql",
            DialectKind::Oracle => "oracle",
            DialectKind::Mssql => "mssql",
            DialectKind::Hsql => "hsql",
            DialectKind::Sqlite => "sqlite",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn product_names_map_to_dialects() {
        assert_eq!(DialectKind::from_product_name("MySQL").unwrap(), DialectKind::MySql);
        assert_eq!(
            DialectKind::from_product_name("Microsoft SQL Server").unwrap(),
            DialectKind::Mssql
        );
        assert_eq!(DialectKind::from_product_name("HSQL Database Engine").unwrap(), DialectKind::Hsql);
        assert_eq!(DialectKind::from_product_name("Oracle").unwrap(), DialectKind::Oracle);
        assert_eq!(DialectKind::from_product_name("SQLite").unwrap(), DialectKind::Sqlite);
        assert!(DialectKind::from_product_name("db2").is_err());
    }

    #[test]
    fn limit_clauses() {
        assert_eq!(DialectKind::MySql.limit_clause(10, Some(5)).unwrap(), " LIMIT 10, 5");
        assert_eq!(DialectKind::Sqlite.limit_clause(0, Some(5)).unwrap(), " LIMIT 5 OFFSET 0");
        assert_eq!(DialectKind::Sqlite.limit_clause(3, None).unwrap(), " LIMIT -1 OFFSET 3");
        assert_eq!(DialectKind::Sqlite.limit_clause(0, None), None);
        assert_eq!(DialectKind::Oracle.limit_clause(10, Some(5)), None);
        assert!(!DialectKind::Mssql.supports_limit());
    }

    #[test]
    fn identifier_folding() {
        assert_eq!(DialectKind::Oracle.fold_identifier("contentmap"), "CONTENTMAP");
        assert_eq!(DialectKind::MySql.fold_identifier("contentmap"), "contentmap");
    }
}
