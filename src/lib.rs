//! Contentrepo – the read side of an entity-attribute-value content repository.
//!
//! Content objects are stored as one row in `contentmap` plus one row per
//! attribute value in `contentattribute`. Frequently filtered attributes can
//! be *optimized*, which keeps a copy of their value in a quick column of the
//! main row so that no join is needed to reach it.
//!
//! Queries are written as filter rules such as
//! `object.name == "foo" && object.folder.name LIKE "news*"` and compiled to
//! one parameterized SQL statement:
//! * [`catalog`] resolves attribute names to their descriptors.
//! * [`session`] resolves attribute paths to columns, creating the joins a
//!   path needs on first use. Dotted paths follow link attributes.
//! * [`condition`] compiles the expression tree into the WHERE clause.
//! * [`joins`] keeps the joins in first-reference order and renders FROM.
//! * [`versioning`] reads the `_nodeversion` shadow tables as of a timestamp.
//! * [`query`] assembles SELECT and COUNT statements with sorting and pagination.
//!
//! Execution is blocking and goes through an [`executor::SqlExecutor`],
//! optionally memoized by the [`cache`]. [`datasource::Datasource`] wires all
//! of it together.
//!
//! ## Quick Start
//! ```
//! use contentrepo::config::RepositoryConfig;
//! use contentrepo::datasource::Datasource;
//! use contentrepo::filter::Filter;
//! let datasource = Datasource::open(&RepositoryConfig::default()).unwrap();
//! let filter = Filter::parse("object.obj_type == 10").unwrap();
//! assert!(datasource.get_result(&filter, &[], 0, None, None).unwrap().is_empty());
//! ```

pub mod alias;
pub mod cache;
pub mod catalog;
pub mod condition;
pub mod config;
pub mod datasource;
pub mod datatype;
pub mod dialect;
pub mod error;
pub mod executor;
pub mod expression;
pub mod filter;
pub mod joins;
pub mod persist;
pub mod query;
pub mod session;
pub mod sql;
pub mod versioning;
