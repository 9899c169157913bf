use std::sync::Arc;

use contentrepo::catalog::{AttributeDescriptor, SqliteMetadata};
use contentrepo::config::RepositoryConfig;
use contentrepo::datasource::Datasource;
use contentrepo::datatype::{AttributeType, ContentId, Value};
use contentrepo::executor::{ContentObject, SqliteExecutor};
use contentrepo::filter::Filter;
use contentrepo::persist::{ContentRecord, Persistor};
use contentrepo::query::Sort;

fn setup(config: &RepositoryConfig) -> Datasource {
    let executor = SqliteExecutor::open(":memory:").unwrap();
    let connection = executor.connection();
    {
        let db = connection.lock().unwrap();
        let mut persistor = Persistor::new(&db).unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("name", AttributeType::Text))
            .unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("age", AttributeType::Integer).optimized("quick_age"))
            .unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("tags", AttributeType::Text).multivalue())
            .unwrap();
        persistor
            .add_attribute_type(1, &AttributeDescriptor::new("description", AttributeType::LongText))
            .unwrap();
        let objects = [
            ContentRecord::new(ContentId::new(1, 1))
                .attribute("name", "foo")
                .attribute("age", 3)
                .values("tags", vec!["a".into(), "b".into()]),
            ContentRecord::new(ContentId::new(1, 2))
                .attribute("name", "foo")
                .attribute("age", 9)
                .values("tags", vec!["b".into()])
                .attribute("description", "second"),
            ContentRecord::new(ContentId::new(1, 3))
                .attribute("name", "bar")
                .attribute("age", 7)
                .values("tags", vec!["c".into()])
                .attribute("description", ""),
        ];
        for object in &objects {
            persistor.add_object(object).unwrap();
        }
    }
    let metadata = SqliteMetadata::new(Arc::clone(&connection));
    Datasource::new(config, executor, metadata, config.cache_backend()).unwrap()
}

fn ids(objects: &[ContentObject]) -> Vec<String> {
    objects.iter().map(|o| o.content_id.to_string()).collect()
}

#[test]
fn joined_and_optimized_conditions() {
    let datasource = setup(&RepositoryConfig::default());
    let filter = Filter::parse(r#"object.name == "foo" && object.age > 5"#).unwrap();
    let objects = datasource.get_result(&filter, &[], 0, None, None).expect("query ok");
    assert_eq!(ids(&objects), vec!["1.2"]);
    assert_eq!(datasource.count(&filter, None).unwrap(), 1);
}

#[test]
fn multivalue_contains_returns_each_object_once() {
    let datasource = setup(&RepositoryConfig::default());
    let filter = Filter::parse(r#"object.tags CONTAINSONEOF ["a", "b"]"#).unwrap();
    let sql = datasource.compile_select(&filter, &[], 0, None, None).unwrap().sql;
    assert!(sql.contains(" GROUP BY "), "{sql}");
    let objects = datasource
        .get_result(&filter, &[Sort::asc("obj_id")], 0, None, None)
        .expect("query ok");
    assert_eq!(ids(&objects), vec!["1.1", "1.2"]);
    assert_eq!(datasource.count(&filter, None).unwrap(), 2);

    let none = Filter::parse(r#"object.tags CONTAINSNONE ["a", "b"]"#).unwrap();
    let objects = datasource.get_result(&none, &[], 0, None, None).expect("query ok");
    assert_eq!(ids(&objects), vec!["1.3"]);
    assert_eq!(datasource.count(&none, None).unwrap(), 1);
}

#[test]
fn containsnone_matches_per_value() {
    let datasource = setup(&RepositoryConfig::default());
    // 1.1 holds "a" but its "b" row passes
    let none = Filter::parse(r#"object.tags CONTAINSNONE ["a"]"#).unwrap();
    let objects = datasource
        .get_result(&none, &[Sort::asc("obj_id")], 0, None, None)
        .expect("query ok");
    assert_eq!(ids(&objects), vec!["1.1", "1.2", "1.3"]);
    assert_eq!(datasource.count(&none, None).unwrap(), 3);
}

#[test]
fn sorting_on_a_multivalue_attribute_repeats_objects() {
    let datasource = setup(&RepositoryConfig::default());
    let everything = Filter::parse("object.obj_type == 1").unwrap();
    let objects = datasource
        .get_result(&everything, &[Sort::asc("tags"), Sort::asc("obj_id")], 0, None, None)
        .expect("query ok");
    assert_eq!(ids(&objects), vec!["1.1", "1.1", "1.2", "1.3"]);
    assert_eq!(datasource.count(&everything, None).unwrap(), 3);
}

#[test]
fn sorting_on_joined_and_quick_columns() {
    let datasource = setup(&RepositoryConfig::default());
    let everything = Filter::parse("object.obj_type == 1").unwrap();
    let by_age = datasource
        .get_result(&everything, &[Sort::desc("age")], 0, None, None)
        .unwrap();
    assert_eq!(ids(&by_age), vec!["1.2", "1.3", "1.1"]);
    assert_eq!(by_age[0].get("age"), Some(&Value::Integer(9)));

    let by_name = datasource
        .get_result(&everything, &[Sort::asc("name"), Sort::desc("age")], 0, None, None)
        .unwrap();
    assert_eq!(ids(&by_name), vec!["1.3", "1.2", "1.1"]);
    assert_eq!(by_name[0].get("name"), Some(&Value::from("bar")));
}

#[test]
fn empty_strings_and_missing_values() {
    let datasource = setup(&RepositoryConfig::default());
    let empty = Filter::parse(r#"object.description == """#).unwrap();
    let objects = datasource
        .get_result(&empty, &[Sort::asc("obj_id")], 0, None, None)
        .unwrap();
    assert_eq!(ids(&objects), vec!["1.1", "1.3"]);

    let isempty = Filter::parse("isempty(object.description)").unwrap();
    assert_eq!(datasource.count(&isempty, None).unwrap(), 2);

    let filled = Filter::parse(r#"object.description != """#).unwrap();
    let objects = datasource.get_result(&filled, &[], 0, None, None).unwrap();
    assert_eq!(ids(&objects), vec!["1.2"]);
}

#[test]
fn like_and_negation() {
    let datasource = setup(&RepositoryConfig::default());
    let filter = Filter::parse(r#"object.name LIKE "f*" && !(object.age < 5)"#).unwrap();
    let objects = datasource.get_result(&filter, &[], 0, None, None).unwrap();
    assert_eq!(ids(&objects), vec!["1.2"]);
    let flipped = Filter::parse(r#"5 < object.age"#).unwrap();
    assert_eq!(datasource.count(&flipped, None).unwrap(), 2);
}

#[test]
fn prefetched_quick_columns_are_mapped() {
    let config = RepositoryConfig {
        prefetch_attributes: vec!["age".to_string(), "name".to_string()],
        ..RepositoryConfig::default()
    };
    let datasource = setup(&config);
    let filter = Filter::parse("object.obj_id == 3").unwrap();
    let objects = datasource.get_result(&filter, &[], 0, None, None).unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].get("age"), Some(&Value::Integer(7)));
    // name is not optimized and is not prefetched
    assert_eq!(objects[0].get("name"), None);
}

#[test]
fn native_pagination() {
    let datasource = setup(&RepositoryConfig::default());
    let everything = Filter::parse("object.obj_type == 1").unwrap();
    let sorts = [Sort::asc("age")];
    let sql = datasource.compile_select(&everything, &sorts, 1, Some(1), None).unwrap().sql;
    assert!(sql.ends_with(" LIMIT 1 OFFSET 1"), "{sql}");
    let page = datasource.get_result(&everything, &sorts, 1, Some(1), None).unwrap();
    assert_eq!(ids(&page), vec!["1.3"]);
    let rest = datasource.get_result(&everything, &sorts, 1, None, None).unwrap();
    assert_eq!(ids(&rest), vec!["1.3", "1.2"]);
}

#[test]
fn post_filters_paginate_and_count_in_memory() {
    let datasource = setup(&RepositoryConfig::default());
    let filter = Filter::parse("object.obj_type == 1")
        .unwrap()
        .with_post_filter(|object: &ContentObject| object.content_id.object_id() != 2);
    let sql = datasource.compile_select(&filter, &[Sort::asc("obj_id")], 1, Some(1), None).unwrap().sql;
    assert!(!sql.contains("LIMIT"), "{sql}");
    let page = datasource
        .get_result(&filter, &[Sort::asc("obj_id")], 1, Some(1), None)
        .unwrap();
    assert_eq!(ids(&page), vec!["1.3"]);
    assert_eq!(datasource.count(&filter, None).unwrap(), 2);
}

#[test]
fn unknown_attributes_fail_before_execution() {
    let datasource = setup(&RepositoryConfig::default());
    let filter = Filter::parse(r#"object.nothing == "x""#).unwrap();
    let err = datasource.get_result(&filter, &[], 0, None, None).unwrap_err();
    assert!(err.is_attribute_resolution());
    assert!(!err.is_retryable());
    let err = datasource
        .get_result(&Filter::parse("object.age > 1").unwrap(), &[Sort::asc("nothing")], 0, None, None)
        .unwrap_err();
    assert!(err.is_attribute_resolution());
}
