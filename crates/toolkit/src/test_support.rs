//! Shared fixtures for unit tests

use crate::memory::MemoryDatasource;
use std::sync::Arc;
use trellis_core::schema::{
    CollectionSchema, ColumnSchema, FieldSchema, ManyToOneSchema, OneToManySchema,
};
use trellis_core::types::{Operator, PrimitiveType, Record, Value};

/// Convert a JSON array of objects into records
pub fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| item.as_object().cloned().unwrap())
            .collect(),
        other => panic!("expected an array of objects, got {other}"),
    }
}

fn text() -> ColumnSchema {
    ColumnSchema::new(PrimitiveType::String)
        .with_operators([Operator::Equal, Operator::In, Operator::Present, Operator::Contains])
        .sortable()
}

/// Authors and their books
///
/// `Author` has two rows (Tolkien, Herbert); `Book` has three, two of them
/// written by Tolkien.
pub fn library() -> Arc<MemoryDatasource> {
    let datasource = MemoryDatasource::new();

    let authors = datasource
        .add_collection(
            "Author",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                .with_field("first_name", text())
                .with_field("last_name", text())
                .with_field(
                    "books",
                    FieldSchema::OneToMany(OneToManySchema {
                        foreign_collection: "Book".to_string(),
                        origin_key: "author_id".to_string(),
                        origin_key_target: "id".to_string(),
                    }),
                ),
        )
        .unwrap();
    authors.seed(records(serde_json::json!([
        { "id": 1, "first_name": "John", "last_name": "Tolkien" },
        { "id": 2, "first_name": "Frank", "last_name": "Herbert" },
    ])));

    let books = datasource
        .add_collection(
            "Book",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                .with_field("title", text())
                .with_field(
                    "author_id",
                    ColumnSchema::new(PrimitiveType::Number)
                        .with_operators([Operator::Equal, Operator::In]),
                )
                .with_field(
                    "author",
                    FieldSchema::ManyToOne(ManyToOneSchema {
                        foreign_collection: "Author".to_string(),
                        foreign_key: "author_id".to_string(),
                        foreign_key_target: "id".to_string(),
                    }),
                )
                .searchable(),
        )
        .unwrap();
    books.seed(records(serde_json::json!([
        { "id": 1, "title": "The Hobbit", "author_id": 1 },
        { "id": 2, "title": "The Two Towers", "author_id": 1 },
        { "id": 3, "title": "Dune", "author_id": 2 },
    ])));

    datasource
}
