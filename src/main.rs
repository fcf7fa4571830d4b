//! Trellis demo
//!
//! Builds a customized stack over an in-memory library and runs a few
//! requests through it. Set `RUST_LOG=debug` to follow the layers at work,
//! and `TRELLIS_CONFIG` to the path of a JSON configuration file.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use trellis_core::types::{Caller, Operator, PrimitiveType, Record};
use trellis_core::{
    ActionScope, CollectionSchema, ColumnSchema, FieldSchema, ManyToOneSchema, OneToManySchema,
    Persistable, ToolkitConfig,
};
use trellis_query::{Aggregation, ConditionTree, Filter, PaginatedFilter, Projection};
use trellis_toolkit::{
    ActionContext, ActionDefinition, ActionResult, ChartResultBuilder, CollectionContext,
    ComputedDefinition, DatasourceContext, DatasourceCustomizer, MemoryDatasource, UserFn,
};

/// Initialise the `tracing` subscriber; `RUST_LOG` overrides the default level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config() -> Result<ToolkitConfig> {
    match std::env::var("TRELLIS_CONFIG") {
        Ok(path) => Ok(ToolkitConfig::load_from_file(std::path::Path::new(&path))?),
        Err(_) => Ok(ToolkitConfig::default()),
    }
}

fn text() -> ColumnSchema {
    ColumnSchema::new(PrimitiveType::String)
        .with_operators([Operator::Equal, Operator::In, Operator::Contains])
        .sortable()
}

fn rows(value: serde_json::Value) -> Vec<Record> {
    match value {
        serde_json::Value::Array(items) => items.into_iter().filter_map(|i| i.as_object().cloned()).collect(),
        _ => Vec::new(),
    }
}

fn library() -> Result<Arc<MemoryDatasource>> {
    let datasource = MemoryDatasource::new();

    datasource
        .add_collection(
            "authors",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                .with_field("first_name", text())
                .with_field("last_name", text())
                .with_field(
                    "books",
                    FieldSchema::OneToMany(OneToManySchema {
                        foreign_collection: "books".to_string(),
                        origin_key: "author_id".to_string(),
                        origin_key_target: "id".to_string(),
                    }),
                ),
        )?
        .seed(rows(json!([
            { "id": 1, "first_name": "Ursula", "last_name": "Le Guin" },
            { "id": 2, "first_name": "Frank", "last_name": "Herbert" },
        ])));

    datasource
        .add_collection(
            "books",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                .with_field("title", text())
                .with_field(
                    "author_id",
                    ColumnSchema::new(PrimitiveType::Number).with_operators([Operator::Equal, Operator::In]),
                )
                .with_field(
                    "author",
                    FieldSchema::ManyToOne(ManyToOneSchema {
                        foreign_collection: "authors".to_string(),
                        foreign_key: "author_id".to_string(),
                        foreign_key_target: "id".to_string(),
                    }),
                ),
        )?
        .seed(rows(json!([
            { "id": 1, "title": "A Wizard of Earthsea", "author_id": 1 },
            { "id": 2, "title": "The Dispossessed", "author_id": 1 },
            { "id": 3, "title": "Dune", "author_id": 2 },
        ])));

    Ok(datasource)
}

fn customize(customizer: &DatasourceCustomizer) -> Result<()> {
    customizer.rename_collections([("authors", "Author"), ("books", "Book")])?;

    customizer.customize_collection("Author")?.add_field(
        "full_name",
        ComputedDefinition::new(
            PrimitiveType::String,
            ["first_name", "last_name"],
            UserFn::from_sync(|(records, _context): (Vec<Record>, CollectionContext)| {
                Ok(records
                    .iter()
                    .map(|r| {
                        let first = r["first_name"].as_str().unwrap_or_default();
                        let last = r["last_name"].as_str().unwrap_or_default();
                        json!(format!("{first} {last}"))
                    })
                    .collect())
            }),
        ),
    )?;

    customizer
        .customize_collection("Book")?
        .rename_field("title", "name")?
        .add_field(
            "byline",
            ComputedDefinition::new(
                PrimitiveType::String,
                ["name", "author:full_name"],
                UserFn::from_async(|(records, _context): (Vec<Record>, CollectionContext)| async move {
                    Ok(records
                        .iter()
                        .map(|r| {
                            let name = r["name"].as_str().unwrap_or_default();
                            let author = r
                                .get("author")
                                .and_then(|a| a.get("full_name"))
                                .and_then(|n| n.as_str())
                                .unwrap_or("unknown");
                            json!(format!("{name} by {author}"))
                        })
                        .collect())
                }),
            ),
        )?
        .add_segment(
            "Earthsea era",
            UserFn::constant(ConditionTree::leaf("author_id", Operator::Equal, json!(1))),
        )?
        .add_action(
            "Count selection",
            ActionDefinition::new(
                ActionScope::Bulk,
                UserFn::from_async(|context: ActionContext| async move {
                    let records = context.get_records(&Projection::from(["id"])).await?;
                    Ok(ActionResult::success(format!("{} book(s) selected", records.len())))
                }),
            ),
        )?;

    customizer.add_chart(
        "Books",
        UserFn::from_async(|context: DatasourceContext| async move {
            let books = context.datasource.get_collection("Book")?;
            let rows = books
                .aggregate(&context.caller, &Filter::new(), &Aggregation::count(), None)
                .await?;
            let count = rows.first().and_then(|row| row.value.as_f64()).unwrap_or_default();
            Ok(ChartResultBuilder::value(count, None))
        }),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    tracing::info!("Trellis demo v{}", trellis_toolkit::VERSION);

    let customizer = DatasourceCustomizer::new(library()?, load_config()?)?;
    customize(&customizer)?;
    let datasource = customizer.finalize()?;
    let caller = Caller::default();

    let books = datasource.get_collection("Book")?;
    let listed = books
        .list(
            &caller,
            &PaginatedFilter::new().with_segment("Earthsea era"),
            &Projection::from(["id", "byline", "author:id"]),
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&listed)?);

    let result = books
        .execute(&caller, "Count selection", &Record::new(), Some(&Filter::new()))
        .await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    let chart = datasource.render_chart(&caller, "Books").await?;
    println!("{}", serde_json::to_string_pretty(&chart)?);

    Ok(())
}
