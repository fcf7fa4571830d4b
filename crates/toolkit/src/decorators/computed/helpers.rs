//! Projection rewriting and evaluation of computed fields

use super::dedupe::transform_unique_values;
use super::flattener::{FlatColumns, flatten, unflatten, unflatten_optional};
use super::{ComputedCollection, ComputedDefinition};
use futures::FutureExt;
use futures::future::BoxFuture;
use trellis_core::records::as_record;
use trellis_core::schema::FieldSchema;
use trellis_core::types::{Caller, PATH_SEPARATOR, Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::Projection;

/// Real paths needed to produce `path`
///
/// Computed fields are replaced by their dependencies, recursively, and
/// paths crossing a relation are rewritten by the foreign collection.
/// Polymorphic relations are opaque: their paths are kept as-is.
pub(super) fn rewrite_field(collection: &ComputedCollection, path: &str) -> ToolkitResult<Projection> {
    if let Some((prefix, _)) = split_path(path) {
        return match collection.field(prefix)? {
            FieldSchema::PolymorphicManyToOne(_) | FieldSchema::Column(_) => Ok(Projection::from([path])),
            field => {
                let foreign = collection.sibling(field.foreign_collection().unwrap_or_default())?;
                Ok(Projection::from([path])
                    .unnest()?
                    .try_replace(|sub_path| rewrite_field(&foreign, sub_path).map(|p| p.iter().map(str::to_string).collect::<Vec<_>>()))?
                    .nest(prefix))
            }
        };
    }

    match collection.computed(path) {
        Some(computed) => computed
            .dependencies
            .try_replace(|dependency| {
                rewrite_field(collection, dependency).map(|p| p.iter().map(str::to_string).collect::<Vec<_>>())
            }),
        None => Ok(Projection::from([path])),
    }
}

/// Flattened columns known so far, one per path
struct FlatState {
    paths: Vec<String>,
    columns: FlatColumns,
}

impl FlatState {
    fn column(&self, path: &str) -> ToolkitResult<&Vec<Value>> {
        self.paths
            .iter()
            .position(|p| p == path)
            .map(|index| &self.columns[index])
            .ok_or_else(|| ToolkitError::Computed(format!("'{path}' was not computed")))
    }
}

/// Fill the computed paths of `desired` into records fetched at `fetched`
pub(super) async fn compute_from_records(
    collection: &ComputedCollection,
    caller: &Caller,
    fetched: &Projection,
    desired: &Projection,
    records: Vec<Record>,
) -> ToolkitResult<Vec<Record>> {
    let mut state = FlatState {
        paths: fetched.iter().map(str::to_string).collect(),
        columns: flatten(&records, fetched.iter()),
    };

    for path in desired.iter() {
        queue_field(collection, caller, path.to_string(), &mut state).await?;
    }

    let columns = desired
        .iter()
        .map(|path| state.column(path).cloned())
        .collect::<ToolkitResult<FlatColumns>>()?;
    unflatten(&columns, desired)
}

/// Compute `path` after its dependencies, unless already known
fn queue_field<'a>(
    collection: &'a ComputedCollection,
    caller: &'a Caller,
    path: String,
    state: &'a mut FlatState,
) -> BoxFuture<'a, ToolkitResult<()>> {
    async move {
        if state.paths.contains(&path) {
            return Ok(());
        }

        let (computed, owner) = collection
            .get_computed(&path)?
            .ok_or_else(|| ToolkitError::Computed(format!("'{path}' is neither fetched nor computed")))?;

        let prefix = path.rsplit_once(PATH_SEPARATOR).map(|(prefix, _)| prefix.to_string());
        let dependencies: Vec<String> = computed
            .dependencies
            .iter()
            .map(|dependency| match &prefix {
                Some(prefix) => format!("{prefix}{PATH_SEPARATOR}{dependency}"),
                None => dependency.to_string(),
            })
            .collect();

        for dependency in &dependencies {
            queue_field(collection, caller, dependency.clone(), state).await?;
        }

        let columns = dependencies
            .iter()
            .map(|dependency| state.column(dependency).cloned())
            .collect::<ToolkitResult<FlatColumns>>()?;
        let values = compute_field(&owner, caller, &computed, &columns).await?;

        tracing::debug!("Computed '{}' for {} records", path, values.len());
        state.paths.push(path);
        state.columns.push(values);
        Ok(())
    }
    .boxed()
}

/// Evaluate one computed field over flattened dependency columns
async fn compute_field(
    owner: &ComputedCollection,
    caller: &Caller,
    computed: &ComputedDefinition,
    columns: &[Vec<Value>],
) -> ToolkitResult<Vec<Value>> {
    let partials: Vec<Value> = unflatten_optional(columns, &computed.dependencies)?
        .into_iter()
        .map(|partial| partial.map_or(Value::Null, Value::Object))
        .collect();

    let context = owner.context(caller)?;
    let blocking = owner.config().run_sync_handlers_blocking;
    let handler = computed.values.clone();

    transform_unique_values(partials, move |unique| async move {
        let records = unique.into_iter().map(as_record).collect::<ToolkitResult<Vec<_>>>()?;
        handler.call((records, context), blocking).await
    })
    .await
}
