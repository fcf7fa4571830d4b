//! Create, update and delete overrides
//!
//! A registered handler replaces the default behavior of the operation. The
//! handler receives the child collection so it can still reach the storage.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::handler::UserFn;
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use trellis_core::types::{Caller, Record};
use trellis_core::ToolkitResult;
use trellis_query::Filter;

#[derive(Clone)]
pub struct CreateOverrideContext {
    pub collection: Arc<dyn Collection>,
    pub caller: Caller,
    pub data: Vec<Record>,
}

#[derive(Clone)]
pub struct UpdateOverrideContext {
    pub collection: Arc<dyn Collection>,
    pub caller: Caller,
    pub filter: Filter,
    pub patch: Record,
}

#[derive(Clone)]
pub struct DeleteOverrideContext {
    pub collection: Arc<dyn Collection>,
    pub caller: Caller,
    pub filter: Filter,
}

pub type CreateOverrideHandler = UserFn<CreateOverrideContext, Vec<Record>>;
pub type UpdateOverrideHandler = UserFn<UpdateOverrideContext, ()>;
pub type DeleteOverrideHandler = UserFn<DeleteOverrideContext, ()>;

#[derive(Default)]
pub struct OverrideLayer {
    create: RwLock<Option<CreateOverrideHandler>>,
    update: RwLock<Option<UpdateOverrideHandler>>,
    delete: RwLock<Option<DeleteOverrideHandler>>,
}

pub type OverrideCollection = CollectionDecorator<OverrideLayer>;

impl CollectionDecorator<OverrideLayer> {
    pub fn override_create(&self, handler: CreateOverrideHandler) {
        tracing::info!("Overriding create on '{}'", self.name());
        *self.layer().create.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn override_update(&self, handler: UpdateOverrideHandler) {
        tracing::info!("Overriding update on '{}'", self.name());
        *self.layer().update.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn override_delete(&self, handler: DeleteOverrideHandler) {
        tracing::info!("Overriding delete on '{}'", self.name());
        *self.layer().delete.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

#[async_trait]
impl CollectionLayer for OverrideLayer {
    type Datasource = ();

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        let handler = self.create.read().unwrap_or_else(PoisonError::into_inner).clone();
        match handler {
            Some(handler) => {
                let context = CreateOverrideContext {
                    collection: Arc::clone(this.child()),
                    caller: caller.clone(),
                    data,
                };
                handler.call(context, this.config().run_sync_handlers_blocking).await
            }
            None => this.child().create(caller, data).await,
        }
    }

    async fn update(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let handler = self.update.read().unwrap_or_else(PoisonError::into_inner).clone();
        match handler {
            Some(handler) => {
                let context = UpdateOverrideContext {
                    collection: Arc::clone(this.child()),
                    caller: caller.clone(),
                    filter: filter.clone(),
                    patch: patch.clone(),
                };
                handler.call(context, this.config().run_sync_handlers_blocking).await
            }
            None => this.forward_update(caller, filter, patch).await,
        }
    }

    async fn delete(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
    ) -> ToolkitResult<()> {
        let handler = self.delete.read().unwrap_or_else(PoisonError::into_inner).clone();
        match handler {
            Some(handler) => {
                let context = DeleteOverrideContext {
                    collection: Arc::clone(this.child()),
                    caller: caller.clone(),
                    filter: filter.clone(),
                };
                handler.call(context, this.config().run_sync_handlers_blocking).await
            }
            None => this.forward_delete(caller, filter).await,
        }
    }
}
