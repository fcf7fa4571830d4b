//! User-provided functions
//!
//! Customizations accept either an async closure or a plain synchronous one.
//! Synchronous closures can be moved to the blocking thread pool so a slow
//! handler does not stall the requests sharing its executor thread.

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use trellis_core::{ToolkitError, ToolkitResult};

pub type AsyncUserFn<I, O> = Arc<dyn Fn(I) -> BoxFuture<'static, ToolkitResult<O>> + Send + Sync>;
pub type SyncUserFn<I, O> = Arc<dyn Fn(I) -> ToolkitResult<O> + Send + Sync>;

pub enum UserFn<I, O> {
    Async(AsyncUserFn<I, O>),
    Sync(SyncUserFn<I, O>),
}

impl<I, O> Clone for UserFn<I, O> {
    fn clone(&self) -> Self {
        match self {
            UserFn::Async(f) => UserFn::Async(Arc::clone(f)),
            UserFn::Sync(f) => UserFn::Sync(Arc::clone(f)),
        }
    }
}

impl<I, O> std::fmt::Debug for UserFn<I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserFn::Async(_) => f.write_str("UserFn::Async"),
            UserFn::Sync(_) => f.write_str("UserFn::Sync"),
        }
    }
}

impl<I: Send + 'static, O: Send + 'static> UserFn<I, O> {
    pub fn from_async<F, Fut>(function: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolkitResult<O>> + Send + 'static,
    {
        UserFn::Async(Arc::new(move |input| function(input).boxed()))
    }

    pub fn from_sync<F>(function: F) -> Self
    where
        F: Fn(I) -> ToolkitResult<O> + Send + Sync + 'static,
    {
        UserFn::Sync(Arc::new(function))
    }

    /// A function always returning the same value
    pub fn constant(value: O) -> Self
    where
        O: Clone + Sync,
    {
        UserFn::Sync(Arc::new(move |_| Ok(value.clone())))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, UserFn::Async(_))
    }

    /// Run the function; synchronous ones go to the blocking pool when `blocking` is set
    pub async fn call(&self, input: I, blocking: bool) -> ToolkitResult<O> {
        match self {
            UserFn::Async(function) => function(input).await,
            UserFn::Sync(function) if blocking => {
                let function = Arc::clone(function);
                tokio::task::spawn_blocking(move || function(input))
                    .await
                    .map_err(|e| ToolkitError::UserCode(e.to_string()))?
            }
            UserFn::Sync(function) => function(input),
        }
    }

    /// Wrap the function between an input and an output conversion
    ///
    /// The result is always async; `blocking` applies to the wrapped function.
    pub fn adapt<J, P, B, A>(self, blocking: bool, before: B, after: A) -> UserFn<J, P>
    where
        J: Send + 'static,
        P: Send + 'static,
        B: Fn(J) -> ToolkitResult<I> + Send + Sync + 'static,
        A: Fn(O) -> ToolkitResult<P> + Send + Sync + 'static,
    {
        let before = Arc::new(before);
        let after = Arc::new(after);
        UserFn::from_async(move |input: J| {
            let inner = self.clone();
            let before = Arc::clone(&before);
            let after = Arc::clone(&after);
            async move {
                let converted = before(input)?;
                let output = inner.call(converted, blocking).await?;
                after(output)
            }
        })
    }
}
