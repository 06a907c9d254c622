//! Interceptor chain (spec §4.4 "Interceptors (onion model)").
//!
//! Given interceptors `[i0, i1, ..., iN-1]` and a handler `h`, dispatch is
//! `i0(ctx, || i1(ctx, || ... iN-1(ctx, || h(ctx.args)) ...))`. Each
//! interceptor may observe/mutate `ctx.args`, read/write `ctx.state`,
//! await `next()`, transform the result, or throw to abort.

use crate::arg::ApiArg;
use crate::error::RpcError;
use crate::future::BoxFuture;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Mutable bag shared across one invocation's interceptor chain (spec
/// §3 "Interceptor" `state`).
#[derive(Clone, Default)]
pub struct SharedState(Arc<Mutex<HashMap<String, Value>>>);

impl SharedState {
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.0.lock().await.get(key).cloned()
    }

    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.0.lock().await.insert(key.into(), value);
    }
}

/// The context passed through the onion chain (spec §3 `ctx = { method,
/// args, state }`).
pub struct Context {
    pub method: String,
    pub args: Vec<ApiArg>,
    pub state: SharedState,
}

/// The continuation an interceptor calls to invoke the rest of the
/// chain (and ultimately the handler).
pub type Next = Box<dyn FnOnce(Context) -> BoxFuture<Result<Value, RpcError>> + Send>;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn call(&self, ctx: Context, next: Next) -> Result<Value, RpcError>;
}

/// A handler invoked at the bottom of the chain.
pub type Handler = Arc<dyn Fn(Vec<ApiArg>) -> BoxFuture<Result<Value, RpcError>> + Send + Sync>;

fn build_next(interceptors: Arc<Vec<Arc<dyn Interceptor>>>, index: usize, handler: Handler) -> Next {
    Box::new(move |ctx: Context| -> BoxFuture<Result<Value, RpcError>> {
        Box::pin(async move {
            match interceptors.get(index) {
                Some(interceptor) => {
                    let interceptor = interceptor.clone();
                    let next = build_next(interceptors.clone(), index + 1, handler.clone());
                    interceptor.call(ctx, next).await
                }
                None => handler(ctx.args).await,
            }
        })
    })
}

/// Run `ctx` through `interceptors` and finally `handler` (spec §4.4).
/// With no interceptors, `handler` is invoked directly.
pub async fn dispatch(
    interceptors: &[Arc<dyn Interceptor>],
    ctx: Context,
    handler: Handler,
) -> Result<Value, RpcError> {
    let chain = Arc::new(interceptors.to_vec());
    let next = build_next(chain, 0, handler);
    next(ctx).await
}
