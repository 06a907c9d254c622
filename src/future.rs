//! Shared boxed-future alias used at the async trait-object seams
//! (interceptors, handlers, callbacks) throughout the crate.

use std::future::Future;
use std::pin::Pin;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
