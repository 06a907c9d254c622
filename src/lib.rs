//! A bidirectional, transport-agnostic RPC channel for calling into a
//! dynamically-shaped API over a line-delimited (or structured-clone)
//! wire format.
//!
//! Two channel instances, each wrapping an [`io::IoInterface`] over some
//! transport, exchange [`message::Message`]s to invoke methods,
//! constructors, callbacks, and property get/set on whatever API the
//! other side has [`RpcChannel::expose`]d. The core makes no assumption
//! about what carries the bytes — a pipe, a socket, an in-process queue —
//! only that it can read and write one [`io::Datagram`] at a time.
//!
//! ```no_run
//! use duplex_rpc::{ChannelOptions, ExposedApi, RpcChannel};
//! use serde_json::Value;
//! use std::sync::Arc;
//!
//! # async fn run(transport: Arc<dyn duplex_rpc::IoInterface>) {
//! let api = ExposedApi::new().method(
//!     "math.add",
//!     Arc::new(|args| {
//!         Box::pin(async move {
//!             let sum: i64 = args.iter().filter_map(|a| a.as_value()).filter_map(Value::as_i64).sum();
//!             Ok(Value::from(sum))
//!         })
//!     }),
//! );
//! let channel = RpcChannel::new(transport, ChannelOptions::new().with_expose(api));
//! let result = channel.get_api().call("math.add", vec![Value::from(1), Value::from(2)]).await;
//! # let _ = result;
//! # }
//! ```

pub mod api;
pub mod arg;
pub mod channel;
pub mod config;
pub mod error;
pub mod future;
pub mod id;
pub mod interceptor;
pub mod io;
pub mod message;
pub mod serialization;
pub mod transfer;
pub mod validation;
pub mod value;

#[cfg(feature = "testing")]
pub mod mock;

pub use api::{ExposedApi, MethodHandler};
pub use arg::{ApiArg, CallbackHandle};
pub use channel::{RemoteHandle, RpcChannel};
pub use config::ChannelOptions;
pub use error::{is_rpc_timeout_error, is_rpc_validation_error, RpcError, ValidationIssue, ValidationPhase};
pub use id::generate_id;
pub use interceptor::{Context, Interceptor, Next, SharedState};
pub use io::{Capabilities, Datagram, IoInterface, TransferHandle};
pub use message::{EnhancedError, Message, MessageType, TransferSlot};
pub use serialization::Dialect;
pub use transfer::{transfer, TransferHandler, TransferRegistry};
pub use validation::{Outcome, Schema, ValidatorEntry, Validators};
pub use value::RpcValue;
