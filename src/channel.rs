//! The channel itself (spec §4.5, §5, §6): one reader task per channel,
//! a pending-request registry, dual callback registries, and the public
//! call surface. Follows the teacher's `HostCoordinator` in shape for
//! its shared state — an `Arc<Inner>` wrapping mutable state behind
//! `tokio::sync` primitives — with the background reader task itself
//! modeled on the UDS transport's read loop in `src/ipc/unix_domain_socket.rs`.

use crate::api::ExposedApi;
use crate::arg::{ApiArg, CallbackHandle};
use crate::config::ChannelOptions;
use crate::error::{to_enhanced_error, RpcError};
use crate::id::generate_id;
use crate::interceptor::{self, Context, SharedState};
use crate::io::{Datagram, IoInterface, TransferHandle};
use crate::message::{
    callback_marker, parse_callback_marker, EnhancedError, Message, MessageType, TransferSlot,
    WireEnvelope,
};
use crate::serialization::{self, Dialect, FrameBuffer, LineOutcome};
use crate::transfer::{self, TransferHandler, TransferRegistry};
use crate::validation::{validate_input, validate_output, Validators};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingResult = Result<Value, RpcError>;

struct Inner {
    transport: Arc<dyn IoInterface>,
    exposed: RwLock<Option<Arc<ExposedApi>>>,
    validators: RwLock<Arc<Validators>>,
    interceptors: RwLock<Vec<Arc<dyn interceptor::Interceptor>>>,
    transfer_registry: RwLock<TransferRegistry>,
    dialect: Dialect,
    timeout: std::time::Duration,
    enable_transfer: bool,

    pending: Mutex<HashMap<String, oneshot::Sender<PendingResult>>>,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    callbacks_by_id: Mutex<HashMap<String, CallbackHandle>>,
    callbacks_by_ptr: Mutex<HashMap<usize, String>>,
    frame_buffer: Mutex<FrameBuffer>,
    write_lock: Mutex<()>,
    destroyed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A bidirectional RPC channel over one [`IoInterface`] transport (spec
/// §1, §4.5). Cheaply cloneable; every clone shares the same background
/// reader task and registries.
#[derive(Clone)]
pub struct RpcChannel {
    inner: Arc<Inner>,
}

/// The proxy surface for the peer's exposed API (spec §6 "External
/// interfaces"). A thin view over the same channel; `call`/`get`/`set`/
/// `construct` are the "portable baseline" standing in for the source
/// language's dynamic `Proxy` (DESIGN NOTES §9).
#[derive(Clone)]
pub struct RemoteHandle {
    channel: RpcChannel,
}

impl RpcChannel {
    /// Construct a channel over `transport` and start its reader task.
    pub fn new(transport: Arc<dyn IoInterface>, options: ChannelOptions) -> Self {
        let inner = Arc::new(Inner {
            transport,
            exposed: RwLock::new(options.expose),
            validators: RwLock::new(options.validators),
            interceptors: RwLock::new(options.interceptors),
            transfer_registry: RwLock::new(TransferRegistry::new()),
            dialect: options.serialization,
            timeout: options.timeout,
            enable_transfer: options.enable_transfer,
            pending: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
            callbacks_by_id: Mutex::new(HashMap::new()),
            callbacks_by_ptr: Mutex::new(HashMap::new()),
            frame_buffer: Mutex::new(FrameBuffer::new()),
            write_lock: Mutex::new(()),
            destroyed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });

        let reader_inner = inner.clone();
        let handle = tokio::spawn(async move { reader_loop(reader_inner).await });
        // Locking a freshly-constructed Mutex cannot contend; this just
        // stashes the handle so `destroy` can abort it.
        if let Ok(mut slot) = inner.reader.try_lock() {
            *slot = Some(handle);
        }

        Self { inner }
    }

    /// Replace the locally-exposed API (spec §6 "Construct a channel").
    pub async fn expose(&self, api: ExposedApi) {
        *self.inner.exposed.write().await = Some(Arc::new(api));
    }

    /// Replace the validator tree.
    pub async fn set_validators(&self, validators: Validators) {
        *self.inner.validators.write().await = Arc::new(validators);
    }

    /// Replace the interceptor chain.
    pub async fn set_interceptors(&self, interceptors: Vec<Arc<dyn interceptor::Interceptor>>) {
        *self.inner.interceptors.write().await = interceptors;
    }

    /// Register a custom transfer handler (spec §4.3 "Handler registry").
    pub async fn register_transfer_handler(&self, handler: Arc<dyn TransferHandler>) {
        self.inner.transfer_registry.write().await.register(handler);
    }

    /// The proxy for invoking the peer's exposed API.
    pub fn get_api(&self) -> RemoteHandle {
        RemoteHandle { channel: self.clone() }
    }

    /// Release all channel resources: reject every pending call, cancel
    /// timers, drop callback registrations, and destroy the transport
    /// (spec §4.5 "Destruction"). Idempotent.
    pub async fn destroy(&self) -> Result<(), RpcError> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut pending = self.inner.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError::ChannelDestroyed));
        }
        drop(pending);

        let mut timers = self.inner.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        drop(timers);

        self.free_callbacks().await;

        if let Some(handle) = self.inner.reader.lock().await.take() {
            handle.abort();
        }

        self.inner.transport.destroy().await.map_err(RpcError::Transport)
    }

    /// Drop all registered callbacks without destroying the channel
    /// (spec §4.5 "free all registered callbacks").
    pub async fn free_callbacks(&self) {
        self.inner.callbacks_by_id.lock().await.clear();
        self.inner.callbacks_by_ptr.lock().await.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    async fn register_callback(&self, cb: CallbackHandle) -> String {
        let ptr = Arc::as_ptr(&cb) as *const () as usize;
        let mut by_ptr = self.inner.callbacks_by_ptr.lock().await;
        if let Some(existing) = by_ptr.get(&ptr) {
            return existing.clone();
        }
        let id = generate_id();
        by_ptr.insert(ptr, id.clone());
        drop(by_ptr);
        self.inner.callbacks_by_id.lock().await.insert(id.clone(), cb);
        id
    }

    async fn send_request(
        &self,
        kind: MessageType,
        method: &str,
        path: Option<Vec<String>>,
        value: Option<Value>,
        args: Vec<ApiArg>,
    ) -> Result<Value, RpcError> {
        if self.is_destroyed() {
            return Err(RpcError::ChannelDestroyed);
        }

        let id = generate_id();
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id.clone(), tx);

        let mut message = Message::new(id.clone(), kind);
        message.method = method.to_string();

        match kind {
            MessageType::Get | MessageType::Set => {
                message.path = path;
                message.value = value;
            }
            _ => {
                let mut callback_ids = Vec::new();
                let mut processed = Vec::with_capacity(args.len());
                for arg in args {
                    match arg {
                        ApiArg::Value(v) => processed.push(v),
                        ApiArg::Callback(cb) => {
                            let cb_id = self.register_callback(cb).await;
                            callback_ids.push(cb_id.clone());
                            processed.push(Value::String(callback_marker(&cb_id)));
                        }
                    }
                }
                message.args = Value::Array(processed);
                if !callback_ids.is_empty() {
                    message.callback_ids = Some(callback_ids);
                }
            }
        }

        if self.inner.timeout > std::time::Duration::ZERO {
            let inner = self.inner.clone();
            let timer_id = id.clone();
            let method_name = method.to_string();
            let timeout = self.inner.timeout;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(tx) = inner.pending.lock().await.remove(&timer_id) {
                    let _ = tx.send(Err(RpcError::Timeout {
                        method: method_name,
                        timeout_ms: timeout.as_millis() as u64,
                    }));
                }
                inner.timers.lock().await.remove(&timer_id);
            });
            self.inner.timers.lock().await.insert(id.clone(), handle);
        }

        if let Err(err) = self.send_message(message).await {
            self.inner.pending.lock().await.remove(&id);
            if let Some(handle) = self.inner.timers.lock().await.remove(&id) {
                handle.abort();
            }
            return Err(RpcError::Transport(err));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(RpcError::ChannelDestroyed),
        }
    }

    async fn send_message(&self, message: Message) -> anyhow::Result<()> {
        send_on_wire(&self.inner, message).await
    }
}

impl RemoteHandle {
    /// Call a method by dotted path with plain-value arguments (spec §6
    /// "invoke(path, args)").
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.call_with(method, args.into_iter().map(ApiArg::Value).collect()).await
    }

    /// Call a method with arguments that may include live callbacks
    /// (spec §4.5 "request" dispatch).
    pub async fn call_with(&self, method: &str, args: Vec<ApiArg>) -> Result<Value, RpcError> {
        self.channel
            .send_request(MessageType::Request, method, None, None, args)
            .await
    }

    /// Invoke a remote constructor by dotted path (spec §3 `construct`).
    pub async fn construct(&self, path: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.channel
            .send_request(
                MessageType::Construct,
                path,
                None,
                None,
                args.into_iter().map(ApiArg::Value).collect(),
            )
            .await
    }

    /// Read a remote property by dotted path (spec §4.5 "get").
    pub async fn get(&self, path: &[&str]) -> Result<Value, RpcError> {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        self.channel
            .send_request(MessageType::Get, "", Some(path), None, vec![])
            .await
    }

    /// Assign a remote property by dotted path (spec §4.5 "set").
    pub async fn set(&self, path: &[&str], value: Value) -> Result<Value, RpcError> {
        let path: Vec<String> = path.iter().map(|s| s.to_string()).collect();
        self.channel
            .send_request(MessageType::Set, "", Some(path), Some(value), vec![])
            .await
    }
}

async fn reader_loop(inner: Arc<Inner>) {
    loop {
        if inner.destroyed.load(Ordering::SeqCst) || inner.transport.is_destroyed() {
            break;
        }
        match inner.transport.read().await {
            Ok(Some(Datagram::Text(chunk))) => {
                let lines = inner.frame_buffer.lock().await.push(&chunk);
                for line in lines {
                    match serialization::decode_line(&line) {
                        Ok(LineOutcome::Message(message)) => {
                            dispatch_message(&inner, message, None, None).await;
                        }
                        Ok(LineOutcome::PassThrough(text)) => {
                            eprintln!("{text}");
                        }
                        Err(e) => warn!("failed to decode line: {}", e),
                    }
                }
            }
            Ok(Some(Datagram::Object { envelope, transfers: _ })) => {
                let WireEnvelope { payload, transfer_slots, transferred_values, .. } = envelope;
                dispatch_message(&inner, payload, transfer_slots, transferred_values).await;
            }
            Ok(None) => continue,
            Err(e) => {
                if inner.transport.is_destroyed() {
                    break;
                }
                warn!("transport read error: {}", e);
                continue;
            }
        }
    }
    debug!("reader loop exiting");
}

async fn dispatch_message(
    inner: &Arc<Inner>,
    mut message: Message,
    transfer_slots: Option<Vec<TransferSlot>>,
    transferred_values: Option<Vec<Value>>,
) {
    if let Some(slots) = transfer_slots {
        let values = transferred_values.unwrap_or_default();
        let registry = inner.transfer_registry.read().await;
        match transfer::expand_incoming(&message.args, &slots, &values, &registry) {
            Ok(expanded) => message.args = expanded,
            Err(e) => {
                warn!("failed to expand transfer slots: {}", e);
                return;
            }
        }
    }

    match message.kind {
        MessageType::Response => handle_response(inner, message).await,
        MessageType::Request => handle_call(inner, message, false).await,
        MessageType::Construct => handle_call(inner, message, true).await,
        MessageType::Callback => handle_callback(inner, message).await,
        MessageType::Get => handle_get(inner, message).await,
        MessageType::Set => handle_set(inner, message).await,
    }
}

async fn handle_response(inner: &Arc<Inner>, message: Message) {
    let sender = inner.pending.lock().await.remove(&message.id);
    if let Some(handle) = inner.timers.lock().await.remove(&message.id) {
        handle.abort();
    }
    let Some(sender) = sender else {
        debug!("response for unknown or timed-out request {}, dropping", message.id);
        return;
    };

    let result = if let Some(error) = message.args.get("error") {
        let enhanced: EnhancedError = match serde_json::from_value(error.clone()) {
            Ok(e) => e,
            Err(_) => EnhancedError::new("Error", error.to_string()),
        };
        Err(RpcError::Remote(enhanced))
    } else {
        Ok(message.args.get("result").cloned().unwrap_or(Value::Null))
    };
    let _ = sender.send(result);
}

async fn handle_call(inner: &Arc<Inner>, message: Message, is_construct: bool) {
    let exposed = inner.exposed.read().await.clone();
    let Some(api) = exposed else {
        respond_err(inner, &message.id, &RpcError::Routing("no API exposed on this channel".into())).await;
        return;
    };

    let handler = if is_construct {
        api.constructor_handler(&message.method).cloned()
    } else {
        api.method_handler(&message.method).cloned()
    };
    let Some(handler) = handler else {
        respond_err(
            inner,
            &message.id,
            &RpcError::Routing(format!("no handler registered for {}", message.method)),
        )
        .await;
        return;
    };

    let raw_args: Vec<Value> = message.args.as_array().cloned().unwrap_or_default();
    let api_args: Vec<ApiArg> = raw_args
        .into_iter()
        .map(|v| wrap_incoming_arg(inner.clone(), v))
        .collect();

    let validators = inner.validators.read().await.clone();
    let value_args: Vec<Value> = api_args.iter().filter_map(|a| a.as_value().cloned()).collect();
    if let Err(err) = validate_input(&validators, &message.method, &Value::Array(value_args)).await {
        respond_err(inner, &message.id, &err).await;
        return;
    }

    let interceptors = inner.interceptors.read().await.clone();
    let ctx = Context {
        method: message.method.clone(),
        args: api_args,
        state: SharedState::default(),
    };
    let handler_fn: interceptor::Handler = Arc::new(move |args| handler(args));

    let outcome = interceptor::dispatch(&interceptors, ctx, handler_fn).await;
    match outcome {
        Ok(value) => match validate_output(&validators, &message.method, &value).await {
            Ok(coerced) => respond_ok(inner, &message.id, coerced).await,
            Err(err) => respond_err(inner, &message.id, &err).await,
        },
        Err(err) => respond_err(inner, &message.id, &err).await,
    }
}

fn wrap_incoming_arg(inner: Arc<Inner>, value: Value) -> ApiArg {
    if let Value::String(s) = &value {
        if let Some(cb_id) = parse_callback_marker(s) {
            let cb_id = cb_id.to_string();
            let handle: CallbackHandle = Arc::new(move |callback_args: Vec<Value>| {
                let inner = inner.clone();
                let cb_id = cb_id.clone();
                Box::pin(async move {
                    let mut msg = Message::new(generate_id(), MessageType::Callback);
                    msg.method = cb_id;
                    msg.args = Value::Array(callback_args);
                    send_on_wire(&inner, msg).await.map_err(RpcError::Transport)
                })
            });
            return ApiArg::Callback(handle);
        }
    }
    ApiArg::Value(value)
}

async fn handle_callback(inner: &Arc<Inner>, message: Message) {
    let cb = inner.callbacks_by_id.lock().await.get(&message.method).cloned();
    let Some(cb) = cb else {
        debug!("callback {} fired for unknown or freed registration, dropping", message.method);
        return;
    };
    let args = message.args.as_array().cloned().unwrap_or_default();
    if let Err(e) = cb(args).await {
        warn!("callback invocation failed: {}", e);
    }
}

async fn handle_get(inner: &Arc<Inner>, message: Message) {
    let exposed = inner.exposed.read().await.clone();
    let path = message.path.clone().unwrap_or_default();
    let result = match exposed {
        Some(api) => api.get_property(&path).await,
        None => Err(RpcError::Routing("no API exposed on this channel".into())),
    };
    match result {
        Ok(value) => respond_ok(inner, &message.id, value).await,
        Err(err) => respond_err(inner, &message.id, &err).await,
    }
}

async fn handle_set(inner: &Arc<Inner>, message: Message) {
    let exposed = inner.exposed.read().await.clone();
    let path = message.path.clone().unwrap_or_default();
    let value = message.value.clone().unwrap_or(Value::Null);
    let result = match exposed {
        Some(api) => api.set_property(&path, value).await,
        None => Err(RpcError::Routing("no API exposed on this channel".into())),
    };
    match result {
        Ok(()) => respond_ok(inner, &message.id, Value::Bool(true)).await,
        Err(err) => respond_err(inner, &message.id, &err).await,
    }
}

async fn respond_ok(inner: &Arc<Inner>, id: &str, result: Value) {
    let message = Message::response_ok(id, result);
    if let Err(e) = send_on_wire(inner, message).await {
        warn!("failed to send response: {}", e);
    }
}

async fn respond_err(inner: &Arc<Inner>, id: &str, err: &RpcError) {
    let message = Message::response_err(id, to_enhanced_error(err));
    if let Err(e) = send_on_wire(inner, message).await {
        warn!("failed to send error response: {}", e);
    }
}

/// Serialize and write `message`, picking the wire encoding by transport
/// capability (spec §4.2 "structured-clone vs. byte-stream duality") and
/// rewriting transferable values when enabled (spec §4.3). Writes are
/// serialized with `write_lock` so framed string transports never
/// interleave two documents (spec §5).
async fn send_on_wire(inner: &Arc<Inner>, mut message: Message) -> anyhow::Result<()> {
    let _guard = inner.write_lock.lock().await;
    let capabilities = inner.transport.capabilities();

    if inner.enable_transfer && capabilities.transfer {
        let registry = inner.transfer_registry.read().await;
        let outcome = transfer::rewrite_outgoing(&message.args, &registry)?;
        drop(registry);
        message.args = outcome.rewritten;
        let transfer_slots = if outcome.transfer_slots.is_empty() {
            None
        } else {
            Some(outcome.transfer_slots)
        };
        let transferred_values = if outcome.transferred_values.is_empty() {
            None
        } else {
            Some(outcome.transferred_values)
        };
        let handles: Vec<TransferHandle> = outcome.handles;
        let envelope = WireEnvelope::new(message, transfer_slots, transferred_values);
        inner.transport.write(Datagram::Object { envelope, transfers: handles }).await
    } else if capabilities.structured_clone {
        let envelope = WireEnvelope::new(message, None, None);
        inner.transport.write(Datagram::Object { envelope, transfers: vec![] }).await
    } else {
        let line = serialization::encode_line(&message, inner.dialect)?;
        inner.transport.write(Datagram::Text(line)).await
    }
}
