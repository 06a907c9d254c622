//! End-to-end scenarios over the in-memory mock transport (spec §8).

use anyhow::Result;
use duplex_rpc::error::{is_rpc_timeout_error, is_rpc_validation_error, RpcError};
use duplex_rpc::interceptor::{Context, Interceptor, Next};
use duplex_rpc::mock::MockTransport;
use duplex_rpc::validation::{Outcome, Schema, ValidatorEntry, Validators};
use duplex_rpc::{transfer, ApiArg, Capabilities, ChannelOptions, ExposedApi, RpcChannel, TransferHandle};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn math_api() -> ExposedApi {
    ExposedApi::new().method(
        "math.add",
        Arc::new(|args: Vec<ApiArg>| {
            Box::pin(async move {
                let sum: i64 = args.iter().filter_map(|a| a.as_value()).filter_map(Value::as_i64).sum();
                Ok(Value::from(sum))
            })
        }),
    )
}

#[tokio::test]
async fn call_round_trips_a_method() -> Result<()> {
    let (transport_a, transport_b) = MockTransport::pair();
    let server = RpcChannel::new(transport_a, ChannelOptions::new().with_expose(math_api()));
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let result = client.get_api().call("math.add", vec![Value::from(2), Value::from(3)]).await?;
    assert_eq!(result, Value::from(5));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn callback_argument_is_invoked_by_the_remote_peer() -> Result<()> {
    let (transport_a, transport_b) = MockTransport::pair();

    let seen = Arc::new(AtomicUsize::new(0));
    let seen_for_handler = seen.clone();
    let api = ExposedApi::new().method(
        "numbers.each",
        Arc::new(move |args: Vec<ApiArg>| {
            let seen = seen_for_handler.clone();
            Box::pin(async move {
                let mut total = 0usize;
                if let Some(ApiArg::Callback(cb)) = args.first() {
                    for n in [1, 2, 3] {
                        cb(vec![Value::from(n)]).await?;
                        total += 1;
                    }
                }
                seen.fetch_add(total, Ordering::SeqCst);
                Ok(Value::Null)
            })
        }),
    );

    let server = RpcChannel::new(transport_a, ChannelOptions::new().with_expose(api));
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let received = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let received_for_cb = received.clone();
    let callback: duplex_rpc::CallbackHandle = Arc::new(move |args: Vec<Value>| {
        let received = received_for_cb.clone();
        Box::pin(async move {
            received.lock().await.extend(args);
            Ok(())
        })
    });

    client
        .get_api()
        .call_with("numbers.each", vec![ApiArg::Callback(callback)])
        .await?;

    // Give the fire-and-forget callback messages a moment to land.
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(*received.lock().await, vec![Value::from(1), Value::from(2), Value::from(3)]);

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn property_get_and_set_round_trip() -> Result<()> {
    let (transport_a, transport_b) = MockTransport::pair();
    let api = ExposedApi::new().property("settings.theme", Value::from("light"));
    let server = RpcChannel::new(transport_a, ChannelOptions::new().with_expose(api));
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let before = client.get_api().get(&["settings", "theme"]).await?;
    assert_eq!(before, Value::from("light"));

    client.get_api().set(&["settings", "theme"], Value::from("dark")).await?;
    let after = client.get_api().get(&["settings", "theme"]).await?;
    assert_eq!(after, Value::from("dark"));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn input_validation_rejects_bad_arguments() -> Result<()> {
    struct EvenNumber;

    #[async_trait::async_trait]
    impl Schema for EvenNumber {
        async fn validate(&self, value: &Value) -> Outcome {
            match value.as_array().and_then(|a| a.first()).and_then(Value::as_i64) {
                Some(n) if n % 2 == 0 => Outcome::Valid(value.clone()),
                _ => Outcome::Invalid(vec![duplex_rpc::ValidationIssue {
                    message: "expected an even number".to_string(),
                    path: Some("0".to_string()),
                }]),
            }
        }
    }

    let (transport_a, transport_b) = MockTransport::pair();
    let api = ExposedApi::new().method(
        "numbers.half",
        Arc::new(|args: Vec<ApiArg>| {
            Box::pin(async move {
                let n = args.first().and_then(|a| a.as_value()).and_then(Value::as_i64).unwrap_or(0);
                Ok(Value::from(n / 2))
            })
        }),
    );
    let validators =
        Validators::new().with_method("numbers.half", ValidatorEntry { input: Some(Arc::new(EvenNumber)), output: None });

    let server = RpcChannel::new(
        transport_a,
        ChannelOptions::new().with_expose(api).with_validators(validators),
    );
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let err = client.get_api().call("numbers.half", vec![Value::from(3)]).await.unwrap_err();
    assert!(is_rpc_validation_error(&err));

    let ok = client.get_api().call("numbers.half", vec![Value::from(4)]).await?;
    assert_eq!(ok, Value::from(2));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn interceptor_can_short_circuit_a_call() -> Result<()> {
    struct DenyAdmin;

    #[async_trait::async_trait]
    impl Interceptor for DenyAdmin {
        async fn call(&self, ctx: Context, next: Next) -> Result<Value, RpcError> {
            if ctx.method.starts_with("admin.") {
                return Err(RpcError::Routing("unauthorized".to_string()));
            }
            next(ctx).await
        }
    }

    let (transport_a, transport_b) = MockTransport::pair();
    let api = ExposedApi::new().method(
        "admin.shutdown",
        Arc::new(|_args: Vec<ApiArg>| Box::pin(async move { Ok(Value::Bool(true)) })),
    );
    let server = RpcChannel::new(
        transport_a,
        ChannelOptions::new()
            .with_expose(api)
            .with_interceptors(vec![Arc::new(DenyAdmin) as Arc<dyn Interceptor>]),
    );
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let err = client.get_api().call("admin.shutdown", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn call_to_unexposed_method_is_a_routing_error() -> Result<()> {
    let (transport_a, transport_b) = MockTransport::pair();
    let server = RpcChannel::new(transport_a, ChannelOptions::new());
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    let err = client.get_api().call("nothing.here", vec![]).await.unwrap_err();
    assert!(matches!(err, RpcError::Remote(_)));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn call_after_destroy_fails_immediately() -> Result<()> {
    let (transport_a, transport_b) = MockTransport::pair();
    let server = RpcChannel::new(transport_a, ChannelOptions::new().with_expose(math_api()));
    let client = RpcChannel::new(transport_b, ChannelOptions::new());

    client.destroy().await?;
    let err = client.get_api().call("math.add", vec![Value::from(1)]).await.unwrap_err();
    assert!(matches!(err, RpcError::ChannelDestroyed));

    server.destroy().await?;
    Ok(())
}

#[tokio::test]
async fn call_times_out_when_peer_never_responds() -> Result<()> {
    // transport_b is kept alive (never wired to a channel, never read)
    // so the request sits unread rather than failing the write outright.
    let (transport_a, transport_b) = MockTransport::pair();
    let client = RpcChannel::new(transport_a, ChannelOptions::new().with_timeout(Duration::from_millis(1)));

    let err = client.get_api().call("nothing.there", vec![]).await.unwrap_err();
    assert!(is_rpc_timeout_error(&err));

    client.destroy().await?;
    drop(transport_b);
    Ok(())
}

#[tokio::test]
async fn transferred_argument_is_unwrapped_before_dispatch() -> Result<()> {
    let capabilities = Capabilities { structured_clone: true, transfer: true };
    let (transport_a, transport_b) = MockTransport::pair_with_capabilities(capabilities);

    let api = ExposedApi::new().method(
        "payload.echo",
        Arc::new(|args: Vec<ApiArg>| {
            Box::pin(async move { Ok(args.first().and_then(|a| a.as_value()).cloned().unwrap_or(Value::Null)) })
        }),
    );
    let server = RpcChannel::new(transport_a, ChannelOptions::new().with_expose(api));
    let client = RpcChannel::new(transport_b, ChannelOptions::new().with_transfer_enabled(true));

    let payload = transfer(serde_json::json!({"chunk": "hello"}), vec![TransferHandle(vec![1, 2, 3])])?;
    let result = client.get_api().call("payload.echo", vec![payload]).await?;
    assert_eq!(result, serde_json::json!({"chunk": "hello"}));

    client.destroy().await?;
    server.destroy().await?;
    Ok(())
}
