#![forbid(unsafe_code)]

use std::sync::Arc;

use hubwire::{
    Codec, Error, ErrorKind, JsonCodec, MemoryTransport, MessagePackCodec, Router, RouterConfig,
    ServiceBuilder,
};

#[hubwire::service]
trait Calculator {
    async fn add(&self, a: i32, b: i32) -> hubwire::Result<i32>;

    async fn fail(&self) -> hubwire::Result<i32>;

    async fn explode(&self, reason: &str) -> hubwire::Result<()>;

    async fn nothing(&self) -> hubwire::Result<()>;

    async fn concat(&self, parts: Vec<String>, sep: &str) -> hubwire::Result<String>;
}

struct CalculatorImpl;

impl Calculator for CalculatorImpl {
    async fn add(&self, a: i32, b: i32) -> hubwire::Result<i32> {
        Ok(a + b)
    }

    async fn fail(&self) -> hubwire::Result<i32> {
        Err(Error::new(ErrorKind::InvalidArgument, "boom".to_string()))
    }

    async fn explode(&self, reason: &str) -> hubwire::Result<()> {
        panic!("{reason}");
    }

    async fn nothing(&self) -> hubwire::Result<()> {
        Ok(())
    }

    async fn concat(&self, parts: Vec<String>, sep: &str) -> hubwire::Result<String> {
        Ok(parts.join(sep))
    }
}

fn connect<C: Codec + Clone>(codec: C) -> (Arc<Router<C>>, Arc<Router<C>>) {
    let (a, b) = MemoryTransport::pair();
    let server = Router::create(a, codec.clone(), RouterConfig::default()).unwrap();
    server
        .add_service(CalculatorService::new(CalculatorImpl), None)
        .unwrap();
    let client = Router::create(b, codec, RouterConfig::default()).unwrap();
    (server, client)
}

async fn round_trip<C: Codec + Clone>(codec: C) {
    let (server, client) = connect(codec);
    let calculator = client
        .add_interface::<CalculatorClient<C>>(None)
        .unwrap();
    assert_eq!(
        format!("{calculator:?}"),
        r#"CalculatorClient(Client { hub: "Calculator" })"#
    );

    assert_eq!(calculator.add(3, 4).await.unwrap(), 7);
    calculator.nothing().await.unwrap();
    let joined = calculator
        .concat(vec!["a".into(), "b".into(), "c".into()], "-")
        .await
        .unwrap();
    assert_eq!(joined, "a-b-c");
    assert_eq!(client.pending_calls(), 0);

    server.dispose();
    client.dispose();
}

#[tokio::test]
async fn test_round_trip_json() {
    let _ = tracing_subscriber::fmt().try_init();
    round_trip(JsonCodec).await;
}

#[tokio::test]
async fn test_round_trip_msgpack() {
    let _ = tracing_subscriber::fmt().try_init();
    round_trip(MessagePackCodec).await;
}

#[tokio::test]
async fn test_remote_error() {
    let (server, client) = connect(JsonCodec);
    let calculator = client
        .add_interface::<CalculatorClient<JsonCodec>>(None)
        .unwrap();

    let err = calculator.fail().await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.msg, "boom");
    let trace = err.remote_trace.unwrap();
    assert!(trace.starts_with("Calculator.fail"));

    // panics are reported like errors and the hub keeps serving.
    let err = calculator.explode("kaboom").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert_eq!(err.msg, "panicked: kaboom");
    assert_eq!(calculator.add(1, 2).await.unwrap(), 3);

    server.dispose();
    client.dispose();
}

#[tokio::test]
async fn test_unknown_method() {
    let (server, client) = connect(MessagePackCodec);

    let err = client
        .call::<i32>("Calculator", "doesNotExist", vec![])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);
    assert!(err.msg.contains("doesNotExist"));

    // method names resolve ignoring case.
    let codec = client.codec();
    let args = vec![codec.to_value(&20).unwrap(), codec.to_value(&22).unwrap()];
    let sum: i32 = client.call("Calculator", "ADD", args).await.unwrap();
    assert_eq!(sum, 42);

    let err = client
        .call::<i32>("Calculator", "add", vec![codec.to_value(&1).unwrap()])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);

    let err = client.call::<i32>("Nowhere", "add", vec![]).await.unwrap_err();
    assert_eq!(err.msg, "no such hub: Nowhere");

    let calculator = client
        .add_interface::<CalculatorClient<MessagePackCodec>>(None)
        .unwrap();
    assert_eq!(calculator.add(3, 4).await.unwrap(), 7);

    server.dispose();
    client.dispose();
}

#[tokio::test]
async fn test_overloads() {
    let (a, b) = MemoryTransport::pair();
    let server = Router::create(a, JsonCodec, RouterConfig::default()).unwrap();
    let math = ServiceBuilder::<JsonCodec>::new("Math")
        .method("sum", 2, |mut args| async move {
            let a: i64 = args.next()?;
            let b: i64 = args.next()?;
            args.reply(&(a + b))
        })
        .method("Sum", 3, |mut args| async move {
            let a: i64 = args.next()?;
            let b: i64 = args.next()?;
            let c: i64 = args.next()?;
            args.reply(&(a * b * c))
        });
    server.add_service(math, None).unwrap();

    let client = Router::create(b, JsonCodec, RouterConfig::default()).unwrap();
    let codec = client.codec().clone();
    let values = |v: &[i64]| v.iter().map(|v| codec.to_value(v).unwrap()).collect::<Vec<_>>();

    let two: i64 = client.call("Math", "SUM", values(&[2, 3])).await.unwrap();
    assert_eq!(two, 5);
    let three: i64 = client.call("Math", "sum", values(&[2, 3, 4])).await.unwrap();
    assert_eq!(three, 24);
    let err = client
        .call::<i64>("Math", "sum", values(&[1]))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Remote);

    let ambiguous = ServiceBuilder::<JsonCodec>::new("Bad")
        .method("x", 1, |args| async move { args.reply(&1) })
        .method("X", 1, |args| async move { args.reply(&2) });
    let err = server.add_service(ambiguous, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
    assert_eq!(server.hub_names(), ["Math"]);

    server.dispose();
    client.dispose();
}

#[tokio::test]
async fn test_concurrent_calls() {
    let (server, client) = connect(JsonCodec);
    let calculator = client
        .add_interface::<CalculatorClient<JsonCodec>>(None)
        .unwrap();

    let mut tasks = vec![];
    for i in 0..256 {
        let calculator = calculator.clone();
        tasks.push(tokio::spawn(async move { calculator.add(i, i).await }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let i = i32::try_from(i).unwrap();
        assert_eq!(task.await.unwrap().unwrap(), i * 2);
    }
    assert_eq!(client.pending_calls(), 0);

    server.dispose();
    client.dispose();
}

#[tokio::test]
async fn test_both_directions() {
    let (left, right) = connect(JsonCodec);
    right
        .add_service(CalculatorService::new(CalculatorImpl), Some("Mirror"))
        .unwrap();

    let forward = right
        .add_interface::<CalculatorClient<JsonCodec>>(None)
        .unwrap();
    let backward = left
        .add_interface::<CalculatorClient<JsonCodec>>(Some("Mirror"))
        .unwrap();
    let (x, y) = tokio::join!(forward.add(1, 1), backward.add(2, 2));
    assert_eq!((x.unwrap(), y.unwrap()), (2, 4));

    left.dispose();
    right.dispose();
}
