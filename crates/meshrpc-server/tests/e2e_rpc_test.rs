//! End-to-end RPC tests: a real server, a real client, loopback TCP.

use std::time::Duration;

use serde_json::json;

use meshrpc_client::{RpcClient, ServiceStub};
use meshrpc_common::{MeshError, NetConfig, PeerAddr, Result};
use meshrpc_server::{RpcServer, ServiceHandler};

fn fast_config() -> NetConfig {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();

    NetConfig {
        connect_timeout: Duration::from_millis(500),
        reconnect_delay: Duration::from_millis(20),
        ..Default::default()
    }
}

fn hello_service() -> ServiceHandler {
    ServiceHandler::builder("HelloService")
        .method("hello", 1, |args| async move {
            let name = args[0].as_str().unwrap_or_default().to_string();
            Ok(json!(format!("Hello {name}")))
        })
        .method("broken", 1, |_args| async move {
            Err(MeshError::Remote("timeout".to_string()))
        })
        .method("slow", 0, |_args| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(json!("slow done"))
        })
        .build()
}

async fn started_server() -> (RpcServer, PeerAddr) {
    let server = RpcServer::new(fast_config());
    server.add_service(hello_service());
    server.start(&PeerAddr::new("127.0.0.1", 0)).await.unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

async fn connected_client(addr: PeerAddr) -> RpcClient {
    let client = RpcClient::new(addr, fast_config());
    client.connect().await.unwrap();
    client
}

/// Hand-written client-side interface of the remote HelloService. Each
/// method builds the request, registers the correlation future, sends,
/// and blocks, all through the shared stub plumbing.
struct HelloServiceStub {
    stub: ServiceStub,
}

impl HelloServiceStub {
    fn new(client: &RpcClient) -> Self {
        Self {
            stub: client.service("HelloService"),
        }
    }

    async fn hello(&self, name: &str) -> Result<String> {
        self.stub.call("hello", vec![json!(name)]).await
    }

    async fn broken(&self, name: &str) -> Result<String> {
        self.stub.call("broken", vec![json!(name)]).await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hello_world() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    let hello = HelloServiceStub::new(&client);
    assert_eq!(hello.hello("World").await.unwrap(), "Hello World");

    client.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_failure_propagates_its_message() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    let hello = HelloServiceStub::new(&client);
    match hello.broken("World").await {
        Err(MeshError::Remote(message)) => assert!(
            message.contains("timeout"),
            "unexpected remote message: {message}"
        ),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_call_does_not_poison_the_connection() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    let hello = HelloServiceStub::new(&client);
    assert!(hello.broken("x").await.is_err());
    // The very same connection must still serve unrelated calls.
    assert_eq!(hello.hello("again").await.unwrap(), "Hello again");

    client.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_service_and_method_are_reported() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    match client.call("NoSuchService", "m", vec![]).await {
        Err(MeshError::Remote(message)) => assert!(message.contains("NoSuchService")),
        other => panic!("expected remote error, got {other:?}"),
    }
    match client.call("HelloService", "no_such_method", vec![]).await {
        Err(MeshError::Remote(message)) => assert!(message.contains("no_such_method")),
        other => panic!("expected remote error, got {other:?}"),
    }

    client.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_call_does_not_block_other_requests() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    let slow_client = client.clone();
    let slow = tokio::spawn(async move {
        slow_client.call("HelloService", "slow", vec![]).await
    });

    // The fast call goes out on the same connection while the slow one is
    // still running, and must come back first.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let start = std::time::Instant::now();
    let fast = client
        .call("HelloService", "hello", vec![json!("quick")])
        .await
        .unwrap();
    assert_eq!(fast, json!("Hello quick"));
    assert!(
        start.elapsed() < Duration::from_millis(250),
        "fast call waited on the slow one"
    );

    assert_eq!(slow.await.unwrap().unwrap(), json!("slow done"));

    client.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_clients_have_independent_id_spaces() {
    let (server, addr) = started_server().await;
    let a = connected_client(addr.clone()).await;
    let b = connected_client(addr).await;

    // Both clients start their id sequences at the same point; responses
    // must still land with the client that asked.
    for _ in 0..10 {
        let from_a = a.call("HelloService", "hello", vec![json!("a")]).await;
        let from_b = b.call("HelloService", "hello", vec![json!("b")]).await;
        assert_eq!(from_a.unwrap(), json!("Hello a"));
        assert_eq!(from_b.unwrap(), json!("Hello b"));
    }

    a.close().await;
    b.close().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_timeout_against_slow_server() {
    let (server, addr) = started_server().await;
    let client = connected_client(addr).await;

    let result = client
        .call_timeout("HelloService", "slow", vec![], Duration::from_millis(50))
        .await;
    assert!(matches!(result, Err(MeshError::Timeout(50))));

    client.close().await;
    server.close();
}
