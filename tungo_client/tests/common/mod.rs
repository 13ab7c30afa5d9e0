//! A minimal fake rendezvous server, built directly on `tokio-tungstenite`
//! rather than a test framework, so these tests exercise the exact wire
//! transport the engine dials in production.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, WebSocketStream};

pub struct FakeServer {
    pub addr: SocketAddr,
}

/// Accept connections on an ephemeral port and hand each one to `handler`.
/// `handler` runs in its own task per connection, so a script that never
/// returns (to simulate a long-lived control channel) doesn't block later
/// connections.
pub async fn spawn_fake_server<F, Fut>(handler: F) -> (FakeServer, tokio::task::JoinHandle<()>)
where
    F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);

    let task = tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    handler(ws).await;
                }
            });
        }
    });

    (FakeServer { addr }, task)
}

/// A trivial local origin: echoes the request body back as the response body.
pub async fn spawn_echo_origin() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    use axum::routing::any;
    use axum::Router;

    let app = Router::new()
        .route("/", any(|| async { "root" }))
        .route("/{*path}", any(|body: axum::body::Bytes| async move { body }));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (addr, handle)
}
