mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use common::{spawn_echo_origin, spawn_fake_server};
use tungo_client::{Events, Options, TunnelClient, TunnelError};
use tungo_protocol::Frame;

#[tokio::test]
async fn start_reports_server_assigned_tunnel_info() {
    let (server, _task) = spawn_fake_server(|mut ws| async move {
        if !matches!(ws.next().await, Some(Ok(Message::Text(_)))) {
            return;
        }
        let _ = ws
            .send(Message::Text(
                r#"{"type":"success","sub_domain":"abc","public_url":"http://abc.example.com"}"#.into(),
            ))
            .await;
        // Stay open so the engine doesn't treat this as a dropped connection.
        let _ = futures_util::future::pending::<()>().await;
    })
    .await;

    let options = Options::builder(8080)
        .server_url(format!("ws://{}/ws", server.addr))
        .connect_timeout_secs(2)
        .build()
        .unwrap();
    let client = TunnelClient::new(options, Events::default()).unwrap();

    let info = client.start().await.unwrap();
    assert_eq!(info.subdomain, "abc");
    assert_eq!(info.url, "http://abc.example.com");
    assert!(client.is_active());
    assert_eq!(client.get_info(), Some(info));

    client.stop().await;
    assert!(!client.is_active());
}

#[tokio::test]
async fn start_fails_on_handshake_rejection() {
    let (server, _task) = spawn_fake_server(|mut ws| async move {
        if !matches!(ws.next().await, Some(Ok(Message::Text(_)))) {
            return;
        }
        let _ = ws
            .send(Message::Text(r#"{"type":"sub_domain_in_use","error":"taken"}"#.into()))
            .await;
    })
    .await;

    let options = Options::builder(8080)
        .server_url(format!("ws://{}/ws", server.addr))
        .connect_timeout_secs(2)
        .build()
        .unwrap();
    let client = TunnelClient::new(options, Events::default()).unwrap();

    let err = client.start().await.unwrap_err();
    assert!(matches!(err, TunnelError::HandshakeRejected(_)));
    assert!(err.to_string().contains("taken"));
    assert!(!client.is_active());
}

#[tokio::test]
async fn proxies_stream_request_end_to_end() {
    let (origin_addr, _origin) = spawn_echo_origin().await;
    let (responses_tx, mut responses_rx) = tokio::sync::mpsc::channel::<Frame>(8);

    let (server, _task) = spawn_fake_server(move |mut ws| {
        let responses_tx = responses_tx.clone();
        async move {
            if !matches!(ws.next().await, Some(Ok(Message::Text(_)))) {
                return;
            }
            let _ = ws.send(Message::Text(r#"{"type":"success","sub_domain":"x"}"#.into())).await;

            let raw_request = b"POST /echo HTTP/1.1\r\nHost: h\r\nContent-Length: 5\r\n\r\nhello";
            let init = Frame::Init { stream_id: "s1".into(), data: None };
            let _ = ws.send(Message::Text(init.encode().unwrap().into())).await;
            let data = Frame::data("s1", raw_request);
            let _ = ws.send(Message::Text(data.encode().unwrap().into())).await;
            let end = Frame::end("s1");
            let _ = ws.send(Message::Text(end.encode().unwrap().into())).await;

            while let Some(Ok(Message::Text(text))) = ws.next().await {
                let Ok(frame) = Frame::decode(&text) else { continue };
                let is_end = matches!(frame, Frame::End { .. });
                let _ = responses_tx.send(frame).await;
                if is_end {
                    break;
                }
            }
        }
    })
    .await;

    let options = Options::builder(origin_addr.port())
        .local_host("127.0.0.1")
        .server_url(format!("ws://{}/ws", server.addr))
        .connect_timeout_secs(2)
        .build()
        .unwrap();
    let client = TunnelClient::new(options, Events::default()).unwrap();
    client.start().await.unwrap();

    let mut body_bytes = Vec::new();
    let mut saw_end = false;
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), responses_rx.recv())
        .await
        .expect("timed out waiting for proxied response")
    {
        match &frame {
            Frame::Data { .. } => body_bytes = frame.decoded_data().unwrap(),
            Frame::End { .. } => {
                saw_end = true;
                break;
            }
            _ => {}
        }
    }

    assert!(saw_end, "expected the stream to terminate with an END frame");
    let text = String::from_utf8(body_bytes).unwrap();
    assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(text.ends_with("hello"));

    client.stop().await;
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let connect_count = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let count_for_handler = connect_count.clone();

    let (server, _task) = spawn_fake_server(move |mut ws| {
        let connect_count = count_for_handler.clone();
        async move {
            if !matches!(ws.next().await, Some(Ok(Message::Text(_)))) {
                return;
            }
            let n = connect_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let _ = ws.send(Message::Text(r#"{"type":"success","sub_domain":"abc"}"#.into())).await;
            if n == 0 {
                // Drop the very first connection to force a reconnect.
                return;
            }
            let _ = futures_util::future::pending::<()>().await;
        }
    })
    .await;

    let reconnect_attempts: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
    let reconnect_attempts_cb = reconnect_attempts.clone();
    let connects: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let connects_cb = connects.clone();

    let events = Events::builder()
        .on_reconnect(move |attempt| reconnect_attempts_cb.lock().unwrap().push(attempt))
        .on_connect(move |_info| {
            *connects_cb.lock().unwrap() += 1;
        })
        .build();

    let options = Options::builder(8080)
        .server_url(format!("ws://{}/ws", server.addr))
        .connect_timeout_secs(2)
        .retry_interval_secs(1)
        .max_retries(3)
        .build()
        .unwrap();
    let client = TunnelClient::new(options, events).unwrap();
    client.start().await.unwrap();

    for _ in 0..50 {
        if *connects.lock().unwrap() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    assert!(*connects.lock().unwrap() >= 2, "expected the client to reconnect after disconnection");
    assert!(!reconnect_attempts.lock().unwrap().is_empty());

    client.stop().await;
}
