//! End-to-end tests for the market-data feed against a local mock
//! gateway speaking the broker's frame protocol.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use jainam_lite::websocket::stream_credential;
use jainam_lite::{
    ConnectionState, FeedEvent, Instrument, JainamError, MarketFeed, MarketFeedConfig,
};

/// A mock of the streaming gateway serving one client at a time, with
/// sequential reconnects allowed. Records every text frame the client
/// sends and can inject arbitrary frames.
struct MockGateway {
    url: String,
    frames: mpsc::UnboundedReceiver<String>,
    inject: mpsc::UnboundedSender<Message>,
}

/// When `ack_ok` is set the gateway answers the connect frame with
/// `{"t":"cf","s":"OK"}`; otherwise it stays silent, leaving the client
/// waiting for the acknowledgment.
async fn spawn_gateway(ack_ok: bool) -> MockGateway {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frames_tx, frames) = mpsc::unbounded_channel();
    let (inject, mut inject_rx) = mpsc::unbounded_channel::<Message>();

    tokio::spawn(async move {
        'accept: loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let ws = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => continue,
            };
            let (mut write, mut read) = ws.split();
            loop {
                tokio::select! {
                    msg = read.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            let is_connect = serde_json::from_str::<Value>(text.as_str())
                                .ok()
                                .and_then(|v| v.get("t").and_then(Value::as_str).map(|t| t == "c"))
                                .unwrap_or(false);
                            let _ = frames_tx.send(text.as_str().to_owned());
                            if is_connect && ack_ok {
                                let ack = r#"{"t":"cf","s":"OK"}"#;
                                if write.send(Message::Text(ack.into())).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(_)) => break,
                    },
                    injected = inject_rx.recv() => match injected {
                        Some(msg) => {
                            if write.send(msg).await.is_err() {
                                break;
                            }
                        }
                        // Test finished and dropped its handle.
                        None => break 'accept,
                    },
                }
            }
        }
    });

    MockGateway {
        url: format!("ws://127.0.0.1:{}", addr.port()),
        frames,
        inject,
    }
}

fn feed_config(url: &str, heartbeat: Duration) -> MarketFeedConfig {
    MarketFeedConfig {
        url: url.to_owned(),
        heartbeat_interval: heartbeat,
    }
}

async fn next_frame(gateway: &mut MockGateway) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(2), gateway.frames.recv())
        .await
        .expect("timed out waiting for a client frame")
        .expect("gateway connection ended");
    serde_json::from_str(&text).expect("client sent a non-JSON frame")
}

/// Assert the client sends nothing for `window`. A closed connection
/// also counts as "no frame".
async fn assert_no_frame_within(gateway: &mut MockGateway, window: Duration) {
    match tokio::time::timeout(window, gateway.frames.recv()).await {
        Err(_) => {}
        Ok(None) => {}
        Ok(Some(frame)) => panic!("unexpected frame from client: {frame}"),
    }
}

async fn next_event(events: &mut broadcast::Receiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a feed event")
        .expect("event channel closed")
}

#[tokio::test]
async fn handshake_carries_derived_credential_and_api_account() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, _events) = MarketFeed::with_config(
        "DK2200295",
        "session-token",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();

    let handshake = next_frame(&mut gateway).await;
    assert_eq!(handshake["t"], "c");
    assert_eq!(handshake["uid"], "DK2200295_API");
    assert_eq!(handshake["actid"], "DK2200295_API");
    assert_eq!(handshake["source"], "API");
    // The gateway recomputes the double hash; the raw token must never
    // appear on the wire.
    assert_eq!(handshake["susertoken"], stream_credential("session-token"));
    assert_ne!(handshake["susertoken"], "session-token");

    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    assert_eq!(feed.state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn ack_connects_and_subscribe_sends_keyed_frame() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, mut events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();

    // Connected event precedes the verbatim ack frame delivery.
    assert!(matches!(next_event(&mut events).await, FeedEvent::Connected));

    let _handshake = next_frame(&mut gateway).await;

    feed.subscribe(&[Instrument::new("NSE", "26000")], false)
        .await
        .unwrap();
    let frame = next_frame(&mut gateway).await;
    assert_eq!(frame["k"], "NSE|26000");
    assert_eq!(frame["t"], "t");

    feed.subscribe(
        &[Instrument::new("NSE", "26000"), Instrument::new("NFO", "54957")],
        true,
    )
    .await
    .unwrap();
    let frame = next_frame(&mut gateway).await;
    assert_eq!(frame["k"], "NSE|26000#NFO|54957");
    assert_eq!(frame["t"], "d");

    let subs = feed.subscriptions().await;
    assert_eq!(subs.len(), 3); // one tick + two depth entries

    feed.unsubscribe(&[Instrument::new("NSE", "26000")], true)
        .await
        .unwrap();
    let frame = next_frame(&mut gateway).await;
    assert_eq!(frame["k"], "NSE|26000");
    assert_eq!(frame["t"], "ud");
    assert_eq!(feed.subscriptions().await.len(), 2);
}

#[tokio::test]
async fn subscribe_before_ack_fails_and_sends_nothing() {
    // Gateway never acknowledges: the client stays in AwaitingAck.
    let mut gateway = spawn_gateway(false).await;
    let (mut feed, _events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_millis(100)),
    );

    feed.connect().await.unwrap();
    let _handshake = next_frame(&mut gateway).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(feed.state().await, ConnectionState::AwaitingAck);

    let err = feed
        .subscribe(&[Instrument::new("NSE", "26000")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, JainamError::NotConnected));
    assert!(feed.subscriptions().await.is_empty());

    // No subscribe frame and, because the ack never came, no heartbeat
    // either - even across several heartbeat intervals.
    assert_no_frame_within(&mut gateway, Duration::from_millis(350)).await;

    let err = feed
        .wait_until_connected(Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, JainamError::ConnectTimeout(_)));
}

#[tokio::test]
async fn heartbeats_flow_while_connected_and_stop_after_disconnect() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, _events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_millis(100)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    let _handshake = next_frame(&mut gateway).await;

    // Two consecutive liveness frames.
    for _ in 0..2 {
        let frame = next_frame(&mut gateway).await;
        assert_eq!(frame["t"], "h");
        assert_eq!(frame["k"], "");
    }

    feed.disconnect().await;

    // Drain anything already in flight, then require silence across
    // several would-be heartbeat ticks.
    tokio::time::sleep(Duration::from_millis(50)).await;
    while gateway.frames.try_recv().is_ok() {}
    assert_no_frame_within(&mut gateway, Duration::from_millis(350)).await;
    assert_eq!(feed.state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_reports_once() {
    let gateway = spawn_gateway(true).await;
    let (mut feed, mut events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();

    feed.disconnect().await;
    feed.disconnect().await;

    let mut disconnects = 0;
    loop {
        match tokio::time::timeout(Duration::from_millis(400), events.recv()).await {
            Ok(Ok(FeedEvent::Disconnected { .. })) => disconnects += 1,
            Ok(Ok(_)) => {}
            Ok(Err(_)) | Err(_) => break,
        }
    }
    assert_eq!(disconnects, 1);
    assert_eq!(feed.state().await, ConnectionState::Disconnected);

    drop(gateway);
}

#[tokio::test]
async fn reconnect_after_disconnect_reaches_connected_again() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, _events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    let _handshake = next_frame(&mut gateway).await;

    feed.disconnect().await;
    assert_eq!(feed.state().await, ConnectionState::Disconnected);

    // Reconnect immediately: the first task, still winding down, must
    // not overwrite the second connection's state.
    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    let handshake = next_frame(&mut gateway).await;
    assert_eq!(handshake["t"], "c");

    // The connected state holds once the first task has fully exited.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(feed.state().await, ConnectionState::Connected);

    feed.subscribe(&[Instrument::new("NSE", "26000")], false)
        .await
        .unwrap();
    let frame = next_frame(&mut gateway).await;
    assert_eq!(frame["k"], "NSE|26000");
    assert_eq!(frame["t"], "t");
}

#[tokio::test]
async fn malformed_frame_reports_error_and_stream_continues() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, mut events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    let _handshake = next_frame(&mut gateway).await;

    gateway
        .inject
        .send(Message::Text("this is not json".into()))
        .unwrap();
    gateway
        .inject
        .send(Message::Text(r#"{"t":"tf","e":"NSE","tk":"26000","lp":101.55,"v":1200}"#.into()))
        .unwrap();

    let mut protocol_errors = 0;
    let tick = loop {
        match next_event(&mut events).await {
            FeedEvent::ProtocolError(_) => protocol_errors += 1,
            FeedEvent::Message(frame) if frame["t"] == "tf" => break frame,
            _ => {}
        }
    };

    // Exactly one error for the bad frame, and the tick that followed
    // arrived verbatim with its abbreviated keys intact.
    assert_eq!(protocol_errors, 1);
    assert_eq!(tick["lp"], 101.55);
    assert_eq!(tick["tk"], "26000");
    assert!(feed.is_connected().await);
}

#[tokio::test]
async fn server_close_drops_feed_back_to_disconnected() {
    let mut gateway = spawn_gateway(true).await;
    let (mut feed, mut events) = MarketFeed::with_config(
        "DK1",
        "sess",
        feed_config(&gateway.url, Duration::from_secs(50)),
    );

    feed.connect().await.unwrap();
    feed.wait_until_connected(Duration::from_secs(2)).await.unwrap();
    let _handshake = next_frame(&mut gateway).await;

    gateway.inject.send(Message::Close(None)).unwrap();

    loop {
        match next_event(&mut events).await {
            FeedEvent::Disconnected { .. } => break,
            _ => {}
        }
    }
    assert_eq!(feed.state().await, ConnectionState::Disconnected);

    // Subscriptions are gone with the connection; subscribe fails fast
    // again until the caller reconnects.
    let err = feed
        .subscribe(&[Instrument::new("NSE", "26000")], false)
        .await
        .unwrap_err();
    assert!(matches!(err, JainamError::NotConnected));
}
