//! Real-time market-data feed client
//!
//! Maintains one long-lived WebSocket connection to the broker's
//! streaming gateway, authenticates it with a derived credential, and
//! multiplexes tick/depth subscriptions onto it. Incoming data frames
//! are JSON objects with the broker's abbreviated field keys and are
//! forwarded verbatim; consumers receive them from a broadcast channel.
//!
//! Connection lifecycle: `Disconnected -> Connecting -> AwaitingAck ->
//! Connected`, with any transport error or close dropping back to
//! `Disconnected`. There is no automatic reconnect: the gateway does
//! not persist subscriptions across connections, so the caller decides
//! when to reconnect and must resubscribe afterwards.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::error::{JainamError, JainamResult};
use crate::types::Instrument;

/// Broker's market-data streaming endpoint
pub const MARKET_FEED_URL: &str = "wss://ws.jainam.in/NorenWSTP/";

/// Liveness frame cadence required by the gateway
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(50);

/// Poll cadence for [`MarketFeed::wait_until_connected`]
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Accounts authenticated through the API carry this suffix so the
/// gateway can tell them apart from browser sessions.
const API_ACCOUNT_SUFFIX: &str = "_API";

// Frame type tags (the `t` field of every frame)
const FRAME_CONNECT: &str = "c";
const FRAME_CONNECT_ACK: &str = "cf";
const FRAME_HEARTBEAT: &str = "h";
const FRAME_SUBSCRIBE_TICK: &str = "t";
const FRAME_SUBSCRIBE_DEPTH: &str = "d";
const FRAME_UNSUBSCRIBE_TICK: &str = "u";
const FRAME_UNSUBSCRIBE_DEPTH: &str = "ud";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Derive the streaming credential from the REST session token:
/// hex SHA-256 applied twice, the second pass hashing the hex string of
/// the first. The gateway recomputes and compares this value, so the
/// transform must match bit for bit.
pub fn stream_credential(session_token: &str) -> String {
    let first = hex::encode(Sha256::digest(session_token.as_bytes()));
    hex::encode(Sha256::digest(first.as_bytes()))
}

/// Format instruments as the gateway's subscription key:
/// `EXCHANGE|TOKEN` pairs joined by `#`, exchange upper-cased, input
/// order preserved.
pub fn subscription_key(instruments: &[Instrument]) -> String {
    instruments
        .iter()
        .map(|inst| format!("{}|{}", inst.exchange.to_uppercase(), inst.token))
        .collect::<Vec<_>>()
        .join("#")
}

/// Connection lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport dial in progress
    Connecting,
    /// Handshake frame sent, acknowledgment not yet received
    AwaitingAck,
    Connected,
}

/// The two independent subscription classes the gateway streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionMode {
    /// Last-traded-price / volume updates
    Tick,
    /// Five-level bid/ask order-book updates
    Depth,
}

impl SubscriptionMode {
    fn subscribe_type(&self) -> &'static str {
        match self {
            SubscriptionMode::Tick => FRAME_SUBSCRIBE_TICK,
            SubscriptionMode::Depth => FRAME_SUBSCRIBE_DEPTH,
        }
    }

    fn unsubscribe_type(&self) -> &'static str {
        match self {
            SubscriptionMode::Tick => FRAME_UNSUBSCRIBE_TICK,
            SubscriptionMode::Depth => FRAME_UNSUBSCRIBE_DEPTH,
        }
    }
}

/// One tracked subscription. The set of these is advisory client-side
/// bookkeeping only; the server remains the source of truth for what it
/// actually streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub exchange: String,
    pub token: String,
    pub mode: SubscriptionMode,
}

/// Events surfaced to feed consumers.
///
/// Data frames arrive as [`FeedEvent::Message`] with the broker's
/// abbreviated keys untouched: `lp` last traded price, `v` volume, `o`
/// `h` `l` `c` OHLC, `oi` open interest, `bp1`..`bp5` / `sp1`..`sp5`
/// bid/ask prices, `bq1`..`bq5` / `sq1`..`sq5` bid/ask quantities, `tf`
/// and `df` tick/depth feeds, `tk` and `dk` their acknowledgments.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Handshake acknowledged; subscriptions may now be sent
    Connected,
    /// Transport closed or errored; all subscriptions are gone
    Disconnected { error: Option<String> },
    /// A decoded frame, forwarded verbatim
    Message(Value),
    /// A frame that was not valid JSON; the connection continues
    ProtocolError(String),
}

/// Feed configuration. Defaults match the production gateway; the
/// endpoint and heartbeat cadence are injectable for tests.
#[derive(Debug, Clone)]
pub struct MarketFeedConfig {
    pub url: String,
    pub heartbeat_interval: Duration,
}

impl Default for MarketFeedConfig {
    fn default() -> Self {
        Self {
            url: MARKET_FEED_URL.to_owned(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

/// Market-data feed client.
///
/// Each call to [`connect`](MarketFeed::connect) starts a new
/// connection epoch, and its socket task is the single writer of the
/// connection state while a connection is live. A task whose epoch was
/// superseded (by `disconnect()` or a later `connect()`) leaves the
/// state and event channel alone while it winds down, so it can never
/// stomp the next connection.
pub struct MarketFeed {
    config: MarketFeedConfig,
    /// User id with the `_API` suffix applied
    account_id: String,
    /// Twice-hashed session token sent in the handshake
    susertoken: String,
    state: Arc<RwLock<ConnectionState>>,
    subscriptions: Arc<RwLock<HashSet<SubscriptionKey>>>,
    event_tx: broadcast::Sender<FeedEvent>,
    /// Current connection epoch; bumped by `connect()` and
    /// `disconnect()`
    generation: Arc<AtomicU64>,
    frame_tx: Option<mpsc::Sender<String>>,
}

impl MarketFeed {
    /// Create a feed client from the REST session. The session token is
    /// never sent over the socket; only the derived credential is.
    pub fn new(user_id: &str, session_token: &str) -> (Self, broadcast::Receiver<FeedEvent>) {
        Self::with_config(user_id, session_token, MarketFeedConfig::default())
    }

    pub fn with_config(
        user_id: &str,
        session_token: &str,
        config: MarketFeedConfig,
    ) -> (Self, broadcast::Receiver<FeedEvent>) {
        let (event_tx, event_rx) = broadcast::channel(1024);
        (
            Self {
                config,
                account_id: format!("{user_id}{API_ACCOUNT_SUFFIX}"),
                susertoken: stream_credential(session_token),
                state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
                subscriptions: Arc::new(RwLock::new(HashSet::new())),
                event_tx,
                generation: Arc::new(AtomicU64::new(0)),
                frame_tx: None,
            },
            event_rx,
        )
    }

    /// A fresh receiver for feed events (for handing to other tasks)
    pub fn events(&self) -> broadcast::Receiver<FeedEvent> {
        self.event_tx.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    /// Snapshot of the locally tracked subscription set
    pub async fn subscriptions(&self) -> HashSet<SubscriptionKey> {
        self.subscriptions.read().await.clone()
    }

    /// Open the socket and send the handshake. Returns as soon as the
    /// socket task is spawned; it does not wait for the acknowledgment.
    /// Use [`wait_until_connected`](Self::wait_until_connected) for a
    /// connected guarantee.
    pub async fn connect(&mut self) -> JainamResult<()> {
        // The state lock serializes the epoch bump against the guarded
        // writes of any previous socket task still winding down.
        let epoch = {
            let mut state = self.state.write().await;
            if *state != ConnectionState::Disconnected {
                return Err(JainamError::websocket(
                    "connect() called while a connection is already active",
                ));
            }
            *state = ConnectionState::Connecting;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        // A new connection starts with nothing subscribed server-side.
        self.subscriptions.write().await.clear();

        let handshake = json!({
            "susertoken": self.susertoken,
            "t": FRAME_CONNECT,
            "actid": self.account_id,
            "uid": self.account_id,
            "source": "API",
        })
        .to_string();

        let (frame_tx, frame_rx) = mpsc::channel(64);
        self.frame_tx = Some(frame_tx);

        tokio::spawn(socket_task(
            self.config.clone(),
            handshake,
            epoch,
            Arc::clone(&self.generation),
            Arc::clone(&self.state),
            self.event_tx.clone(),
            frame_rx,
        ));

        Ok(())
    }

    /// Block until the handshake is acknowledged, or fail with
    /// [`JainamError::ConnectTimeout`] once `timeout` elapses.
    pub async fn wait_until_connected(&self, timeout: Duration) -> JainamResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut poll = interval(CONNECT_POLL_INTERVAL);
        loop {
            poll.tick().await;
            if *self.state.read().await == ConnectionState::Connected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(JainamError::ConnectTimeout(timeout));
            }
        }
    }

    /// Subscribe to tick (`depth = false`) or depth (`depth = true`)
    /// updates for the given instruments.
    ///
    /// Fails with [`JainamError::NotConnected`] before the handshake is
    /// acknowledged; nothing is sent and the tracked set is unchanged.
    pub async fn subscribe(&self, instruments: &[Instrument], depth: bool) -> JainamResult<()> {
        self.send_subscription(instruments, depth, true).await
    }

    /// Symmetric to [`subscribe`](Self::subscribe)
    pub async fn unsubscribe(&self, instruments: &[Instrument], depth: bool) -> JainamResult<()> {
        self.send_subscription(instruments, depth, false).await
    }

    async fn send_subscription(
        &self,
        instruments: &[Instrument],
        depth: bool,
        add: bool,
    ) -> JainamResult<()> {
        if *self.state.read().await != ConnectionState::Connected {
            return Err(JainamError::NotConnected);
        }
        let frame_tx = self.frame_tx.as_ref().ok_or(JainamError::NotConnected)?;

        let mode = if depth {
            SubscriptionMode::Depth
        } else {
            SubscriptionMode::Tick
        };
        let frame_type = if add {
            mode.subscribe_type()
        } else {
            mode.unsubscribe_type()
        };

        let key = subscription_key(instruments);
        debug!(key, frame_type, "Sending subscription frame");
        let frame = json!({"k": key, "t": frame_type}).to_string();
        frame_tx
            .send(frame)
            .await
            .map_err(|_| JainamError::NotConnected)?;

        // Optimistic, non-transactional bookkeeping: updated once the
        // frame is handed to the socket task, not on server ack.
        let mut subs = self.subscriptions.write().await;
        for inst in instruments {
            let entry = SubscriptionKey {
                exchange: inst.exchange.to_uppercase(),
                token: inst.token.clone(),
                mode,
            };
            if add {
                subs.insert(entry);
            } else {
                subs.remove(&entry);
            }
        }
        Ok(())
    }

    /// Close the connection: supersede the socket task's epoch, clear
    /// the connected state, emit [`FeedEvent::Disconnected`], and drop
    /// the frame channel so the task closes the transport on its next
    /// iteration. Idempotent; does not wait for the socket task to
    /// finish.
    pub async fn disconnect(&mut self) {
        if self.frame_tx.is_none() {
            return;
        }
        let was_live = {
            let mut state = self.state.write().await;
            // Supersede the task's epoch under the lock so its own
            // teardown writes are suppressed in favor of ours.
            self.generation.fetch_add(1, Ordering::SeqCst);
            let was_live = *state != ConnectionState::Disconnected;
            *state = ConnectionState::Disconnected;
            was_live
        };
        // Dropping the sender makes the task's recv() return None and
        // close the transport.
        self.frame_tx = None;
        if was_live {
            let _ = self.event_tx.send(FeedEvent::Disconnected { error: None });
        }
    }
}

impl std::fmt::Debug for MarketFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketFeed")
            .field("url", &self.config.url)
            .field("account_id", &self.account_id)
            .field("susertoken", &"[REDACTED]")
            .finish()
    }
}

/// Owns the transport for one connection epoch. No reconnect: when
/// this returns, the feed is `Disconnected` until `connect()` is called
/// again. Every state write checks that `epoch` is still the current
/// generation, so a task winding down after `disconnect()` or a later
/// `connect()` cannot stomp the state of its successor.
async fn socket_task(
    config: MarketFeedConfig,
    handshake: String,
    epoch: u64,
    generation: Arc<AtomicU64>,
    state: Arc<RwLock<ConnectionState>>,
    event_tx: broadcast::Sender<FeedEvent>,
    mut frame_rx: mpsc::Receiver<String>,
) {
    info!(url = %config.url, "Connecting to market-data gateway");

    let ws_stream = match connect_async(config.url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("Market-feed connect failed: {e}");
            mark_disconnected(epoch, &generation, &state, &event_tx, Some(e.to_string())).await;
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();

    if let Err(e) = write.send(Message::Text(handshake.into())).await {
        warn!("Failed to send handshake: {e}");
        mark_disconnected(epoch, &generation, &state, &event_tx, Some(e.to_string())).await;
        return;
    }
    {
        let mut state = state.write().await;
        if generation.load(Ordering::SeqCst) != epoch {
            // Superseded before the handshake completed; drop the
            // transport and leave quietly.
            return;
        }
        *state = ConnectionState::AwaitingAck;
    }
    debug!("Handshake sent, awaiting acknowledgment");

    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.tick().await; // first tick fires immediately; skip it

    let mut close_error: Option<String> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(text.as_str(), epoch, &generation, &state, &event_tx).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            close_error = Some(e.to_string());
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Market-feed connection closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Market-feed transport error: {e}");
                        close_error = Some(e.to_string());
                        break;
                    }
                    None => {
                        info!("Market-feed stream ended");
                        break;
                    }
                }
            }

            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            close_error = Some(e.to_string());
                            break;
                        }
                    }
                    // All senders gone: disconnect() ran or the feed
                    // handle was dropped. Close deterministically.
                    None => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            _ = heartbeat.tick() => {
                // Re-checked on every tick so a disconnect() promptly
                // halts heartbeats; nothing is sent before the ack.
                if generation.load(Ordering::SeqCst) == epoch
                    && *state.read().await == ConnectionState::Connected
                {
                    if let Err(e) = send_heartbeat(&mut write).await {
                        close_error = Some(e.to_string());
                        break;
                    }
                }
            }
        }
    }

    mark_disconnected(epoch, &generation, &state, &event_tx, close_error).await;
}

/// Terminal state write for one socket task, skipped when a newer
/// connection epoch has taken ownership of the state in the meantime.
async fn mark_disconnected(
    epoch: u64,
    generation: &AtomicU64,
    state: &RwLock<ConnectionState>,
    event_tx: &broadcast::Sender<FeedEvent>,
    error: Option<String>,
) {
    let mut state = state.write().await;
    if generation.load(Ordering::SeqCst) != epoch {
        return;
    }
    *state = ConnectionState::Disconnected;
    drop(state);
    let _ = event_tx.send(FeedEvent::Disconnected { error });
}

async fn send_heartbeat(write: &mut WsSink) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let frame = json!({"k": "", "t": FRAME_HEARTBEAT}).to_string();
    debug!("Sending heartbeat");
    write.send(Message::Text(frame.into())).await
}

/// Decode one incoming frame. Every parseable frame is forwarded
/// verbatim; the connect acknowledgment additionally flips the state.
/// A non-JSON frame is reported and skipped, never fatal. A superseded
/// task forwards nothing.
async fn handle_frame(
    text: &str,
    epoch: u64,
    generation: &AtomicU64,
    state: &RwLock<ConnectionState>,
    event_tx: &broadcast::Sender<FeedEvent>,
) {
    if generation.load(Ordering::SeqCst) != epoch {
        return;
    }

    let frame: Value = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("Dropping non-JSON frame: {e}");
            let _ = event_tx.send(FeedEvent::ProtocolError(format!("Invalid JSON frame: {e}")));
            return;
        }
    };

    if frame.get("t").and_then(Value::as_str) == Some(FRAME_CONNECT_ACK) {
        if frame.get("s").and_then(Value::as_str) == Some("OK") {
            let mut state = state.write().await;
            if generation.load(Ordering::SeqCst) != epoch {
                return;
            }
            *state = ConnectionState::Connected;
            drop(state);
            info!("Market-feed handshake acknowledged");
            let _ = event_tx.send(FeedEvent::Connected);
        } else {
            warn!("Market-feed handshake rejected: {frame}");
        }
    }

    let _ = event_tx.send(FeedEvent::Message(frame));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_key_joins_pairs_with_hash() {
        let instruments = vec![
            Instrument::new("NSE", "26000"),
            Instrument::new("nfo", "54957"),
            Instrument::new("BSE", "1"),
        ];
        assert_eq!(subscription_key(&instruments), "NSE|26000#NFO|54957#BSE|1");
    }

    #[test]
    fn subscription_key_of_single_instrument_has_no_separator() {
        assert_eq!(
            subscription_key(&[Instrument::new("NSE", "26000")]),
            "NSE|26000"
        );
    }

    #[test]
    fn subscription_key_of_empty_list_is_empty() {
        assert_eq!(subscription_key(&[]), "");
    }

    #[test]
    fn stream_credential_is_a_double_hash() {
        let first = hex::encode(Sha256::digest(b"session123"));
        let expected = hex::encode(Sha256::digest(first.as_bytes()));
        assert_eq!(stream_credential("session123"), expected);
    }

    #[test]
    fn stream_credential_is_deterministic_and_token_sensitive() {
        assert_eq!(stream_credential("tok"), stream_credential("tok"));
        assert_ne!(stream_credential("tok"), stream_credential("tok2"));
        // Single hash of the raw token must not be accepted by mistake.
        assert_ne!(
            stream_credential("tok"),
            hex::encode(Sha256::digest(b"tok"))
        );
        assert_eq!(stream_credential("tok").len(), 64);
    }

    #[test]
    fn frame_type_tags_match_the_wire_contract() {
        assert_eq!(SubscriptionMode::Tick.subscribe_type(), "t");
        assert_eq!(SubscriptionMode::Depth.subscribe_type(), "d");
        assert_eq!(SubscriptionMode::Tick.unsubscribe_type(), "u");
        assert_eq!(SubscriptionMode::Depth.unsubscribe_type(), "ud");
    }

    #[tokio::test]
    async fn subscribe_fails_fast_when_disconnected() {
        let (feed, _rx) = MarketFeed::new("DK1", "session");
        let err = feed
            .subscribe(&[Instrument::new("NSE", "26000")], false)
            .await
            .unwrap_err();
        assert!(matches!(err, JainamError::NotConnected));
        assert!(feed.subscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_fails_fast_when_disconnected() {
        let (feed, _rx) = MarketFeed::new("DK1", "session");
        let err = feed
            .unsubscribe(&[Instrument::new("NSE", "26000")], true)
            .await
            .unwrap_err();
        assert!(matches!(err, JainamError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_no_op() {
        let (mut feed, mut rx) = MarketFeed::new("DK1", "session");
        feed.disconnect().await;
        feed.disconnect().await;
        assert_eq!(feed.state().await, ConnectionState::Disconnected);
        // No connection existed, so no close event is emitted either.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn wait_until_connected_times_out_with_an_error() {
        let (feed, _rx) = MarketFeed::new("DK1", "session");
        let err = feed
            .wait_until_connected(Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(matches!(err, JainamError::ConnectTimeout(_)));
    }

    #[test]
    fn debug_output_redacts_the_credential() {
        let (feed, _rx) = MarketFeed::new("DK1", "session");
        let dbg = format!("{feed:?}");
        assert!(dbg.contains("DK1_API"));
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains(&stream_credential("session")));
    }
}
