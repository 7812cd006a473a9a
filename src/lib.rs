//! Client for the Jainam Lite trading API
//!
//! This crate wraps the broker's REST endpoints (SSO authentication,
//! order lifecycle, portfolio and account queries) and its WebSocket
//! market-data gateway (tick and depth streaming with an authenticated
//! handshake and heartbeat-driven liveness).
//!
//! ```no_run
//! use jainam_lite::{FeedEvent, Instrument, JainamClient};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), jainam_lite::JainamError> {
//! let mut client = JainamClient::new();
//! client
//!     .login_with_sso("DK2200295", "AUTH_CODE", "API_SECRET", "APP_CODE")
//!     .await?;
//!
//! client.create_ws_session().await?;
//! let (mut feed, mut events) = client.market_feed()?;
//! feed.connect().await?;
//! feed.wait_until_connected(Duration::from_secs(5)).await?;
//! feed.subscribe(&[Instrument::new("NSE", "26000")], false).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let FeedEvent::Message(frame) = event {
//!         println!("{frame}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod session;
pub mod types;
pub mod websocket;

pub use client::JainamClient;
pub use error::{JainamError, JainamResult};
pub use session::SessionStore;
pub use types::{
    Exchange, HoldingsKind, Instrument, ModifyOrderRequest, OrderComplexity, OrderType,
    PlaceOrderRequest, ProductType, TransactionType, Validity,
};
pub use websocket::{
    ConnectionState, FeedEvent, MarketFeed, MarketFeedConfig, SubscriptionKey, SubscriptionMode,
};
