//! REST client for the Jainam Lite trading API
//!
//! Bearer-token-authenticated wrappers over the broker's fixed HTTP
//! contract: SSO login, order lifecycle, portfolio and account queries,
//! and the streaming-session endpoints. Every response envelope is
//! `{status, message, result}`; anything non-"Ok" (or HTTP >= 400) is
//! translated into a typed [`JainamError`] and never swallowed. There
//! is deliberately no retry policy: the broker's API is not idempotent
//! across order endpoints, so retries are the caller's decision.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument};

use crate::error::{JainamError, JainamResult};
use crate::session::sso_checksum;
use crate::types::{
    ApiEnvelope, Holding, HoldingsKind, Limits, LoginSession, MarginRequest, MarginRequired,
    ModifyOrderRequest, Order, OrderReceipt, PlaceOrderRequest, Position, Profile, TradeRow,
};
use crate::websocket::{FeedEvent, MarketFeed, MarketFeedConfig};

/// Production base URL
pub const BASE_URL: &str = "https://protrade.jainam.in/";

// Endpoint paths, relative to the base URL
const SSO_VENDOR_DETAILS: &str = "omt/auth/sso/vendor/getUserDetails";
const PLACE_ORDER: &str = "omt/api-order-rest/v1/orders/placeorder";
const ORDER_BOOK: &str = "omt/api-order-rest/v1/orders/book";
const ORDER_HISTORY: &str = "omt/api-order-rest/v1/orders/history";
const MODIFY_ORDER: &str = "omt/api-order-rest/v1/orders/modify";
const CANCEL_ORDER: &str = "omt/api-order-rest/v1/orders/cancel";
const TRADE_BOOK: &str = "omt/api-order-rest/v1/orders/trades";
const CHECK_MARGIN: &str = "omt/od-rest-api/v1/orders/checkMargin";
const HOLDINGS: &str = "omt/api-order-rest/v1/holdings";
const POSITIONS: &str = "omt/api-order-rest/v1/positions";
const SQUARE_OFF: &str = "omt/api-order-rest/v1/orders/positions/sqroff";
const LIMITS: &str = "omt/api-order-rest/v1/limits/";
const PROFILE: &str = "omt/api-order-rest/v1/profile/";
const CREATE_WS_SESSION: &str = "api/client-rest/profile/createWsSess";
const INVALIDATE_WS_SESSION: &str = "api/client-rest/profile/invalidateWsSess";

/// Jainam Lite API client
#[derive(Clone)]
pub struct JainamClient {
    http: Client,
    base_url: String,
    access_token: Option<String>,
    user_id: Option<String>,
}

impl JainamClient {
    /// Unauthenticated client against the production endpoint
    pub fn new() -> Self {
        Self::with_base_url(BASE_URL)
    }

    /// Client against a custom base URL (staging, tests)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            access_token: None,
            user_id: None,
        }
    }

    /// Client resuming an existing session token
    pub fn with_session(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let mut client = Self::new();
        client.user_id = Some(user_id.into());
        client.access_token = Some(access_token.into());
        client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    /// Use an already-obtained session token for subsequent calls
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = Some(token.into());
    }

    /// Drop the session; subsequent authenticated calls will fail fast
    pub fn logout(&mut self) {
        self.access_token = None;
        self.user_id = None;
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Exchange the SSO redirect credentials for a session token.
    ///
    /// Sends `checkSum = SHA-256(userId + authCode + apiSecret)` to the
    /// vendor endpoint and stores the returned token for subsequent
    /// calls (REST and the market feed alike).
    #[instrument(skip(self, auth_code, api_secret))]
    pub async fn login_with_sso(
        &mut self,
        user_id: &str,
        auth_code: &str,
        api_secret: &str,
        app_code: &str,
    ) -> JainamResult<LoginSession> {
        let payload = json!({
            "userId": user_id,
            "authCode": auth_code,
            "appCode": app_code,
            "checkSum": sso_checksum(user_id, auth_code, api_secret),
        });

        let envelope = self.post(SSO_VENDOR_DETAILS, &payload).await?;
        let session: LoginSession = envelope.parse_result()?;

        self.user_id = Some(user_id.to_owned());
        self.access_token = Some(session.access_token.clone());
        debug!(user_id, "SSO login succeeded");
        Ok(session)
    }

    // ========================================================================
    // Order management
    // ========================================================================

    /// Place a single order. The broker's place endpoint takes an array
    /// and acknowledges each entry with a broker order id.
    #[instrument(skip(self, order))]
    pub async fn place_order(&self, order: &PlaceOrderRequest) -> JainamResult<OrderReceipt> {
        let mut receipts = self.place_orders(std::slice::from_ref(order)).await?;
        receipts
            .pop()
            .ok_or_else(|| JainamError::parse("Place order response contained no receipt"))
    }

    /// Place a batch of orders in one request
    #[instrument(skip(self, orders))]
    pub async fn place_orders(
        &self,
        orders: &[PlaceOrderRequest],
    ) -> JainamResult<Vec<OrderReceipt>> {
        self.post(PLACE_ORDER, &orders).await?.parse_result()
    }

    /// Modify an open order; only open/pending orders can be modified
    #[instrument(skip(self, request))]
    pub async fn modify_order(&self, request: &ModifyOrderRequest) -> JainamResult<OrderReceipt> {
        let mut receipts: Vec<OrderReceipt> = self.post(MODIFY_ORDER, request).await?.parse_result()?;
        receipts
            .pop()
            .ok_or_else(|| JainamError::parse("Modify order response contained no receipt"))
    }

    /// Cancel an open order
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, broker_order_id: &str) -> JainamResult<OrderReceipt> {
        let payload = json!({ "brokerOrderId": broker_order_id });
        let mut receipts: Vec<OrderReceipt> = self.post(CANCEL_ORDER, &payload).await?.parse_result()?;
        receipts
            .pop()
            .ok_or_else(|| JainamError::parse("Cancel order response contained no receipt"))
    }

    /// The order book: every order placed today with its current status
    #[instrument(skip(self))]
    pub async fn order_report(&self) -> JainamResult<Vec<Order>> {
        self.get(ORDER_BOOK).await?.parse_result()
    }

    /// State transitions of one order (audit trail)
    #[instrument(skip(self))]
    pub async fn order_history(&self, broker_order_id: &str) -> JainamResult<Vec<Order>> {
        let payload = json!({ "brokerOrderId": broker_order_id });
        self.post(ORDER_HISTORY, &payload).await?.parse_result()
    }

    /// The trade book: today's executions
    #[instrument(skip(self))]
    pub async fn trade_report(&self) -> JainamResult<Vec<TradeRow>> {
        self.get(TRADE_BOOK).await?.parse_result()
    }

    /// Margin required for a prospective order
    #[instrument(skip(self, request))]
    pub async fn margin_required(&self, request: &MarginRequest) -> JainamResult<MarginRequired> {
        self.post(CHECK_MARGIN, request).await?.parse_result()
    }

    // ========================================================================
    // Portfolio
    // ========================================================================

    /// Open positions, day and carryforward
    #[instrument(skip(self))]
    pub async fn positions(&self) -> JainamResult<Vec<Position>> {
        self.get(POSITIONS).await?.parse_result()
    }

    /// Close positions by placing the given opposite orders
    #[instrument(skip(self, orders))]
    pub async fn square_off(&self, orders: &[PlaceOrderRequest]) -> JainamResult<Vec<OrderReceipt>> {
        self.post(SQUARE_OFF, &orders).await?.parse_result()
    }

    /// DEMAT holdings for the given product bucket
    #[instrument(skip(self))]
    pub async fn holdings(&self, kind: HoldingsKind) -> JainamResult<Vec<Holding>> {
        let path = format!("{HOLDINGS}/{}", kind.product_segment());
        self.get(&path).await?.parse_result()
    }

    // ========================================================================
    // Account
    // ========================================================================

    /// Funds, margin utilization, and collateral
    #[instrument(skip(self))]
    pub async fn limits(&self) -> JainamResult<Limits> {
        self.get(LIMITS).await?.parse_result()
    }

    /// Client profile details
    #[instrument(skip(self))]
    pub async fn profile(&self) -> JainamResult<Profile> {
        self.get(PROFILE).await?.parse_result()
    }

    // ========================================================================
    // Market-data streaming
    // ========================================================================

    /// Register a streaming session with the broker. Required by the
    /// gateway before the WebSocket handshake is accepted.
    #[instrument(skip(self))]
    pub async fn create_ws_session(&self) -> JainamResult<()> {
        let payload = self.ws_session_payload()?;
        self.post(CREATE_WS_SESSION, &payload).await.map(|_| ())
    }

    /// Invalidate the streaming session
    #[instrument(skip(self))]
    pub async fn invalidate_ws_session(&self) -> JainamResult<()> {
        let payload = self.ws_session_payload()?;
        self.post(INVALIDATE_WS_SESSION, &payload).await.map(|_| ())
    }

    fn ws_session_payload(&self) -> JainamResult<serde_json::Value> {
        let user_id = self
            .user_id
            .as_deref()
            .ok_or_else(|| JainamError::auth("Not logged in; call login_with_sso first"))?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| JainamError::auth("Not logged in; call login_with_sso first"))?;
        Ok(json!({
            "source": "API",
            "userId": user_id,
            "token": token,
        }))
    }

    /// Build a [`MarketFeed`] from the logged-in session
    pub fn market_feed(&self) -> JainamResult<(MarketFeed, tokio::sync::broadcast::Receiver<FeedEvent>)> {
        self.market_feed_with_config(MarketFeedConfig::default())
    }

    pub fn market_feed_with_config(
        &self,
        config: MarketFeedConfig,
    ) -> JainamResult<(MarketFeed, tokio::sync::broadcast::Receiver<FeedEvent>)> {
        let user_id = self
            .user_id
            .as_deref()
            .ok_or_else(|| JainamError::auth("Not logged in; call login_with_sso first"))?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| JainamError::auth("Not logged in; call login_with_sso first"))?;
        Ok(MarketFeed::with_config(user_id, token, config))
    }

    // ========================================================================
    // Transport
    // ========================================================================

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let mut builder = self.http.request(method, self.url(endpoint));
        if let Some(token) = &self.access_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn get(&self, endpoint: &str) -> JainamResult<ApiEnvelope> {
        debug!(endpoint, "GET");
        let response = self.request(Method::GET, endpoint).send().await?;
        Self::handle_response(response).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> JainamResult<ApiEnvelope> {
        debug!(endpoint, "POST");
        let response = self.request(Method::POST, endpoint).json(body).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response(response: reqwest::Response) -> JainamResult<ApiEnvelope> {
        let status = response.status();
        let text = response.text().await?;

        let envelope: ApiEnvelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(_) => {
                // Gateways answer some failures with bare HTML/text.
                let snippet: String = text.chars().take(500).collect();
                return Err(JainamError::parse(format!(
                    "Invalid JSON response (HTTP {status}): {snippet}"
                )));
            }
        };

        if status == StatusCode::UNAUTHORIZED {
            return Err(JainamError::from_broker_code(
                Some("EC087"),
                Some("Unauthorized. Please check your access token."),
            ));
        }
        if status.as_u16() >= 400 || !envelope.is_ok() {
            return Err(envelope.into_error());
        }
        Ok(envelope)
    }
}

impl Default for JainamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JainamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JainamClient")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .field("authenticated", &self.access_token.is_some())
            .finish()
    }
}
