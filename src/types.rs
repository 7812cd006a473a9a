//! Request and response types for the Jainam Lite API
//!
//! Field names and enum spellings mirror the broker's wire contract
//! exactly (camelCase JSON keys, SCREAMING order/product constants).
//! Response structs are deliberately permissive: the broker omits
//! fields freely, so most are `Option` with `#[serde(default)]`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{JainamError, JainamResult};

// ============================================================================
// Response envelope
// ============================================================================

/// Every REST response has the shape `{status, message, result}`, with
/// `errorCode` present on failures.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "error_code")]
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
}

impl ApiEnvelope {
    pub fn is_ok(&self) -> bool {
        self.status == "Ok"
    }

    /// Convert a non-"Ok" envelope into the typed error it represents.
    pub fn into_error(self) -> JainamError {
        JainamError::from_broker_code(self.error_code.as_deref(), self.message.as_deref())
    }

    /// Deserialize `result` as `T`.
    ///
    /// The broker wraps single objects in one-element arrays on several
    /// endpoints; when `T` is not itself a sequence, a one-element array
    /// is unwrapped first.
    pub fn parse_result<T: serde::de::DeserializeOwned>(self) -> JainamResult<T> {
        let value = self
            .result
            .ok_or_else(|| JainamError::parse("Response envelope has no 'result' field"))?;

        match serde_json::from_value::<T>(value.clone()) {
            Ok(parsed) => Ok(parsed),
            Err(first_err) => {
                // Retry with a single-element array unwrapped.
                if let Value::Array(items) = value {
                    if items.len() == 1 {
                        return serde_json::from_value(items.into_iter().next().unwrap())
                            .map_err(|e| JainamError::parse(format!("Failed to parse result: {e}")));
                    }
                }
                Err(JainamError::parse(format!(
                    "Failed to parse result: {first_err}"
                )))
            }
        }
    }
}

// ============================================================================
// Domain enums (broker wire spellings)
// ============================================================================

/// Exchange segment codes accepted by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Nse,
    Bse,
    Nfo,
    Bfo,
    Mcx,
    Cds,
    Bcd,
    Nco,
    Bco,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Nse => "NSE",
            Exchange::Bse => "BSE",
            Exchange::Nfo => "NFO",
            Exchange::Bfo => "BFO",
            Exchange::Mcx => "MCX",
            Exchange::Cds => "CDS",
            Exchange::Bcd => "BCD",
            Exchange::Nco => "NCO",
            Exchange::Bco => "BCO",
        }
    }
}

impl std::fmt::Display for Exchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "LIMIT")]
    Limit,
    #[serde(rename = "MARKET")]
    Market,
    /// Stop loss
    #[serde(rename = "SL")]
    Sl,
    /// Stop loss market
    #[serde(rename = "SLM")]
    Slm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProductType {
    /// Squared off the same day
    Intraday,
    /// Delivery-based (CNC equivalent)
    Longterm,
    /// Margin trading facility
    Mtf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderComplexity {
    Regular,
    /// After-market order
    Amo,
    /// Bracket order
    Bo,
    /// Cover order
    Co,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Validity {
    Day,
    /// Immediate or cancel
    Ioc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Open,
    Complete,
    Rejected,
    Cancelled,
    Pending,
}

/// Holdings product buckets, addressed as lowercase path segments of
/// the holdings endpoint URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldingsKind {
    /// CNC / delivery holdings (path key `cnc`)
    Cnc,
    /// Margin trading facility holdings (path key `mtf`)
    Mtf,
    /// Intraday holdings (path key `mis`; usually empty, squared off by
    /// end of day)
    Mis,
}

impl HoldingsKind {
    /// Lowercase product key used as the holdings URL path segment
    pub fn product_segment(&self) -> &'static str {
        match self {
            HoldingsKind::Cnc => "cnc",
            HoldingsKind::Mtf => "mtf",
            HoldingsKind::Mis => "mis",
        }
    }
}

// ============================================================================
// Order requests
// ============================================================================

/// A new order. The broker expects every field present, with empty
/// strings for unset optionals, and the place endpoint takes an array
/// of these.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub exchange: Exchange,
    pub instrument_id: String,
    pub transaction_type: TransactionType,
    pub quantity: u32,
    pub product: ProductType,
    pub order_complexity: OrderComplexity,
    pub order_type: OrderType,
    pub validity: Validity,
    /// Required for LIMIT and SL orders; empty otherwise
    #[serde(serialize_with = "empty_if_none")]
    pub price: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub sl_trigger_price: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub trailing_sl_amount: Option<String>,
    #[serde(serialize_with = "empty_if_none_u32")]
    pub disclosed_quantity: Option<u32>,
    #[serde(serialize_with = "empty_if_none")]
    pub market_protection_percent: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub api_order_source: Option<String>,
    /// Max 12 characters
    #[serde(serialize_with = "empty_if_none")]
    pub algo_id: Option<String>,
    /// Max 50 characters
    #[serde(serialize_with = "empty_if_none")]
    pub order_tag: Option<String>,
}

impl PlaceOrderRequest {
    /// A new request with the broker's defaults: LONGTERM / REGULAR /
    /// LIMIT / DAY and no optional fields set.
    pub fn new(
        exchange: Exchange,
        instrument_id: impl Into<String>,
        transaction_type: TransactionType,
        quantity: u32,
    ) -> Self {
        Self {
            exchange,
            instrument_id: instrument_id.into(),
            transaction_type,
            quantity,
            product: ProductType::Longterm,
            order_complexity: OrderComplexity::Regular,
            order_type: OrderType::Limit,
            validity: Validity::Day,
            price: None,
            sl_trigger_price: None,
            trailing_sl_amount: None,
            disclosed_quantity: None,
            market_protection_percent: None,
            api_order_source: None,
            algo_id: None,
            order_tag: None,
        }
    }

    pub fn market(mut self) -> Self {
        self.order_type = OrderType::Market;
        self.price = None;
        self
    }

    pub fn limit(mut self, price: impl Into<String>) -> Self {
        self.order_type = OrderType::Limit;
        self.price = Some(price.into());
        self
    }

    pub fn stop_loss(mut self, price: impl Into<String>, trigger: impl Into<String>) -> Self {
        self.order_type = OrderType::Sl;
        self.price = Some(price.into());
        self.sl_trigger_price = Some(trigger.into());
        self
    }

    pub fn product(mut self, product: ProductType) -> Self {
        self.product = product;
        self
    }

    pub fn validity(mut self, validity: Validity) -> Self {
        self.validity = validity;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.order_tag = Some(tag.into());
        self
    }
}

/// Modify an open order. All fields are always sent; unset ones go out
/// as empty strings per the broker's contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyOrderRequest {
    pub broker_order_id: String,
    #[serde(serialize_with = "empty_if_none_u32")]
    pub quantity: Option<u32>,
    #[serde(serialize_with = "empty_if_none_order_type")]
    pub order_type: Option<OrderType>,
    #[serde(serialize_with = "empty_if_none")]
    pub price: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub sl_trigger_price: Option<String>,
    #[serde(serialize_with = "empty_if_none_validity")]
    pub validity: Option<Validity>,
    #[serde(serialize_with = "empty_if_none")]
    pub disclosed_quantity: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub market_protection_percent: Option<String>,
    // Note the capital SL in this one key on the modify endpoint.
    #[serde(rename = "trailingSLAmount", serialize_with = "empty_if_none")]
    pub trailing_sl_amount: Option<String>,
}

impl ModifyOrderRequest {
    pub fn new(broker_order_id: impl Into<String>) -> Self {
        Self {
            broker_order_id: broker_order_id.into(),
            quantity: None,
            order_type: None,
            price: None,
            sl_trigger_price: None,
            validity: None,
            disclosed_quantity: None,
            market_protection_percent: None,
            trailing_sl_amount: None,
        }
    }

    pub fn price(mut self, price: impl Into<String>) -> Self {
        self.price = Some(price.into());
        self
    }

    pub fn quantity(mut self, quantity: u32) -> Self {
        self.quantity = Some(quantity);
        self
    }
}

fn empty_if_none<S: serde::Serializer>(v: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(v.as_deref().unwrap_or(""))
}

fn empty_if_none_u32<S: serde::Serializer>(v: &Option<u32>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(n) => s.serialize_u32(*n),
        None => s.serialize_str(""),
    }
}

fn empty_if_none_order_type<S: serde::Serializer>(
    v: &Option<OrderType>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match v {
        Some(ot) => ot.serialize(s),
        None => s.serialize_str(""),
    }
}

fn empty_if_none_validity<S: serde::Serializer>(
    v: &Option<Validity>,
    s: S,
) -> Result<S::Ok, S::Error> {
    match v {
        Some(val) => val.serialize(s),
        None => s.serialize_str(""),
    }
}

// ============================================================================
// Order / trade responses
// ============================================================================

/// Acknowledgment of a place/modify/cancel request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderReceipt {
    pub broker_order_id: String,
    #[serde(default)]
    pub request_time: Option<String>,
}

/// A row from the order book
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(default)]
    pub broker_order_id: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub instrument_id: Option<String>,
    #[serde(default)]
    pub trading_symbol: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub order_type: Option<String>,
    #[serde(default)]
    pub order_status: Option<OrderStatus>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub filled_quantity: Option<u32>,
    #[serde(default)]
    pub pending_quantity: Option<u32>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub average_traded_price: Option<Decimal>,
    #[serde(default)]
    pub sl_trigger_price: Option<Decimal>,
    #[serde(default)]
    pub validity: Option<Validity>,
    #[serde(default)]
    pub order_time: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub order_tag: Option<String>,
}

/// A row from the trade book (an execution)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRow {
    #[serde(default)]
    pub broker_order_id: Option<String>,
    #[serde(default)]
    pub trade_number: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub instrument_id: Option<String>,
    #[serde(default)]
    pub trading_symbol: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<TransactionType>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub traded_price: Option<Decimal>,
    #[serde(default)]
    pub trade_time: Option<String>,
}

// ============================================================================
// Portfolio / account responses
// ============================================================================

/// An open position (day + carryforward)
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    #[serde(default)]
    pub instrument_id: Option<String>,
    #[serde(default)]
    pub trading_symbol: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub net_quantity: Option<i64>,
    #[serde(default)]
    pub net_average_price: Option<Decimal>,
    #[serde(default)]
    pub buy_quantity: Option<i64>,
    #[serde(default)]
    pub sell_quantity: Option<i64>,
    #[serde(default)]
    pub day_buy_quantity: Option<i64>,
    #[serde(default)]
    pub day_sell_quantity: Option<i64>,
    #[serde(default)]
    pub day_buy_price: Option<Decimal>,
    #[serde(default)]
    pub day_sell_price: Option<Decimal>,
    #[serde(default)]
    pub overnight_quantity: Option<i64>,
    #[serde(default)]
    pub overnight_price: Option<Decimal>,
    #[serde(default)]
    pub realized_pnl: Option<Decimal>,
    #[serde(default)]
    pub previous_day_close: Option<Decimal>,
}

/// A DEMAT holding
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Holding {
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub nse_instrument_id: Option<String>,
    #[serde(default)]
    pub bse_instrument_id: Option<String>,
    #[serde(default)]
    pub nse_trading_symbol: Option<String>,
    #[serde(default)]
    pub bse_trading_symbol: Option<String>,
    #[serde(default)]
    pub formatted_instrument_name: Option<String>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub average_traded_price: Option<Decimal>,
    #[serde(default)]
    pub total_quantity: Option<i64>,
    #[serde(default)]
    pub dp_quantity: Option<i64>,
    #[serde(default)]
    pub t1_quantity: Option<i64>,
    #[serde(default)]
    pub collateral_quantity: Option<i64>,
}

/// Account funds and margin limits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    #[serde(default)]
    pub trading_limit: Option<Decimal>,
    #[serde(default)]
    pub opening_cash_limit: Option<Decimal>,
    #[serde(default)]
    pub intraday_payin: Option<Decimal>,
    #[serde(default)]
    pub collateral_margin: Option<Decimal>,
    #[serde(default)]
    pub credit_for_sell: Option<Decimal>,
    #[serde(default)]
    pub adhoc_margin: Option<Decimal>,
    #[serde(default)]
    pub utilized_margin: Option<Decimal>,
    #[serde(default)]
    pub blocked_for_payout: Option<Decimal>,
    #[serde(default)]
    pub utilized_span_margin: Option<Decimal>,
    #[serde(default)]
    pub utilized_exposure_margin: Option<Decimal>,
}

/// Client profile details
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub is_totp_enabled: Option<String>,
    #[serde(default)]
    pub exchanges: Option<Vec<String>>,
}

/// Margin check request for a prospective order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginRequest {
    pub exchange: Exchange,
    pub instrument_id: String,
    pub transaction_type: TransactionType,
    pub quantity: u32,
    pub product: ProductType,
    pub order_complexity: OrderComplexity,
    pub order_type: OrderType,
    pub validity: Validity,
    #[serde(serialize_with = "empty_if_none")]
    pub price: Option<String>,
    #[serde(serialize_with = "empty_if_none")]
    pub sl_trigger_price: Option<String>,
}

impl MarginRequest {
    /// Margin check with the defaults used for a plain market order
    pub fn new(
        exchange: Exchange,
        instrument_id: impl Into<String>,
        transaction_type: TransactionType,
        quantity: u32,
        product: ProductType,
    ) -> Self {
        Self {
            exchange,
            instrument_id: instrument_id.into(),
            transaction_type,
            quantity,
            product,
            order_complexity: OrderComplexity::Regular,
            order_type: OrderType::Market,
            validity: Validity::Day,
            price: None,
            sl_trigger_price: None,
        }
    }
}

/// Margin required for a prospective order. The broker sends these
/// figures as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginRequired {
    #[serde(default)]
    pub total_cash_available: Option<String>,
    #[serde(default)]
    pub post_order_margin: Option<String>,
    #[serde(default)]
    pub current_order_margin: Option<String>,
}

// ============================================================================
// Session / auth
// ============================================================================

/// Result of a successful SSO login
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSession {
    #[serde(alias = "userSession")]
    pub access_token: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
}

/// Cached session file contents (`~/.jainam_session.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedSession {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub checksum: Option<String>,
    pub login_time: DateTime<Utc>,
    #[serde(default)]
    pub app_code: Option<String>,
}

// ============================================================================
// Streaming
// ============================================================================

/// An instrument to subscribe to on the market-data feed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    pub exchange: String,
    pub token: String,
}

impl Instrument {
    pub fn new(exchange: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            token: token.into(),
        }
    }
}
