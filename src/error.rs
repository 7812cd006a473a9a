//! Error types for the Jainam Lite client

use std::time::Duration;

use thiserror::Error;

/// Client-wide error type
#[derive(Error, Debug)]
pub enum JainamError {
    /// Broker rejected the request (non-"Ok" envelope, no more specific class)
    #[error("API error{}: {message}", code_suffix(.code))]
    Api {
        code: Option<String>,
        message: String,
    },

    /// Expired or invalid session; the caller must re-authenticate
    #[error("Authentication error{}: {message}", code_suffix(.code))]
    Auth {
        code: Option<String>,
        message: String,
    },

    /// Malformed request parameters, detected server-side
    #[error("Validation error{}: {message}", code_suffix(.code))]
    Validation {
        code: Option<String>,
        message: String,
    },

    /// Order placement, modification, or cancellation rejected by broker rules
    #[error("Order error{}: {message}", code_suffix(.code))]
    Order {
        code: Option<String>,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    /// Streaming operation attempted before the handshake completed
    #[error("Market feed is not connected")]
    NotConnected,

    /// The feed did not reach the connected state within the allowed time
    #[error("Market feed connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("WebSocket error: {0}")]
    Websocket(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(c) => format!(" [{c}]"),
        None => String::new(),
    }
}

impl JainamError {
    pub fn network(msg: impl Into<String>) -> Self {
        JainamError::Network(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        JainamError::Parse(msg.into())
    }

    pub fn websocket(msg: impl Into<String>) -> Self {
        JainamError::Websocket(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        JainamError::Config(msg.into())
    }

    pub fn auth(msg: impl Into<String>) -> Self {
        JainamError::Auth {
            code: None,
            message: msg.into(),
        }
    }

    /// Classify a non-"Ok" response envelope into a typed error.
    ///
    /// `EC087` is the broker's session-expiry code. A handful of `EC9xx`
    /// codes are order-lifecycle rejections and are checked before the
    /// generic `EC9` validation prefix so they classify correctly.
    pub fn from_broker_code(code: Option<&str>, message: Option<&str>) -> Self {
        let message = message
            .map(str::to_owned)
            .or_else(|| code.and_then(error_message).map(str::to_owned))
            .unwrap_or_else(|| "Unknown broker error".to_owned());
        let code_owned = code.map(str::to_owned);

        match code {
            Some("EC087") => JainamError::Auth {
                code: code_owned,
                message,
            },
            Some("EC912" | "EC937" | "EC992" | "EC993" | "EC997" | "EC999") => {
                JainamError::Order {
                    code: code_owned,
                    message,
                }
            }
            Some(c) if c.starts_with("EC9") || c.starts_with("EC8") => JainamError::Validation {
                code: code_owned,
                message,
            },
            _ => JainamError::Api {
                code: code_owned,
                message,
            },
        }
    }

    /// Broker error code carried by this error, if any
    pub fn broker_code(&self) -> Option<&str> {
        match self {
            JainamError::Api { code, .. }
            | JainamError::Auth { code, .. }
            | JainamError::Validation { code, .. }
            | JainamError::Order { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for JainamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            JainamError::Parse(err.to_string())
        } else {
            JainamError::Network(err.to_string())
        }
    }
}

/// Result type alias for client operations
pub type JainamResult<T> = Result<T, JainamError>;

/// Human-readable message for a broker error code, from the API
/// documentation appendix. Used when an error envelope carries a code
/// but no message text.
pub fn error_message(code: &str) -> Option<&'static str> {
    let msg = match code {
        "EC003" => "An error occurred. Please try again later.",
        "EC082" => "Invalid parameter: 'deviceId' cannot be empty or null.",
        "EC086" => "You are a read-only user and are not allowed to place, modify, or cancel orders.",
        "EC087" => "Session Expired",
        "EC088" => "Single order slicing limit exceeded",
        "EC089" => "'disclosedQuantity' cannot be same as the total order 'quantity'.",
        "EC090" => "'exchange' should be one of the following values: { 'NSE', 'BSE', 'MCX', 'NFO', 'BFO'}.",
        "EC091" => "'orderComplexity' should be one of the following values: {'REGULAR', 'AMO'}.",
        "EC092" => "'product' should be one of the following values: {'INTRADAY', 'LONGTERM', 'MTF'}.",
        "EC801" => "Orders with exchange 'BSEEQ/BSEFO/BSECURR' cannot be modified to order type 'SL'.",
        "EC806" => "'exchange' accepts only {'NSEEQ', 'BSEEQ'}.",
        "EC807" => "'product' - 'NORMAL' is not allowed in cash segment.",
        "EC813" => "'deviceId' cannot exceed 98 characters.",
        "EC814" => "'brokerOrderId' cannot be empty or null.",
        "EC815" => "Invalid 'brokerOrderId'.",
        "EC819" => "Only the trigger price field can be modified.",
        "EC822" => "SL trigger price should be lower than price.",
        "EC823" => "SL trigger price should be higher than price.",
        "EC826" => "Please enter a price.",
        "EC827" => "Please enter a target price.",
        "EC828" => "Please enter an SL trigger price.",
        "EC829" => "AMO is not allowed for this product.",
        "EC830" => "AMO is not allowed for this order type.",
        "EC831" => "AMO is not allowed for this validity.",
        "EC832" => "AMO is not allowed for this segment.",
        "EC834" => "Market protection cannot be modified.",
        "EC837" => "This product is not allowed for this segment.",
        "EC838" => "This order type is not allowed.",
        "EC843" => "Only price and quantity fields can be modified.",
        "EC844" => "Only price and order type fields can be modified.",
        "EC852" => "This product is not allowed.",
        "EC855" => "Modification is not allowed.",
        "EC856" => "SL trigger price should be less than main leg price.",
        "EC857" => "SL trigger price should be more than main leg price.",
        "EC858" => "Order placement not allowed for this exchange.",
        "EC865" => "'product' - 'Delivery' is not allowed in FnO segment.",
        "EC868" => "Position not found for the specified instrument.",
        "EC869" => "Insufficient buy quantity available for conversion.",
        "EC870" => "Insufficient sell quantity available for conversion.",
        "EC871" => "Conversion of overnight BUY positions in options is not allowed.",
        "EC873" => "Failed to convert positions.",
        "EC900" => "'exchange' cannot be empty or null.",
        "EC901" => "'exchange' should be one of the following values: { 'NSE', 'BSE', 'MCX', 'NFO', 'BFO', 'CDS', 'BCD'}.",
        "EC902" => "'tradingSymbol' cannot be empty or null.",
        "EC903" => "'quantity' cannot be empty or null.",
        "EC904" => "'quantity' should be a positive number.",
        "EC906" => "'product' cannot be empty or null.",
        "EC907" => "'transactionType' cannot be empty or null.",
        "EC908" => "'token' cannot be empty or null.",
        "EC909" => "'disclosedQty' cannot be empty or null.",
        "EC910" => "'price' cannot be empty or null.",
        "EC911" => "'triggerPrice' cannot be empty or null.",
        "EC912" => "Failed to place the order.",
        "EC913" => "Failed to retrieve user details.",
        "EC914" => "'Request parameter' cannot be empty or null.",
        "EC915" => "Failed to retrieve the order book.",
        "EC916" => "No orders found for this user.",
        "EC917" => "Failed to retrieve order history.",
        "EC918" => "No order history found for the given order ID.",
        "EC919" => "Failed to retrieve the position book.",
        "EC920" => "No positions found for this user.",
        "EC921" => "Failed to retrieve holdings.",
        "EC922" => "No holdings found for this user.",
        "EC923" => "Failed to retrieve profile details.",
        "EC924" => "Failed to retrieve RMS limits.",
        "EC925" => "'nestOrderNo' cannot be empty or null.",
        "EC926" => "No trades found for this user.",
        "EC927" => "Failed to retrieve the trade book.",
        "EC929" => "'transactionType' should be one of the following values: {'BUY', 'SELL'}.",
        "EC930" => "'orderType' should be one of the following values: {'LIMIT', 'MARKET', 'SL', 'SLM'}.",
        "EC932" => "'validity' should be one of the following values: {'DAY', 'IOC'}.",
        "EC933" => "'priceType' cannot be empty or null.",
        "EC934" => "'orderType' cannot be empty or null.",
        "EC935" => "Failed to retrieve the single order margin.",
        "EC936" => "'product' cannot be empty or null.",
        "EC937" => "Failed to cancel all orders.",
        "EC938" => "No open orders to cancel from the order book.",
        "EC939" => "Failed to retrieve the span margin.",
        "EC941" => "'instrumentId' cannot be empty or null.",
        "EC942" => "'orderComplexity' cannot be empty or null.",
        "EC944" => "'validity' cannot be empty or null.",
        "EC945" => "'brokerOrderId' cannot be empty or null.",
        "EC946" => "Invalid 'instrumentId'. It must contain only numeric characters.",
        "EC947" => "'instrumentId' does not exist.",
        "EC948" => "'quantity' cannot exceed 50,000,000.",
        "EC949" => "'quantity' should be a positive number.",
        "EC950" => "'price' is required and cannot be empty or null.",
        "EC951" => "'slTriggerPrice' is required and cannot be empty or null.",
        "EC953" => "'targetPrice' is required and cannot be empty or null.",
        "EC954" => "'quantity' should be a multiple of the lot size.",
        "EC957" => "Invalid 'price'.",
        "EC958" => "'price' cannot be zero or negative.",
        "EC959" => "Invalid 'slTriggerPrice'.",
        "EC960" => "'slTriggerPrice' cannot be zero or negative.",
        "EC962" => "'stopLossPrice' cannot be zero or negative.",
        "EC963" => "Invalid 'targetPrice'.",
        "EC964" => "'targetPrice' cannot be zero or negative.",
        "EC966" => "'trailingSlAmount' cannot be empty or null for SL order type.",
        "EC967" => "'trailingSlAmount' should be a positive number.",
        "EC968" => "'trailingSlAmount' cannot be zero or negative.",
        "EC969" => "'Product' should be either 'NORMAL' or 'INTRADAY'.",
        "EC970" => "'disclosedQuantity' is not applicable for this segment.",
        "EC971" => "'orderTag' should not exceed 50 characters.",
        "EC972" => "'algoId' should not exceed 12 characters.",
        "EC973" => "For a buy order, 'slTriggerPrice' should be less than the 'price'.",
        "EC974" => "For a sell order, 'slTriggerPrice' should be greater than the 'price'.",
        "EC975" => "'disclosedQuantity' cannot exceed the total order 'quantity'.",
        "EC979" => "Invalid 'brokerOrderId'.",
        "EC980" => "Invalid 'instrumentId'.",
        "EC981" => "Invalid 'disclosedQty'.",
        "EC982" => "For 'AMO', 'disclosedQuantity' should be zero.",
        "EC983" => "Invalid 'algoId'.",
        "EC984" => "Invalid 'orderTag'.",
        "EC986" => "SpanMargin is not allowed for 'NSEEQ' and 'BSEEQ'.",
        "EC988" => "'marketProtection' should be a positive number.",
        "EC990" => "'quantity' should be a multiple of the lot size.",
        "EC991" => "'disclosedQuantity' should be a multiple of the lot size.",
        "EC992" => "Unable to modify the given order. 'brokerOrderId' is invalid.",
        "EC993" => "Provided 'brokerOrderId' is not in a valid state to modify the order.",
        "EC994" => "The given 'brokerOrderId' is not in your order book.",
        "EC996" => "'validity' of IOC is not allowed for AMO orders.",
        "EC997" => "The specified order is not available in the order book and cannot be canceled.",
        "EC998" => "The specified order is not available in the order book, and order history cannot be retrieved.",
        "EC999" => "The specified order is not available in the order book and cannot be modified.",
        _ => return None,
    };
    Some(msg)
}
