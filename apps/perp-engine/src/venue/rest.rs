//! Signed REST client for USDⓈ-margined perpetual futures.
//!
//! Requests are HMAC-SHA256 signed over the query string. The account runs
//! in hedge mode: every order carries `positionSide` and protective stops use
//! `closePosition=true`, so `reduceOnly` is never sent.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use sha2::Sha256;

use crate::config::VenueConfig;
use crate::execution::Precision;
use crate::models::{OrderSide, Side};

use super::retry::{ErrorCategory, categorize_status};
use super::{
    OpenOrder, OrderKind, OrderReport, OrderRequest, OrderStatus, VenueAdapter, VenueError,
    VenuePosition,
};

type HmacSha256 = Hmac<Sha256>;

/// "No need to change position side."
const CODE_POSITION_MODE_UNCHANGED: i64 = -4059;
/// "No need to change margin type."
const CODE_MARGIN_TYPE_UNCHANGED: i64 = -4046;
/// "ReduceOnly Order is rejected" - nothing left to reduce on that side.
const CODE_NO_POSITION: i64 = -2022;
/// "Unknown order sent."
const CODE_UNKNOWN_ORDER: i64 = -2011;
/// "Order does not exist."
const CODE_ORDER_NOT_EXIST: i64 = -2013;
/// "Timestamp for this request is outside of the recvWindow."
const CODE_TIMESTAMP_OUTSIDE_WINDOW: i64 = -1021;

#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiOrder {
    order_id: u64,
    #[serde(default)]
    client_order_id: String,
    status: String,
    #[serde(default)]
    executed_qty: Decimal,
    #[serde(default)]
    avg_price: Decimal,
    #[serde(rename = "type", default)]
    order_type: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    position_side: String,
    #[serde(default)]
    stop_price: Decimal,
    #[serde(default)]
    orig_qty: Decimal,
    #[serde(default)]
    close_position: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiPosition {
    position_side: String,
    position_amt: Decimal,
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit", default)]
    unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiBalance {
    asset: String,
    available_balance: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiTicker {
    price: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiExchangeInfo {
    symbols: Vec<ApiSymbol>,
}

#[derive(Debug, Deserialize)]
struct ApiSymbol {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

/// REST venue adapter.
#[derive(Debug, Clone)]
pub struct RestVenue {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    symbol: String,
    recv_window_ms: u64,
    quote_asset: String,
}

impl RestVenue {
    /// Create a new client from config.
    ///
    /// # Errors
    ///
    /// Returns [`VenueError::Authentication`] when credentials are missing.
    pub fn new(config: &VenueConfig, timeout: Duration) -> Result<Self, VenueError> {
        if !config.has_credentials() {
            return Err(VenueError::Authentication);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VenueError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            symbol: config.symbol.clone(),
            recv_window_ms: config.recv_window_ms,
            quote_asset: "USDT".to_string(),
        })
    }

    fn sign(&self, payload: &str) -> Result<String, VenueError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|_| VenueError::Authentication)?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<T, VenueError> {
        params.push((
            "timestamp",
            chrono::Utc::now().timestamp_millis().to_string(),
        ));
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        let query = encode_query(&params);
        let signature = self.sign(&query)?;
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);
        self.send(method, &url).await
    }

    async fn public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&'static str, String)],
    ) -> Result<T, VenueError> {
        let url = format!("{}{path}?{}", self.base_url, encode_query(params));
        self.send(Method::GET, &url).await
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, url: &str) -> Result<T, VenueError> {
        let response = self
            .client
            .request(method, url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VenueError::Timeout {
                        operation: "http_request".to_string(),
                        timeout_ms: 0,
                    }
                } else {
                    VenueError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = response
            .text()
            .await
            .map_err(|e| VenueError::Network(e.to_string()))?;

        if status.is_success() {
            return serde_json::from_str(&body).map_err(|e| VenueError::Decode(e.to_string()));
        }

        Err(map_error(status, retry_after, &body))
    }

    fn symbol_param(&self) -> (&'static str, String) {
        ("symbol", self.symbol.clone())
    }

    /// Run a settings call, treating "already set" answers as success.
    async fn apply_setting(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
        unchanged_code: i64,
    ) -> Result<(), VenueError> {
        match self
            .signed::<serde_json::Value>(Method::POST, path, params)
            .await
        {
            Ok(_) => Ok(()),
            Err(VenueError::Rejected { code, .. }) if code == unchanged_code => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn encode_query(params: &[(&'static str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn map_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> VenueError {
    let (code, message) = match serde_json::from_str::<ApiError>(body) {
        Ok(err) => (err.code, err.msg),
        Err(_) => (-i64::from(status.as_u16()), body.to_string()),
    };

    match categorize_status(status.as_u16()) {
        ErrorCategory::RateLimited => VenueError::RateLimited {
            retry_after_secs: retry_after,
        },
        ErrorCategory::Retryable => VenueError::Network(format!("HTTP {status}: {message}")),
        ErrorCategory::NonRetryable => match (status, code) {
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => VenueError::Authentication,
            (_, -2014 | -2015) => VenueError::Authentication,
            (_, CODE_NO_POSITION) => VenueError::NoPosition,
            (_, CODE_UNKNOWN_ORDER | CODE_ORDER_NOT_EXIST) => VenueError::OrderNotFound(message),
            (_, CODE_TIMESTAMP_OUTSIDE_WINDOW) => VenueError::Network(message),
            _ => VenueError::Rejected { code, message },
        },
    }
}

fn parse_side(value: &str) -> Option<Side> {
    match value {
        "LONG" => Some(Side::Long),
        "SHORT" => Some(Side::Short),
        _ => None,
    }
}

fn parse_order_side(value: &str) -> OrderSide {
    if value == "BUY" {
        OrderSide::Buy
    } else {
        OrderSide::Sell
    }
}

fn parse_status(value: &str) -> OrderStatus {
    match value {
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "REJECTED" => OrderStatus::Rejected,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::New,
    }
}

fn parse_kind(value: &str) -> OrderKind {
    match value {
        "MARKET" => OrderKind::Market,
        "LIMIT" => OrderKind::Limit,
        "STOP_MARKET" => OrderKind::StopMarket,
        _ => OrderKind::Other,
    }
}

impl From<ApiOrder> for OrderReport {
    fn from(order: ApiOrder) -> Self {
        Self {
            order_id: order.order_id.to_string(),
            client_order_id: order.client_order_id,
            status: parse_status(&order.status),
            executed_quantity: order.executed_qty,
            average_price: order.avg_price,
        }
    }
}

fn filter_value(filters: &[serde_json::Value], filter_type: &str, key: &str) -> Option<Decimal> {
    filters
        .iter()
        .find(|f| f.get("filterType").and_then(|t| t.as_str()) == Some(filter_type))
        .and_then(|f| f.get(key))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Decimal>().ok())
}

#[async_trait]
impl VenueAdapter for RestVenue {
    async fn prepare_account(&self, leverage: u32) -> Result<(), VenueError> {
        self.apply_setting(
            "/fapi/v1/positionSide/dual",
            vec![("dualSidePosition", "true".to_string())],
            CODE_POSITION_MODE_UNCHANGED,
        )
        .await?;
        self.apply_setting(
            "/fapi/v1/marginType",
            vec![self.symbol_param(), ("marginType", "ISOLATED".to_string())],
            CODE_MARGIN_TYPE_UNCHANGED,
        )
        .await?;
        let _: serde_json::Value = self
            .signed(
                Method::POST,
                "/fapi/v1/leverage",
                vec![self.symbol_param(), ("leverage", leverage.to_string())],
            )
            .await?;
        tracing::info!(symbol = %self.symbol, leverage, "Account set to hedge mode, isolated margin");
        Ok(())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderReport, VenueError> {
        let mut params = vec![
            self.symbol_param(),
            ("side", request.side.as_str().to_string()),
            ("positionSide", request.position_side.as_str().to_string()),
            ("type", request.kind.as_str().to_string()),
            ("newClientOrderId", request.client_order_id.clone()),
            ("newOrderRespType", "RESULT".to_string()),
        ];
        if let Some(quantity) = request.quantity {
            params.push(("quantity", quantity.normalize().to_string()));
        }
        if let Some(price) = request.price {
            params.push(("price", price.normalize().to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if let Some(stop_price) = request.stop_price {
            params.push(("stopPrice", stop_price.normalize().to_string()));
            params.push(("workingType", "MARK_PRICE".to_string()));
        }
        if request.close_position {
            params.push(("closePosition", "true".to_string()));
        }

        let order: ApiOrder = self.signed(Method::POST, "/fapi/v1/order", params).await?;
        Ok(order.into())
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderReport, VenueError> {
        let order: ApiOrder = self
            .signed(
                Method::GET,
                "/fapi/v1/order",
                vec![self.symbol_param(), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(order.into())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), VenueError> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/fapi/v1/order",
                vec![self.symbol_param(), ("orderId", order_id.to_string())],
            )
            .await?;
        Ok(())
    }

    async fn cancel_all_orders(&self) -> Result<(), VenueError> {
        let _: serde_json::Value = self
            .signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                vec![self.symbol_param()],
            )
            .await?;
        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<OpenOrder>, VenueError> {
        let orders: Vec<ApiOrder> = self
            .signed(Method::GET, "/fapi/v1/openOrders", vec![self.symbol_param()])
            .await?;

        Ok(orders
            .into_iter()
            .filter_map(|order| {
                let position_side = parse_side(&order.position_side)?;
                Some(OpenOrder {
                    order_id: order.order_id.to_string(),
                    client_order_id: order.client_order_id,
                    kind: parse_kind(&order.order_type),
                    side: parse_order_side(&order.side),
                    position_side,
                    stop_price: (order.stop_price > Decimal::ZERO).then_some(order.stop_price),
                    quantity: order.orig_qty,
                    close_position: order.close_position,
                })
            })
            .collect())
    }

    async fn positions(&self) -> Result<Vec<VenuePosition>, VenueError> {
        let positions: Vec<ApiPosition> = self
            .signed(
                Method::GET,
                "/fapi/v2/positionRisk",
                vec![self.symbol_param()],
            )
            .await?;

        Ok(positions
            .into_iter()
            .filter(|p| !p.position_amt.is_zero())
            .filter_map(|p| {
                let side = parse_side(&p.position_side)?;
                Some(VenuePosition {
                    side,
                    quantity: p.position_amt.abs(),
                    entry_price: p.entry_price,
                    unrealized_pnl: p.unrealized_profit,
                })
            })
            .collect())
    }

    async fn balance(&self) -> Result<Decimal, VenueError> {
        let balances: Vec<ApiBalance> = self
            .signed(Method::GET, "/fapi/v2/balance", Vec::new())
            .await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == self.quote_asset)
            .map_or(Decimal::ZERO, |b| b.available_balance))
    }

    async fn last_price(&self) -> Result<Decimal, VenueError> {
        let ticker: ApiTicker = self
            .public("/fapi/v1/ticker/price", &[self.symbol_param()])
            .await?;
        Ok(ticker.price)
    }

    async fn instrument_rules(&self) -> Result<Precision, VenueError> {
        let info: ApiExchangeInfo = self.public("/fapi/v1/exchangeInfo", &[]).await?;
        let symbol = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == self.symbol)
            .ok_or_else(|| VenueError::Decode(format!("symbol {} not listed", self.symbol)))?;

        let defaults = Precision::default();
        Ok(Precision::new(
            filter_value(&symbol.filters, "LOT_SIZE", "stepSize").unwrap_or(defaults.quantity_step),
            filter_value(&symbol.filters, "PRICE_FILTER", "tickSize").unwrap_or(defaults.tick_size),
            filter_value(&symbol.filters, "LOT_SIZE", "minQty").unwrap_or(defaults.min_quantity),
        ))
    }

    fn venue_name(&self) -> &'static str {
        "rest"
    }
}
