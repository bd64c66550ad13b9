//! Bybit venue adapter: signed REST order-entry + public/private WebSocket sessions.
//!
//! Grounded in `original_source/Hyperliquid/Bybit/WebsocketHedge.py` and the v5 API's
//! own signing recipe (`timestamp + api_key + recv_window + body`), distinct from
//! OKX's — each venue encodes its own idiosyncratic login ritual per spec §4.1.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::config::{Venue, VenueCredentials};
use crate::errors::{VenueError, VenueResult};
use crate::venue::adapter::{
    BookStreamHandle, OrderStreamHandle, VenueAdapter, BOOK_EVENT_CHANNEL_CAPACITY,
    RECONNECT_DELAY_SECS,
};
use crate::venue::clock::ClockOffset;
use crate::venue::signing::hmac_base64;
use crate::venue::types::{
    BookEvent, BookEventKind, FillReport, Level, OrderAck, OrderEvent, OrderStatus, Side,
};

const PUBLIC_WS_URL: &str = "wss://stream.bybit.com/v5/public/linear";
const PRIVATE_WS_URL: &str = "wss://stream.bybit.com/v5/private";
const REST_HOST: &str = "https://api.bybit.com";
const RECV_WINDOW_MS: i64 = 5_000;

pub struct BybitAdapter {
    client: Client,
    creds: VenueCredentials,
    clock: Arc<ClockOffset>,
    host: String,
}

impl BybitAdapter {
    pub fn new(creds: VenueCredentials, clock: Arc<ClockOffset>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            creds,
            clock,
            host: REST_HOST.to_string(),
        }
    }

    /// Bybit v5 recipe: sign(timestamp + api_key + recv_window + body).
    fn auth_headers(&self, body: &str) -> Vec<(String, String)> {
        let ts = self.clock.now_ms();
        let payload = format!("{}{}{}{}", ts, self.creds.api_key, RECV_WINDOW_MS, body);
        let signature = hmac_base64(&self.creds.secret_key, &payload);
        vec![
            ("X-BAPI-API-KEY".to_string(), self.creds.api_key.clone()),
            ("X-BAPI-SIGN".to_string(), signature),
            ("X-BAPI-TIMESTAMP".to_string(), ts.to_string()),
            ("X-BAPI-RECV-WINDOW".to_string(), RECV_WINDOW_MS.to_string()),
        ]
    }

    fn classify_code(ret_code: i64, ret_msg: &str) -> VenueError {
        match ret_code {
            110007 => VenueError::MarginInsufficient,
            110001 => VenueError::OrderNotFound,
            110004 => VenueError::NotionalBelowMinimum,
            110017 => VenueError::PrecisionBelowMinimum,
            110012 => VenueError::InProgressModificationLimitExceeded,
            10006 => VenueError::RateLimited,
            10002 => VenueError::ServerOverloaded,
            110043 => VenueError::OrderAlreadyFilledOrCanceled,
            _ => VenueError::Unknown(format!("bybit {ret_code}: {ret_msg}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BybitRestEnvelope {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn place_post_only(
        &self,
        symbol: &str,
        side: Side,
        qty: f64,
        price: f64,
    ) -> VenueResult<OrderAck> {
        let client_id = crate::venue::types::generate_client_id("mm");
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": match side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "orderType": "Limit",
            "qty": format!("{qty}"),
            "price": format!("{price}"),
            "timeInForce": "PostOnly",
            "orderLinkId": client_id,
        })
        .to_string();
        let path = "/v5/order/create";
        let headers = self.auth_headers(&body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: BybitRestEnvelope = serde_json::from_str(&text)?;
        if envelope.ret_code != 0 {
            return Err(Self::classify_code(envelope.ret_code, &envelope.ret_msg));
        }
        let order_id = envelope
            .result
            .get("orderId")
            .and_then(|v| v.as_str())
            .unwrap_or(&client_id)
            .to_string();
        Ok(OrderAck {
            order_id,
            client_id,
        })
    }

    async fn amend(
        &self,
        order_id: &str,
        symbol: &str,
        _side: Side,
        qty: f64,
        price: f64,
    ) -> VenueResult<OrderAck> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
            "qty": format!("{qty}"),
            "price": format!("{price}"),
        })
        .to_string();
        let path = "/v5/order/amend";
        let headers = self.auth_headers(&body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: BybitRestEnvelope = serde_json::from_str(&text)?;
        if envelope.ret_code != 0 {
            return Err(Self::classify_code(envelope.ret_code, &envelope.ret_msg));
        }
        Ok(OrderAck {
            order_id: order_id.to_string(),
            client_id: String::new(),
        })
    }

    async fn cancel(&self, order_id: &str, symbol: &str) -> VenueResult<()> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "orderId": order_id,
        })
        .to_string();
        let path = "/v5/order/cancel";
        let headers = self.auth_headers(&body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: BybitRestEnvelope = serde_json::from_str(&text)?;
        if envelope.ret_code != 0 {
            return Err(Self::classify_code(envelope.ret_code, &envelope.ret_msg));
        }
        Ok(())
    }

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<FillReport> {
        let body = json!({
            "category": "linear",
            "symbol": symbol,
            "side": match side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "orderType": "Market",
            "qty": format!("{qty}"),
            "timeInForce": "IOC",
        })
        .to_string();
        let path = "/v5/order/create";
        let headers = self.auth_headers(&body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: BybitRestEnvelope = serde_json::from_str(&text)?;
        if envelope.ret_code != 0 {
            return Err(Self::classify_code(envelope.ret_code, &envelope.ret_msg));
        }
        let order_id = envelope
            .result
            .get("orderId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok(FillReport {
            order_id,
            filled_size: qty,
            avg_price: 0.0,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BybitWsEnvelope {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    ts: i64,
    #[serde(default)]
    data: serde_json::Value,
}

fn parse_levels(raw: &[[String; 2]]) -> Vec<Level> {
    raw.iter()
        .filter_map(|row| {
            let price = row[0].parse().ok()?;
            let size = row[1].parse().ok()?;
            Some(Level { price, size })
        })
        .collect()
}

/// Spawn the public orderbook stream (`orderbook.1.<symbol>`, depth-1 -> top of book,
/// treated as §4.2's N=5 truncation after merge with prior state).
pub fn spawn_public_book_stream(symbols: Vec<String>) -> BookStreamHandle {
    let (tx, rx) = mpsc::channel(BOOK_EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match run_public_session(&symbols, &tx).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "bybit public ws session ended"),
            }
            sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    });

    BookStreamHandle { events: rx }
}

async fn run_public_session(
    symbols: &[String],
    tx: &mpsc::Sender<BookEvent>,
) -> anyhow::Result<()> {
    let (mut ws, _) = connect_async(PUBLIC_WS_URL).await?;
    info!("bybit public ws connected");

    let args: Vec<String> = symbols.iter().map(|s| format!("orderbook.50.{s}")).collect();
    let sub = json!({ "op": "subscribe", "args": args });
    ws.send(Message::Text(sub.to_string())).await?;

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let envelope: BybitWsEnvelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "bybit malformed message");
                continue;
            }
        };
        let Some(topic) = envelope.topic else { continue };
        let Some(symbol) = topic.rsplit('.').next() else { continue };

        let bids_raw: Vec<[String; 2]> = envelope
            .data
            .get("b")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let asks_raw: Vec<[String; 2]> = envelope
            .data
            .get("a")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        let update_type = envelope
            .data
            .get("u")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        // Bybit emits a "snapshot" type on the first push, "delta" after; we treat the
        // very first push per symbol as a snapshot by convention of u == 1.
        let kind = if update_type <= 1 {
            BookEventKind::Snapshot
        } else {
            BookEventKind::Delta
        };

        let event = BookEvent {
            venue: Venue::Bybit,
            venue_symbol: symbol.to_string(),
            kind,
            ts_ms: envelope.ts,
            bids: parse_levels(&bids_raw),
            asks: parse_levels(&asks_raw),
        };

        if matches!(kind, BookEventKind::Snapshot) {
            let _ = tx.send(event).await;
        } else if tx.try_send(event).is_err() {
            debug!("bybit delta dropped under back-pressure");
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct BybitPrivateEnvelope {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Vec<BybitOrderData>,
}

#[derive(Debug, Deserialize)]
struct BybitOrderData {
    symbol: String,
    side: String,
    #[serde(rename = "execQty", default)]
    exec_qty: String,
    #[serde(rename = "orderLinkId")]
    order_link_id: String,
    #[serde(rename = "execPrice", default)]
    exec_price: String,
    #[serde(rename = "updatedTime")]
    updated_time: String,
    #[serde(rename = "orderStatus")]
    order_status: String,
    #[serde(rename = "execId", default)]
    exec_id: String,
}

/// Spawn the authenticated private order stream.
pub fn spawn_private_order_stream(
    creds: VenueCredentials,
    clock: Arc<ClockOffset>,
) -> OrderStreamHandle {
    let (tx, rx) = mpsc::channel(BOOK_EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match run_private_session(&creds, &clock, &tx).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "bybit private ws session ended"),
            }
            sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    });

    OrderStreamHandle { events: rx }
}

async fn run_private_session(
    creds: &VenueCredentials,
    clock: &ClockOffset,
    tx: &mpsc::Sender<OrderEvent>,
) -> anyhow::Result<()> {
    let (mut ws, _) = connect_async(PRIVATE_WS_URL).await?;

    let ts = clock.now_ms();
    let payload = format!("{ts}GET/realtime");
    let signature = hmac_base64(&creds.secret_key, &payload);
    let login = json!({
        "op": "auth",
        "args": [creds.api_key.clone(), ts, signature],
    });
    ws.send(Message::Text(login.to_string())).await?;

    let sub = json!({ "op": "subscribe", "args": ["order"] });
    ws.send(Message::Text(sub.to_string())).await?;
    info!("bybit private ws logged in and subscribed");

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let envelope: BybitPrivateEnvelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(_) => continue,
        };
        if envelope.topic.as_deref() != Some("order") {
            continue;
        }
        for d in envelope.data {
            let status = match d.order_status.as_str() {
                "New" => OrderStatus::New,
                "PartiallyFilled" => OrderStatus::PartiallyFilled,
                "Filled" => OrderStatus::Filled,
                "Cancelled" => OrderStatus::Cancelled,
                _ => OrderStatus::Rejected,
            };
            let event = OrderEvent {
                venue_symbol: d.symbol,
                side: if d.side == "Buy" { Side::Buy } else { Side::Sell },
                fill_size: d.exec_qty.parse().unwrap_or(0.0),
                fill_index: d.exec_id.parse().unwrap_or(0),
                client_id: d.order_link_id,
                price: d.exec_price.parse().unwrap_or(0.0),
                ts_ms: d.updated_time.parse().unwrap_or(0),
                status,
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}
