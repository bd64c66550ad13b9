//! OKX venue adapter: signed REST order-entry + public/private WebSocket sessions.
//!
//! Grounded in `original_source/Hyperliquid/OKX/WebsocketConnection.py` (books5 channel
//! shape) and `src/vault/execution.rs` (signed-request REST style).

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
use crate::venue::signing::sign;
use crate::venue::types::{
    BookEvent, BookEventKind, FillReport, Level, OrderAck, OrderEvent, OrderStatus, Side,
};

const PUBLIC_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";
const PRIVATE_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/private";
const REST_HOST: &str = "https://www.okx.com";

pub struct OkxAdapter {
    client: Client,
    creds: VenueCredentials,
    clock: Arc<ClockOffset>,
    host: String,
}

impl OkxAdapter {
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

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Vec<(String, String)> {
        let ts = self.clock.now_ms();
        let ts_str = format!("{}", ts as f64 / 1000.0);
        let signature = sign(&self.creds.secret_key, ts, method, path, body);
        vec![
            ("OK-ACCESS-KEY".to_string(), self.creds.api_key.clone()),
            ("OK-ACCESS-SIGN".to_string(), signature),
            ("OK-ACCESS-TIMESTAMP".to_string(), ts_str),
            (
                "OK-ACCESS-PASSPHRASE".to_string(),
                self.creds.passphrase.clone().unwrap_or_default(),
            ),
        ]
    }

    fn classify_code(code: &str, msg: &str) -> VenueError {
        match code {
            "51008" => VenueError::MarginInsufficient,
            "51400" => VenueError::OrderAlreadyFilledOrCanceled,
            "51401" => VenueError::OrderAlreadyFilledOrCanceled,
            "51603" => VenueError::OrderNotFound,
            "51202" => VenueError::NotionalBelowMinimum,
            "51121" => VenueError::PrecisionBelowMinimum,
            "50113" => VenueError::InProgressModificationLimitExceeded,
            "50011" => VenueError::RateLimited,
            "50004" | "50026" => VenueError::ServerOverloaded,
            _ => VenueError::Unknown(format!("okx {code}: {msg}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OkxRestEnvelope {
    code: String,
    msg: String,
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
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
            "instId": symbol,
            "tdMode": "cross",
            "side": match side { Side::Buy => "buy", Side::Sell => "sell" },
            "ordType": "post_only",
            "sz": format!("{qty}"),
            "px": format!("{price}"),
            "clOrdId": client_id,
        })
        .to_string();

        let path = "/api/v5/trade/order";
        let headers = self.auth_headers("POST", path, &body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: OkxRestEnvelope = serde_json::from_str(&text)?;
        if envelope.code != "0" {
            return Err(Self::classify_code(&envelope.code, &envelope.msg));
        }
        let order_id = envelope
            .data
            .first()
            .and_then(|d| d.get("ordId"))
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
            "instId": symbol,
            "ordId": order_id,
            "newSz": format!("{qty}"),
            "newPx": format!("{price}"),
        })
        .to_string();
        let path = "/api/v5/trade/amend-order";
        let headers = self.auth_headers("POST", path, &body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: OkxRestEnvelope = serde_json::from_str(&text)?;
        if envelope.code != "0" {
            return Err(Self::classify_code(&envelope.code, &envelope.msg));
        }
        Ok(OrderAck {
            order_id: order_id.to_string(),
            client_id: String::new(),
        })
    }

    async fn cancel(&self, order_id: &str, symbol: &str) -> VenueResult<()> {
        let body = json!({ "instId": symbol, "ordId": order_id }).to_string();
        let path = "/api/v5/trade/cancel-order";
        let headers = self.auth_headers("POST", path, &body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: OkxRestEnvelope = serde_json::from_str(&text)?;
        if envelope.code != "0" {
            return Err(Self::classify_code(&envelope.code, &envelope.msg));
        }
        Ok(())
    }

    async fn place_market(&self, symbol: &str, side: Side, qty: f64) -> VenueResult<FillReport> {
        let body = json!({
            "instId": symbol,
            "tdMode": "cross",
            "side": match side { Side::Buy => "buy", Side::Sell => "sell" },
            "ordType": "ioc",
            "sz": format!("{qty}"),
        })
        .to_string();
        let path = "/api/v5/trade/order";
        let headers = self.auth_headers("POST", path, &body);
        let mut req = self
            .client
            .post(format!("{}{}", self.host, path))
            .header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(&k, &v);
        }
        let resp = req.body(body).send().await?;
        let text = resp.text().await.unwrap_or_default();
        let envelope: OkxRestEnvelope = serde_json::from_str(&text)?;
        if envelope.code != "0" {
            return Err(Self::classify_code(&envelope.code, &envelope.msg));
        }
        let order_id = envelope
            .data
            .first()
            .and_then(|d| d.get("ordId"))
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
struct OkxWsEnvelope {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    arg: Option<serde_json::Value>,
    #[serde(default)]
    data: Vec<OkxBookData>,
}

#[derive(Debug, Deserialize)]
struct OkxBookData {
    #[serde(rename = "instId")]
    inst_id: String,
    ts: String,
    #[serde(default)]
    bids: Vec<[String; 4]>,
    #[serde(default)]
    asks: Vec<[String; 4]>,
}

fn parse_levels(raw: &[[String; 4]]) -> Vec<Level> {
    raw.iter()
        .filter_map(|row| {
            let price = row[0].parse().ok()?;
            let size = row[1].parse().ok()?;
            Some(Level { price, size })
        })
        .collect()
}

/// Spawn the public `books5` stream for the given instrument ids. Always reconnects
/// after `RECONNECT_DELAY_SECS`; never drops snapshot events, drops deltas first under
/// back-pressure (spec §4.1).
pub fn spawn_public_book_stream(inst_ids: Vec<String>) -> BookStreamHandle {
    let (tx, rx) = mpsc::channel(BOOK_EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match run_public_session(&inst_ids, &tx).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "okx public ws session ended"),
            }
            sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
        }
    });

    BookStreamHandle { events: rx }
}

async fn run_public_session(
    inst_ids: &[String],
    tx: &mpsc::Sender<BookEvent>,
) -> anyhow::Result<()> {
    let (mut ws, _) = connect_async(PUBLIC_WS_URL).await?;
    info!("okx public ws connected");

    let args: Vec<_> = inst_ids
        .iter()
        .map(|id| json!({ "channel": "books5", "instId": id }))
        .collect();
    let sub = json!({ "op": "subscribe", "args": args });
    ws.send(Message::Text(sub.to_string())).await?;

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let envelope: OkxWsEnvelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "okx malformed message");
                continue;
            }
        };
        if envelope.event.is_some() {
            continue;
        }
        for d in envelope.data {
            let event = BookEvent {
                venue: Venue::Okx,
                venue_symbol: d.inst_id.clone(),
                kind: BookEventKind::Snapshot,
                ts_ms: d.ts.parse().unwrap_or(0),
                bids: parse_levels(&d.bids),
                asks: parse_levels(&d.asks),
            };
            // books5 always carries the full top-5 depth, i.e. is always a snapshot;
            // never dropped under back-pressure.
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct OkxOrderPush {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Vec<OkxOrderData>,
}

#[derive(Debug, Deserialize)]
struct OkxOrderData {
    #[serde(rename = "instId")]
    inst_id: String,
    side: String,
    #[serde(rename = "fillSz")]
    fill_sz: String,
    #[serde(rename = "clOrdId")]
    cl_ord_id: String,
    #[serde(rename = "fillPx", default)]
    fill_px: String,
    #[serde(rename = "uTime")]
    u_time: String,
    state: String,
    #[serde(rename = "fillSeq", default)]
    fill_seq: String,
}

/// Spawn the authenticated private order-event stream. Re-logs in after a disconnect
/// (spec §4.1 "On authenticated disconnect, re-login before re-subscribing").
pub fn spawn_private_order_stream(
    creds: VenueCredentials,
    clock: Arc<ClockOffset>,
) -> OrderStreamHandle {
    let (tx, rx) = mpsc::channel(BOOK_EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        loop {
            match run_private_session(&creds, &clock, &tx).await {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "okx private ws session ended"),
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
    let ts_secs = format!("{}", ts as f64 / 1000.0);
    let signature = sign(&creds.secret_key, ts, "GET", "/users/self/verify", "");
    let login = json!({
        "op": "login",
        "args": [{
            "apiKey": creds.api_key,
            "passphrase": creds.passphrase.clone().unwrap_or_default(),
            "timestamp": ts_secs,
            "sign": signature,
        }]
    });
    ws.send(Message::Text(login.to_string())).await?;

    // First frame should be the login ack; subscribe unconditionally after.
    let sub = json!({ "op": "subscribe", "args": [{ "channel": "orders", "instType": "SWAP" }] });
    ws.send(Message::Text(sub.to_string())).await?;
    info!("okx private ws logged in and subscribed");

    while let Some(msg) = ws.next().await {
        let msg = msg?;
        let Message::Text(text) = msg else { continue };
        let push: OkxOrderPush = match serde_json::from_str(&text) {
            Ok(p) => p,
            Err(_) => continue,
        };
        if push.event.is_some() {
            continue;
        }
        for d in push.data {
            let fill_size: f64 = d.fill_sz.parse().unwrap_or(0.0);
            let status = match d.state.as_str() {
                "live" => OrderStatus::New,
                "partially_filled" => OrderStatus::PartiallyFilled,
                "filled" => OrderStatus::Filled,
                "canceled" => OrderStatus::Cancelled,
                _ => OrderStatus::Rejected,
            };
            let event = OrderEvent {
                venue_symbol: d.inst_id,
                side: if d.side == "buy" { Side::Buy } else { Side::Sell },
                fill_size,
                fill_index: d.fill_seq.parse().unwrap_or(0),
                client_id: d.cl_ord_id,
                price: d.fill_px.parse().unwrap_or(0.0),
                ts_ms: d.u_time.parse().unwrap_or(0),
                status,
            };
            if tx.send(event).await.is_err() {
                return Ok(());
            }
        }
    }

    Ok(())
}
