//! Per-exchange WebSocket feed handlers.
//!
//! Each exchange speaks its own framing and subscription handshake, but
//! every handler converges on the same internal effect: parse a tick, call
//! `set_last_price`. On disconnect the slot is cleared and the feed
//! reconnects with linearly increasing backoff (`base * attempt`), giving up
//! permanently after the configured attempt count.

use super::{ExchangeId, PriceOracle};
use crate::config::OracleConfig;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, warn};

/// Runs one exchange feed until its reconnect budget is exhausted.
pub async fn run_feed(oracle: Arc<PriceOracle>, exchange: ExchangeId, config: OracleConfig) {
    for attempt in 1..=config.max_reconnect_attempts {
        match stream_ticks(&oracle, exchange).await {
            Ok(()) => debug!(%exchange, "feed closed cleanly"),
            Err(e) => warn!(%exchange, attempt, "feed error: {e}"),
        }
        // The socket is gone; its price must leave the average immediately.
        oracle.clear_price(exchange);

        let delay = Duration::from_millis(config.reconnect_base_ms * attempt as u64);
        warn!(%exchange, attempt, ?delay, "reconnecting feed");
        tokio::time::sleep(delay).await;
    }
    error!(
        %exchange,
        attempts = config.max_reconnect_attempts,
        "feed gave up until process restart"
    );
}

/// Connects, performs the exchange-specific handshake and pumps ticks into
/// the oracle until the connection drops.
async fn stream_ticks(
    oracle: &PriceOracle,
    exchange: ExchangeId,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws, _) = connect_async(endpoint(exchange)).await?;

    if let Some(subscribe) = subscribe_message(exchange) {
        ws.send(Message::Text(subscribe)).await?;
    }

    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                if let Some(price) = parse_tick(exchange, &text) {
                    oracle.set_last_price(exchange, price);
                }
            }
            Message::Ping(payload) => ws.send(Message::Pong(payload)).await?,
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}

fn endpoint(exchange: ExchangeId) -> &'static str {
    match exchange {
        ExchangeId::Binance => "wss://stream.binance.com:9443/ws/btcusdt@trade",
        ExchangeId::Coinbase => "wss://ws-feed.exchange.coinbase.com",
        ExchangeId::Kraken => "wss://ws.kraken.com",
    }
}

/// Post-connect subscription payload, where the exchange needs one. Binance
/// encodes the subscription in the endpoint path.
fn subscribe_message(exchange: ExchangeId) -> Option<String> {
    match exchange {
        ExchangeId::Binance => None,
        ExchangeId::Coinbase => Some(
            serde_json::json!({
                "type": "subscribe",
                "product_ids": ["BTC-USD"],
                "channels": ["ticker"],
            })
            .to_string(),
        ),
        ExchangeId::Kraken => Some(
            serde_json::json!({
                "event": "subscribe",
                "pair": ["XBT/USD"],
                "subscription": {"name": "ticker"},
            })
            .to_string(),
        ),
    }
}

/// Extracts the trade/ticker price from one raw frame, `None` for
/// heartbeats, acks and anything malformed.
fn parse_tick(exchange: ExchangeId, raw: &str) -> Option<f64> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    match exchange {
        // {"e":"trade","p":"51000.12",...}
        ExchangeId::Binance => value.get("p")?.as_str()?.parse().ok(),
        // {"type":"ticker","price":"51000.12",...}
        ExchangeId::Coinbase => {
            if value.get("type")?.as_str()? != "ticker" {
                return None;
            }
            value.get("price")?.as_str()?.parse().ok()
        }
        // [channelId, {"c":["51000.12","..."]}, "ticker", "XBT/USD"]
        ExchangeId::Kraken => {
            let payload = value.as_array()?.get(1)?;
            payload.get("c")?.as_array()?.first()?.as_str()?.parse().ok()
        }
    }
}
