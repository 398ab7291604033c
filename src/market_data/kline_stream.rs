use std::collections::HashMap;

use anyhow::{Context, Result};
use futures_util::future::{self, BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use super::feed::{CandleFeed, CandleStream, Subscription};
use crate::types::CandleEvent;

/// Kline intervals accepted by the Binance stream API.
const SUPPORTED_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

pub const DEFAULT_STREAM_URL: &str = "wss://stream.binance.com:9443";

// ---------------------------------------------------------------------------
// BinanceKlineFeed
// ---------------------------------------------------------------------------

/// [`CandleFeed`] backed by the Binance combined kline WebSocket stream.
///
/// Only closed klines are forwarded, so each item is one completed candle.
/// Symbols may be given as `BTCUSDT` or `BTC-USDT`; events carry whichever
/// form the caller subscribed with.
pub struct BinanceKlineFeed {
    base_url: String,
}

impl BinanceKlineFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn connect(&self, subscription: &Subscription) -> Result<CandleStream> {
        if subscription.symbols.is_empty() {
            warn!("kline subscription has no symbols -- stream will stay silent");
            return Ok(stream::pending().boxed());
        }

        // Exchange-native symbol -> identifier the caller asked for.
        let aliases: HashMap<String, String> = subscription
            .symbols
            .iter()
            .map(|s| (native_symbol(s), s.clone()))
            .collect();

        let url = build_kline_url(&self.base_url, &subscription.symbols, &subscription.interval);
        info!(
            url = %url,
            symbols = subscription.symbols.len(),
            interval = %subscription.interval,
            "connecting to kline WebSocket"
        );

        let (ws_stream, _response) = connect_async(&url)
            .await
            .context("failed to connect to kline WebSocket")?;

        info!(interval = %subscription.interval, "kline WebSocket connected");
        let (_write, read) = ws_stream.split();

        let candles = read.filter_map(move |msg| future::ready(decode_frame(msg, &aliases)));

        Ok(candles.boxed())
    }
}

impl Default for BinanceKlineFeed {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_URL)
    }
}

impl CandleFeed for BinanceKlineFeed {
    fn supports_interval(&self, interval: &str) -> bool {
        SUPPORTED_INTERVALS.contains(&interval)
    }

    fn canonical_symbol(&self, symbol: &str) -> String {
        native_symbol(symbol)
    }

    fn subscribe<'a>(&'a self, subscription: &'a Subscription) -> BoxFuture<'a, Result<CandleStream>> {
        self.connect(subscription).boxed()
    }
}

/// Turn one WebSocket frame into at most one stream item.  Events are
/// renamed to the symbol spelling the caller subscribed with.
fn decode_frame(
    msg: Result<Message, WsError>,
    aliases: &HashMap<String, String>,
) -> Option<Result<CandleEvent>> {
    match msg {
        Ok(Message::Text(text)) => match parse_kline_message(&text) {
            Ok(Some(mut event)) => {
                if let Some(requested) = aliases.get(&event.symbol) {
                    event.symbol = requested.clone();
                }
                Some(Ok(event))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "failed to parse kline message");
                None
            }
        },
        // Ping / Pong / Binary / Close frames carry no candles.
        Ok(_) => None,
        Err(e) => Some(Err(anyhow::Error::new(e).context("kline WebSocket read error"))),
    }
}

/// `BTC-USDT`, `btc_usdt` and `BTC/USDT` all become `BTCUSDT`.
fn native_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '-' | '_' | '/'))
        .collect::<String>()
        .to_uppercase()
}

/// Build the combined-stream URL for every symbol at one interval.
fn build_kline_url(base_url: &str, symbols: &[String], interval: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@kline_{interval}", native_symbol(s).to_lowercase()))
        .collect();
    format!("{base_url}/stream?streams={}", streams.join("/"))
}

/// Parse a kline message, either wrapped in the combined-stream envelope or
/// bare.  Returns `Ok(None)` for klines that have not closed yet and for
/// non-kline control messages.
///
/// Expected shape:
/// ```json
/// { "stream": "btcusdt@kline_1m", "data": { "e": "kline", "s": "BTCUSDT", "k": { ... } } }
/// ```
fn parse_kline_message(text: &str) -> Result<Option<CandleEvent>> {
    let root: serde_json::Value =
        serde_json::from_str(text).context("failed to parse kline JSON")?;

    let data = if root.get("data").is_some() {
        &root["data"]
    } else {
        &root
    };

    // Subscription acks look like {"result":null,"id":1}.
    if data.get("k").is_none() {
        debug!(message = %text, "ignoring non-kline message");
        return Ok(None);
    }

    let k = &data["k"];
    let is_closed = k["x"].as_bool().context("missing field k.x")?;
    if !is_closed {
        return Ok(None);
    }

    let symbol = data["s"]
        .as_str()
        .context("missing field s")?
        .to_uppercase();

    let event = CandleEvent {
        symbol,
        interval: k["i"].as_str().context("missing field k.i")?.to_string(),
        open_time: k["t"].as_i64().context("missing field k.t")?,
        close_time: k["T"].as_i64().context("missing field k.T")?,
        open: parse_string_f64(&k["o"], "k.o")?,
        high: parse_string_f64(&k["h"], "k.h")?,
        low: parse_string_f64(&k["l"], "k.l")?,
        close: parse_string_f64(&k["c"], "k.c")?,
        volume: parse_string_f64(&k["v"], "k.v")?,
    };

    Ok(Some(event))
}

/// Binance sends numeric values as JSON strings inside kline objects.
fn parse_string_f64(val: &serde_json::Value, name: &str) -> Result<f64> {
    match val {
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .with_context(|| format!("failed to parse {name} as f64: {s}")),
        serde_json::Value::Number(n) => n
            .as_f64()
            .with_context(|| format!("field {name} is not a valid f64")),
        _ => anyhow::bail!("field {name} has unexpected JSON type"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
