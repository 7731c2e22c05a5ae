//! C5 — market-data ingress.
//!
//! Runs on its own pinned thread with a single-threaded async reactor.
//! Maintains one WebSocket connection per configured exchange, normalizes
//! each upstream push into a `MarketEvent`/`DepthEvent`, and publishes it
//! onto the market bus. It never touches the journal directly — the
//! journal logger worker (C9) is the sole journal writer, draining the
//! same bus this module publishes to. Grounded on the reconnect/backoff
//! and manual-extraction parsing style of a WebSocket feed adapter, with
//! the per-exchange field-name knowledge expressed as data rather than a
//! new trait per exchange.

mod parse;

pub use parse::{extract_bare_f64, extract_i64, extract_quoted_f64, extract_quoted_str, extract_u64};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::frames::{ExchangeId, MarketEvent, MarketEventType, SymbolId, SystemEvent, SystemEventKind};
use crate::ring::MarketProducer;
use crate::symbol_table::SymbolTable;

/// Field-name knowledge for one exchange's ticker channel. Two exchanges
/// with the same wire shape (quoted-decimal book ticker) share one
/// `TickerFieldMap`; a genuinely different wire shape gets a new map, not
/// a new type.
#[derive(Debug, Clone)]
pub struct TickerFieldMap {
    pub symbol_key: &'static str,
    pub bid_key: &'static str,
    pub ask_key: &'static str,
    pub last_key: Option<&'static str>,
    pub bid_size_key: Option<&'static str>,
    pub volume_key: Option<&'static str>,
    pub timestamp_key: Option<&'static str>,
}

/// Binance-style combined-stream book ticker: `{"s":"BTCUSDT","b":"...",
/// "B":"...","a":"...","A":"...","u":123,"T":169...}`.
pub const BINANCE_BOOK_TICKER: TickerFieldMap = TickerFieldMap {
    symbol_key: "\"s\":\"",
    bid_key: "\"b\":\"",
    ask_key: "\"a\":\"",
    last_key: None,
    bid_size_key: Some("\"B\":\""),
    volume_key: None,
    timestamp_key: Some("\"T\":"),
};

#[derive(Debug, Clone)]
pub struct IngressConfig {
    pub exchange_id: ExchangeId,
    pub exchange_name: String,
    pub ws_url: String,
    pub symbols: Vec<String>,
    pub fields: TickerFieldMap,
    /// Sent verbatim right after connect, and again on every reconnect, if
    /// the exchange needs an explicit subscribe frame rather than encoding
    /// channel interest in the URL.
    pub subscribe_payload: Option<String>,
    pub pin_core: Option<usize>,
    pub realtime: bool,
    pub heartbeat_interval: Duration,
    pub pong_timeout: Duration,
}

impl IngressConfig {
    pub fn reconnect_backoff_initial() -> Duration {
        Duration::from_secs(1)
    }

    pub fn reconnect_backoff_cap() -> Duration {
        Duration::from_secs(60)
    }
}

#[derive(Debug, Default)]
pub struct IngressStats {
    pub messages_received: AtomicU64,
    pub events_published: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnects: AtomicU64,
    pub gaps_detected: AtomicU64,
}

impl IngressStats {
    pub fn snapshot(&self) -> IngressStatsSnapshot {
        IngressStatsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            gaps_detected: self.gaps_detected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct IngressStatsSnapshot {
    pub messages_received: u64,
    pub events_published: u64,
    pub parse_errors: u64,
    pub reconnects: u64,
    pub gaps_detected: u64,
}

struct SymbolGapState {
    last_update_id: u64,
}

/// The market-data ingress worker for one exchange connection.
pub struct MarketDataIngress {
    config: IngressConfig,
    running: Arc<AtomicBool>,
    stats: Arc<IngressStats>,
    symbols: Arc<SymbolTable>,
    gap_state: Mutex<std::collections::HashMap<SymbolId, SymbolGapState>>,
    seq: AtomicU64,
}

impl MarketDataIngress {
    pub fn new(config: IngressConfig, symbols: Arc<SymbolTable>, running: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            config,
            running,
            stats: Arc::new(IngressStats::default()),
            symbols,
            gap_state: Mutex::new(std::collections::HashMap::new()),
            seq: AtomicU64::new(0),
        })
    }

    pub fn stats(&self) -> &IngressStats {
        &self.stats
    }

    /// Runs the reconnect loop until `running` clears. Intended to be
    /// driven by a single-threaded tokio runtime on the pinned MD thread.
    pub async fn run(
        self: Arc<Self>,
        mut market: MarketProducer<MarketEvent>,
        mut system: MarketProducer<SystemEvent>,
    ) -> anyhow::Result<()> {
        crate::rt::apply(self.config.pin_core, self.config.realtime, "market-data-ingress");

        let mut backoff = IngressConfig::reconnect_backoff_initial();

        while self.running.load(Ordering::Relaxed) {
            match self.connect_and_stream(&mut market, &mut system).await {
                Ok(()) => {
                    // Clean shutdown request, not an error.
                }
                Err(e) => {
                    warn!(error = %e, "market-data connection dropped");
                    system.publish(SystemEvent::new(
                        now_ns(),
                        SystemEventKind::ConnectionLost,
                        self.config.exchange_id,
                        &self.config.exchange_name,
                    ));
                    self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
                }
            }

            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            info!(delay_ms = backoff.as_millis() as u64, "reconnecting market data feed");
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(IngressConfig::reconnect_backoff_cap());
        }

        Ok(())
    }

    async fn connect_and_stream(
        &self,
        market: &mut MarketProducer<MarketEvent>,
        system: &mut MarketProducer<SystemEvent>,
    ) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.config.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();

        if let Some(payload) = &self.config.subscribe_payload {
            write.send(Message::Text(payload.clone())).await?;
        }

        system.publish(SystemEvent::new(
            now_ns(),
            SystemEventKind::ConnectionOk,
            self.config.exchange_id,
            &self.config.exchange_name,
        ));

        let last_pong = Arc::new(Mutex::new(Instant::now()));
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        // First tick fires immediately; skip it so we don't ping before the
        // connection has a chance to do anything else.
        heartbeat.tick().await;

        loop {
            if !self.running.load(Ordering::Relaxed) {
                return Ok(());
            }

            tokio::select! {
                _ = heartbeat.tick() => {
                    if last_pong.lock().elapsed() > self.config.pong_timeout {
                        anyhow::bail!("missed pong beyond threshold, forcing reconnect");
                    }
                    write.send(Message::Ping(Vec::new())).await?;
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let started = Instant::now();
                            self.stats.messages_received.fetch_add(1, Ordering::Relaxed);
                            if let Some(event) = self.parse_ticker(&text) {
                                market.publish(event);
                                self.stats.events_published.fetch_add(1, Ordering::Relaxed);
                                crate::performance::global_profiler()
                                    .pipeline
                                    .record_md_ingress(started.elapsed().as_micros() as u64);
                            } else {
                                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
                                crate::performance::global_profiler().pipeline.record_error("md_ingress");
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            write.send(Message::Pong(payload)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            *last_pong.lock() = Instant::now();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "server closed market-data socket");
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn parse_ticker(&self, raw: &str) -> Option<MarketEvent> {
        let fields = &self.config.fields;
        let symbol_str = extract_quoted_str(raw, fields.symbol_key)?;
        let symbol_id = self.symbols.symbol_id(symbol_str);
        if symbol_id == crate::frames::UNKNOWN_SYMBOL {
            return None;
        }

        let bid = extract_quoted_f64(raw, fields.bid_key)?;
        let ask = extract_quoted_f64(raw, fields.ask_key)?;
        let last = fields
            .last_key
            .and_then(|k| extract_quoted_f64(raw, k))
            .unwrap_or((bid + ask) / 2.0);
        let bid_size = fields
            .bid_size_key
            .and_then(|k| extract_quoted_f64(raw, k))
            .unwrap_or(0.0);
        let volume = fields
            .volume_key
            .and_then(|k| extract_quoted_f64(raw, k))
            .unwrap_or(0.0);

        if let Some(update_id) = extract_u64(raw, "\"u\":") {
            let mut states = self.gap_state.lock();
            let state = states
                .entry(symbol_id)
                .or_insert(SymbolGapState { last_update_id: 0 });
            if state.last_update_id > 0 && update_id > state.last_update_id + 1 {
                self.stats.gaps_detected.fetch_add(1, Ordering::Relaxed);
            }
            state.last_update_id = update_id;
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        Some(MarketEvent::new(
            now_ns(),
            seq,
            MarketEventType::Ticker,
            self.config.exchange_id,
            symbol_id,
            last,
            bid,
            ask,
            volume,
            bid_size,
        ))
    }
}

#[inline]
fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<SymbolTable> {
        Arc::new(SymbolTable::build(
            &["binance".to_string()],
            &["BTCUSDT".to_string()],
        ))
    }

    fn ingress() -> Arc<MarketDataIngress> {
        MarketDataIngress::new(
            IngressConfig {
                exchange_id: 0,
                exchange_name: "binance".to_string(),
                ws_url: "wss://example.invalid/ws".to_string(),
                symbols: vec!["BTCUSDT".to_string()],
                fields: BINANCE_BOOK_TICKER,
                subscribe_payload: None,
                pin_core: None,
                realtime: false,
                heartbeat_interval: Duration::from_millis(100),
                pong_timeout: Duration::from_millis(500),
            },
            table(),
            Arc::new(AtomicBool::new(true)),
        )
    }

    #[test]
    fn parses_binance_style_book_ticker() {
        let ingress = ingress();
        let msg = r#"{"data":{"s":"BTCUSDT","b":"50000.10","B":"1.5","a":"50000.50","A":"2.0","u":100,"T":1700000000000}}"#;
        let event = ingress.parse_ticker(msg).expect("should parse");
        assert_eq!(event.bid, 50000.10);
        assert_eq!(event.ask, 50000.50);
        assert_eq!(event.bid_size, 1.5);
    }

    #[test]
    fn unknown_symbol_is_dropped() {
        let ingress = ingress();
        let msg = r#"{"s":"DOGEUSDT","b":"0.1","a":"0.2"}"#;
        assert!(ingress.parse_ticker(msg).is_none());
    }

    #[test]
    fn detects_sequence_gap() {
        let ingress = ingress();
        let first = r#"{"s":"BTCUSDT","b":"1","a":"2","u":10}"#;
        let gapped = r#"{"s":"BTCUSDT","b":"1","a":"2","u":50}"#;
        ingress.parse_ticker(first);
        ingress.parse_ticker(gapped);
        assert_eq!(ingress.stats.gaps_detected.load(Ordering::Relaxed), 1);
    }
}
