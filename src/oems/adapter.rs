//! Exchange adapter contract and its two concrete implementations: a
//! `TestnetAdapter` (HMAC-signed REST, blocking) for the live/testnet
//! binary, and a `PaperAdapter` (in-process fill simulator) for the
//! paper-trading binary. HMAC request signing is grounded on the
//! vault execution adapter's CLOB signer; the paper fill model
//! (latency/slippage/partial-fill/reject probabilities) is grounded on
//! its paper execution adapter, made synchronous since the OEMS thread
//! never awaits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use crossbeam::queue::SegQueue;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use crate::frames::{ExchangeId, OrderRequest, OrderResponse, OrderStatus, Side};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct ExchangeAck {
    pub exchange_order_id: String,
    pub exchange_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    /// Network/5xx/timeout — eligible for retry.
    Transport,
    /// Insufficient funds, invalid symbol, bad param — never retried.
    Business,
    /// Exchange asked us to slow down; `retry_after` carries its hint.
    RateLimit,
}

#[derive(Debug, Clone)]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExchangeError {}

/// What the OEMS worker needs from an exchange connection, with no
/// exchange-specific REST detail leaking past this boundary.
pub trait ExchangeAdapter: Send + Sync {
    fn submit(&self, req: &OrderRequest) -> Result<ExchangeAck, ExchangeError>;
    fn cancel(&self, exchange_order_id: &str) -> Result<(), ExchangeError>;
    fn exchange_id(&self) -> ExchangeId;

    /// Drains fill/partial-fill reports this adapter has ready since the
    /// last call, keyed by `exchange_order_id`. Polled by the OEMS loop
    /// once per iteration and handed to `OemsWorker::on_exchange_report`.
    /// Adapters that only ever ack or error synchronously (`TestnetAdapter`,
    /// until a user-data-stream listener exists) leave this at the default.
    fn poll_reports(&self) -> Vec<(String, OrderResponse)> {
        Vec::new()
    }
}

/// HMAC-SHA256 API credentials for a testnet/live REST venue.
#[derive(Debug, Clone)]
pub struct TestnetCredentials {
    pub api_key: String,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
struct VenueOrderResponse {
    #[serde(rename = "orderId", alias = "order_id")]
    order_id: Option<String>,
    #[serde(default)]
    code: Option<i64>,
    #[serde(rename = "msg", alias = "message", default)]
    msg: Option<String>,
}

/// Blocking HMAC-signed REST adapter for a single exchange connection.
/// One instance per `exchange_id`; the OEMS holds these in its adapter
/// map and never constructs them on the hot path.
pub struct TestnetAdapter {
    client: reqwest::blocking::Client,
    base_url: String,
    creds: TestnetCredentials,
    exchange_id: ExchangeId,
}

impl std::fmt::Debug for TestnetAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestnetAdapter")
            .field("base_url", &self.base_url)
            .field("exchange_id", &self.exchange_id)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl TestnetAdapter {
    pub fn new(base_url: String, creds: TestnetCredentials, exchange_id: ExchangeId) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build exchange REST client");
        Self {
            client,
            base_url,
            creds,
            exchange_id,
        }
    }

    /// `timestamp + method + path + body`, HMAC-SHA256 over the API
    /// secret, URL-safe base64 encoded.
    fn sign(&self, method: &str, path: &str, body: &str, timestamp: i64) -> String {
        let message = format!("{timestamp}{method}{path}{body}");
        let mut mac = HmacSha256::new_from_slice(self.creds.secret.as_bytes()).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        URL_SAFE.encode(mac.finalize().into_bytes())
    }

    fn auth_headers(&self, method: &str, path: &str, body: &str) -> Vec<(&'static str, String)> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = self.sign(method, path, body, timestamp);
        vec![
            ("X-API-KEY", self.creds.api_key.clone()),
            ("X-SIGNATURE", signature),
            ("X-TIMESTAMP", timestamp.to_string()),
        ]
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> ExchangeError {
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            ExchangeError {
                kind: ExchangeErrorKind::RateLimit,
                message: format!("rate limited: {body}"),
                retry_after: Some(Duration::from_secs(1)),
            }
        } else if status.is_client_error() {
            ExchangeError {
                kind: ExchangeErrorKind::Business,
                message: format!("{status}: {body}"),
                retry_after: None,
            }
        } else {
            ExchangeError {
                kind: ExchangeErrorKind::Transport,
                message: format!("{status}: {body}"),
                retry_after: None,
            }
        }
    }
}

impl ExchangeAdapter for TestnetAdapter {
    fn submit(&self, req: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
        let path = "/api/v1/order";
        let mut params: HashMap<&str, String> = HashMap::new();
        params.insert("clientOrderId", req.client_order_id.as_str().to_string());
        params.insert("side", if matches!(req.side(), Side::Buy) { "BUY" } else { "SELL" }.to_string());
        params.insert("price", req.price.to_string());
        params.insert("quantity", req.quantity.to_string());
        let body = serde_json::to_string(&params).unwrap_or_default();

        let headers = self.auth_headers("POST", path, &body);
        let mut request = self.client.post(format!("{}{path}", self.base_url)).body(body.clone());
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().map_err(|e| ExchangeError {
            kind: ExchangeErrorKind::Transport,
            message: e.to_string(),
            retry_after: None,
        })?;
        let status = response.status();
        let text = response.text().unwrap_or_default();

        if !status.is_success() {
            return Err(Self::classify_status(status, &text));
        }

        let parsed: VenueOrderResponse = serde_json::from_str(&text).map_err(|e| ExchangeError {
            kind: ExchangeErrorKind::Transport,
            message: format!("unparseable order response: {e}"),
            retry_after: None,
        })?;

        if let Some(code) = parsed.code {
            if code != 0 {
                return Err(ExchangeError {
                    kind: ExchangeErrorKind::Business,
                    message: parsed.msg.unwrap_or_else(|| format!("error code {code}")),
                    retry_after: None,
                });
            }
        }

        let exchange_order_id = parsed.order_id.ok_or_else(|| ExchangeError {
            kind: ExchangeErrorKind::Transport,
            message: "response missing orderId".to_string(),
            retry_after: None,
        })?;

        debug!(exchange_order_id, local_order_id = req.local_order_id, "order submitted");
        Ok(ExchangeAck {
            exchange_order_id,
            exchange_ts: chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0),
        })
    }

    fn cancel(&self, exchange_order_id: &str) -> Result<(), ExchangeError> {
        let path = format!("/api/v1/order?orderId={exchange_order_id}");
        let headers = self.auth_headers("DELETE", &path, "");
        let mut request = self.client.delete(format!("{}{path}", self.base_url));
        for (key, value) in headers {
            request = request.header(key, value);
        }

        let response = request.send().map_err(|e| ExchangeError {
            kind: ExchangeErrorKind::Transport,
            message: e.to_string(),
            retry_after: None,
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(Self::classify_status(status, &text));
        }
        Ok(())
    }

    fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }
}

/// Latency/slippage/partial-fill simulation knobs for [`PaperAdapter`].
#[derive(Debug, Clone)]
pub struct PaperAdapterConfig {
    pub slippage_bps_per_1k: f64,
    pub base_slippage_bps: f64,
    pub partial_fill_prob: f64,
    pub min_fill_ratio: f64,
    pub reject_prob: f64,
}

impl Default for PaperAdapterConfig {
    fn default() -> Self {
        Self {
            slippage_bps_per_1k: 15.0,
            base_slippage_bps: 10.0,
            partial_fill_prob: 0.15,
            min_fill_ratio: 0.4,
            reject_prob: 0.02,
        }
    }
}

/// In-process fill simulator used by the paper-trading binary. Every
/// submit immediately "fills" (fully or partially) rather than calling
/// out to a real venue; cancel always succeeds since there is no resting
/// order on a real book.
pub struct PaperAdapter {
    config: PaperAdapterConfig,
    exchange_id: ExchangeId,
    next_id: AtomicU64,
    reports: SegQueue<(String, OrderResponse)>,
}

impl PaperAdapter {
    pub fn new(config: PaperAdapterConfig, exchange_id: ExchangeId) -> Self {
        Self {
            config,
            exchange_id,
            next_id: AtomicU64::new(1),
            reports: SegQueue::new(),
        }
    }
}

impl ExchangeAdapter for PaperAdapter {
    fn submit(&self, req: &OrderRequest) -> Result<ExchangeAck, ExchangeError> {
        let mut rng = rand::thread_rng();

        if rng.gen::<f64>() < self.config.reject_prob {
            return Err(ExchangeError {
                kind: ExchangeErrorKind::Business,
                message: "order rejected (simulated)".to_string(),
                retry_after: None,
            });
        }

        let notional = req.notional().abs();
        let size_factor = notional / 1000.0;
        let slippage_bps = self.config.base_slippage_bps + self.config.slippage_bps_per_1k * size_factor;
        let slippage = slippage_bps / 10_000.0;
        let filled_price = match req.side() {
            Side::Buy => req.price * (1.0 + slippage),
            Side::Sell => req.price * (1.0 - slippage),
        };

        let fill_ratio = if rng.gen::<f64>() < self.config.partial_fill_prob {
            rng.gen_range(self.config.min_fill_ratio..1.0)
        } else {
            1.0
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let exchange_order_id = format!("paper-{id}");
        let exchange_ts = chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0);
        debug!(order_id = id, filled_price, fill_ratio, "paper fill simulated");

        let status = if fill_ratio >= 1.0 { OrderStatus::Filled } else { OrderStatus::Partial };
        let mut fill = OrderResponse::new(exchange_ts, req.local_order_id, status, &exchange_order_id);
        fill.exchange_ts = exchange_ts;
        fill.filled_price = filled_price;
        fill.filled_qty = req.quantity * fill_ratio;
        fill.cum_qty = fill.filled_qty;
        fill.avg_price = filled_price;
        self.reports.push((exchange_order_id.clone(), fill));

        Ok(ExchangeAck { exchange_order_id, exchange_ts })
    }

    fn cancel(&self, exchange_order_id: &str) -> Result<(), ExchangeError> {
        debug!(exchange_order_id, "paper cancel accepted");
        Ok(())
    }

    fn exchange_id(&self) -> ExchangeId {
        self.exchange_id
    }

    fn poll_reports(&self) -> Vec<(String, OrderResponse)> {
        let mut out = Vec::new();
        while let Some(report) = self.reports.pop() {
            out.push(report);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frames::OrdType;

    #[test]
    fn paper_adapter_never_rejects_with_zero_probability() {
        let adapter = PaperAdapter::new(
            PaperAdapterConfig {
                reject_prob: 0.0,
                ..PaperAdapterConfig::default()
            },
            0,
        );
        let req = OrderRequest::new(0, 1, 0, 0, 1, Side::Buy, OrdType::Limit, 100.0, 1.0, 0, "s");
        assert!(adapter.submit(&req).is_ok());
    }

    #[test]
    fn paper_adapter_queues_a_fill_report_behind_every_ack() {
        let adapter = PaperAdapter::new(
            PaperAdapterConfig {
                reject_prob: 0.0,
                partial_fill_prob: 0.0,
                ..PaperAdapterConfig::default()
            },
            0,
        );
        let req = OrderRequest::new(0, 7, 0, 0, 1, Side::Buy, OrdType::Limit, 100.0, 2.0, 0, "s");
        let ack = adapter.submit(&req).unwrap();

        let mut reports = adapter.poll_reports();
        assert_eq!(reports.len(), 1);
        let (exchange_order_id, resp) = reports.remove(0);
        assert_eq!(exchange_order_id, ack.exchange_order_id);
        assert_eq!(resp.status(), OrderStatus::Filled);
        assert_eq!(resp.filled_qty, 2.0);
        assert!(adapter.poll_reports().is_empty(), "queue drained after poll");
    }

    #[test]
    fn testnet_adapter_signs_deterministically_for_fixed_timestamp() {
        let adapter = TestnetAdapter::new(
            "https://example.invalid".to_string(),
            TestnetCredentials {
                api_key: "k".to_string(),
                secret: "s".to_string(),
            },
            0,
        );
        let a = adapter.sign("POST", "/x", "{}", 1000);
        let b = adapter.sign("POST", "/x", "{}", 1000);
        assert_of_eq(a, b);
    }

    fn assert_of_eq(a: String, b: String) {
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }
}
