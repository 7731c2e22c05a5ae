//! Fixed-size, cache-aligned event frames.
//!
//! Every frame in this module is a POD: no pointers, no variable-length
//! payloads, `repr(C)` with an explicit compile-time size assertion. Frames
//! are copied by value onto ring slots and journal pages; nothing here is
//! ever boxed or heap-allocated on the hot path.
//!
//! Fixed-length strings embedded in frames are NUL-padded byte arrays. Use
//! [`FixedStr::set`]/[`FixedStr::as_str`] rather than touching the bytes
//! directly.

use std::fmt;

/// A NUL-padded fixed-length string embedded inline in a frame.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FixedStr<const N: usize>(pub [u8; N]);

impl<const N: usize> FixedStr<N> {
    pub const fn empty() -> Self {
        Self([0u8; N])
    }

    /// Copies `s` in, truncating to `N` bytes. Never panics.
    pub fn set(s: &str) -> Self {
        let mut buf = [0u8; N];
        let bytes = s.as_bytes();
        let n = bytes.len().min(N);
        buf[..n].copy_from_slice(&bytes[..n]);
        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(N);
        std::str::from_utf8(&self.0[..end]).unwrap_or("")
    }
}

impl<const N: usize> Default for FixedStr<N> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<const N: usize> fmt::Debug for FixedStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Interned exchange id, assigned once at startup by the `SymbolTable`.
pub type ExchangeId = u16;
/// Interned symbol id, assigned once at startup by the `SymbolTable`.
pub type SymbolId = u16;

pub const UNKNOWN_EXCHANGE: ExchangeId = u16::MAX;
pub const UNKNOWN_SYMBOL: SymbolId = u16::MAX;

/// Market event kind, matching `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MarketEventType {
    Ticker = 0,
    Trade = 1,
    Depth = 2,
}

impl MarketEventType {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ticker,
            1 => Self::Trade,
            _ => Self::Depth,
        }
    }
}

/// 64-byte market tick: best bid/ask/last + trade volume, one per symbol
/// update. Created by the ingress adapter (C5), immutable thereafter.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct MarketEvent {
    pub ts: i64,
    pub seq: u64,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    pub bid_size: f64,
    pub exchange_id: ExchangeId,
    pub symbol_id: SymbolId,
    pub kind: u8,
    _pad: [u8; 3],
}

const _: () = assert!(std::mem::size_of::<MarketEvent>() == 64);

impl MarketEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: i64,
        seq: u64,
        kind: MarketEventType,
        exchange_id: ExchangeId,
        symbol_id: SymbolId,
        last: f64,
        bid: f64,
        ask: f64,
        volume: f64,
        bid_size: f64,
    ) -> Self {
        Self {
            ts,
            seq,
            last,
            bid,
            ask,
            volume,
            bid_size,
            exchange_id,
            symbol_id,
            kind: kind as u8,
            _pad: [0; 3],
        }
    }

    pub fn kind(&self) -> MarketEventType {
        MarketEventType::from_u8(self.kind)
    }
}

impl Default for MarketEvent {
    fn default() -> Self {
        Self {
            ts: 0,
            seq: 0,
            last: 0.0,
            bid: 0.0,
            ask: 0.0,
            volume: 0.0,
            bid_size: 0.0,
            exchange_id: UNKNOWN_EXCHANGE,
            symbol_id: UNKNOWN_SYMBOL,
            kind: MarketEventType::Ticker as u8,
            _pad: [0; 3],
        }
    }
}

impl fmt::Debug for MarketEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarketEvent")
            .field("ts", &self.ts)
            .field("seq", &self.seq)
            .field("kind", &self.kind())
            .field("exchange_id", &self.exchange_id)
            .field("symbol_id", &self.symbol_id)
            .field("last", &self.last)
            .field("bid", &self.bid)
            .field("ask", &self.ask)
            .finish()
    }
}

pub const DEPTH_LEVELS: usize = 5;

/// 192-byte five-level order book snapshot, same lifecycle as `MarketEvent`.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DepthEvent {
    pub ts: i64,
    pub seq: u64,
    pub bid_price: [f64; DEPTH_LEVELS],
    pub bid_size: [f64; DEPTH_LEVELS],
    pub ask_price: [f64; DEPTH_LEVELS],
    pub ask_size: [f64; DEPTH_LEVELS],
    pub exchange_id: ExchangeId,
    pub symbol_id: SymbolId,
    _pad: [u8; 12],
}

const _: () = assert!(std::mem::size_of::<DepthEvent>() == 192);

impl DepthEvent {
    pub fn new(
        ts: i64,
        seq: u64,
        exchange_id: ExchangeId,
        symbol_id: SymbolId,
        bid_price: [f64; DEPTH_LEVELS],
        bid_size: [f64; DEPTH_LEVELS],
        ask_price: [f64; DEPTH_LEVELS],
        ask_size: [f64; DEPTH_LEVELS],
    ) -> Self {
        Self {
            ts,
            seq,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            exchange_id,
            symbol_id,
            _pad: [0; 12],
        }
    }
}

impl Default for DepthEvent {
    fn default() -> Self {
        Self {
            ts: 0,
            seq: 0,
            bid_price: [0.0; DEPTH_LEVELS],
            bid_size: [0.0; DEPTH_LEVELS],
            ask_price: [0.0; DEPTH_LEVELS],
            ask_size: [0.0; DEPTH_LEVELS],
            exchange_id: UNKNOWN_EXCHANGE,
            symbol_id: UNKNOWN_SYMBOL,
            _pad: [0; 12],
        }
    }
}

impl fmt::Debug for DepthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthEvent")
            .field("ts", &self.ts)
            .field("seq", &self.seq)
            .field("exchange_id", &self.exchange_id)
            .field("symbol_id", &self.symbol_id)
            .field("best_bid", &self.bid_price[0])
            .field("best_ask", &self.ask_price[0])
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Side {
    Buy = 0,
    Sell = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrdType {
    Market = 0,
    Limit = 1,
    StopMarket = 2,
    StopLimit = 3,
}

/// 128-byte order request, created on the strategy worker's stack (C6) and
/// copied by value into the MPSC order bus. Exclusively owned by the
/// submitting thread until enqueued.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct OrderRequest {
    pub ts: i64,
    pub local_order_id: u64,
    pub signal_id: u64,
    pub price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub client_order_id: FixedStr<16>,
    pub strategy_name: FixedStr<16>,
    pub account_id: u32,
    pub strategy_id: u32,
    pub exchange_id: ExchangeId,
    pub symbol_id: SymbolId,
    pub side: u8,
    pub ord_type: u8,
    _pad: [u8; 30],
}

const _: () = assert!(std::mem::size_of::<OrderRequest>() == 128);

impl OrderRequest {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: i64,
        local_order_id: u64,
        exchange_id: ExchangeId,
        symbol_id: SymbolId,
        account_id: u32,
        side: Side,
        ord_type: OrdType,
        price: f64,
        quantity: f64,
        strategy_id: u32,
        strategy_name: &str,
    ) -> Self {
        Self {
            ts,
            local_order_id,
            signal_id: 0,
            price,
            quantity,
            stop_price: 0.0,
            client_order_id: FixedStr::set(&format!("o{local_order_id}")),
            strategy_name: FixedStr::set(strategy_name),
            account_id,
            strategy_id,
            exchange_id,
            symbol_id,
            side: side as u8,
            ord_type: ord_type as u8,
            _pad: [0; 30],
        }
    }

    pub fn side(&self) -> Side {
        if self.side == 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }

    pub fn ord_type(&self) -> OrdType {
        match self.ord_type {
            0 => OrdType::Market,
            1 => OrdType::Limit,
            2 => OrdType::StopMarket,
            _ => OrdType::StopLimit,
        }
    }

    /// Notional value of the request at its limit price (or 0 for market
    /// orders, which the risk manager prices against the last market tick).
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

impl fmt::Debug for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderRequest")
            .field("local_order_id", &self.local_order_id)
            .field("exchange_id", &self.exchange_id)
            .field("symbol_id", &self.symbol_id)
            .field("side", &self.side())
            .field("ord_type", &self.ord_type())
            .field("price", &self.price)
            .field("quantity", &self.quantity)
            .field("strategy_id", &self.strategy_id)
            .finish()
    }
}

/// Terminal/intermediate status of an order, matching the state machine in
/// `spec.md` §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OrderStatus {
    Ack = 0,
    Partial = 1,
    Filled = 2,
    Cancelled = 3,
    Rejected = 4,
    Failed = 5,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Failed
        )
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Ack,
            1 => Self::Partial,
            2 => Self::Filled,
            3 => Self::Cancelled,
            4 => Self::Rejected,
            _ => Self::Failed,
        }
    }
}

/// Rejection/failure reasons, surfaced in `OrderResponse.error_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RejectCode {
    None = 0,
    KillSwitch = 1,
    TooManyOrders = 2,
    ExposureLimit = 3,
    SymbolLimit = 4,
    ExchangeBusiness = 5,
    ExchangeTransport = 6,
    QueueFull = 7,
}

impl RejectCode {
    pub fn from_u16(v: u16) -> Self {
        match v {
            1 => Self::KillSwitch,
            2 => Self::TooManyOrders,
            3 => Self::ExposureLimit,
            4 => Self::SymbolLimit,
            5 => Self::ExchangeBusiness,
            6 => Self::ExchangeTransport,
            7 => Self::QueueFull,
            _ => Self::None,
        }
    }
}

/// 128-byte order response, created by the OEMS (C7) after an exchange
/// reply or a local risk rejection. Republished through the market bus and
/// the journal; never mutated after construction.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct OrderResponse {
    pub ts: i64,
    pub local_order_id: u64,
    pub filled_price: f64,
    pub filled_qty: f64,
    pub cum_qty: f64,
    pub avg_price: f64,
    pub fee: f64,
    pub latency_ns: u64,
    pub exchange_ts: i64,
    pub exchange_order_id: FixedStr<16>,
    pub error_msg: FixedStr<16>,
    pub error_code: u16,
    pub status: u8,
    _pad: [u8; 5],
}

const _: () = assert!(std::mem::size_of::<OrderResponse>() == 128);

impl Default for OrderResponse {
    fn default() -> Self {
        Self::new(0, 0, OrderStatus::Ack, "")
    }
}

impl OrderResponse {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ts: i64,
        local_order_id: u64,
        status: OrderStatus,
        exchange_order_id: &str,
    ) -> Self {
        Self {
            ts,
            local_order_id,
            filled_price: 0.0,
            filled_qty: 0.0,
            cum_qty: 0.0,
            avg_price: 0.0,
            fee: 0.0,
            latency_ns: 0,
            exchange_ts: 0,
            exchange_order_id: FixedStr::set(exchange_order_id),
            error_msg: FixedStr::empty(),
            error_code: RejectCode::None as u16,
            status: status as u8,
            _pad: [0; 5],
        }
    }

    pub fn rejected(ts: i64, local_order_id: u64, code: RejectCode, msg: &str) -> Self {
        let mut r = Self::new(ts, local_order_id, OrderStatus::Rejected, "");
        r.error_code = code as u16;
        r.error_msg = FixedStr::set(msg);
        r
    }

    pub fn status(&self) -> OrderStatus {
        OrderStatus::from_u8(self.status)
    }

    pub fn reject_code(&self) -> RejectCode {
        RejectCode::from_u16(self.error_code)
    }
}

impl fmt::Debug for OrderResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderResponse")
            .field("local_order_id", &self.local_order_id)
            .field("status", &self.status())
            .field("filled_qty", &self.filled_qty)
            .field("avg_price", &self.avg_price)
            .field("error_code", &self.reject_code())
            .finish()
    }
}

/// 64-byte position snapshot emitted periodically by the OEMS after
/// reconciliation.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PositionEvent {
    pub ts: i64,
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub account_id: u32,
    pub exchange_id: ExchangeId,
    pub symbol_id: SymbolId,
    _pad: [u8; 8],
}

const _: () = assert!(std::mem::size_of::<PositionEvent>() == 64);

impl PositionEvent {
    pub fn new(
        ts: i64,
        account_id: u32,
        exchange_id: ExchangeId,
        symbol_id: SymbolId,
        quantity: f64,
        avg_entry_price: f64,
        unrealized_pnl: f64,
        realized_pnl: f64,
    ) -> Self {
        Self {
            ts,
            quantity,
            avg_entry_price,
            unrealized_pnl,
            realized_pnl,
            account_id,
            exchange_id,
            symbol_id,
            _pad: [0; 8],
        }
    }
}

impl Default for PositionEvent {
    fn default() -> Self {
        Self::new(0, 0, UNKNOWN_EXCHANGE, UNKNOWN_SYMBOL, 0.0, 0.0, 0.0, 0.0)
    }
}

/// 64-byte account snapshot emitted periodically by the OEMS after
/// reconciliation.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct AccountEvent {
    pub ts: i64,
    pub equity: f64,
    pub available_balance: f64,
    pub used_margin: f64,
    pub daily_pnl: f64,
    pub account_id: u32,
    pub exchange_id: ExchangeId,
    _pad: [u8; 10],
}

const _: () = assert!(std::mem::size_of::<AccountEvent>() == 64);

impl AccountEvent {
    pub fn new(
        ts: i64,
        account_id: u32,
        exchange_id: ExchangeId,
        equity: f64,
        available_balance: f64,
        used_margin: f64,
        daily_pnl: f64,
    ) -> Self {
        Self {
            ts,
            equity,
            available_balance,
            used_margin,
            daily_pnl,
            account_id,
            exchange_id,
            _pad: [0; 10],
        }
    }
}

impl Default for AccountEvent {
    fn default() -> Self {
        Self::new(0, 0, UNKNOWN_EXCHANGE, 0.0, 0.0, 0.0, 0.0)
    }
}

/// Commands accepted on the `query`/`subscribe` IPC sockets and relayed
/// in-process as `CommandEvent` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    StartStrategy = 0,
    StopStrategy = 1,
    PlaceOrder = 2,
    CancelOrder = 3,
    DeactivateKillSwitch = 4,
    RegisterAccount = 5,
}

impl Command {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::StartStrategy,
            1 => Self::StopStrategy,
            2 => Self::PlaceOrder,
            3 => Self::CancelOrder,
            4 => Self::DeactivateKillSwitch,
            _ => Self::RegisterAccount,
        }
    }
}

/// 64-byte command frame, written by the IPC server (C10) on behalf of an
/// external client and consumed by the addressed component.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct CommandEvent {
    pub ts: i64,
    pub price: f64,
    pub quantity: f64,
    pub params_json: FixedStr<24>,
    pub strategy_id: u32,
    pub symbol_id: SymbolId,
    pub command: u8,
    pub side: u8,
    _pad: [u8; 6],
}

const _: () = assert!(std::mem::size_of::<CommandEvent>() == 64);

impl Default for CommandEvent {
    fn default() -> Self {
        Self::new(0, Command::StartStrategy, 0, UNKNOWN_SYMBOL, Side::Buy, 0.0, 0.0, "")
    }
}

impl CommandEvent {
    pub fn new(
        ts: i64,
        command: Command,
        strategy_id: u32,
        symbol_id: SymbolId,
        side: Side,
        price: f64,
        quantity: f64,
        params_json: &str,
    ) -> Self {
        Self {
            ts,
            price,
            quantity,
            params_json: FixedStr::set(params_json),
            strategy_id,
            symbol_id,
            command: command as u8,
            side: side as u8,
            _pad: [0; 6],
        }
    }

    pub fn command(&self) -> Command {
        Command::from_u8(self.command)
    }
}

impl fmt::Debug for CommandEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEvent")
            .field("command", &self.command())
            .field("strategy_id", &self.strategy_id)
            .field("symbol_id", &self.symbol_id)
            .finish()
    }
}

/// System event kind for connectivity/failure notices (supplements the
/// data model section of the spec, which references these events without
/// giving them a shape).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SystemEventKind {
    ConnectionLost = 0,
    ConnectionOk = 1,
    SystemError = 2,
}

/// 64-byte out-of-band notice: reconnects, kill-switch trips, structural
/// errors.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SystemEvent {
    pub ts: i64,
    pub message: FixedStr<32>,
    pub detail_code: u32,
    pub exchange_id: ExchangeId,
    pub symbol_id: SymbolId,
    pub kind: u8,
    _pad: [u8; 7],
}

const _: () = assert!(std::mem::size_of::<SystemEvent>() == 64);

impl SystemEvent {
    pub fn new(ts: i64, kind: SystemEventKind, exchange_id: ExchangeId, message: &str) -> Self {
        Self {
            ts,
            message: FixedStr::set(message),
            detail_code: 0,
            exchange_id,
            symbol_id: UNKNOWN_SYMBOL,
            kind: kind as u8,
            _pad: [0; 7],
        }
    }
}

impl Default for SystemEvent {
    fn default() -> Self {
        Self::new(0, SystemEventKind::SystemError, UNKNOWN_EXCHANGE, "")
    }
}

/// `msg_type` tag used by `journal::FrameHeader` to identify the payload
/// that follows it. New types may be appended without breaking old readers
/// — readers skip anything they don't recognize using `FrameHeader.length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum MsgType {
    Ticker = 0,
    Trade = 1,
    Depth = 2,
    Order = 3,
    OrderResponse = 4,
    Position = 5,
    Account = 6,
    Command = 7,
    System = 8,
    PageRoll = 9,
}

impl MsgType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Ticker),
            1 => Some(Self::Trade),
            2 => Some(Self::Depth),
            3 => Some(Self::Order),
            4 => Some(Self::OrderResponse),
            5 => Some(Self::Position),
            6 => Some(Self::Account),
            7 => Some(Self::Command),
            8 => Some(Self::System),
            9 => Some(Self::PageRoll),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_str_roundtrip() {
        let s: FixedStr<16> = FixedStr::set("abc");
        assert_eq!(s.as_str(), "abc");
        let truncated: FixedStr<4> = FixedStr::set("toolong");
        assert_eq!(truncated.as_str(), "tool");
    }

    #[test]
    fn order_request_side_and_type_roundtrip() {
        let req = OrderRequest::new(
            1, 1, 0, 0, 1, Side::Sell, OrdType::Limit, 100.0, 1.0, 7, "strat",
        );
        assert_eq!(req.side(), Side::Sell);
        assert_eq!(req.ord_type(), OrdType::Limit);
        assert_eq!(req.notional(), 100.0);
    }

    #[test]
    fn order_response_terminal_states() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Ack.is_terminal());
        assert!(!OrderStatus::Partial.is_terminal());
    }

    #[test]
    fn rejected_response_carries_code() {
        let r = OrderResponse::rejected(5, 42, RejectCode::KillSwitch, "kill switch active");
        assert_eq!(r.status(), OrderStatus::Rejected);
        assert_eq!(r.reject_code(), RejectCode::KillSwitch);
        assert_eq!(r.error_msg.as_str(), "kill switch active");
    }
}
