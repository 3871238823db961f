use serde::Deserialize;
use serde_json::Value;
use sync_core::{
    Balance, BalanceUpdate, CoreError, DepthDelta, Fee, Order, OrderStatus, Position,
    PositionSide, Price, PriceLevel, Quantity, Side, Ticker, TimestampMs, Trade,
};

use crate::domain::{ControlMessage, Envelope, Normalizer, StreamEvent, SyncError, Topic};

const DEPTH_SUFFIX: &str = "@depth@100ms";
const TRADE_SUFFIX: &str = "@trade";
const TICKER_SUFFIX: &str = "@ticker";

/// Normalizer for Binance-compatible spot and USDⓈ-M futures streams
///
/// Infrastructure component: owns every venue field name so the engine only
/// ever sees canonical `StreamEvent`s. One instance serves one account type,
/// which labels the balance books it produces.
#[derive(Debug, Clone)]
pub struct BinanceNormalizer {
    account_type: String,
}

impl Default for BinanceNormalizer {
    fn default() -> Self {
        Self::spot()
    }
}

impl BinanceNormalizer {
    pub fn new(account_type: impl Into<String>) -> Self {
        BinanceNormalizer {
            account_type: account_type.into().to_lowercase(),
        }
    }

    pub fn spot() -> Self {
        Self::new("spot")
    }

    pub fn futures() -> Self {
        Self::new("future")
    }

    pub fn account_type(&self) -> &str {
        &self.account_type
    }

    fn decode_event(&self, data: Value) -> Result<Vec<StreamEvent>, SyncError> {
        let Some(kind) = data.get("e").and_then(Value::as_str) else {
            tracing::trace!("untyped payload ignored: {}", data);
            return Ok(Vec::new());
        };

        let event = match kind {
            "depthUpdate" => StreamEvent::OrderBookDelta(decode::<DepthUpdate>(data)?.try_into()?),
            "trade" => StreamEvent::Trade(decode::<TradeEvent>(data)?.try_into()?),
            "24hrTicker" => StreamEvent::Ticker(decode::<TickerEvent>(data)?.try_into()?),
            "executionReport" => decode::<ExecutionReport>(data)?.into_event()?,
            "ORDER_TRADE_UPDATE" => {
                let update = decode::<FuturesOrderUpdate>(data)?;
                update.order.into_event_at(update.transaction_time)?
            }
            "ACCOUNT_UPDATE" => {
                return decode::<FuturesAccountUpdate>(data)?.into_events(&self.account_type);
            }
            "outboundAccountPosition" => StreamEvent::BalanceUpdate(
                decode::<AccountPosition>(data)?.into_update(&self.account_type)?,
            ),
            "balanceUpdate" => StreamEvent::BalanceUpdate(
                decode::<BalanceDelta>(data)?.into_update(&self.account_type)?,
            ),
            "listenKeyExpired" => StreamEvent::Control(ControlMessage::SessionExpired),
            other => {
                tracing::trace!("event type {} ignored", other);
                return Ok(Vec::new());
            }
        };
        Ok(vec![event])
    }
}

impl Normalizer for BinanceNormalizer {
    fn normalize(&self, raw: &str) -> Result<Vec<StreamEvent>, SyncError> {
        let envelope: Envelope =
            serde_json::from_str(raw).map_err(|e| SyncError::Malformed(e.to_string()))?;

        match envelope {
            Envelope::Error { id, code, msg } => {
                Ok(vec![StreamEvent::Control(ControlMessage::ApiError { id, code, msg })])
            }
            Envelope::Result { id, result } => {
                Ok(vec![StreamEvent::Control(ControlMessage::Response { id, result })])
            }
            Envelope::Stream { stream, data } => {
                tracing::trace!("payload on {}", stream);
                self.decode_event(data)
            }
            Envelope::Event(data) => self.decode_event(data),
        }
    }

    fn stream_name(&self, topic: &Topic) -> Option<String> {
        let suffix = match topic.family() {
            "orderbook" => DEPTH_SUFFIX,
            "trades" => TRADE_SUFFIX,
            "ticker" => TICKER_SUFFIX,
            // Account topics ride on the listen-key connection
            _ => return None,
        };
        let symbol = topic.scope()?.to_lowercase();
        Some(format!("{}{}", symbol, suffix))
    }
}

// ============================================================================
// Wire records
// ============================================================================

fn decode<T: for<'de> Deserialize<'de>>(data: Value) -> Result<T, SyncError> {
    serde_json::from_value(data).map_err(|e| SyncError::Malformed(e.to_string()))
}

fn malformed(err: CoreError) -> SyncError {
    SyncError::Malformed(err.to_string())
}

fn levels(pairs: &[[String; 2]]) -> Result<Vec<PriceLevel>, SyncError> {
    PriceLevel::parse_all(pairs).map_err(malformed)
}

fn side(raw: &str) -> Result<Side, SyncError> {
    raw.parse().map_err(malformed)
}

fn price(raw: &str) -> Result<Price, SyncError> {
    Price::parse(raw).map_err(malformed)
}

fn quantity(raw: &str) -> Result<Quantity, SyncError> {
    Quantity::parse(raw).map_err(malformed)
}

/// Zero prices mean "not set" (market orders, no average yet)
fn non_zero_price(raw: Option<&str>) -> Result<Option<Price>, SyncError> {
    match raw {
        Some(raw) => Ok(Some(price(raw)?).filter(|p| !p.is_zero())),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
struct DepthUpdate {
    #[serde(rename = "E")]
    event_time: TimestampMs,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "U")]
    first_update_id: u64,
    #[serde(rename = "u")]
    final_update_id: u64,
    /// Futures only: final update id of the previous event
    #[serde(rename = "pu", default)]
    previous_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    asks: Vec<[String; 2]>,
}

impl TryFrom<DepthUpdate> for DepthDelta {
    type Error = SyncError;

    fn try_from(update: DepthUpdate) -> Result<Self, Self::Error> {
        let delta = DepthDelta::new(update.symbol, update.first_update_id, update.final_update_id)
            .with_bids(levels(&update.bids)?)
            .with_asks(levels(&update.asks)?)
            .with_timestamp(update.event_time);
        Ok(match update.previous_final_update_id {
            Some(prev) => delta.with_prev_end(prev),
            None => delta,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TradeEvent {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "t")]
    trade_id: u64,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "T")]
    trade_time: TimestampMs,
    #[serde(rename = "m")]
    is_buyer_maker: bool,
}

impl TryFrom<TradeEvent> for Trade {
    type Error = SyncError;

    fn try_from(event: TradeEvent) -> Result<Self, Self::Error> {
        // The taker sold into a resting bid when the buyer was the maker
        let taker_side = if event.is_buyer_maker {
            Side::Sell
        } else {
            Side::Buy
        };
        Ok(Trade::new(
            event.trade_id.to_string(),
            event.symbol,
            price(&event.price)?,
            quantity(&event.quantity)?,
            event.trade_time,
        )
        .with_side(taker_side))
    }
}

#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "E")]
    event_time: TimestampMs,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "b", default)]
    bid: Option<String>,
    #[serde(rename = "a", default)]
    ask: Option<String>,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "v")]
    base_volume: String,
}

impl TryFrom<TickerEvent> for Ticker {
    type Error = SyncError;

    fn try_from(event: TickerEvent) -> Result<Self, Self::Error> {
        let mut ticker = Ticker::new(event.symbol, event.event_time);
        ticker.last = Some(price(&event.last)?);
        ticker.bid = non_zero_price(event.bid.as_deref())?;
        ticker.ask = non_zero_price(event.ask.as_deref())?;
        ticker.high = Some(price(&event.high)?);
        ticker.low = Some(price(&event.low)?);
        ticker.base_volume = Some(quantity(&event.base_volume)?);
        Ok(ticker)
    }
}

/// Order report shared by the spot `executionReport` and the `o` object
/// of the futures `ORDER_TRADE_UPDATE`
#[derive(Debug, Deserialize)]
struct ExecutionReport {
    #[serde(rename = "E", default)]
    event_time: Option<TimestampMs>,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c", default)]
    client_order_id: Option<String>,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "p", default)]
    price: Option<String>,
    #[serde(rename = "ap", default)]
    average_price: Option<String>,
    /// Execution type: NEW, TRADE, CANCELED, ...
    #[serde(rename = "x")]
    execution_type: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: u64,
    #[serde(rename = "l")]
    last_filled: String,
    #[serde(rename = "z")]
    cumulative_filled: String,
    #[serde(rename = "L", default)]
    last_price: Option<String>,
    #[serde(rename = "Z", default)]
    cumulative_quote: Option<String>,
    #[serde(rename = "n", default)]
    commission: Option<String>,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
    #[serde(rename = "T")]
    transaction_time: TimestampMs,
    #[serde(rename = "t", default)]
    trade_id: Option<i64>,
    #[serde(rename = "m", default)]
    is_maker: Option<bool>,
    #[serde(rename = "O", default)]
    created_at: Option<TimestampMs>,
}

impl ExecutionReport {
    fn into_event(self) -> Result<StreamEvent, SyncError> {
        let timestamp = self.event_time.unwrap_or(self.transaction_time);
        self.into_event_at(timestamp)
    }

    fn into_event_at(self, timestamp: TimestampMs) -> Result<StreamEvent, SyncError> {
        let side = side(&self.side)?;
        let filled = quantity(&self.cumulative_filled)?;

        let mut order = Order::new(
            self.order_id.to_string(),
            self.symbol.clone(),
            side,
            quantity(&self.quantity)?,
            self.created_at.unwrap_or(self.transaction_time),
        )
        .with_status(OrderStatus::from_venue(&self.status))
        .with_filled(filled);
        order.client_order_id = self.client_order_id.filter(|id| !id.is_empty());
        order.price = non_zero_price(self.price.as_deref())?;
        order.last_update = Some(timestamp);
        order.average = match (non_zero_price(self.average_price.as_deref())?, &self.cumulative_quote) {
            (Some(average), _) => Some(average),
            (None, Some(quote)) if !filled.is_zero() => {
                let average = price(quote)?
                    .inner()
                    .checked_div(filled.inner())
                    .ok_or_else(|| {
                        SyncError::Malformed(format!(
                            "average price of order {} out of range ({} / {})",
                            self.order_id, quote, self.cumulative_filled
                        ))
                    })?;
                Some(Price::new(average))
            }
            _ => None,
        };

        let execution = match (self.execution_type.as_str(), self.trade_id) {
            ("TRADE", Some(trade_id)) if trade_id >= 0 => {
                let fill_price = self
                    .last_price
                    .as_deref()
                    .ok_or_else(|| SyncError::Malformed("trade report without price".to_string()))?;
                let mut trade = Trade::new(
                    trade_id.to_string(),
                    self.symbol,
                    price(fill_price)?,
                    quantity(&self.last_filled)?,
                    self.transaction_time,
                )
                .with_side(side)
                .with_order(order.id.clone());
                trade.is_maker = self.is_maker;
                if let (Some(cost), Some(currency)) = (self.commission, self.commission_asset) {
                    trade = trade.with_fee(Fee::new(currency, quantity(&cost)?));
                }
                Some(trade)
            }
            _ => None,
        };

        Ok(StreamEvent::OrderUpdate { order, execution })
    }
}

#[derive(Debug, Deserialize)]
struct FuturesOrderUpdate {
    #[serde(rename = "T")]
    transaction_time: TimestampMs,
    #[serde(rename = "o")]
    order: ExecutionReport,
}

#[derive(Debug, Deserialize)]
struct FuturesAccountUpdate {
    #[serde(rename = "E")]
    event_time: TimestampMs,
    #[serde(rename = "a")]
    account: FuturesAccount,
}

#[derive(Debug, Deserialize)]
struct FuturesAccount {
    #[serde(rename = "B", default)]
    balances: Vec<FuturesBalance>,
    #[serde(rename = "P", default)]
    positions: Vec<FuturesPosition>,
}

#[derive(Debug, Deserialize)]
struct FuturesBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "wb")]
    wallet_balance: String,
}

#[derive(Debug, Deserialize)]
struct FuturesPosition {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "pa")]
    amount: String,
    #[serde(rename = "ep")]
    entry_price: String,
    #[serde(rename = "up", default)]
    unrealized_pnl: Option<String>,
    #[serde(rename = "ps")]
    side: String,
}

impl FuturesAccountUpdate {
    fn into_events(self, account_type: &str) -> Result<Vec<StreamEvent>, SyncError> {
        let timestamp = self.event_time;
        let mut events = Vec::with_capacity(2);

        if !self.account.balances.is_empty() {
            let balances = self
                .account
                .balances
                .iter()
                .map(|entry| {
                    let total = quantity(&entry.wallet_balance)?;
                    let balance = Balance {
                        total: Some(total),
                        ..Balance::default()
                    };
                    Ok((entry.asset.clone(), balance))
                })
                .collect::<Result<Vec<_>, SyncError>>()?;
            events.push(StreamEvent::BalanceUpdate(BalanceUpdate::Snapshot {
                account_type: account_type.to_string(),
                balances,
                timestamp,
            }));
        }

        if !self.account.positions.is_empty() {
            let positions = self
                .account
                .positions
                .into_iter()
                .map(|entry| {
                    let side: PositionSide = entry.side.parse().map_err(malformed)?;
                    let contracts = Quantity::new(quantity(&entry.amount)?.inner().abs());
                    let mut position = Position::new(entry.symbol, side, contracts, timestamp);
                    position.entry_price = non_zero_price(Some(entry.entry_price.as_str()))?;
                    position.unrealized_pnl = entry
                        .unrealized_pnl
                        .as_deref()
                        .map(quantity)
                        .transpose()?
                        .map(Quantity::inner);
                    Ok(position)
                })
                .collect::<Result<Vec<_>, SyncError>>()?;
            events.push(StreamEvent::PositionUpdate(positions));
        }

        Ok(events)
    }
}

#[derive(Debug, Deserialize)]
struct AccountPosition {
    #[serde(rename = "E")]
    event_time: TimestampMs,
    #[serde(rename = "B")]
    balances: Vec<SpotBalance>,
}

#[derive(Debug, Deserialize)]
struct SpotBalance {
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "f")]
    free: String,
    #[serde(rename = "l")]
    locked: String,
}

impl AccountPosition {
    fn into_update(self, account_type: &str) -> Result<BalanceUpdate, SyncError> {
        let balances = self
            .balances
            .into_iter()
            .map(|entry| {
                let balance = Balance::new(quantity(&entry.free)?, quantity(&entry.locked)?);
                Ok((entry.asset, balance))
            })
            .collect::<Result<Vec<_>, SyncError>>()?;
        Ok(BalanceUpdate::Snapshot {
            account_type: account_type.to_string(),
            balances,
            timestamp: self.event_time,
        })
    }
}

#[derive(Debug, Deserialize)]
struct BalanceDelta {
    #[serde(rename = "E")]
    event_time: TimestampMs,
    #[serde(rename = "a")]
    asset: String,
    #[serde(rename = "d")]
    delta: String,
}

impl BalanceDelta {
    fn into_update(self, account_type: &str) -> Result<BalanceUpdate, SyncError> {
        Ok(BalanceUpdate::Delta {
            account_type: account_type.to_string(),
            asset: self.asset,
            delta: quantity(&self.delta)?.inner(),
            timestamp: self.event_time,
        })
    }
}
