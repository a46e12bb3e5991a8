//! Wire models for the Kraken WebSocket feed
//!
//! Everything arriving on the socket is decoded here, at the boundary, into a
//! tagged union: control messages are keyed JSON objects with an `event`
//! field, data messages are positional arrays
//! `[channelId, payload, channelName, pair]`. Unknown shapes are rejected
//! explicitly instead of duck-typed indexing.

use rust_decimal::Decimal;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),
    #[error("Unknown channel name: {0}")]
    UnknownChannel(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A raw inbound frame, already routed between the two wire shapes.
#[derive(Debug, Clone)]
pub enum RawMessage {
    /// Keyed object with an `event` field; acknowledged and discarded
    Control(ControlMessage),
    /// Positional data frame carrying a channel payload
    Data(DataFrame),
}

/// Control messages the exchange sends outside the data channels
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ControlMessage {
    SystemStatus {
        #[serde(default)]
        status: Option<String>,
        #[serde(default, rename = "connectionID")]
        connection_id: Option<u64>,
    },
    SubscriptionStatus {
        #[serde(default)]
        status: Option<String>,
        #[serde(default, rename = "channelName")]
        channel_name: Option<String>,
        #[serde(default)]
        pair: Option<String>,
        #[serde(default, rename = "errorMessage")]
        error_message: Option<String>,
    },
    Heartbeat,
    Pong {
        #[serde(default)]
        reqid: Option<u64>,
    },
    Error {
        #[serde(default, rename = "errorMessage")]
        error_message: Option<String>,
    },
}

/// Positional data frame: `[channelId, payload, channelName, pair]`
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub channel_id: i64,
    pub payload: Value,
    pub channel: ChannelSpec,
    pub pair: String,
}

/// Data channels this core understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Ticker,
    Trade,
    Book,
    Ohlc,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Ticker => "ticker",
            Channel::Trade => "trade",
            Channel::Book => "book",
            Channel::Ohlc => "ohlc",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel name plus the optional suffix it carries on the wire,
/// e.g. `book-10` or `ohlc-5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub channel: Channel,
    pub detail: Option<u32>,
}

impl ChannelSpec {
    /// Parse a wire channel name, splitting off a numeric depth/interval
    /// suffix when present.
    pub fn parse(name: &str) -> Result<Self, EventError> {
        let (base, detail) = match name.split_once('-') {
            Some((base, suffix)) => {
                let detail = suffix
                    .parse::<u32>()
                    .map_err(|_| EventError::UnknownChannel(name.to_string()))?;
                (base, Some(detail))
            }
            None => (name, None),
        };

        let channel = match base {
            "ticker" => Channel::Ticker,
            "trade" => Channel::Trade,
            "book" => Channel::Book,
            "ohlc" => Channel::Ohlc,
            _ => return Err(EventError::UnknownChannel(name.to_string())),
        };

        Ok(Self { channel, detail })
    }
}

/// Parse one raw text frame into a control or data message.
pub fn parse_raw(text: &str) -> Result<RawMessage, EventError> {
    let value: Value = serde_json::from_str(text)?;

    match value {
        Value::Object(ref map) if map.contains_key("event") => {
            let control: ControlMessage = serde_json::from_value(value)?;
            Ok(RawMessage::Control(control))
        }
        Value::Array(items) => {
            if items.len() != 4 {
                return Err(EventError::InvalidFormat(format!(
                    "data frame has {} elements, expected 4",
                    items.len()
                )));
            }
            let mut items = items.into_iter();
            let channel_id = items
                .next()
                .and_then(|v| v.as_i64())
                .ok_or_else(|| EventError::InvalidFormat("channel id is not an integer".into()))?;
            let payload = items.next().expect("length checked");
            let channel_name = match items.next() {
                Some(Value::String(s)) => s,
                other => {
                    return Err(EventError::InvalidFormat(format!(
                        "channel name is not a string: {:?}",
                        other
                    )))
                }
            };
            let pair = match items.next() {
                Some(Value::String(s)) => s,
                other => {
                    return Err(EventError::InvalidFormat(format!(
                        "pair is not a string: {:?}",
                        other
                    )))
                }
            };

            Ok(RawMessage::Data(DataFrame {
                channel_id,
                payload,
                channel: ChannelSpec::parse(&channel_name)?,
                pair,
            }))
        }
        other => Err(EventError::InvalidFormat(format!(
            "neither control object nor data array: {}",
            other
        ))),
    }
}

/// Ticker payload: fields `a,b,c,v,p,t,l,h,o`, each either a scalar or a
/// `[today, 24h]` pair. Every field is required; a message missing one fails
/// to decode as a whole and is dropped by the pipeline.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TickerPayload {
    #[serde(rename = "a", deserialize_with = "scalar_or_first_decimal")]
    pub ask: Decimal,
    #[serde(rename = "b", deserialize_with = "scalar_or_first_decimal")]
    pub bid: Decimal,
    #[serde(rename = "c", deserialize_with = "scalar_or_first_decimal")]
    pub close: Decimal,
    #[serde(rename = "v", deserialize_with = "scalar_or_first_decimal")]
    pub volume: Decimal,
    #[serde(rename = "p", deserialize_with = "scalar_or_first_decimal")]
    pub vwap: Decimal,
    #[serde(rename = "t", deserialize_with = "scalar_or_first_u64")]
    pub trade_count: u64,
    #[serde(rename = "l", deserialize_with = "scalar_or_first_decimal")]
    pub low: Decimal,
    #[serde(rename = "h", deserialize_with = "scalar_or_first_decimal")]
    pub high: Decimal,
    #[serde(rename = "o", deserialize_with = "scalar_or_first_decimal")]
    pub open: Decimal,
}

/// One order-book level: `[price, volume, timestamp]`, numbers as strings.
/// The raw price string is kept so cache keys preserve the exchange's exact
/// formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct BookLevel {
    pub price_key: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: Decimal,
}

impl<'de> Deserialize<'de> for BookLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct LevelVisitor;

        impl<'de> Visitor<'de> for LevelVisitor {
            type Value = BookLevel;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [price, volume, timestamp] array of strings")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let price_key: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let volume: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let timestamp: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                // Republished updates carry a trailing "r" flag; ignore it.
                while seq.next_element::<Value>()?.is_some() {}

                let price = price_key
                    .parse::<Decimal>()
                    .map_err(|e| de::Error::custom(format!("bad price: {}", e)))?;
                let volume = volume
                    .parse::<Decimal>()
                    .map_err(|e| de::Error::custom(format!("bad volume: {}", e)))?;
                let timestamp = timestamp
                    .parse::<Decimal>()
                    .map_err(|e| de::Error::custom(format!("bad timestamp: {}", e)))?;

                Ok(BookLevel {
                    price_key,
                    price,
                    volume,
                    timestamp,
                })
            }
        }

        deserializer.deserialize_seq(LevelVisitor)
    }
}

/// Raw book payload as it appears on the wire: `as`/`bs` for a snapshot,
/// `a`/`b` for incremental updates.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawBookPayload {
    #[serde(rename = "as", default)]
    ask_snapshot: Option<Vec<BookLevel>>,
    #[serde(rename = "bs", default)]
    bid_snapshot: Option<Vec<BookLevel>>,
    #[serde(rename = "a", default)]
    ask_updates: Option<Vec<BookLevel>>,
    #[serde(rename = "b", default)]
    bid_updates: Option<Vec<BookLevel>>,
    #[serde(rename = "c", default)]
    #[allow(dead_code)]
    checksum: Option<String>,
}

/// Book message routed into its two shapes. A snapshot fully replaces a side;
/// an update upserts single levels (volume zero deletes).
#[derive(Debug, Clone, PartialEq)]
pub enum BookMessage {
    Snapshot {
        asks: Vec<BookLevel>,
        bids: Vec<BookLevel>,
    },
    Update {
        asks: Vec<BookLevel>,
        bids: Vec<BookLevel>,
    },
}

impl BookMessage {
    pub fn from_payload(payload: Value) -> Result<Self, EventError> {
        let raw: RawBookPayload = serde_json::from_value(payload)?;

        let is_snapshot = raw.ask_snapshot.is_some() || raw.bid_snapshot.is_some();
        let is_update = raw.ask_updates.is_some() || raw.bid_updates.is_some();

        match (is_snapshot, is_update) {
            (true, false) => Ok(BookMessage::Snapshot {
                asks: raw.ask_snapshot.unwrap_or_default(),
                bids: raw.bid_snapshot.unwrap_or_default(),
            }),
            (false, true) => Ok(BookMessage::Update {
                asks: raw.ask_updates.unwrap_or_default(),
                bids: raw.bid_updates.unwrap_or_default(),
            }),
            (true, true) => Err(EventError::InvalidFormat(
                "book payload mixes snapshot and update keys".into(),
            )),
            (false, false) => Err(EventError::InvalidFormat(
                "book payload has neither snapshot nor update keys".into(),
            )),
        }
    }
}

/// Which side of the book a trade hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Single-character wire code: `'s'` means sell, anything else buy.
    pub fn from_code(code: &str) -> Self {
        if code == "s" {
            TradeSide::Sell
        } else {
            TradeSide::Buy
        }
    }
}

/// One public trade: `[price, volume, time, side, orderType, misc]`
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub price: Decimal,
    pub volume: Decimal,
    pub time: Decimal,
    pub side: TradeSide,
    pub order_type: String,
    pub misc: String,
}

impl<'de> Deserialize<'de> for TradeRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TradeVisitor;

        impl<'de> Visitor<'de> for TradeVisitor {
            type Value = TradeRecord;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a [price, volume, time, side, orderType, misc] array")
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let price: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let volume: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let time: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let side: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let order_type: String = seq.next_element()?.unwrap_or_default();
                let misc: String = seq.next_element()?.unwrap_or_default();
                while seq.next_element::<Value>()?.is_some() {}

                let parse = |s: &str, what: &str| {
                    s.parse::<Decimal>()
                        .map_err(|e| de::Error::custom(format!("bad {}: {}", what, e)))
                };

                Ok(TradeRecord {
                    price: parse(&price, "price")?,
                    volume: parse(&volume, "volume")?,
                    time: parse(&time, "time")?,
                    side: TradeSide::from_code(&side),
                    order_type,
                    misc,
                })
            }
        }

        deserializer.deserialize_seq(TradeVisitor)
    }
}

/// Fully decoded data event, ready for cache application and fan-out
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Ticker {
        pair: String,
        payload: TickerPayload,
    },
    Book {
        pair: String,
        depth: Option<u32>,
        message: BookMessage,
    },
    Trades {
        pair: String,
        trades: Vec<TradeRecord>,
    },
    /// OHLC candles pass through to subscribers; the core keeps no candle cache
    Ohlc {
        pair: String,
        interval: Option<u32>,
        payload: Value,
    },
}

impl MarketEvent {
    pub fn pair(&self) -> &str {
        match self {
            MarketEvent::Ticker { pair, .. }
            | MarketEvent::Book { pair, .. }
            | MarketEvent::Trades { pair, .. }
            | MarketEvent::Ohlc { pair, .. } => pair,
        }
    }

    pub fn channel(&self) -> Channel {
        match self {
            MarketEvent::Ticker { .. } => Channel::Ticker,
            MarketEvent::Book { .. } => Channel::Book,
            MarketEvent::Trades { .. } => Channel::Trade,
            MarketEvent::Ohlc { .. } => Channel::Ohlc,
        }
    }

    pub fn detail(&self) -> Option<u32> {
        match self {
            MarketEvent::Book { depth, .. } => *depth,
            MarketEvent::Ohlc { interval, .. } => *interval,
            _ => None,
        }
    }
}

/// Decode a routed data frame into a typed market event.
pub fn decode_data(frame: DataFrame) -> Result<MarketEvent, EventError> {
    let DataFrame {
        payload,
        channel,
        pair,
        ..
    } = frame;

    match channel.channel {
        Channel::Ticker => {
            let ticker: TickerPayload = serde_json::from_value(payload)?;
            Ok(MarketEvent::Ticker {
                pair,
                payload: ticker,
            })
        }
        Channel::Book => {
            let message = BookMessage::from_payload(payload)?;
            Ok(MarketEvent::Book {
                pair,
                depth: channel.detail,
                message,
            })
        }
        Channel::Trade => {
            let trades: Vec<TradeRecord> = serde_json::from_value(payload)?;
            Ok(MarketEvent::Trades { pair, trades })
        }
        Channel::Ohlc => Ok(MarketEvent::Ohlc {
            pair,
            interval: channel.detail,
            payload,
        }),
    }
}

/// Subscribe / unsubscribe frame:
/// `{"event":"subscribe","pair":[...],"subscription":{"name":...}}`
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeFrame {
    pub event: &'static str,
    pub pair: Vec<String>,
    pub subscription: SubscriptionPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionPayload {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u32>,
}

impl SubscribeFrame {
    pub fn subscribe(channel: Channel, pairs: Vec<String>, detail: Option<u32>) -> Self {
        Self::build("subscribe", channel, pairs, detail)
    }

    pub fn unsubscribe(channel: Channel, pairs: Vec<String>, detail: Option<u32>) -> Self {
        Self::build("unsubscribe", channel, pairs, detail)
    }

    fn build(event: &'static str, channel: Channel, pairs: Vec<String>, detail: Option<u32>) -> Self {
        let (depth, interval) = match channel {
            Channel::Book => (detail, None),
            Channel::Ohlc => (None, detail),
            _ => (None, None),
        };
        Self {
            event,
            pair: pairs,
            subscription: SubscriptionPayload {
                name: channel.name().to_string(),
                depth,
                interval,
            },
        }
    }
}

/// Decode a value that is either a scalar or a `[today, 24h]` array, taking
/// the first element.
fn scalar_or_first_decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    decimal_from_value(&value)
        .ok_or_else(|| de::Error::custom(format!("expected decimal or [today, 24h]: {}", value)))
}

fn scalar_or_first_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let inner = match &value {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    inner
        .and_then(|v| v.as_u64())
        .ok_or_else(|| de::Error::custom(format!("expected count or [today, 24h]: {}", value)))
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        Value::Array(items) => items.first().and_then(decimal_from_value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const TICKER_FRAME: &str = r#"[
        340,
        {"a":["50300.10000",1,"1.000"],"b":["50299.90000",2,"2.000"],
         "c":["50300.00000","0.005"],"v":["120.5","1500.2"],
         "p":["50250.1","50100.9"],"t":[4500,32000],
         "l":["49000.0","48500.0"],"h":["51000.0","51500.0"],
         "o":"49500.0"},
        "ticker",
        "XBT/USD"
    ]"#;

    #[test]
    fn test_parse_control_system_status() {
        let msg = parse_raw(r#"{"event":"systemStatus","status":"online","connectionID":12345}"#)
            .unwrap();
        match msg {
            RawMessage::Control(ControlMessage::SystemStatus { status, .. }) => {
                assert_eq!(status.as_deref(), Some("online"));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_parse_control_heartbeat() {
        let msg = parse_raw(r#"{"event":"heartbeat"}"#).unwrap();
        assert!(matches!(
            msg,
            RawMessage::Control(ControlMessage::Heartbeat)
        ));
    }

    #[test]
    fn test_parse_ticker_frame() {
        let msg = parse_raw(TICKER_FRAME).unwrap();
        let frame = match msg {
            RawMessage::Data(frame) => frame,
            other => panic!("unexpected message: {:?}", other),
        };
        assert_eq!(frame.channel_id, 340);
        assert_eq!(frame.channel.channel, Channel::Ticker);
        assert_eq!(frame.pair, "XBT/USD");

        let event = decode_data(frame).unwrap();
        match event {
            MarketEvent::Ticker { pair, payload } => {
                assert_eq!(pair, "XBT/USD");
                assert_eq!(payload.ask, dec!(50300.10000));
                assert_eq!(payload.bid, dec!(50299.90000));
                assert_eq!(payload.close, dec!(50300.00000));
                assert_eq!(payload.trade_count, 4500);
                // scalar form of "o"
                assert_eq!(payload.open, dec!(49500.0));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_ticker_missing_field_fails_whole_decode() {
        // no "b" field
        let frame = parse_raw(
            r#"[340,{"a":["1.0",1,"1"],"c":["1.0","1"],"v":["1","1"],"p":["1","1"],
                 "t":[1,1],"l":["1","1"],"h":["1","1"],"o":["1","1"]},"ticker","XBT/USD"]"#,
        )
        .unwrap();
        match frame {
            RawMessage::Data(frame) => assert!(decode_data(frame).is_err()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_channel_suffix_parsing() {
        let spec = ChannelSpec::parse("book-10").unwrap();
        assert_eq!(spec.channel, Channel::Book);
        assert_eq!(spec.detail, Some(10));

        let spec = ChannelSpec::parse("ohlc-5").unwrap();
        assert_eq!(spec.channel, Channel::Ohlc);
        assert_eq!(spec.detail, Some(5));

        let spec = ChannelSpec::parse("ticker").unwrap();
        assert_eq!(spec.channel, Channel::Ticker);
        assert_eq!(spec.detail, None);

        assert!(ChannelSpec::parse("spread-extra").is_err());
        assert!(ChannelSpec::parse("nonsense").is_err());
    }

    #[test]
    fn test_book_snapshot_decode() {
        let payload: Value = serde_json::from_str(
            r#"{"as":[["50301.0","1.5","1700000000.1"]],
                "bs":[["50299.0","2.0","1700000000.2"]]}"#,
        )
        .unwrap();
        let message = BookMessage::from_payload(payload).unwrap();
        match message {
            BookMessage::Snapshot { asks, bids } => {
                assert_eq!(asks.len(), 1);
                assert_eq!(asks[0].price_key, "50301.0");
                assert_eq!(asks[0].volume, dec!(1.5));
                assert_eq!(bids[0].price, dec!(50299.0));
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_book_update_decode_with_republish_flag() {
        let payload: Value =
            serde_json::from_str(r#"{"a":[["50301.0","0","1700000000.5","r"]]}"#).unwrap();
        let message = BookMessage::from_payload(payload).unwrap();
        match message {
            BookMessage::Update { asks, bids } => {
                assert_eq!(asks.len(), 1);
                assert_eq!(asks[0].volume, Decimal::ZERO);
                assert!(bids.is_empty());
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_book_rejects_empty_and_mixed_payloads() {
        let empty: Value = serde_json::from_str(r#"{"c":"12345"}"#).unwrap();
        assert!(BookMessage::from_payload(empty).is_err());

        let mixed: Value = serde_json::from_str(
            r#"{"as":[["1.0","1.0","1.0"]],"a":[["1.0","1.0","1.0"]]}"#,
        )
        .unwrap();
        assert!(BookMessage::from_payload(mixed).is_err());
    }

    #[test]
    fn test_trade_decode_side_codes() {
        let frame = parse_raw(
            r#"[337,[["50300.1","0.005","1700000000.123","s","l",""],
                     ["50300.2","0.010","1700000000.456","b","m",""]],"trade","XBT/USD"]"#,
        )
        .unwrap();
        let event = match frame {
            RawMessage::Data(frame) => decode_data(frame).unwrap(),
            other => panic!("unexpected message: {:?}", other),
        };
        match event {
            MarketEvent::Trades { trades, .. } => {
                assert_eq!(trades.len(), 2);
                assert_eq!(trades[0].side, TradeSide::Sell);
                assert_eq!(trades[0].order_type, "l");
                assert_eq!(trades[1].side, TradeSide::Buy);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frame = SubscribeFrame::subscribe(
            Channel::Book,
            vec!["XBT/USD".to_string(), "ETH/USD".to_string()],
            Some(25),
        );
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "subscribe");
        assert_eq!(json["pair"][1], "ETH/USD");
        assert_eq!(json["subscription"]["name"], "book");
        assert_eq!(json["subscription"]["depth"], 25);
        assert!(json["subscription"].get("interval").is_none());

        let frame = SubscribeFrame::unsubscribe(Channel::Ticker, vec!["XBT/USD".into()], None);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "unsubscribe");
        assert!(json["subscription"].get("depth").is_none());
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!(parse_raw(r#""just a string""#).is_err());
        assert!(parse_raw(r#"[1,2]"#).is_err());
        assert!(parse_raw(r#"{"no_event_key":true}"#).is_err());
    }
}
