use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::Result;

use super::PriceSource;

const TICKER_TOPIC_PREFIX: &str = "tickers.";

pub fn ticker_topic(symbol: &str) -> String {
    format!("{}{}", TICKER_TOPIC_PREFIX, symbol)
}

pub fn symbol_from_topic(topic: &str) -> Option<&str> {
    topic
        .strip_prefix(TICKER_TOPIC_PREFIX)
        .filter(|symbol| !symbol.is_empty())
}

/// `{"op":<op>,"args":["tickers.<SYM>",...]}` frames, at most
/// `max_args` topics each.
pub fn op_frames(op: &str, symbols: &[String], max_args: usize) -> Vec<String> {
    symbols
        .chunks(max_args.max(1))
        .map(|chunk| {
            let args: Vec<String> = chunk.iter().map(|symbol| ticker_topic(symbol)).collect();
            json!({ "op": op, "args": args }).to_string()
        })
        .collect()
}

pub fn subscribe_frames(symbols: &[String], max_args: usize) -> Vec<String> {
    op_frames("subscribe", symbols, max_args)
}

pub fn unsubscribe_frames(symbols: &[String], max_args: usize) -> Vec<String> {
    op_frames("unsubscribe", symbols, max_args)
}

pub fn pong_frame() -> String {
    json!({ "op": "pong" }).to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Application-level heartbeat; must be answered with a pong.
    Ping,
    Ticker { symbol: String, data: TickerData },
    /// Reply to one of our own requests.
    Ack {
        op: String,
        success: bool,
        message: String,
    },
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TickerData {
    #[serde(rename = "indexPrice", default)]
    pub index_price: Option<String>,
    #[serde(rename = "lastPrice", default)]
    pub last_price: Option<String>,
}

impl TickerData {
    /// Index price when present and parsable, otherwise last price.
    pub fn price(&self) -> Option<(Decimal, PriceSource)> {
        let parse = |raw: &Option<String>| {
            raw.as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .and_then(|value| Decimal::from_str(value).ok())
        };

        parse(&self.index_price)
            .map(|price| (price, PriceSource::Index))
            .or_else(|| parse(&self.last_price).map(|price| (price, PriceSource::Last)))
    }
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    ret_msg: Option<String>,
}

pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let raw: RawFrame = serde_json::from_str(text)?;

    // Acks echo the request op (a reply to our own ping carries `op: "ping"`),
    // so `success` has to be checked before treating the frame as a heartbeat.
    if let Some(success) = raw.success {
        return Ok(Inbound::Ack {
            op: raw.op.unwrap_or_default(),
            success,
            message: raw.ret_msg.unwrap_or_default(),
        });
    }

    if raw.op.as_deref() == Some("ping") {
        return Ok(Inbound::Ping);
    }

    let Some(symbol) = raw.topic.as_deref().and_then(symbol_from_topic) else {
        return Ok(Inbound::Other);
    };

    let data = match raw.data {
        Some(value @ Value::Object(_)) => serde_json::from_value(value)?,
        _ => TickerData::default(),
    };

    Ok(Inbound::Ticker {
        symbol: symbol.to_string(),
        data,
    })
}
