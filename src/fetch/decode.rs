use std::str::FromStr;

use log::{debug, warn};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::error::Context;

use super::{Candle, FetchResult};

/// Envelope of the kline endpoint.
#[derive(Debug, Deserialize)]
pub struct KlineResponse {
    #[serde(rename = "retCode")]
    pub ret_code: i64,
    #[serde(rename = "retMsg", default)]
    pub ret_msg: String,
    #[serde(default)]
    pub result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
pub struct KlineResult {
    #[serde(default)]
    pub list: Option<Vec<Value>>,
}

/// Decode a kline body. `Ok(None)` means the upstream had nothing for us:
/// a non-zero `retCode`, or no candles at all.
pub fn parse_kline_body(body: &str, symbol: &str) -> FetchResult<Option<Vec<Candle>>> {
    let response: KlineResponse = serde_json::from_str(body)
        .with_context(|| format!("Failed to parse kline JSON for {}", symbol))?;

    if response.ret_code != 0 {
        warn!(
            "Kline request for {} rejected upstream: retCode={} retMsg={}",
            symbol, response.ret_code, response.ret_msg
        );
        return Ok(None);
    }

    let rows = match response.result.and_then(|result| result.list) {
        Some(rows) if !rows.is_empty() => rows,
        _ => {
            debug!("Kline response for {} carried no candles", symbol);
            return Ok(None);
        }
    };

    let candles = decode_candles(&rows);
    if candles.is_empty() {
        return Ok(None);
    }
    Ok(Some(candles))
}

/// Decode rows into candles, ascending by start time. Rows that are not
/// arrays are skipped.
pub fn decode_candles(rows: &[Value]) -> Vec<Candle> {
    let mut candles: Vec<Candle> = rows.iter().filter_map(decode_candle).collect();
    candles.sort_by_key(|candle| candle.start_time);
    candles
}

/// `[startTime, open, high, low, close, ...]`, all strings. A field that is
/// missing or does not parse is left at zero; the rest of the row survives.
pub fn decode_candle(row: &Value) -> Option<Candle> {
    let Some(fields) = row.as_array() else {
        debug!("Skipping non-array kline row: {}", row);
        return None;
    };

    let field = |idx: usize| fields.get(idx).map(value_to_string).unwrap_or_default();

    Some(Candle {
        start_time: parse_millis(&field(0)),
        open: parse_decimal(&field(1)),
        high: parse_decimal(&field(2)),
        low: parse_decimal(&field(3)),
        close: parse_decimal(&field(4)),
    })
}

pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_millis(raw: &str) -> i64 {
    raw.trim().parse::<i64>().unwrap_or_else(|_| {
        debug!("Unparsable kline start time `{}`, defaulting to 0", raw);
        0
    })
}

fn parse_decimal(raw: &str) -> Decimal {
    let trimmed = raw.trim();
    Decimal::from_str(trimmed)
        .or_else(|_| Decimal::from_scientific(trimmed))
        .unwrap_or_else(|_| {
            debug!("Unparsable kline price `{}`, defaulting to 0", raw);
            Decimal::ZERO
        })
}
