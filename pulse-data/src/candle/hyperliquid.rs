use super::{Candle, CandleRequest, HistoricalSource};
use crate::{Symbol, error::DataError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// Default Hyperliquid `info` endpoint.
pub const HYPERLIQUID_INFO_URL: &str = "https://api.hyperliquid.xyz/info";

/// [`HistoricalSource`] backed by the Hyperliquid `info` endpoint.
///
/// Every request carries its own timeout so a single slow symbol cannot stall a refresh batch.
#[derive(Debug, Clone)]
pub struct HyperliquidClient {
    http: reqwest::Client,
    info_url: String,
    timeout: Duration,
}

impl HyperliquidClient {
    pub fn new(info_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            info_url: info_url.into(),
            timeout,
        }
    }

    async fn post_info(&self, body: Value) -> Result<Value, DataError> {
        let response = self
            .http
            .post(&self.info_url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|error| {
                if error.is_timeout() {
                    DataError::Timeout(self.timeout)
                } else {
                    DataError::from(error)
                }
            })?;

        if let Some(error) = classify_status(response.status()) {
            return Err(error);
        }

        Ok(response.json::<Value>().await?)
    }
}

impl Default for HyperliquidClient {
    fn default() -> Self {
        Self::new(HYPERLIQUID_INFO_URL, Duration::from_secs(10))
    }
}

#[async_trait]
impl HistoricalSource for HyperliquidClient {
    async fn fetch_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>, DataError> {
        let body = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": request.symbol,
                "interval": request.interval,
                "startTime": request.start_time,
                "endTime": request.end_time,
            }
        });

        let candles = parse_candles(self.post_info(body).await?);
        debug!(
            symbol = %request.symbol,
            interval = %request.interval,
            candles = candles.len(),
            "fetched candleSnapshot"
        );
        Ok(candles)
    }

    async fn discover_symbols(&self) -> Result<Vec<Symbol>, DataError> {
        parse_universe(self.post_info(json!({ "type": "meta" })).await?)
    }
}

/// Map an upstream status to a [`DataError`], `None` on success.
fn classify_status(status: StatusCode) -> Option<DataError> {
    match status {
        status if status.is_success() => None,
        StatusCode::TOO_MANY_REQUESTS => Some(DataError::RateLimited(status.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Some(DataError::Permission(status.to_string()))
        }
        status => Some(DataError::Transport(format!("HTTP error: {status}"))),
    }
}

#[derive(Deserialize)]
struct HyperliquidCandle {
    t: i64,
    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    c: f64,
}

/// Parse a `candleSnapshot` response. Non-array bodies yield no candles and entries that do
/// not carry an open time and close are skipped.
fn parse_candles(body: Value) -> Vec<Candle> {
    let Value::Array(entries) = body else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<HyperliquidCandle>(entry).ok())
        .map(|candle| Candle::new(candle.t, candle.c))
        .collect()
}

#[derive(Deserialize)]
struct Meta {
    universe: Vec<UniverseAsset>,
}

#[derive(Deserialize)]
struct UniverseAsset {
    name: Symbol,
}

fn parse_universe(body: Value) -> Result<Vec<Symbol>, DataError> {
    let meta = serde_json::from_value::<Meta>(body)?;
    Ok(meta.universe.into_iter().map(|asset| asset.name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candles() {
        struct TestCase {
            input: Value,
            expected: Vec<Candle>,
        }

        let tests = vec![
            TestCase {
                // TC0: string encoded closes
                input: json!([
                    {"t": 1_000, "T": 1_999, "o": "1.0", "c": "101.5", "h": "102", "l": "99", "v": "10", "n": 4},
                    {"t": 2_000, "c": "102.25"}
                ]),
                expected: vec![Candle::new(1_000, 101.5), Candle::new(2_000, 102.25)],
            },
            TestCase {
                // TC1: numeric closes
                input: json!([{"t": 5, "c": 7.5}]),
                expected: vec![Candle::new(5, 7.5)],
            },
            TestCase {
                // TC2: entries missing fields or with unparsable closes are skipped
                input: json!([{"t": 1, "c": "abc"}, {"c": "3"}, {"t": 3, "c": "4"}]),
                expected: vec![Candle::new(3, 4.0)],
            },
            TestCase {
                // TC3: non-array body yields nothing
                input: json!({"error": "unknown coin"}),
                expected: vec![],
            },
            TestCase {
                // TC4: null body yields nothing
                input: Value::Null,
                expected: vec![],
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(parse_candles(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_universe() {
        let body = json!({
            "universe": [
                {"name": "BTC", "szDecimals": 5, "maxLeverage": 40},
                {"name": "ETH", "szDecimals": 4, "maxLeverage": 25}
            ],
            "marginTables": []
        });
        assert_eq!(
            parse_universe(body).unwrap(),
            vec![Symbol::new("BTC"), Symbol::new("ETH")]
        );

        assert!(matches!(
            parse_universe(json!({"universe": "nope"})),
            Err(DataError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        struct TestCase {
            input: StatusCode,
            expected: Option<DataError>,
        }

        let tests = vec![
            TestCase {
                // TC0: success
                input: StatusCode::OK,
                expected: None,
            },
            TestCase {
                // TC1: rate limited surfaced verbatim
                input: StatusCode::TOO_MANY_REQUESTS,
                expected: Some(DataError::RateLimited("429 Too Many Requests".to_string())),
            },
            TestCase {
                // TC2: unauthorized
                input: StatusCode::UNAUTHORIZED,
                expected: Some(DataError::Permission("401 Unauthorized".to_string())),
            },
            TestCase {
                // TC3: forbidden
                input: StatusCode::FORBIDDEN,
                expected: Some(DataError::Permission("403 Forbidden".to_string())),
            },
            TestCase {
                // TC4: other failures are transport errors
                input: StatusCode::BAD_GATEWAY,
                expected: Some(DataError::Transport("HTTP error: 502 Bad Gateway".to_string())),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(classify_status(test.input), test.expected, "TC{} failed", index);
        }
    }
}
