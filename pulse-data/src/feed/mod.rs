use crate::{Symbol, error::DataError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Reconnecting feed client, its events and subscription commands.
pub mod client;

/// Idle read timeout wrapper for the feed stream.
pub mod timeout;

/// Text frame answering a feed `ping`.
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// Feed channel a client can subscribe to.
#[derive(Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Subscription {
    /// Mark, oracle, mid and impact prices of one coin.
    #[serde(rename = "activeAssetCtx")]
    ActiveAssetCtx { coin: Symbol },
    /// Every fill across all coins.
    #[serde(rename = "allFills")]
    AllFills,
}

impl Subscription {
    pub fn asset_ctx(coin: impl Into<Symbol>) -> Self {
        Self::ActiveAssetCtx { coin: coin.into() }
    }

    /// Text frame requesting this subscription.
    pub fn to_frame(&self) -> Result<String, DataError> {
        #[derive(Serialize)]
        struct SubscribeFrame<'a> {
            method: &'static str,
            subscription: &'a Subscription,
        }

        serde_json::to_string(&SubscribeFrame {
            method: "subscribe",
            subscription: self,
        })
        .map_err(DataError::from)
    }
}

/// Raw price fields of an `activeAssetCtx` update.
///
/// Values are kept undecoded until ingestion so a single malformed field can reject the whole
/// tick.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCtxFields {
    #[serde(default)]
    pub mark_px: Option<Value>,
    #[serde(default)]
    pub oracle_px: Option<Value>,
    #[serde(default)]
    pub mid_px: Option<Value>,
    #[serde(default)]
    pub impact_pxs: Option<Value>,
}

/// `activeAssetCtx` update for one coin.
#[derive(Clone, PartialEq, Debug)]
pub struct AssetCtxUpdate {
    pub coin: Symbol,
    pub ctx: AssetCtxFields,
}

/// Single fill as delivered by the `allFills` channel.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFill {
    pub coin: Symbol,
    #[serde(default)]
    pub side: String,
    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    pub px: f64,
    #[serde(deserialize_with = "crate::de::de_str_or_f64")]
    pub sz: f64,
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub closed_pnl: Option<Value>,
    #[serde(default)]
    pub hash: String,
}

/// Decoded inbound feed message.
#[derive(Clone, PartialEq, Debug)]
pub enum FeedMessage {
    /// Application level keep-alive, answered with [`PONG_FRAME`].
    Ping,
    AssetCtx(AssetCtxUpdate),
    /// Batch of `(address, fill)` pairs. Undecodable fills are skipped.
    AllFills(Vec<(String, RawFill)>),
    /// Subscription acknowledgements and any other channel.
    Ignore,
}

impl FeedMessage {
    /// Decode a text frame. Only frames that are not JSON, or that claim a known channel but
    /// lack its required fields, are errors.
    pub fn parse(text: &str) -> Result<Self, DataError> {
        #[derive(Deserialize)]
        struct Envelope {
            #[serde(default, rename = "type")]
            kind: Option<String>,
            #[serde(default)]
            channel: Option<String>,
            #[serde(default)]
            data: Value,
            #[serde(default)]
            fills: Value,
        }

        let envelope = serde_json::from_str::<Envelope>(text)?;

        if envelope.kind.as_deref() == Some("ping") {
            return Ok(FeedMessage::Ping);
        }

        if envelope.channel.as_deref() == Some("activeAssetCtx") {
            return parse_asset_ctx(envelope.data).map(FeedMessage::AssetCtx);
        }

        if envelope.kind.as_deref() == Some("allFills") {
            return Ok(FeedMessage::AllFills(parse_fills(envelope.fills)));
        }

        Ok(FeedMessage::Ignore)
    }
}

fn parse_asset_ctx(mut data: Value) -> Result<AssetCtxUpdate, DataError> {
    let coin = data
        .get("coin")
        .and_then(Value::as_str)
        .filter(|coin| !coin.is_empty())
        .map(Symbol::new)
        .ok_or_else(|| DataError::Malformed("activeAssetCtx without coin".to_string()))?;

    // Some deployments flatten the context into `data` itself.
    let ctx = match data.get_mut("ctx").map(Value::take) {
        Some(ctx @ Value::Object(_)) => ctx,
        _ => data,
    };

    Ok(AssetCtxUpdate {
        coin,
        ctx: serde_json::from_value(ctx)?,
    })
}

fn parse_fills(fills: Value) -> Vec<(String, RawFill)> {
    let Value::Array(entries) = fills else {
        return Vec::new();
    };

    entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<(String, RawFill)>(entry) {
            Ok(fill) => Some(fill),
            Err(error) => {
                debug!(%error, "skipping undecodable fill");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subscription_frames() {
        struct TestCase {
            input: Subscription,
            expected: Value,
        }

        let tests = vec![
            TestCase {
                // TC0: asset context
                input: Subscription::asset_ctx("BTC"),
                expected: json!({"method": "subscribe", "subscription": {"type": "activeAssetCtx", "coin": "BTC"}}),
            },
            TestCase {
                // TC1: all fills
                input: Subscription::AllFills,
                expected: json!({"method": "subscribe", "subscription": {"type": "allFills"}}),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let frame = test.input.to_frame().unwrap();
            let actual = serde_json::from_str::<Value>(&frame).unwrap();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_ping_and_ignored() {
        assert_eq!(FeedMessage::parse(r#"{"type":"ping"}"#).unwrap(), FeedMessage::Ping);
        assert_eq!(
            FeedMessage::parse(r#"{"channel":"subscriptionResponse","data":{"method":"subscribe"}}"#).unwrap(),
            FeedMessage::Ignore
        );
        assert!(matches!(
            FeedMessage::parse("not json"),
            Err(DataError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_asset_ctx() {
        struct TestCase {
            input: Value,
            expected: Result<AssetCtxUpdate, ()>,
        }

        let tests = vec![
            TestCase {
                // TC0: nested ctx
                input: json!({
                    "channel": "activeAssetCtx",
                    "data": {"coin": "BTC", "ctx": {"markPx": "100.5", "oraclePx": "100.4", "midPx": "100.45", "impactPxs": ["100.4", "100.6"], "funding": "0.0001"}}
                }),
                expected: Ok(AssetCtxUpdate {
                    coin: Symbol::new("BTC"),
                    ctx: AssetCtxFields {
                        mark_px: Some(json!("100.5")),
                        oracle_px: Some(json!("100.4")),
                        mid_px: Some(json!("100.45")),
                        impact_pxs: Some(json!(["100.4", "100.6"])),
                    },
                }),
            },
            TestCase {
                // TC1: flattened ctx
                input: json!({"channel": "activeAssetCtx", "data": {"coin": "ETH", "markPx": "2000"}}),
                expected: Ok(AssetCtxUpdate {
                    coin: Symbol::new("ETH"),
                    ctx: AssetCtxFields {
                        mark_px: Some(json!("2000")),
                        ..Default::default()
                    },
                }),
            },
            TestCase {
                // TC2: missing coin
                input: json!({"channel": "activeAssetCtx", "data": {"ctx": {"markPx": "1"}}}),
                expected: Err(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = match FeedMessage::parse(&test.input.to_string()) {
                Ok(FeedMessage::AssetCtx(update)) => Ok(update),
                _ => Err(()),
            };
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_parse_all_fills_skips_bad_entries() {
        let input = json!({
            "type": "allFills",
            "fills": [
                ["0x1234567890abcdef", {"coin": "SOL", "side": "B", "px": "150.5", "sz": "2", "dir": "Open Long", "closedPnl": "0.0", "hash": "0xabc"}],
                ["0xdeadbeef", {"coin": "SOL", "px": "oops", "sz": "1"}],
                "garbage"
            ]
        });

        let FeedMessage::AllFills(fills) = FeedMessage::parse(&input.to_string()).unwrap() else {
            panic!("expected AllFills");
        };

        assert_eq!(fills.len(), 1);
        let (address, fill) = &fills[0];
        assert_eq!(address, "0x1234567890abcdef");
        assert_eq!(fill.coin, "SOL");
        assert_eq!(fill.px, 150.5);
        assert_eq!(fill.sz, 2.0);
        assert_eq!(fill.dir, "Open Long");
    }

    #[test]
    fn test_parse_all_fills_non_array() {
        let input = r#"{"type":"allFills","fills":null}"#;
        assert_eq!(FeedMessage::parse(input).unwrap(), FeedMessage::AllFills(vec![]));
    }
}
