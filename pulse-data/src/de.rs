use crate::error::DataError;
use serde::Deserialize;
use serde_json::Value;

/// Deserialize a decimal string, or a plain JSON number, as an `f64`.
pub fn de_str_or_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StrOrF64 {
        Str(String),
        F64(f64),
    }

    match StrOrF64::deserialize(deserializer)? {
        StrOrF64::F64(value) => Ok(value),
        StrOrF64::Str(value) => value.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Interpret an optional price field.
///
/// Absent, `null` and empty-string fields are `None`. Anything present must be a finite
/// number, or a string holding one.
pub fn parse_opt_price(field: Option<&Value>) -> Result<Option<f64>, DataError> {
    let value = match field {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map_err(|error| DataError::Malformed(format!("price {text:?}: {error}")))?,
        Some(Value::Number(number)) => number
            .as_f64()
            .ok_or_else(|| DataError::Malformed(format!("price {number}")))?,
        Some(other) => return Err(DataError::Malformed(format!("price {other}"))),
    };

    if value.is_finite() {
        Ok(Some(value))
    } else {
        Err(DataError::Malformed(format!("non-finite price {value}")))
    }
}
