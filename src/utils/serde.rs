/*!
 * Serde utilities for lenient decoding of caller-supplied payloads.
 *
 * Task definitions arrive as loosely-typed JSON. A field holding the wrong JSON
 * type is treated as absent so that the validator, not the parser, decides
 * whether the definition is usable.
 */

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Deserialize an optional unsigned integer, mapping anything that is not a
/// non-negative JSON integer to `None`.
///
/// ```rust
/// use serde::Deserialize;
/// use task_watcher::utils::serde::deserialize_lenient_unsigned;
///
/// #[derive(Deserialize)]
/// struct Retry {
///     #[serde(default, deserialize_with = "deserialize_lenient_unsigned")]
///     limit: Option<u32>,
/// }
///
/// let retry: Retry = serde_json::from_str(r#"{"limit": "3"}"#).unwrap();
/// assert_eq!(retry.limit, None);
/// ```
pub fn deserialize_lenient_unsigned<'de, D, T>(
    deserializer: D,
) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().and_then(|v| T::try_from(v).ok()),
        _ => None,
    })
}

/// Deserialize an optional unsigned integer given either as a JSON integer or as a
/// string holding one, as broker settings often are. Anything else maps to `None`.
pub fn deserialize_unsigned_or_numeric_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Deserialize an optional JSON number of any sign or precision, mapping
/// non-numbers to `None`.
pub fn deserialize_lenient_number<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        _ => None,
    })
}

/// Deserialize an optional string, mapping non-strings and blank strings to `None`
pub fn deserialize_lenient_string<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Value> = Option::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, Debug, PartialEq)]
    struct TestStruct {
        #[serde(default, deserialize_with = "deserialize_lenient_unsigned")]
        value: Option<u32>,
        #[serde(default, deserialize_with = "deserialize_lenient_string")]
        label: Option<String>,
        #[serde(default, deserialize_with = "deserialize_lenient_number")]
        ratio: Option<f64>,
        #[serde(default, deserialize_with = "deserialize_unsigned_or_numeric_string")]
        setting: Option<u64>,
    }

    #[test]
    fn test_lenient_unsigned_integer() {
        let result: TestStruct = serde_json::from_str(r#"{"value": 42}"#).unwrap();
        assert_eq!(result.value, Some(42));
    }

    #[test]
    fn test_lenient_unsigned_rejects_other_shapes() {
        for raw in [
            r#"{"value": "42"}"#,
            r#"{"value": -1}"#,
            r#"{"value": 4.5}"#,
            r#"{"value": null}"#,
            r#"{"value": 5000000000}"#,
            r#"{}"#,
        ] {
            let result: TestStruct = serde_json::from_str(raw).unwrap();
            assert_eq!(result.value, None, "input {raw}");
        }
    }

    #[test]
    fn test_lenient_number_accepts_any_number() {
        for (raw, expected) in [
            (r#"{"ratio": 1.5}"#, Some(1.5)),
            (r#"{"ratio": -2}"#, Some(-2.0)),
            (r#"{"ratio": 30}"#, Some(30.0)),
            (r#"{"ratio": "1.5"}"#, None),
            (r#"{"ratio": null}"#, None),
        ] {
            let result: TestStruct = serde_json::from_str(raw).unwrap();
            assert_eq!(result.ratio, expected, "input {raw}");
        }
    }

    #[test]
    fn test_numeric_string_setting() {
        for (raw, expected) in [
            (r#"{"setting": 604800000}"#, Some(604_800_000)),
            (r#"{"setting": "604800000"}"#, Some(604_800_000)),
            (r#"{"setting": " 42 "}"#, Some(42)),
            (r#"{"setting": "a week"}"#, None),
            (r#"{"setting": -1}"#, None),
            (r#"{"setting": true}"#, None),
        ] {
            let result: TestStruct = serde_json::from_str(raw).unwrap();
            assert_eq!(result.setting, expected, "input {raw}");
        }
    }

    #[test]
    fn test_lenient_string() {
        let result: TestStruct = serde_json::from_str(r#"{"label": "recovery"}"#).unwrap();
        assert_eq!(result.label.as_deref(), Some("recovery"));

        let blank: TestStruct = serde_json::from_str(r#"{"label": "  "}"#).unwrap();
        assert_eq!(blank.label, None);

        let number: TestStruct = serde_json::from_str(r#"{"label": 7}"#).unwrap();
        assert_eq!(number.label, None);
    }
}
