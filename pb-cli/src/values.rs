//! JSON arguments to message values

use anyhow::{anyhow, bail, Context, Result};
use pb_protocol::Value;

/// Parse one JSON command line argument
///
/// Booleans, numbers, strings and arrays of bytes are accepted. Integers
/// must fit in 32 bits. Other numbers become single precision floats.
pub fn parse_value(arg: &str) -> Result<Value> {
    let json: serde_json::Value =
        serde_json::from_str(arg).with_context(|| format!("invalid JSON value: {}", arg))?;
    from_json(&json)
}

pub fn parse_values(args: &[String]) -> Result<Vec<Value>> {
    args.iter().map(|arg| parse_value(arg)).collect()
}

fn from_json(json: &serde_json::Value) -> Result<Value> {
    match json {
        serde_json::Value::Bool(v) => Ok(Value::Bool(*v)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i32::try_from(i)
                    .map(Value::Int)
                    .map_err(|_| anyhow!("integer {} does not fit in 32 bits", i))
            } else if n.is_u64() {
                bail!("integer {} does not fit in 32 bits", n)
            } else {
                let f = n.as_f64().ok_or_else(|| anyhow!("unsupported number {}", n))?;
                Ok(Value::from(f))
            }
        }
        serde_json::Value::String(s) => Ok(Value::Str(s.clone())),
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| anyhow!("byte arrays may only hold 0 to 255, got {}", item))
            })
            .collect::<Result<Vec<u8>>>()
            .map(Value::Bytes),
        other => bail!("cannot broadcast {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(parse_value("true").unwrap(), Value::Bool(true));
        assert_eq!(parse_value("-7").unwrap(), Value::Int(-7));
        assert_eq!(parse_value("2.5").unwrap(), Value::Float(2.5));
        assert_eq!(parse_value("\"hi\"").unwrap(), Value::from("hi"));
    }

    #[test]
    fn test_bytes() {
        assert_eq!(
            parse_value("[0, 196, 255]").unwrap(),
            Value::Bytes(vec![0x00, 0xC4, 0xFF])
        );
        assert!(parse_value("[256]").is_err());
        assert!(parse_value("[\"a\"]").is_err());
    }

    #[test]
    fn test_integer_range() {
        assert_eq!(
            parse_value("2147483647").unwrap(),
            Value::Int(i32::MAX)
        );
        assert!(parse_value("2147483648").is_err());
        assert!(parse_value("18446744073709551615").is_err());
    }

    #[test]
    fn test_rejects_unsupported() {
        assert!(parse_value("null").is_err());
        assert!(parse_value("{\"a\": 1}").is_err());
        assert!(parse_value("not json").is_err());
    }

    #[test]
    fn test_parse_values() {
        let args = vec!["42".to_string(), "24".to_string()];
        assert_eq!(
            parse_values(&args).unwrap(),
            vec![Value::Int(42), Value::Int(24)]
        );
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn test_any_i32_parses_exactly(v in any::<i32>()) {
                prop_assert_eq!(parse_value(&v.to_string()).unwrap(), Value::Int(v));
            }

            #[test]
            fn test_any_string_parses(s in ".{0,20}") {
                let arg = serde_json::to_string(&s).unwrap();
                prop_assert_eq!(parse_value(&arg).unwrap(), Value::Str(s));
            }
        }
    }
}
