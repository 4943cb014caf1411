// Raw YAML values -> column-ready values

use crate::schema::ScalarKind;
use crate::value::{parse_datetime, Value};

/// Convert a raw value for a primitive field. Errors are a short reason;
/// the caller attaches model, field and record identity.
pub fn convert_scalar(kind: ScalarKind, value: &serde_yaml::Value) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    match kind {
        ScalarKind::String | ScalarKind::Text | ScalarKind::Content => match value {
            serde_yaml::Value::String(s) => Ok(Value::String(s.clone())),
            serde_yaml::Value::Number(n) => Ok(Value::String(n.to_string())),
            serde_yaml::Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(format!("expected string, got {}", type_name(other))),
        },
        ScalarKind::Integer => match value {
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map(Value::Integer)
                .ok_or_else(|| format!("expected integer, got {n}")),
            serde_yaml::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Integer)
                .map_err(|_| format!("expected integer, got '{s}'")),
            other => Err(format!("expected integer, got {}", type_name(other))),
        },
        ScalarKind::Boolean => match value {
            serde_yaml::Value::Bool(b) => Ok(Value::Boolean(*b)),
            serde_yaml::Value::Number(n) => match n.as_i64() {
                Some(0) => Ok(Value::Boolean(false)),
                Some(1) => Ok(Value::Boolean(true)),
                _ => Err(format!("expected boolean, got {n}")),
            },
            serde_yaml::Value::String(s) => parse_bool(s)
                .map(Value::Boolean)
                .ok_or_else(|| format!("expected boolean, got '{s}'")),
            other => Err(format!("expected boolean, got {}", type_name(other))),
        },
        ScalarKind::DateTime => match value {
            serde_yaml::Value::String(s) => parse_datetime(s)
                .map(Value::DateTime)
                .ok_or_else(|| format!("expected date/time, got '{s}'")),
            other => Err(format!("expected date/time string, got {}", type_name(other))),
        },
    }
}

/// A primary key or a reference to one. Numbers are accepted and
/// stringified, since YAML reads `pk: 2018` as an integer.
pub fn convert_key(value: &serde_yaml::Value) -> Result<String, String> {
    match value {
        serde_yaml::Value::String(s) if !s.is_empty() => Ok(s.clone()),
        serde_yaml::Value::String(_) => Err("primary keys cannot be empty".to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(format!(
            "expected a primary key string, got {}",
            type_name(other)
        )),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

pub fn type_name(value: &serde_yaml::Value) -> &'static str {
    match value {
        serde_yaml::Value::Null => "null",
        serde_yaml::Value::Bool(_) => "boolean",
        serde_yaml::Value::Number(_) => "number",
        serde_yaml::Value::String(_) => "string",
        serde_yaml::Value::Sequence(_) => "list",
        serde_yaml::Value::Mapping(_) => "object",
        serde_yaml::Value::Tagged(_) => "tagged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(
            convert_scalar(ScalarKind::String, &yaml("Hello")),
            Ok(Value::from("Hello"))
        );
        // YAML reads a bare year as a number
        assert_eq!(
            convert_scalar(ScalarKind::Text, &yaml("2018")),
            Ok(Value::from("2018"))
        );
        assert!(convert_scalar(ScalarKind::String, &yaml("[a, b]")).is_err());
    }

    #[test]
    fn test_integer_conversion() {
        assert_eq!(
            convert_scalar(ScalarKind::Integer, &yaml("42")),
            Ok(Value::Integer(42))
        );
        assert_eq!(
            convert_scalar(ScalarKind::Integer, &yaml("'-7'")),
            Ok(Value::Integer(-7))
        );
        let err = convert_scalar(ScalarKind::Integer, &yaml("4.5")).unwrap_err();
        assert!(err.contains("4.5"));
        assert!(convert_scalar(ScalarKind::Integer, &yaml("true")).is_err());
    }

    #[test]
    fn test_boolean_conversion() {
        assert_eq!(
            convert_scalar(ScalarKind::Boolean, &yaml("true")),
            Ok(Value::Boolean(true))
        );
        assert_eq!(
            convert_scalar(ScalarKind::Boolean, &yaml("'No'")),
            Ok(Value::Boolean(false))
        );
        assert_eq!(
            convert_scalar(ScalarKind::Boolean, &yaml("1")),
            Ok(Value::Boolean(true))
        );
        assert!(convert_scalar(ScalarKind::Boolean, &yaml("maybe")).is_err());
    }

    #[test]
    fn test_datetime_conversion() {
        let value = convert_scalar(ScalarKind::DateTime, &yaml("2018-01-02")).unwrap();
        assert_eq!(value.to_string(), "2018-01-02T00:00:00");
        assert!(convert_scalar(ScalarKind::DateTime, &yaml("20180102")).is_err());
        assert!(convert_scalar(ScalarKind::DateTime, &yaml("not a date")).is_err());
    }

    #[test]
    fn test_null_passes_through() {
        for kind in ScalarKind::ALL {
            assert_eq!(convert_scalar(kind, &serde_yaml::Value::Null), Ok(Value::Null));
        }
    }

    #[test]
    fn test_convert_key() {
        assert_eq!(convert_key(&yaml("alice")), Ok("alice".to_string()));
        assert_eq!(convert_key(&yaml("2018")), Ok("2018".to_string()));
        assert!(convert_key(&yaml("''")).is_err());
        assert!(convert_key(&yaml("[a]")).is_err());
    }
}
