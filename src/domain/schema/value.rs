//! Typed configuration values and free-text coercion.

use serde::Serialize;
use std::fmt;

/// Semantic type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    String,
    Integer,
    Float,
    Boolean,
}

impl SemanticType {
    /// Postgres column type used when the users table is created or extended.
    pub fn sql_type(self) -> &'static str {
        match self {
            SemanticType::String => "TEXT",
            SemanticType::Integer => "INTEGER",
            SemanticType::Float => "DOUBLE PRECISION",
            SemanticType::Boolean => "BIT(1)",
        }
    }

    /// Whether a catalog type name (as reported by `information_schema.columns.data_type`)
    /// can hold values of this semantic type.
    pub fn accepts_declared(self, declared: &str) -> bool {
        let declared = declared.trim().to_lowercase();
        match self {
            SemanticType::String => matches!(
                declared.as_str(),
                "text" | "tinytext" | "character varying" | "varchar" | "character"
            ),
            SemanticType::Integer => matches!(
                declared.as_str(),
                "integer" | "int" | "int4" | "smallint" | "bigint" | "int8"
            ),
            SemanticType::Float => matches!(
                declared.as_str(),
                "double precision" | "real" | "float4" | "float8" | "numeric"
            ),
            SemanticType::Boolean => declared == "bit" || declared.starts_with("bit("),
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SemanticType::String => write!(f, "string"),
            SemanticType::Integer => write!(f, "integer"),
            SemanticType::Float => write!(f, "float"),
            SemanticType::Boolean => write!(f, "boolean"),
        }
    }
}

/// A configuration value whose variant always matches its field's [`SemanticType`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

/// Raw right-hand side of a `field=value` change.
///
/// `true`/`false` (any case) is recognised before the target type is known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue<'a> {
    Flag(bool),
    Text(&'a str),
}

impl<'a> RawValue<'a> {
    pub fn parse(raw: &'a str) -> Self {
        if raw.eq_ignore_ascii_case("true") {
            RawValue::Flag(true)
        } else if raw.eq_ignore_ascii_case("false") {
            RawValue::Flag(false)
        } else {
            RawValue::Text(raw)
        }
    }
}

impl fmt::Display for RawValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawValue::Flag(b) => write!(f, "{}", b),
            RawValue::Text(s) => write!(f, "{}", s),
        }
    }
}

/// A raw value that could not be converted to its field's type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("'{raw}' is not a valid {expected} value")]
pub struct CoercionError {
    pub expected: SemanticType,
    pub raw: String,
}

impl ConfigValue {
    pub fn semantic_type(&self) -> SemanticType {
        match self {
            ConfigValue::Text(_) => SemanticType::String,
            ConfigValue::Integer(_) => SemanticType::Integer,
            ConfigValue::Float(_) => SemanticType::Float,
            ConfigValue::Boolean(_) => SemanticType::Boolean,
        }
    }

    /// Converts a raw value to `target`.
    ///
    /// Flags convert to 1/0 for numeric targets and to `true`/`false` text for string
    /// targets. Integers must fit the `INTEGER` column range.
    pub fn coerce(raw: RawValue<'_>, target: SemanticType) -> Result<Self, CoercionError> {
        let fail = || CoercionError {
            expected: target,
            raw: raw.to_string(),
        };

        match (target, raw) {
            (SemanticType::Boolean, RawValue::Flag(b)) => Ok(ConfigValue::Boolean(b)),
            (SemanticType::Boolean, RawValue::Text(s)) => match s.trim() {
                "1" => Ok(ConfigValue::Boolean(true)),
                "0" => Ok(ConfigValue::Boolean(false)),
                _ => Err(fail()),
            },
            (SemanticType::Integer, RawValue::Flag(b)) => Ok(ConfigValue::Integer(i64::from(b))),
            (SemanticType::Integer, RawValue::Text(s)) => s
                .trim()
                .parse::<i32>()
                .map(|n| ConfigValue::Integer(i64::from(n)))
                .map_err(|_| fail()),
            (SemanticType::Float, RawValue::Flag(b)) => {
                Ok(ConfigValue::Float(if b { 1.0 } else { 0.0 }))
            }
            (SemanticType::Float, RawValue::Text(s)) => match s.trim().parse::<f64>() {
                Ok(n) if n.is_finite() => Ok(ConfigValue::Float(n)),
                _ => Err(fail()),
            },
            (SemanticType::String, RawValue::Flag(b)) => {
                Ok(ConfigValue::Text(if b { "True" } else { "False" }.to_string()))
            }
            (SemanticType::String, RawValue::Text(s)) => Ok(ConfigValue::Text(s.to_string())),
        }
    }

    /// SQL literal for DDL defaults (`ALTER TABLE .. DEFAULT ..`).
    ///
    /// Only ever called with registry defaults, never with caller input.
    pub fn sql_literal(&self) -> String {
        match self {
            ConfigValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ConfigValue::Integer(n) => n.to_string(),
            ConfigValue::Float(n) => format!("{:?}", n),
            ConfigValue::Boolean(true) => "B'1'".to_string(),
            ConfigValue::Boolean(false) => "B'0'".to_string(),
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Text(s) => write!(f, "{}", s),
            ConfigValue::Integer(n) => write!(f, "{}", n),
            ConfigValue::Float(n) => write!(f, "{}", n),
            ConfigValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_recognised_case_insensitively() {
        assert_eq!(RawValue::parse("TRUE"), RawValue::Flag(true));
        assert_eq!(RawValue::parse("False"), RawValue::Flag(false));
        assert_eq!(RawValue::parse("yes"), RawValue::Text("yes"));
    }

    #[test]
    fn flags_coerce_into_every_type() {
        let t = RawValue::Flag(true);
        assert_eq!(
            ConfigValue::coerce(t, SemanticType::Boolean),
            Ok(ConfigValue::Boolean(true))
        );
        assert_eq!(
            ConfigValue::coerce(t, SemanticType::Integer),
            Ok(ConfigValue::Integer(1))
        );
        assert_eq!(
            ConfigValue::coerce(RawValue::Flag(false), SemanticType::Float),
            Ok(ConfigValue::Float(0.0))
        );
        assert_eq!(
            ConfigValue::coerce(t, SemanticType::String),
            Ok(ConfigValue::Text("True".to_string()))
        );
        assert_eq!(
            ConfigValue::coerce(RawValue::Flag(false), SemanticType::String),
            Ok(ConfigValue::Text("False".to_string()))
        );
    }

    #[test]
    fn numeric_text_is_parsed_strictly() {
        assert_eq!(
            ConfigValue::coerce(RawValue::Text("7"), SemanticType::Integer),
            Ok(ConfigValue::Integer(7))
        );
        assert!(ConfigValue::coerce(RawValue::Text("7.5"), SemanticType::Integer).is_err());
        assert!(ConfigValue::coerce(RawValue::Text("99999999999"), SemanticType::Integer).is_err());
        assert_eq!(
            ConfigValue::coerce(RawValue::Text("-0.4"), SemanticType::Float),
            Ok(ConfigValue::Float(-0.4))
        );
        assert!(ConfigValue::coerce(RawValue::Text("NaN"), SemanticType::Float).is_err());
        assert!(ConfigValue::coerce(RawValue::Text("maybe"), SemanticType::Boolean).is_err());
    }

    #[test]
    fn coercion_error_names_the_type() {
        let err = ConfigValue::coerce(RawValue::Text("notanumber"), SemanticType::Integer)
            .unwrap_err();
        assert_eq!(err.to_string(), "'notanumber' is not a valid integer value");
    }

    #[test]
    fn literals_escape_quotes_and_encode_bits() {
        assert_eq!(ConfigValue::Text("o'k".into()).sql_literal(), "'o''k'");
        assert_eq!(ConfigValue::Boolean(true).sql_literal(), "B'1'");
        assert_eq!(ConfigValue::Float(0.01).sql_literal(), "0.01");
    }
}
