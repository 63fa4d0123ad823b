use duckdb::types::Value as DuckValue;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

#[derive(Debug, PartialEq)]
pub enum BindError {
    MissingParameter(String),
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::MissingParameter(name) => {
                write!(f, "No value bound for placeholder :{}", name)
            }
        }
    }
}

impl Error for BindError {}

/// Rewrites `:name` placeholders into positional `?` markers and returns the
/// values in the order DuckDB expects them.
///
/// Text inside double-quoted identifiers is copied untouched, and `::` casts
/// are not treated as placeholders.
pub fn bind_named(
    sql: &str,
    parameters: &HashMap<String, Value>,
) -> Result<(String, Vec<DuckValue>), BindError> {
    let chars: Vec<char> = sql.chars().collect();
    let mut rewritten = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut in_identifier = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '"' {
            in_identifier = !in_identifier;
            rewritten.push(c);
            i += 1;
            continue;
        }

        let starts_name = chars
            .get(i + 1)
            .is_some_and(|next| next.is_ascii_alphabetic() || *next == '_');
        let after_colon = i > 0 && chars[i - 1] == ':';

        if !in_identifier && c == ':' && starts_name && !after_colon {
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                end += 1;
            }
            let name: String = chars[start..end].iter().collect();
            let value = parameters
                .get(&name)
                .ok_or_else(|| BindError::MissingParameter(name.clone()))?;
            values.push(to_duck_value(value));
            rewritten.push('?');
            i = end;
            continue;
        }

        rewritten.push(c);
        i += 1;
    }

    Ok((rewritten, values))
}

pub fn to_duck_value(value: &Value) -> DuckValue {
    match value {
        Value::Null => DuckValue::Null,
        Value::Bool(b) => DuckValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                DuckValue::BigInt(i)
            } else if let Some(u) = n.as_u64() {
                DuckValue::UBigInt(u)
            } else {
                DuckValue::Double(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => DuckValue::Text(s.clone()),
        other => DuckValue::Text(other.to_string()),
    }
}

/// Double-quotes a catalog identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn rewrites_placeholders_in_order() {
        let p = params(&[("f_1", json!("open")), ("limit", json!(10))]);
        let (sql, values) =
            bind_named("SELECT * FROM \"t\" WHERE \"s\" = :f_1 LIMIT :limit", &p).unwrap();

        assert_eq!(sql, "SELECT * FROM \"t\" WHERE \"s\" = ? LIMIT ?");
        assert_eq!(values, vec![DuckValue::Text("open".into()), DuckValue::BigInt(10)]);
    }

    #[test]
    fn repeated_placeholder_binds_twice() {
        let p = params(&[("x", json!(1))]);
        let (sql, values) = bind_named("SELECT :x, :x", &p).unwrap();
        assert_eq!(sql, "SELECT ?, ?");
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn ignores_casts_and_quoted_identifiers() {
        let p = params(&[("d", json!("2024-01-01"))]);
        let (sql, values) = bind_named("SELECT \"a:b\", :d::DATE", &p).unwrap();
        assert_eq!(sql, "SELECT \"a:b\", ?::DATE");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn missing_parameter_is_an_error() {
        let err = bind_named("SELECT :nope", &HashMap::new()).unwrap_err();
        assert_eq!(err, BindError::MissingParameter("nope".into()));
    }

    #[test]
    fn converts_json_scalars() {
        assert_eq!(to_duck_value(&json!(null)), DuckValue::Null);
        assert_eq!(to_duck_value(&json!(true)), DuckValue::Boolean(true));
        assert_eq!(to_duck_value(&json!(1.5)), DuckValue::Double(1.5));
        assert_eq!(to_duck_value(&json!(-3)), DuckValue::BigInt(-3));
        assert_eq!(to_duck_value(&json!([1, 2])), DuckValue::Text("[1,2]".into()));
    }

    #[test]
    fn quotes_embedded_quotes() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }
}
