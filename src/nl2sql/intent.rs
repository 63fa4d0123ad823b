use crate::nl2sql::models::{
    AggregationSpec, DatabaseSchema, DateRange, FilterSpec, JoinHint, OrderSpec, ParsedIntent,
};
use crate::nl2sql::Nl2SqlError;
use serde_json::{Map, Value};
use tracing::{debug, warn};

/// Parses a model reply into an intent. The reply may be fenced as a code
/// block or wrapped in prose around the JSON object.
pub fn parse_intent(reply: &str, question: &str) -> Result<ParsedIntent, Nl2SqlError> {
    let candidate = extract_json(reply)?;
    build_intent(&candidate, question)
}

/// Pulls the JSON object out of a free-text reply.
pub fn extract_json(reply: &str) -> Result<Value, Nl2SqlError> {
    let cleaned = strip_code_fence(reply.trim());

    match serde_json::from_str::<Value>(cleaned) {
        Ok(value) => Ok(value),
        Err(direct_err) => {
            debug!("Reply is not bare JSON ({}), scanning for an object", direct_err);
            let object = first_balanced_object(cleaned).ok_or_else(|| {
                Nl2SqlError::IntentParsing(format!(
                    "Invalid model response format: {}",
                    direct_err
                ))
            })?;
            serde_json::from_str(object).map_err(|e| {
                Nl2SqlError::IntentParsing(format!("Invalid model response format: {}", e))
            })
        }
    }
}

fn strip_code_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }

    // Drop the opening fence line (```json) and a closing fence if present.
    let body = match text.find('\n') {
        Some(newline) => &text[newline + 1..],
        None => return text.trim_start_matches('`'),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// The first `{...}` substring whose braces balance, ignoring braces inside
/// JSON strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Builds an intent from a loosely-shaped JSON object. Missing lists default to
/// empty, confidence to 0.5; malformed list entries are dropped.
pub fn build_intent(candidate: &Value, question: &str) -> Result<ParsedIntent, Nl2SqlError> {
    let obj = candidate.as_object().ok_or_else(|| {
        Nl2SqlError::IntentParsing("Model response is not a JSON object".to_string())
    })?;

    Ok(ParsedIntent {
        tables: string_list(obj, "tables"),
        select_columns: string_list(obj, "select_columns"),
        aggregations: objects(obj, "aggregations")
            .map(|agg| AggregationSpec {
                func: text(agg, "func").unwrap_or_else(|| "COUNT".to_string()),
                column: text(agg, "column").unwrap_or_else(|| "*".to_string()),
                alias: text(agg, "alias"),
            })
            .collect(),
        filters: objects(obj, "filters")
            .filter_map(|f| {
                let column = text(f, "column").or_else(|| {
                    warn!("Dropping filter without a column: {:?}", f);
                    None
                })?;
                Some(FilterSpec {
                    column,
                    operator: text(f, "operator").unwrap_or_else(|| "=".to_string()),
                    value: f.get("value").cloned().unwrap_or(Value::Null),
                })
            })
            .collect(),
        joins: objects(obj, "joins")
            .map(|j| JoinHint {
                table1: text(j, "table1").unwrap_or_default(),
                col1: text(j, "col1").unwrap_or_default(),
                table2: text(j, "table2").unwrap_or_default(),
                col2: text(j, "col2").unwrap_or_default(),
            })
            .collect(),
        group_by: string_list(obj, "group_by"),
        order_by: order_specs(obj),
        limit: obj.get("limit").and_then(positive_integer),
        date_range: obj.get("date_range").and_then(date_range),
        confidence: obj
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(0.5),
        reasoning: text(obj, "reasoning").unwrap_or_default(),
        original_question: question.to_string(),
    })
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn string_list(obj: &Map<String, Value>, key: &str) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) if !single.trim().is_empty() => {
            vec![single.trim().to_string()]
        }
        _ => Vec::new(),
    }
}

fn objects<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
) -> impl Iterator<Item = &'a Map<String, Value>> + 'a {
    obj.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn order_specs(obj: &Map<String, Value>) -> Vec<OrderSpec> {
    let Some(items) = obj.get("order_by").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item {
            Value::String(column) => Some(OrderSpec {
                column: column.trim().to_string(),
                direction: "DESC".to_string(),
            }),
            Value::Object(o) => Some(OrderSpec {
                column: text(o, "column")?,
                direction: text(o, "direction").unwrap_or_else(|| "DESC".to_string()),
            }),
            _ => None,
        })
        .collect()
}

fn positive_integer(value: &Value) -> Option<u64> {
    let n = match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f > 0.0)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    n.filter(|n| *n > 0)
}

fn date_range(value: &Value) -> Option<DateRange> {
    let obj = value.as_object()?;
    let range = DateRange {
        start_date: text(obj, "start_date"),
        end_date: text(obj, "end_date"),
        period_description: text(obj, "period_description").unwrap_or_default(),
    };
    if range.start_date.is_none() && range.end_date.is_none() {
        return None;
    }
    Some(range)
}

/// Drops tables the schema does not know (case-insensitively) and rewrites the
/// rest to the schema's spelling. Fails when nothing valid remains, listing
/// the tables that do exist.
pub fn validate_intent(
    mut intent: ParsedIntent,
    schema: &DatabaseSchema,
) -> Result<ParsedIntent, Nl2SqlError> {
    let mut valid: Vec<String> = Vec::with_capacity(intent.tables.len());

    for table in &intent.tables {
        match schema.get_table(table) {
            Some(info) => {
                if !valid.iter().any(|t| t == &info.name) {
                    valid.push(info.name.clone());
                }
            }
            None => warn!("Table '{}' not found in schema, removing", table),
        }
    }

    if valid.is_empty() {
        return Err(Nl2SqlError::IntentParsing(format!(
            "No valid tables found. Available: {}",
            schema.table_names().join(", ")
        )));
    }

    intent.tables = valid;
    Ok(intent)
}
