use crate::config::DisplayConfig;
use crate::nl2sql::models::QueryResult;
use serde_json::Value;

pub const NO_DATA_MESSAGE: &str = "No data found for the specified criteria.";
pub const DEFAULT_TEXT_ROWS: usize = 50;
pub const DEFAULT_MARKDOWN_ROWS: usize = 30;

/// Renders query results for people and for model prompts. Pure: the same
/// result always renders to the same text.
#[derive(Debug, Clone)]
pub struct ResultFormatter {
    text_rows: usize,
    markdown_rows: usize,
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self {
            text_rows: DEFAULT_TEXT_ROWS,
            markdown_rows: DEFAULT_MARKDOWN_ROWS,
        }
    }
}

impl ResultFormatter {
    pub fn new(text_rows: usize, markdown_rows: usize) -> Self {
        Self {
            text_rows,
            markdown_rows,
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(config.text_rows, config.markdown_rows)
    }

    /// Aligned plain-text table.
    pub fn format_text(&self, result: &QueryResult) -> String {
        if let Some(sentinel) = sentinel(result) {
            return sentinel;
        }

        let shown = &result.data[..result.data.len().min(self.text_rows)];
        let cells: Vec<Vec<String>> = shown
            .iter()
            .map(|row| {
                result
                    .column_names
                    .iter()
                    .map(|col| row.get(col).map(|v| format_value(v, "NULL")).unwrap_or_default())
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = result
            .column_names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                cells
                    .iter()
                    .map(|row| row[idx].chars().count())
                    .chain(std::iter::once(name.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = Vec::with_capacity(shown.len() + 3);
        if !result.column_names.is_empty() {
            let header = aligned(&result.column_names, &widths);
            let rule_width = widths.iter().sum::<usize>() + 3 * (widths.len() - 1);
            lines.push(header);
            lines.push("-".repeat(rule_width));
        }
        for row in &cells {
            lines.push(aligned(row, &widths));
        }

        if result.row_count > shown.len() {
            lines.push(format!("... and {} more rows", result.row_count - shown.len()));
        }

        lines.join("\n")
    }

    pub fn format_markdown(&self, result: &QueryResult) -> String {
        if let Some(sentinel) = sentinel(result) {
            return sentinel;
        }

        let shown = &result.data[..result.data.len().min(self.markdown_rows)];
        let mut lines = Vec::with_capacity(shown.len() + 3);

        let header: Vec<String> = result.column_names.iter().map(|c| escape_pipes(c)).collect();
        lines.push(format!("| {} |", header.join(" | ")));
        lines.push(format!("|{}|", vec!["---"; header.len()].join("|")));

        for row in shown {
            let values: Vec<String> = result
                .column_names
                .iter()
                .map(|col| {
                    let text = row.get(col).map(|v| format_value(v, "-")).unwrap_or_default();
                    escape_pipes(&text)
                })
                .collect();
            lines.push(format!("| {} |", values.join(" | ")));
        }

        if result.row_count > shown.len() {
            lines.push(format!(
                "\n*Showing {} of {} results*",
                shown.len(),
                result.row_count
            ));
        }

        lines.join("\n")
    }
}

fn sentinel(result: &QueryResult) -> Option<String> {
    if !result.success {
        return Some(format!(
            "Error in query: {}",
            result.error_message.as_deref().unwrap_or("unknown error")
        ));
    }
    if result.row_count == 0 {
        return Some(NO_DATA_MESSAGE.to_string());
    }
    None
}

fn aligned(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" | ")
        .trim_end()
        .to_string()
}

fn escape_pipes(text: &str) -> String {
    text.replace('|', "\\|")
}

/// Display text for one cell; `null` is the placeholder for SQL NULL.
pub fn format_value(value: &Value, null: &str) -> String {
    match value {
        Value::Null => null.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                group_thousands(&i.to_string())
            } else if let Some(u) = n.as_u64() {
                group_thousands(&u.to_string())
            } else {
                format_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Two decimals with separators; integral values render as integers.
pub fn format_float(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }
    if v.fract() == 0.0 {
        // Adding zero turns -0.0 into 0.0.
        return group_thousands(&format!("{:.0}", v + 0.0));
    }
    group_thousands(&format!("{:.2}", v))
}

/// `-1234567.5` → `-1,234,567.5`
fn group_thousands(number: &str) -> String {
    let (sign, unsigned) = match number.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", number),
    };
    let (int_part, frac_part) = match unsigned.find('.') {
        Some(dot) => unsigned.split_at(dot),
        None => (unsigned, ""),
    };

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, digit) in digits.iter().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*digit);
    }

    format!("{}{}{}", sign, grouped, frac_part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nl2sql::models::Row;
    use serde_json::json;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn result(columns: &[&str], data: Vec<Row>) -> QueryResult {
        QueryResult::rows(columns.iter().map(|c| c.to_string()).collect(), data, 1.0)
    }

    #[test]
    fn empty_result_is_the_no_data_sentinel() {
        let empty = result(&["a"], Vec::new());
        let formatter = ResultFormatter::default();

        assert_eq!(formatter.format_text(&empty), NO_DATA_MESSAGE);
        assert_eq!(formatter.format_markdown(&empty), NO_DATA_MESSAGE);
    }

    #[test]
    fn failure_is_the_error_sentinel() {
        let failed = QueryResult::failure("Catalog Error: Table x does not exist", 2.0);
        let formatter = ResultFormatter::default();

        assert_eq!(
            formatter.format_text(&failed),
            "Error in query: Catalog Error: Table x does not exist"
        );
        assert_eq!(formatter.format_markdown(&failed), formatter.format_text(&failed));
    }

    #[test]
    fn text_table_contains_headers_and_values() {
        let r = result(
            &["tipo_maquina", "total"],
            vec![row(&[("tipo_maquina", json!("Excavadora")), ("total", json!(15000.50))])],
        );

        let text = ResultFormatter::default().format_text(&r);
        assert!(text.contains("tipo_maquina"));
        assert!(text.contains("total"));
        assert!(text.contains("Excavadora"));
        assert!(text.contains("15,000.50"));
    }

    #[test]
    fn text_table_is_aligned() {
        let r = result(
            &["name", "n"],
            vec![
                row(&[("name", json!("a")), ("n", json!(1))]),
                row(&[("name", json!("longer")), ("n", Value::Null)]),
            ],
        );

        assert_eq!(
            ResultFormatter::default().format_text(&r),
            "name   | n\n\
             -------------\n\
             a      | 1\n\
             longer | NULL"
        );
    }

    #[test]
    fn text_table_caps_rows_with_trailer() {
        let data: Vec<Row> = (0..55).map(|i| row(&[("n", json!(i))])).collect();
        let text = ResultFormatter::default().format_text(&result(&["n"], data));

        assert!(text.ends_with("... and 5 more rows"));
        assert!(text.contains("\n49\n"));
        assert!(!text.contains("\n50\n"));
    }

    #[test]
    fn markdown_table_layout() {
        let r = result(
            &["tipo", "total"],
            vec![
                row(&[("tipo", json!("a|b")), ("total", json!(1234567))]),
                row(&[("tipo", Value::Null), ("total", json!(2.0))]),
            ],
        );

        assert_eq!(
            ResultFormatter::default().format_markdown(&r),
            "| tipo | total |\n|---|---|\n| a\\|b | 1,234,567 |\n| - | 2 |"
        );
    }

    #[test]
    fn markdown_table_caps_rows_with_trailer() {
        let data: Vec<Row> = (0..40).map(|i| row(&[("n", json!(i))])).collect();
        let md = ResultFormatter::default().format_markdown(&result(&["n"], data));

        assert!(md.ends_with("\n\n*Showing 30 of 40 results*"));
        assert_eq!(md.lines().filter(|l| l.starts_with("| ")).count(), 31);
    }

    #[test]
    fn custom_caps_apply() {
        let data: Vec<Row> = (0..3).map(|i| row(&[("n", json!(i))])).collect();
        let text = ResultFormatter::new(2, 1).format_text(&result(&["n"], data));
        assert!(text.ends_with("... and 1 more rows"));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_value(&json!(1234), "NULL"), "1,234");
        assert_eq!(format_value(&json!(-1234567), "NULL"), "-1,234,567");
        assert_eq!(format_value(&json!(999), "NULL"), "999");
        assert_eq!(format_value(&json!(1234.5), "NULL"), "1,234.50");
        assert_eq!(format_value(&json!(-0.256), "NULL"), "-0.26");
        assert_eq!(format_value(&json!(3000.0), "NULL"), "3,000");
        assert_eq!(format_float(1e15), "1,000,000,000,000,000");
        assert_eq!(format_float(-2.5e18), "-2,500,000,000,000,000,000");
        assert_eq!(format_float(-0.0), "0");
        assert_eq!(format_value(&json!(u64::MAX), "NULL"), "18,446,744,073,709,551,615");
        assert_eq!(format_value(&json!(true), "NULL"), "true");
        assert_eq!(format_value(&Value::Null, "-"), "-");
        assert_eq!(format_value(&json!("12345"), "NULL"), "12345");
    }

    #[test]
    fn rendering_is_repeatable() {
        let r = result(
            &["a", "b"],
            vec![row(&[("a", json!("x")), ("b", json!(1.25))])],
        );
        let formatter = ResultFormatter::default();

        assert_eq!(formatter.format_text(&r), formatter.format_text(&r));
        assert_eq!(formatter.format_markdown(&r), formatter.format_markdown(&r));
    }
}
