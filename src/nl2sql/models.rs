use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One column of a discovered table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    pub foreign_table: Option<String>,
    pub foreign_column: Option<String>,
    /// Distinct non-null values, text-like columns only
    pub sample_values: Vec<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            is_nullable: true,
            is_primary_key: false,
            is_foreign_key: false,
            foreign_table: None,
            foreign_column: None,
            sample_values: Vec::new(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    /// Marks the column as referencing `table.column`; sets both targets so the
    /// foreign-key flag never appears without them.
    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.is_foreign_key = true;
        self.foreign_table = Some(table.into());
        self.foreign_column = Some(column.into());
        self
    }

    pub fn is_text_like(&self) -> bool {
        let upper = self.data_type.to_uppercase();
        ["CHAR", "TEXT", "STRING", "ENUM"]
            .iter()
            .any(|marker| upper.contains(marker))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    /// `None` when the count could not be fetched
    pub row_count: Option<u64>,
    pub description: Option<String>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
            row_count: None,
            description: None,
        }
    }

    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = Some(row_count);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

/// Point-in-time snapshot of the introspectable schema. Never mutated after
/// construction; a refresh produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseSchema {
    tables: Vec<TableInfo>,
    discovered_at: DateTime<Utc>,
}

impl DatabaseSchema {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self::with_timestamp(tables, Utc::now())
    }

    pub fn with_timestamp(tables: Vec<TableInfo>, discovered_at: DateTime<Utc>) -> Self {
        Self {
            tables,
            discovered_at,
        }
    }

    pub fn tables(&self) -> &[TableInfo] {
        &self.tables
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.discovered_at
    }

    /// Case-insensitive lookup.
    pub fn get_table(&self, name: &str) -> Option<&TableInfo> {
        self.tables
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    #[serde(default)]
    pub period_description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationSpec {
    pub func: String,
    pub column: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinHint {
    pub table1: String,
    pub col1: String,
    pub table2: String,
    pub col2: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub column: String,
    pub direction: String,
}

/// What the user asked for, before compilation. Function and operator names
/// stay as text here; the generator decides which ones it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedIntent {
    pub tables: Vec<String>,
    pub select_columns: Vec<String>,
    pub aggregations: Vec<AggregationSpec>,
    pub filters: Vec<FilterSpec>,
    pub joins: Vec<JoinHint>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderSpec>,
    pub limit: Option<u64>,
    pub date_range: Option<DateRange>,
    pub confidence: f64,
    pub reasoning: String,
    pub original_question: String,
}

impl Default for ParsedIntent {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            select_columns: Vec::new(),
            aggregations: Vec::new(),
            filters: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            date_range: None,
            confidence: 0.5,
            reasoning: String::new(),
            original_question: String::new(),
        }
    }
}

/// Compiled query: SQL text with `:name` placeholders and the values bound to
/// them. The SQL text never carries a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlQuery {
    pub sql: String,
    pub parameters: HashMap<String, Value>,
    pub description: String,
    pub tables_used: Vec<String>,
}

pub type Row = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    pub data: Vec<Row>,
    pub row_count: usize,
    pub column_names: Vec<String>,
    pub execution_time_ms: f64,
    pub error_message: Option<String>,
    /// More rows matched than were returned
    pub truncated: bool,
}

impl QueryResult {
    pub fn rows(column_names: Vec<String>, data: Vec<Row>, execution_time_ms: f64) -> Self {
        Self {
            success: true,
            row_count: data.len(),
            data,
            column_names,
            execution_time_ms,
            error_message: None,
            truncated: false,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time_ms: f64) -> Self {
        Self {
            success: false,
            data: Vec::new(),
            row_count: 0,
            column_names: Vec::new(),
            execution_time_ms,
            error_message: Some(error.into()),
            truncated: false,
        }
    }
}
