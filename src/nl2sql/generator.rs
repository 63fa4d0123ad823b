use crate::nl2sql::models::{
    AggregationSpec, DatabaseSchema, FilterSpec, ParsedIntent, SqlQuery, TableInfo,
};
use crate::nl2sql::Nl2SqlError;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

pub const DEFAULT_DATE_COLUMN: &str = "fecha";

const DATE_COLUMN_PATTERNS: &[&str] = &[
    "fecha",
    "date",
    "created_at",
    "updated_at",
    "timestamp",
    "time",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    Sum,
    Avg,
    Max,
    Min,
}

impl AggregateFunction {
    /// Accepts the allow-listed names only, case- and spacing-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = normalize_keyword(name);
        match normalized.as_str() {
            "COUNT" => Some(Self::Count),
            "COUNT DISTINCT" | "COUNT_DISTINCT" => Some(Self::CountDistinct),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MAX" => Some(Self::Max),
            "MIN" => Some(Self::Min),
            _ => None,
        }
    }

    fn sql_name(self) -> &'static str {
        match self {
            Self::Count | Self::CountDistinct => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Max => "MAX",
            Self::Min => "MIN",
        }
    }

    fn alias_prefix(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::CountDistinct => "count_distinct",
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Max => "max",
            Self::Min => "min",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    NotEq,
    NotEqAnsi,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    ILike,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
}

impl FilterOperator {
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = normalize_keyword(name);
        let op = match normalized.as_str() {
            "=" => Self::Eq,
            "!=" => Self::NotEq,
            "<>" => Self::NotEqAnsi,
            ">" => Self::Gt,
            "<" => Self::Lt,
            ">=" => Self::Gte,
            "<=" => Self::Lte,
            "LIKE" => Self::Like,
            "ILIKE" => Self::ILike,
            "IN" => Self::In,
            "NOT IN" => Self::NotIn,
            "IS NULL" => Self::IsNull,
            "IS NOT NULL" => Self::IsNotNull,
            "BETWEEN" => Self::Between,
            _ => return None,
        };
        Some(op)
    }

    fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::NotEqAnsi => "<>",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
            Self::Between => "BETWEEN",
        }
    }
}

fn normalize_keyword(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Keeps only `[A-Za-z0-9_]`.
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// Parameter table for one compilation. Placeholder names come from a counter
/// that only ever grows, so filtering the same column twice never collides.
#[derive(Default)]
struct Bindings {
    params: HashMap<String, Value>,
    counter: usize,
}

impl Bindings {
    fn bind(&mut self, prefix: &str, value: Value) -> String {
        self.counter += 1;
        let name = format!("{}_{}", prefix, self.counter);
        let placeholder = format!(":{}", name);
        self.params.insert(name, value);
        placeholder
    }

    fn bind_as(&mut self, name: &str, value: Value) -> String {
        self.params.insert(name.to_string(), value);
        format!(":{}", name)
    }
}

/// Compiles validated intents into parameterized SQL. Identifiers are
/// filtered to a safe character class and quoted; every value goes through a
/// named placeholder.
#[derive(Debug, Clone)]
pub struct SqlGenerator {
    default_date_column: String,
}

impl Default for SqlGenerator {
    fn default() -> Self {
        Self {
            default_date_column: DEFAULT_DATE_COLUMN.to_string(),
        }
    }
}

impl SqlGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_date_column(mut self, column: impl Into<String>) -> Self {
        self.default_date_column = column.into();
        self
    }

    pub fn generate(
        &self,
        intent: &ParsedIntent,
        schema: &DatabaseSchema,
    ) -> Result<SqlQuery, Nl2SqlError> {
        self.compile(intent, schema)
            .map_err(|e| Nl2SqlError::SqlGeneration(format!("Failed to generate SQL: {}", e)))
    }

    fn compile(&self, intent: &ParsedIntent, schema: &DatabaseSchema) -> Result<SqlQuery, String> {
        let mut bindings = Bindings::default();

        let select_clause = self.build_select(intent);
        let (from_clause, tables_used) = self.build_from(intent, schema)?;
        let where_clause = self.build_where(intent, &mut bindings);
        let group_clause = self.build_group_by(intent);
        let order_clause = self.build_order_by(intent);

        let mut sql_parts = vec![
            format!("SELECT {}", select_clause),
            format!("FROM {}", from_clause),
        ];
        if !where_clause.is_empty() {
            sql_parts.push(format!("WHERE {}", where_clause));
        }
        if !group_clause.is_empty() {
            sql_parts.push(format!("GROUP BY {}", group_clause));
        }
        if !order_clause.is_empty() {
            sql_parts.push(format!("ORDER BY {}", order_clause));
        }
        if let Some(limit) = intent.limit {
            let placeholder = bindings.bind_as("limit", Value::from(limit));
            sql_parts.push(format!("LIMIT {}", placeholder));
        }

        let sql = sql_parts.join("\n");
        debug!("Compiled SQL: {}", sql);

        Ok(SqlQuery {
            sql,
            parameters: bindings.params,
            description: describe_intent(intent, &tables_used),
            tables_used,
        })
    }

    fn build_select(&self, intent: &ParsedIntent) -> String {
        let mut parts = Vec::new();

        for column in &intent.select_columns {
            let safe = sanitize_identifier(column);
            if safe.is_empty() {
                warn!("Dropping select column with no usable characters: {:?}", column);
                continue;
            }
            parts.push(quote(&safe));
        }

        for agg in &intent.aggregations {
            if let Some(expr) = aggregate_expression(agg) {
                parts.push(expr);
            }
        }

        if parts.is_empty() {
            return "*".to_string();
        }
        parts.join(", ")
    }

    fn build_from(
        &self,
        intent: &ParsedIntent,
        schema: &DatabaseSchema,
    ) -> Result<(String, Vec<String>), String> {
        let first = intent
            .tables
            .first()
            .ok_or_else(|| "No tables specified in intent".to_string())?;
        let anchor_name = canonical_table(schema, first);
        let anchor = sanitize_identifier(&anchor_name);
        if anchor.is_empty() {
            return Err(format!("Table name {:?} has no usable characters", first));
        }

        let mut from_parts = vec![quote(&anchor)];
        let mut tables_used = vec![anchor_name];

        for hint in &intent.joins {
            let t1 = sanitize_identifier(&canonical_table(schema, &hint.table1));
            let c1 = sanitize_identifier(&hint.col1);
            let t2_name = canonical_table(schema, &hint.table2);
            let t2 = sanitize_identifier(&t2_name);
            let c2 = sanitize_identifier(&hint.col2);

            if t1.is_empty() || c1.is_empty() || t2.is_empty() || c2.is_empty() {
                warn!("Dropping incomplete join hint: {:?}", hint);
                continue;
            }
            if schema.get_table(&hint.table1).is_none() || schema.get_table(&hint.table2).is_none()
            {
                warn!("Dropping join hint on unknown table: {:?}", hint);
                continue;
            }

            from_parts.push(format!(
                "LEFT JOIN {} ON {}.{} = {}.{}",
                quote(&t2),
                quote(&t1),
                quote(&c1),
                quote(&t2),
                quote(&c2)
            ));
            if !tables_used.iter().any(|t| t.eq_ignore_ascii_case(&t2_name)) {
                tables_used.push(t2_name);
            }
        }

        if intent.tables.len() > 1 && intent.joins.is_empty() {
            let (joins, joined) = infer_joins(&intent.tables, schema);
            from_parts.extend(joins);
            tables_used.extend(joined);
        }

        Ok((from_parts.join(" "), tables_used))
    }

    fn build_where(&self, intent: &ParsedIntent, bindings: &mut Bindings) -> String {
        let mut conditions = Vec::new();

        for filter in &intent.filters {
            if let Some(condition) = filter_condition(filter, bindings) {
                conditions.push(condition);
            }
        }

        if let Some(range) = &intent.date_range {
            if range.start_date.is_some() || range.end_date.is_some() {
                let column = quote(&sanitize_identifier(&self.date_column(intent)));
                if let Some(start) = &range.start_date {
                    let placeholder = bindings.bind_as("date_start", Value::from(start.as_str()));
                    conditions.push(format!("{} >= {}", column, placeholder));
                }
                if let Some(end) = &range.end_date {
                    let placeholder = bindings.bind_as("date_end", Value::from(end.as_str()));
                    conditions.push(format!("{} <= {}", column, placeholder));
                }
            }
        }

        conditions.join(" AND ")
    }

    fn build_group_by(&self, intent: &ParsedIntent) -> String {
        intent
            .group_by
            .iter()
            .map(|c| sanitize_identifier(c))
            .filter(|c| !c.is_empty())
            .map(|c| quote(&c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn build_order_by(&self, intent: &ParsedIntent) -> String {
        intent
            .order_by
            .iter()
            .filter_map(|o| {
                let column = sanitize_identifier(&o.column);
                if column.is_empty() {
                    return None;
                }
                let direction = if o.direction.trim().eq_ignore_ascii_case("ASC") {
                    "ASC"
                } else {
                    "DESC"
                };
                Some(format!("{} {}", quote(&column), direction))
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// First requested column that looks like a date, else the configured
    /// default.
    fn date_column(&self, intent: &ParsedIntent) -> String {
        intent
            .select_columns
            .iter()
            .chain(&intent.group_by)
            .find(|col| {
                let lower = col.to_lowercase();
                DATE_COLUMN_PATTERNS.iter().any(|p| lower.contains(p))
            })
            .cloned()
            .unwrap_or_else(|| self.default_date_column.clone())
    }
}

fn canonical_table(schema: &DatabaseSchema, name: &str) -> String {
    schema
        .get_table(name)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| name.to_string())
}

fn aggregate_expression(agg: &AggregationSpec) -> Option<String> {
    let Some(func) = AggregateFunction::from_name(&agg.func) else {
        warn!("Dropping aggregation with unsupported function {:?}", agg.func);
        return None;
    };

    let column = agg.column.trim();
    let (expr, alias_stem) = if column == "*" {
        if func != AggregateFunction::Count {
            warn!("Dropping {}(*): only COUNT accepts *", func.sql_name());
            return None;
        }
        ("COUNT(*)".to_string(), "all".to_string())
    } else {
        let safe = sanitize_identifier(column);
        if safe.is_empty() {
            warn!("Dropping aggregation over unusable column {:?}", agg.column);
            return None;
        }
        let expr = match func {
            AggregateFunction::CountDistinct => format!("COUNT(DISTINCT {})", quote(&safe)),
            other => format!("{}({})", other.sql_name(), quote(&safe)),
        };
        (expr, safe)
    };

    let alias = agg
        .alias
        .as_deref()
        .map(sanitize_identifier)
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| format!("{}_{}", func.alias_prefix(), alias_stem));

    Some(format!("{} AS {}", expr, quote(&alias)))
}

fn filter_condition(filter: &FilterSpec, bindings: &mut Bindings) -> Option<String> {
    let column = sanitize_identifier(&filter.column);
    let Some(op) = FilterOperator::from_name(&filter.operator) else {
        warn!("Dropping filter with unsupported operator {:?}", filter.operator);
        return None;
    };
    if column.is_empty() {
        warn!("Dropping filter on unusable column {:?}", filter.column);
        return None;
    }
    let column = quote(&column);

    let condition = match op {
        FilterOperator::IsNull | FilterOperator::IsNotNull => {
            format!("{} {}", column, op.as_sql())
        }
        FilterOperator::In | FilterOperator::NotIn => {
            let values = match &filter.value {
                Value::Array(items) => items.clone(),
                Value::Null => Vec::new(),
                scalar => vec![scalar.clone()],
            };
            if values.is_empty() {
                warn!("Dropping {} filter on {} with no values", op.as_sql(), column);
                return None;
            }
            let placeholders: Vec<String> = values
                .into_iter()
                .map(|v| bindings.bind("in", v))
                .collect();
            format!("{} {} ({})", column, op.as_sql(), placeholders.join(", "))
        }
        FilterOperator::Like | FilterOperator::ILike => {
            let placeholder = bindings.bind("like", filter.value.clone());
            format!("{} {} {}", column, op.as_sql(), placeholder)
        }
        FilterOperator::Between => {
            let bounds = match &filter.value {
                Value::Array(items) if items.len() == 2 => items,
                _ => {
                    warn!("Dropping BETWEEN filter on {} without two bounds", column);
                    return None;
                }
            };
            let low = bindings.bind("f", bounds[0].clone());
            let high = bindings.bind("f", bounds[1].clone());
            format!("{} BETWEEN {} AND {}", column, low, high)
        }
        _ => {
            if filter.value.is_null() {
                warn!("Dropping {} filter on {} with a null value", op.as_sql(), column);
                return None;
            }
            let placeholder = bindings.bind("f", filter.value.clone());
            format!("{} {} {}", column, op.as_sql(), placeholder)
        }
    };

    Some(condition)
}

/// Connects each extra table to a table already in the FROM clause through a
/// declared foreign key. At most one join per table; tables that cannot be
/// connected are left out instead of producing a cross product.
fn infer_joins(tables: &[String], schema: &DatabaseSchema) -> (Vec<String>, Vec<String>) {
    let Some(anchor) = tables.first().and_then(|t| schema.get_table(t)) else {
        warn!("Cannot infer joins: anchor table {:?} is not in the schema", tables.first());
        return (Vec::new(), Vec::new());
    };

    let mut included: Vec<&TableInfo> = vec![anchor];
    let mut pending: Vec<&TableInfo> = Vec::new();
    for name in &tables[1..] {
        match schema.get_table(name) {
            Some(t) if !included.iter().chain(&pending).any(|i| i.name == t.name) => {
                pending.push(t)
            }
            Some(_) => {}
            None => warn!("Cannot join unknown table {}", name),
        }
    }

    let mut joins = Vec::new();
    let mut joined = Vec::new();

    loop {
        let next = pending
            .iter()
            .enumerate()
            .find_map(|(idx, target)| join_clause(target, &included).map(|sql| (idx, sql)));

        let Some((idx, sql)) = next else { break };
        let table = pending.remove(idx);
        joins.push(sql);
        joined.push(table.name.clone());
        included.push(table);
    }

    if !pending.is_empty() {
        let names: Vec<&str> = pending.iter().map(|t| t.name.as_str()).collect();
        warn!(
            "No foreign key connects {:?} to {:?}; leaving them out of the query",
            names,
            included.iter().map(|t| t.name.as_str()).collect::<Vec<_>>()
        );
    }

    (joins, joined)
}

fn join_clause(target: &TableInfo, included: &[&TableInfo]) -> Option<String> {
    let target_q = quote(&sanitize_identifier(&target.name));

    // The new table references something already joined.
    for col in &target.columns {
        let (true, Some(ft), Some(fc)) = (col.is_foreign_key, &col.foreign_table, &col.foreign_column)
        else {
            continue;
        };
        if let Some(source) = included.iter().find(|t| t.name.eq_ignore_ascii_case(ft)) {
            return Some(format!(
                "LEFT JOIN {} ON {}.{} = {}.{}",
                target_q,
                quote(&sanitize_identifier(&source.name)),
                quote(&sanitize_identifier(fc)),
                target_q,
                quote(&sanitize_identifier(&col.name))
            ));
        }
    }

    // Something already joined references the new table.
    for source in included {
        for col in &source.columns {
            let (true, Some(ft), Some(fc)) =
                (col.is_foreign_key, &col.foreign_table, &col.foreign_column)
            else {
                continue;
            };
            if ft.eq_ignore_ascii_case(&target.name) {
                return Some(format!(
                    "LEFT JOIN {} ON {}.{} = {}.{}",
                    target_q,
                    quote(&sanitize_identifier(&source.name)),
                    quote(&sanitize_identifier(&col.name)),
                    target_q,
                    quote(&sanitize_identifier(fc))
                ));
            }
        }
    }

    None
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable summary for display and audit; never executed.
fn describe_intent(intent: &ParsedIntent, tables_used: &[String]) -> String {
    let mut parts = Vec::new();

    if !intent.aggregations.is_empty() {
        let aggs: Vec<String> = intent
            .aggregations
            .iter()
            .map(|a| format!("{}({})", a.func.to_uppercase(), a.column))
            .collect();
        parts.push(format!("Computing: {}", aggs.join(", ")));
    }

    parts.push(format!("From tables: {}", tables_used.join(", ")));

    if !intent.filters.is_empty() {
        let filters: Vec<String> = intent
            .filters
            .iter()
            .map(|f| {
                if f.value.is_null() {
                    format!("{} {}", f.column, f.operator.to_uppercase())
                } else {
                    format!("{} {} {}", f.column, f.operator, display_value(&f.value))
                }
            })
            .collect();
        parts.push(format!("Filtered by: {}", filters.join(", ")));
    }

    if !intent.group_by.is_empty() {
        parts.push(format!("Grouped by: {}", intent.group_by.join(", ")));
    }

    if let Some(range) = &intent.date_range {
        if !range.period_description.is_empty() {
            parts.push(format!("Period: {}", range.period_description));
        }
    }

    parts.join(" | ")
}
