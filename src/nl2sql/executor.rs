use crate::config::ExecutorConfig;
use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::db_utils::{bind_named, BindError};
use crate::nl2sql::models::{QueryResult, Row, SqlQuery};
use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{
    DataType, Decimal128Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type, Int8Type, UInt16Type,
    UInt32Type, UInt64Type, UInt8Type,
};
use arrow::util::display::{ArrayFormatter, FormatOptions};
use r2d2::Pool;
use serde_json::{Number, Value};
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ROWS: usize = 1000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
enum ExecutionError {
    Bind(BindError),
    Pool(r2d2::Error),
    Database(duckdb::Error),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::Bind(err) => write!(f, "{}", err),
            ExecutionError::Pool(err) => write!(f, "Connection pool error: {}", err),
            ExecutionError::Database(err) => write!(f, "{}", err),
        }
    }
}

impl Error for ExecutionError {}

impl From<BindError> for ExecutionError {
    fn from(err: BindError) -> Self {
        ExecutionError::Bind(err)
    }
}

impl From<r2d2::Error> for ExecutionError {
    fn from(err: r2d2::Error) -> Self {
        ExecutionError::Pool(err)
    }
}

impl From<duckdb::Error> for ExecutionError {
    fn from(err: duckdb::Error) -> Self {
        ExecutionError::Database(err)
    }
}

struct Captured {
    column_names: Vec<String>,
    rows: Vec<Row>,
    truncated: bool,
}

/// Runs compiled queries against the pooled database. Never returns an
/// error: every failure is folded into a `QueryResult` with `success = false`.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Pool<DuckDBConnectionManager>,
    max_rows: usize,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: Pool<DuckDBConnectionManager>) -> Self {
        Self {
            pool,
            max_rows: DEFAULT_MAX_ROWS,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn from_config(pool: Pool<DuckDBConnectionManager>, config: &ExecutorConfig) -> Self {
        Self::new(pool)
            .with_max_rows(config.max_rows)
            .with_timeout(Duration::from_secs(config.timeout_secs))
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Binds and runs `query`, keeping at most `max_rows` rows.
    ///
    /// Once the timeout elapses the caller gets a failed result, but the
    /// database work is not interrupted: the statement keeps running on its
    /// blocking worker until DuckDB finishes it, and only then does its
    /// connection go back to the pool.
    pub async fn execute(&self, query: &SqlQuery) -> QueryResult {
        info!("Executing query: {}", query.description);
        debug!("SQL: {}", query.sql);
        debug!("Parameters: {:?}", query.parameters);

        let pool = self.pool.clone();
        let owned = query.clone();
        let max_rows = self.max_rows;

        let started = Instant::now();
        let outcome =
            run_with_timeout(self.timeout, move || capture(&pool, &owned, max_rows)).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(captured) => {
                info!(
                    "Query returned {} rows in {:.2}ms{}",
                    captured.rows.len(),
                    elapsed_ms,
                    if captured.truncated { " (truncated)" } else { "" }
                );
                let mut result =
                    QueryResult::rows(captured.column_names, captured.rows, elapsed_ms);
                result.truncated = captured.truncated;
                result
            }
            Err(message) => {
                error!("Query execution failed: {}", message);
                QueryResult::failure(message, elapsed_ms)
            }
        }
    }
}

/// Runs blocking work on the blocking pool and gives up waiting once the
/// timeout elapses. The worker itself is not cancelled.
async fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExecutionError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(err))) => Err(err.to_string()),
        Ok(Err(join_err)) => Err(format!("Query task failed: {}", join_err)),
        Err(_) => Err(format!(
            "Query timed out after {:.1} seconds",
            timeout.as_secs_f64()
        )),
    }
}

fn capture(
    pool: &Pool<DuckDBConnectionManager>,
    query: &SqlQuery,
    max_rows: usize,
) -> Result<Captured, ExecutionError> {
    let (sql, values) = bind_named(&query.sql, &query.parameters)?;
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let batches = stmt.query_arrow(duckdb::params_from_iter(values))?;

    let column_names: Vec<String> = batches
        .get_schema()
        .fields()
        .iter()
        .map(|field| field.name().clone())
        .collect();

    let options = FormatOptions::default();
    let mut rows = Vec::new();
    let mut truncated = false;

    'batches: for batch in batches {
        let formatters: Vec<Option<ArrayFormatter<'_>>> = batch
            .columns()
            .iter()
            .map(|column| ArrayFormatter::try_new(column.as_ref(), &options).ok())
            .collect();

        for row in 0..batch.num_rows() {
            if rows.len() >= max_rows {
                truncated = true;
                break 'batches;
            }

            let mut record = Row::new();
            for (idx, name) in column_names.iter().enumerate() {
                let value = cell_value(batch.column(idx), row, formatters[idx].as_ref());
                record.insert(name.clone(), value);
            }
            rows.push(record);
        }
    }

    Ok(Captured {
        column_names,
        rows,
        truncated,
    })
}

/// Reduces one Arrow cell to null, boolean, number, or text.
fn cell_value(array: &ArrayRef, row: usize, formatter: Option<&ArrayFormatter<'_>>) -> Value {
    // NullArray carries no validity buffer, so is_null alone misses it.
    if array.is_null(row) || array.data_type() == &DataType::Null {
        return Value::Null;
    }

    match array.data_type() {
        DataType::Boolean => Value::Bool(array.as_boolean().value(row)),
        DataType::Int8 => Value::from(array.as_primitive::<Int8Type>().value(row)),
        DataType::Int16 => Value::from(array.as_primitive::<Int16Type>().value(row)),
        DataType::Int32 => Value::from(array.as_primitive::<Int32Type>().value(row)),
        DataType::Int64 => Value::from(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => Value::from(array.as_primitive::<UInt8Type>().value(row)),
        DataType::UInt16 => Value::from(array.as_primitive::<UInt16Type>().value(row)),
        DataType::UInt32 => Value::from(array.as_primitive::<UInt32Type>().value(row)),
        DataType::UInt64 => Value::from(array.as_primitive::<UInt64Type>().value(row)),
        // HUGEINT, e.g. SUM over an integer column.
        DataType::Decimal128(_, 0) => {
            wide_integer_value(array.as_primitive::<Decimal128Type>().value(row))
        }
        DataType::Float32 => float_value(array.as_primitive::<Float32Type>().value(row) as f64),
        DataType::Float64 => float_value(array.as_primitive::<Float64Type>().value(row)),
        DataType::Utf8 => Value::String(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Value::String(array.as_string::<i64>().value(row).to_string()),
        other => match formatter {
            Some(f) => Value::String(f.value(row).to_string()),
            None => {
                warn!("No text rendering for Arrow type {}; returning null", other);
                Value::Null
            }
        },
    }
}

fn wide_integer_value(v: i128) -> Value {
    if let Ok(i) = i64::try_from(v) {
        Value::from(i)
    } else if let Ok(u) = u64::try_from(v) {
        Value::from(u)
    } else {
        Value::String(v.to_string())
    }
}

fn float_value(v: f64) -> Value {
    Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}
