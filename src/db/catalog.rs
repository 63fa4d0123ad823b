use crate::db::db_pool::DuckDBConnectionManager;
use crate::db::db_utils::quote_identifier;
use crate::db::CatalogError;
use r2d2::Pool;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use tracing::debug;

/// One (table, column) row of the catalog, already joined with key metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogColumn {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub is_primary_key: bool,
    pub foreign_table: Option<String>,
    pub foreign_column: Option<String>,
}

/// Blocking access to a live catalog. Implementations are driven from
/// `spawn_blocking`, never from the async executor directly.
pub trait CatalogSource: Send + Sync {
    /// Base tables of the application schema, ordered by table name then
    /// column ordinal position.
    fn columns(&self) -> Result<Vec<CatalogColumn>, CatalogError>;

    fn row_count(&self, table: &str) -> Result<u64, CatalogError>;

    fn sample_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>, CatalogError>;
}

const COLUMNS_SQL: &str = "
    SELECT c.table_name, c.column_name, c.data_type, c.is_nullable
    FROM information_schema.columns c
    JOIN information_schema.tables t
      ON t.table_schema = c.table_schema AND t.table_name = c.table_name
    WHERE c.table_schema = ? AND t.table_type = 'BASE TABLE'
    ORDER BY c.table_name, c.ordinal_position
";

const CONSTRAINTS_SQL: &str = "
    SELECT table_name, constraint_type, constraint_text
    FROM duckdb_constraints()
    WHERE schema_name = ? AND constraint_type IN ('PRIMARY KEY', 'FOREIGN KEY')
";

static PRIMARY_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)^\s*PRIMARY\s+KEY\s*\((.*)\)\s*$").expect("primary key pattern")
});

static FOREIGN_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)FOREIGN\s+KEY\s*\((.*?)\)\s*REFERENCES\s+(.+?)\s*\((.*?)\)\s*$")
        .expect("foreign key pattern")
});

/// Catalog of a DuckDB database reached through the shared pool.
pub struct DuckDbCatalog {
    pool: Pool<DuckDBConnectionManager>,
    schema: String,
}

impl DuckDbCatalog {
    pub fn new(pool: Pool<DuckDBConnectionManager>, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    fn qualified(&self, table: &str) -> String {
        format!("{}.{}", quote_identifier(&self.schema), quote_identifier(table))
    }
}

impl CatalogSource for DuckDbCatalog {
    fn columns(&self) -> Result<Vec<CatalogColumn>, CatalogError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(COLUMNS_SQL)?;
        let mut columns = stmt
            .query_map([&self.schema], |row| {
                Ok(CatalogColumn {
                    table_name: row.get(0)?,
                    column_name: row.get(1)?,
                    data_type: row.get(2)?,
                    is_nullable: row.get::<_, String>(3)?.eq_ignore_ascii_case("YES"),
                    is_primary_key: false,
                    foreign_table: None,
                    foreign_column: None,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = conn.prepare(CONSTRAINTS_SQL)?;
        let constraints = stmt
            .query_map([&self.schema], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let keys = KeyIndex::from_constraints(&constraints);
        keys.apply(&mut columns);

        debug!(
            "Catalog lists {} columns and {} key constraints in schema {}",
            columns.len(),
            constraints.len(),
            self.schema
        );
        Ok(columns)
    }

    fn row_count(&self, table: &str) -> Result<u64, CatalogError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualified(table));
        let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn sample_values(
        &self,
        table: &str,
        column: &str,
        limit: usize,
    ) -> Result<Vec<String>, CatalogError> {
        let conn = self.pool.get()?;
        let col = quote_identifier(column);
        let sql = format!(
            "SELECT DISTINCT CAST({col} AS VARCHAR) FROM {} WHERE {col} IS NOT NULL ORDER BY 1 LIMIT ?",
            self.qualified(table)
        );
        let mut stmt = conn.prepare(&sql)?;
        let values = stmt
            .query_map([limit as i64], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

/// Primary and foreign keys keyed by lower-cased (table, column).
#[derive(Debug, Default)]
struct KeyIndex {
    primary: HashSet<(String, String)>,
    foreign: HashMap<(String, String), (String, String)>,
}

impl KeyIndex {
    fn from_constraints(constraints: &[(String, String, String)]) -> Self {
        let mut index = KeyIndex::default();

        for (table, kind, text) in constraints {
            let table_key = table.to_lowercase();
            if kind.eq_ignore_ascii_case("PRIMARY KEY") {
                if let Some(caps) = PRIMARY_KEY.captures(text) {
                    for column in split_identifiers(&caps[1]) {
                        index.primary.insert((table_key.clone(), column.to_lowercase()));
                    }
                }
            } else if let Some(caps) = FOREIGN_KEY.captures(text) {
                let local = split_identifiers(&caps[1]);
                let target = last_segment(&caps[2]);
                let remote = split_identifiers(&caps[3]);
                for (column, foreign_column) in local.into_iter().zip(remote) {
                    index
                        .foreign
                        .entry((table_key.clone(), column.to_lowercase()))
                        .or_insert_with(|| (target.clone(), foreign_column));
                }
            } else {
                debug!("Unrecognized constraint on {}: {}", table, text);
            }
        }

        index
    }

    fn apply(&self, columns: &mut [CatalogColumn]) {
        for column in columns {
            let key = (
                column.table_name.to_lowercase(),
                column.column_name.to_lowercase(),
            );
            column.is_primary_key = self.primary.contains(&key);
            if let Some((table, col)) = self.foreign.get(&key) {
                column.foreign_table = Some(table.clone());
                column.foreign_column = Some(col.clone());
            }
        }
    }
}

fn unquote(identifier: &str) -> String {
    let trimmed = identifier.trim();
    match trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) => inner.replace("\"\"", "\""),
        None => trimmed.to_string(),
    }
}

fn split_identifiers(list: &str) -> Vec<String> {
    list.split(',')
        .map(unquote)
        .filter(|s| !s.is_empty())
        .collect()
}

/// `main.equipment` → `equipment`
fn last_segment(qualified: &str) -> String {
    unquote(qualified.rsplit('.').next().unwrap_or(qualified))
}
