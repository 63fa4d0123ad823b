use crate::db::{CatalogColumn, CatalogSource, SchemaCache};
use crate::nl2sql::models::{ColumnInfo, DatabaseSchema, TableInfo};
use crate::nl2sql::Nl2SqlError;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const SCHEMA_CACHE_KEY: &str = "database_schema";
const SCHEMA_CACHE_KEY_INTERNAL: &str = "database_schema:internal";

pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// Migration bookkeeping, statistics and spatial metadata. Never discoverable.
const INFRASTRUCTURE_TABLES: &[&str] = &[
    "alembic_version",
    "schema_migrations",
    "__diesel_schema_migrations",
    "_sqlx_migrations",
    "refinery_schema_history",
    "flyway_schema_history",
    "pg_stat_statements",
    "spatial_ref_sys",
    "geometry_columns",
    "geography_columns",
    "raster_columns",
    "raster_overviews",
];

/// Reserved by the engines themselves; no application table can carry it.
const SYSTEM_CATALOG_PREFIX: &str = "sqlite_";

pub const DEFAULT_INTERNAL_TABLES: &[&str] = &["users", "conversations", "messages", "reports"];

/// Decides which catalog tables make it into a snapshot.
#[derive(Debug, Clone)]
pub struct TableFilter {
    include_internal: bool,
    internal: HashSet<String>,
}

impl TableFilter {
    pub fn new<I, S>(include_internal: bool, internal_tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            include_internal,
            internal: internal_tables
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        }
    }

    pub fn allows(&self, table: &str) -> bool {
        let name = table.to_lowercase();
        if INFRASTRUCTURE_TABLES.contains(&name.as_str())
            || name.starts_with(SYSTEM_CATALOG_PREFIX)
        {
            return false;
        }
        self.include_internal || !self.internal.contains(&name)
    }
}

/// Introspects the live catalog into [`DatabaseSchema`] snapshots and keeps
/// them in the shared [`SchemaCache`].
pub struct SchemaDiscovery {
    source: Arc<dyn CatalogSource>,
    cache: Arc<SchemaCache>,
    filter: TableFilter,
    sample_size: usize,
}

impl SchemaDiscovery {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        cache: Arc<SchemaCache>,
        include_internal_tables: bool,
    ) -> Self {
        Self {
            source,
            cache,
            filter: TableFilter::new(include_internal_tables, DEFAULT_INTERNAL_TABLES),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }

    /// Replaces the default set of internal application tables.
    pub fn with_internal_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.filter = TableFilter::new(self.filter.include_internal, tables);
        self
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn includes_internal_tables(&self) -> bool {
        self.filter.include_internal
    }

    fn cache_key(&self) -> &'static str {
        if self.filter.include_internal {
            SCHEMA_CACHE_KEY_INTERNAL
        } else {
            SCHEMA_CACHE_KEY
        }
    }

    /// Returns the cached snapshot, or introspects the catalog when the cache
    /// is cold, expired, or `force_refresh` is set.
    pub async fn discover(&self, force_refresh: bool) -> Result<Arc<DatabaseSchema>, Nl2SqlError> {
        self.cache
            .get_or_refresh(self.cache_key(), force_refresh, || self.introspect())
            .await
    }

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    async fn introspect(&self) -> Result<DatabaseSchema, Nl2SqlError> {
        let source = Arc::clone(&self.source);
        let filter = self.filter.clone();
        let sample_size = self.sample_size;

        let schema = tokio::task::spawn_blocking(move || {
            build_schema(source.as_ref(), &filter, sample_size)
        })
        .await
        .map_err(|e| Nl2SqlError::SchemaDiscovery(format!("discovery task failed: {}", e)))?
        .inspect_err(|e| error!("Schema discovery failed: {}", e))?;

        info!("Discovered {} tables", schema.tables().len());
        Ok(schema)
    }
}

/// Runs the catalog query, groups and filters it, then enriches every table.
/// Only the catalog query itself can fail.
pub fn build_schema(
    source: &dyn CatalogSource,
    filter: &TableFilter,
    sample_size: usize,
) -> Result<DatabaseSchema, Nl2SqlError> {
    let rows = source.columns()?;
    let mut tables = group_tables(rows, filter);

    for table in &mut tables {
        enrich_table(source, table, sample_size);
    }

    Ok(DatabaseSchema::new(tables))
}

fn group_tables(rows: Vec<CatalogColumn>, filter: &TableFilter) -> Vec<TableInfo> {
    let mut tables: Vec<TableInfo> = Vec::new();
    let mut skipped: HashSet<String> = HashSet::new();

    for row in rows {
        if !filter.allows(&row.table_name) {
            if skipped.insert(row.table_name.clone()) {
                debug!("Skipping table {}", row.table_name);
            }
            continue;
        }

        let column = column_from_row(&row);
        let continues_table = tables.last().is_some_and(|t| t.name == row.table_name);
        if !continues_table {
            tables.push(TableInfo::new(row.table_name, vec![column]));
        } else if let Some(table) = tables.last_mut() {
            if table.columns.iter().all(|c| c.name != column.name) {
                table.columns.push(column);
            }
        }
    }

    tables
}

fn column_from_row(row: &CatalogColumn) -> ColumnInfo {
    let mut column = ColumnInfo::new(&row.column_name, &row.data_type);
    column.is_nullable = row.is_nullable;
    column.is_primary_key = row.is_primary_key;
    if let (Some(table), Some(col)) = (&row.foreign_table, &row.foreign_column) {
        column = column.references(table, col);
    }
    column
}

fn enrich_table(source: &dyn CatalogSource, table: &mut TableInfo, sample_size: usize) {
    table.row_count = match source.row_count(&table.name) {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Could not count rows of {}: {}", table.name, e);
            None
        }
    };

    if sample_size == 0 {
        return;
    }

    for column in table.columns.iter_mut().filter(|c| c.is_text_like()) {
        column.sample_values = match source.sample_values(&table.name, &column.name, sample_size) {
            Ok(values) => values,
            Err(e) => {
                warn!(
                    "Could not sample {}.{}: {}",
                    table.name, column.name, e
                );
                Vec::new()
            }
        };
    }
}

/// Renders the snapshot as the plain-text description handed to the language
/// model. Depends on the snapshot alone, so the same value always yields the
/// same text.
pub fn describe_schema(schema: &DatabaseSchema) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "DATABASE SCHEMA ({} tables)", schema.tables().len());

    let mut relationships = Vec::new();

    for table in schema.tables() {
        out.push('\n');
        match table.row_count {
            Some(count) => {
                let _ = writeln!(out, "Table: {} ({} rows)", table.name, count);
            }
            None => {
                let _ = writeln!(out, "Table: {} (row count unknown)", table.name);
            }
        }
        if let Some(description) = &table.description {
            let _ = writeln!(out, "Description: {}", description);
        }
        out.push_str("Columns:\n");

        for column in &table.columns {
            let mut notes = vec![column.data_type.clone()];
            if column.is_primary_key {
                notes.push("PK".to_string());
            }
            if let (true, Some(ft), Some(fc)) = (
                column.is_foreign_key,
                &column.foreign_table,
                &column.foreign_column,
            ) {
                notes.push(format!("FK -> {}.{}", ft, fc));
                relationships.push(format!("{}.{} -> {}.{}", table.name, column.name, ft, fc));
            }
            if !column.is_nullable {
                notes.push("NOT NULL".to_string());
            }

            let _ = write!(out, "  - {} ({})", column.name, notes.join(", "));
            if !column.sample_values.is_empty() {
                let samples: Vec<String> = column
                    .sample_values
                    .iter()
                    .map(|v| format!("'{}'", v))
                    .collect();
                let _ = write!(out, " samples: {}", samples.join(", "));
            }
            out.push('\n');
        }
    }

    if !relationships.is_empty() {
        out.push_str("\nRELATIONSHIPS:\n");
        for relationship in relationships {
            let _ = writeln!(out, "  - {}", relationship);
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CatalogError;
    use std::collections::HashMap;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCatalog {
        rows: Vec<CatalogColumn>,
        counts: HashMap<String, u64>,
        samples: HashMap<(String, String), Vec<String>>,
        broken_tables: HashSet<String>,
        catalog_down: bool,
    }

    impl FakeCatalog {
        fn column(mut self, table: &str, name: &str, data_type: &str) -> Self {
            self.rows.push(CatalogColumn {
                table_name: table.into(),
                column_name: name.into(),
                data_type: data_type.into(),
                is_nullable: true,
                is_primary_key: false,
                foreign_table: None,
                foreign_column: None,
            });
            self
        }

        fn key(mut self) -> Self {
            if let Some(last) = self.rows.last_mut() {
                last.is_primary_key = true;
                last.is_nullable = false;
            }
            self
        }

        fn fk(mut self, table: &str, column: &str) -> Self {
            if let Some(last) = self.rows.last_mut() {
                last.foreign_table = Some(table.into());
                last.foreign_column = Some(column.into());
            }
            self
        }
    }

    impl CatalogSource for FakeCatalog {
        fn columns(&self) -> Result<Vec<CatalogColumn>, CatalogError> {
            if self.catalog_down {
                return Err(CatalogError::Query("catalog unavailable".into()));
            }
            Ok(self.rows.clone())
        }

        fn row_count(&self, table: &str) -> Result<u64, CatalogError> {
            if self.broken_tables.contains(table) {
                return Err(CatalogError::Query(format!("cannot count {}", table)));
            }
            Ok(self.counts.get(table).copied().unwrap_or(0))
        }

        fn sample_values(
            &self,
            table: &str,
            column: &str,
            limit: usize,
        ) -> Result<Vec<String>, CatalogError> {
            if self.broken_tables.contains(table) {
                return Err(CatalogError::Query(format!("cannot sample {}", table)));
            }
            let mut values = self
                .samples
                .get(&(table.to_string(), column.to_string()))
                .cloned()
                .unwrap_or_default();
            values.truncate(limit);
            Ok(values)
        }
    }

    fn maintenance_catalog() -> FakeCatalog {
        let mut catalog = FakeCatalog::default()
            .column("alembic_version", "version_num", "VARCHAR")
            .column("equipment", "id", "INTEGER")
            .key()
            .column("equipment", "tipo_maquina", "VARCHAR")
            .column("failure_events", "id", "INTEGER")
            .key()
            .column("failure_events", "equipment_id", "INTEGER")
            .fk("equipment", "id")
            .column("failure_events", "costo_total", "DECIMAL(12,2)")
            .column("spatial_ref_sys", "srid", "INTEGER")
            .column("users", "email", "VARCHAR");
        catalog.counts.insert("equipment".into(), 50);
        catalog.counts.insert("failure_events".into(), 3000);
        catalog.samples.insert(
            ("equipment".into(), "tipo_maquina".into()),
            vec!["Cargador".into(), "Excavadora".into()],
        );
        catalog
    }

    fn discovery(catalog: FakeCatalog, include_internal: bool) -> SchemaDiscovery {
        SchemaDiscovery::new(
            Arc::new(catalog),
            Arc::new(SchemaCache::new(Duration::from_secs(3600))),
            include_internal,
        )
    }

    #[tokio::test]
    async fn infrastructure_tables_are_never_discovered() {
        for include_internal in [false, true] {
            let schema = discovery(maintenance_catalog(), include_internal)
                .discover(false)
                .await
                .unwrap();
            assert!(schema.get_table("alembic_version").is_none());
            assert!(schema.get_table("spatial_ref_sys").is_none());
        }
    }

    #[test]
    fn lookalike_application_tables_stay_visible() {
        let filter = TableFilter::new(false, DEFAULT_INTERNAL_TABLES);
        assert!(filter.allows("duck_sightings"));
        assert!(filter.allows("pg_exports"));
        assert!(!filter.allows("sqlite_sequence"));
        assert!(!filter.allows("PG_STAT_STATEMENTS"));
    }

    #[tokio::test]
    async fn internal_tables_follow_capability_flag() {
        let hidden = discovery(maintenance_catalog(), false).discover(false).await.unwrap();
        assert_eq!(hidden.table_names(), vec!["equipment", "failure_events"]);

        let shown = discovery(maintenance_catalog(), true).discover(false).await.unwrap();
        assert_eq!(shown.table_names(), vec!["equipment", "failure_events", "users"]);
    }

    #[tokio::test]
    async fn groups_columns_and_keys_in_catalog_order() {
        let schema = discovery(maintenance_catalog(), false).discover(false).await.unwrap();
        let events = schema.get_table("failure_events").unwrap();

        let names: Vec<&str> = events.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "equipment_id", "costo_total"]);
        assert!(events.columns[0].is_primary_key);
        assert!(events.columns[1].is_foreign_key);
        assert_eq!(events.columns[1].foreign_table.as_deref(), Some("equipment"));
        assert_eq!(events.row_count, Some(3000));

        let equipment = schema.get_table("equipment").unwrap();
        assert_eq!(
            equipment.column("tipo_maquina").unwrap().sample_values,
            vec!["Cargador", "Excavadora"]
        );
        assert!(equipment.column("id").unwrap().sample_values.is_empty());
    }

    #[tokio::test]
    async fn enrichment_failures_do_not_abort_discovery() {
        let mut catalog = maintenance_catalog();
        catalog.broken_tables.insert("equipment".into());

        let schema = discovery(catalog, false).discover(false).await.unwrap();
        let equipment = schema.get_table("equipment").unwrap();

        assert_eq!(equipment.row_count, None);
        assert!(equipment.column("tipo_maquina").unwrap().sample_values.is_empty());
        assert_eq!(schema.get_table("failure_events").unwrap().row_count, Some(3000));
    }

    #[tokio::test]
    async fn catalog_failure_is_fatal() {
        let catalog = FakeCatalog {
            catalog_down: true,
            ..FakeCatalog::default()
        };
        let err = discovery(catalog, false).discover(false).await.unwrap_err();
        assert!(matches!(err, Nl2SqlError::SchemaDiscovery(_)));
    }

    #[tokio::test]
    async fn custom_internal_tables_replace_defaults() {
        let schema = discovery(maintenance_catalog(), false)
            .with_internal_tables(["equipment"])
            .discover(false)
            .await
            .unwrap();
        assert_eq!(schema.table_names(), vec!["failure_events", "users"]);
    }

    #[test]
    fn description_is_deterministic_and_complete() {
        let filter = TableFilter::new(false, DEFAULT_INTERNAL_TABLES);
        let schema = build_schema(&maintenance_catalog(), &filter, DEFAULT_SAMPLE_SIZE).unwrap();

        let text = describe_schema(&schema);
        assert_eq!(text, describe_schema(&schema.clone()));
        assert!(text.contains("Table: equipment (50 rows)"));
        assert!(text.contains("  - id (INTEGER, PK, NOT NULL)"));
        assert!(text.contains("  - tipo_maquina (VARCHAR) samples: 'Cargador', 'Excavadora'"));
        assert!(text.contains("  - equipment_id (INTEGER, FK -> equipment.id)"));
        assert!(text.ends_with("RELATIONSHIPS:\n  - failure_events.equipment_id -> equipment.id\n"));
        assert!(!text.contains("users"));
    }
}
