pub mod catalog;
pub mod db_pool;
pub mod db_utils;
pub mod schema_cache;

use std::error::Error;
use std::fmt;

pub use catalog::{CatalogColumn, CatalogSource, DuckDbCatalog};
pub use db_pool::DuckDBConnectionManager;
pub use schema_cache::SchemaCache;

#[derive(Debug)]
pub enum CatalogError {
    Pool(String),
    Query(String),
    Task(String),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Pool(msg) => write!(f, "Connection pool error: {}", msg),
            CatalogError::Query(msg) => write!(f, "Catalog query failed: {}", msg),
            CatalogError::Task(msg) => write!(f, "Catalog task failed: {}", msg),
        }
    }
}

impl Error for CatalogError {}

impl From<duckdb::Error> for CatalogError {
    fn from(err: duckdb::Error) -> Self {
        CatalogError::Query(err.to_string())
    }
}

impl From<r2d2::Error> for CatalogError {
    fn from(err: r2d2::Error) -> Self {
        CatalogError::Pool(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CatalogError {
    fn from(err: tokio::task::JoinError) -> Self {
        CatalogError::Task(err.to_string())
    }
}
