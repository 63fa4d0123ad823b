pub mod detector;
pub mod discovery;
pub mod executor;
pub mod format;
pub mod generator;
pub mod intent;
pub mod models;
pub mod pipeline;
pub mod prompts;

use crate::db::CatalogError;
use crate::llm::LlmError;
use std::error::Error;
use std::fmt;

/// Hard failures of the question-to-answer pipeline. Soft degradations
/// (dropped predicates, unknown tables that still leave a valid one, failed
/// enrichment) never surface here.
#[derive(Debug)]
pub enum Nl2SqlError {
    SchemaDiscovery(String),
    IntentParsing(String),
    SqlGeneration(String),
    QueryExecution(String),
    Model(LlmError),
}

impl fmt::Display for Nl2SqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nl2SqlError::SchemaDiscovery(msg) => write!(f, "Schema discovery error: {}", msg),
            Nl2SqlError::IntentParsing(msg) => write!(f, "Intent parsing error: {}", msg),
            Nl2SqlError::SqlGeneration(msg) => write!(f, "SQL generation error: {}", msg),
            Nl2SqlError::QueryExecution(msg) => write!(f, "Query execution error: {}", msg),
            Nl2SqlError::Model(err) => write!(f, "{}", err),
        }
    }
}

impl Error for Nl2SqlError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Nl2SqlError::Model(err) => Some(err),
            _ => None,
        }
    }
}

impl From<CatalogError> for Nl2SqlError {
    fn from(err: CatalogError) -> Self {
        Nl2SqlError::SchemaDiscovery(err.to_string())
    }
}

impl From<LlmError> for Nl2SqlError {
    fn from(err: LlmError) -> Self {
        Nl2SqlError::Model(err)
    }
}
