//! Shared fixtures: a seeded in-memory DuckDB database and a language model
//! that replays canned replies.

#![allow(dead_code)]

use async_trait::async_trait;
use nl_query::db::{CatalogSource, DuckDBConnectionManager, DuckDbCatalog, SchemaCache};
use nl_query::llm::{LanguageModel, LlmError, ReplyFormat};
use nl_query::nl2sql::discovery::SchemaDiscovery;
use r2d2::Pool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const SEED_SQL: &str = "
    CREATE TABLE equipment (
        id INTEGER PRIMARY KEY,
        equipment_id VARCHAR UNIQUE NOT NULL,
        tipo_maquina VARCHAR
    );
    CREATE TABLE failure_events (
        id INTEGER PRIMARY KEY,
        equipment_id VARCHAR REFERENCES equipment(equipment_id),
        descripcion_falla VARCHAR,
        costo_total DECIMAL(12,2),
        fecha DATE
    );
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        email VARCHAR
    );

    INSERT INTO equipment VALUES
        (1, 'EQ-1', 'Excavadora'),
        (2, 'EQ-2', 'Cargador'),
        (3, 'EQ-3', 'Excavadora');

    INSERT INTO failure_events VALUES
        (1, 'EQ-1', 'Motor sobrecalentado', 15000.50, DATE '2024-01-15'),
        (2, 'EQ-1', 'Fuga hidraulica', 2500.00, DATE '2024-02-03'),
        (3, 'EQ-2', 'Falla electrica', 800.25, DATE '2024-02-20'),
        (4, 'EQ-3', 'Motor sobrecalentado', 12000.00, DATE '2024-03-11'),
        (5, 'EQ-2', 'Neumatico', 450.00, DATE '2024-04-02');

    INSERT INTO users VALUES (1, 'ops@example.com');
";

pub fn seeded_pool() -> Pool<DuckDBConnectionManager> {
    let manager = DuckDBConnectionManager::in_memory().unwrap();
    let pool = Pool::builder().max_size(4).build(manager).unwrap();
    pool.get().unwrap().execute_batch(SEED_SQL).unwrap();
    pool
}

pub fn discovery(pool: &Pool<DuckDBConnectionManager>, include_internal: bool) -> SchemaDiscovery {
    let catalog: Arc<dyn CatalogSource> = Arc::new(DuckDbCatalog::new(pool.clone(), "main"));
    let cache = Arc::new(SchemaCache::new(Duration::from_secs(3600)));
    SchemaDiscovery::new(catalog, cache, include_internal)
}

/// Replays replies in order and records every prompt it was given.
#[derive(Default)]
pub struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn replying(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::from([Err(message.to_string())])),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _format: ReplyFormat) -> Result<String, LlmError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.replies.lock().unwrap().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(LlmError::ConnectionError(message)),
            None => Err(LlmError::ResponseError("no scripted reply left".into())),
        }
    }
}
