use clap::Parser;
use r2d2::Pool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use nl_query::config::{AppConfig, CliArgs};
use nl_query::db::{CatalogSource, DuckDBConnectionManager, DuckDbCatalog, SchemaCache};
use nl_query::llm::{LanguageModel, LlmManager};
use nl_query::nl2sql::detector::QueryDetector;
use nl_query::nl2sql::discovery::SchemaDiscovery;
use nl_query::nl2sql::executor::QueryExecutor;
use nl_query::nl2sql::format::ResultFormatter;
use nl_query::nl2sql::generator::SqlGenerator;
use nl_query::nl2sql::pipeline::Nl2SqlPipeline;
use nl_query::nl2sql::Nl2SqlError;
use nl_query::util::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(config.logging.json);

    info!(
        "Initializing DuckDB connection pool for {}",
        config.database.connection_string
    );
    let db_manager = DuckDBConnectionManager::new(
        config.database.connection_string.clone(),
        config.database.read_only,
    )?;
    let pool = Pool::builder()
        .max_size(config.database.pool_size as u32)
        .build(db_manager)?;

    let catalog: Arc<dyn CatalogSource> =
        Arc::new(DuckDbCatalog::new(pool.clone(), config.database.schema.clone()));
    let cache = Arc::new(SchemaCache::new(Duration::from_secs(
        config.discovery.cache_ttl_secs,
    )));
    let discovery = SchemaDiscovery::new(catalog, cache, config.discovery.include_internal_tables)
        .with_internal_tables(&config.discovery.internal_tables)
        .with_sample_size(config.discovery.sample_size);

    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let model: Arc<dyn LanguageModel> = Arc::new(LlmManager::new(&config.llm)?);

    let pipeline = Nl2SqlPipeline::new(
        discovery,
        Arc::clone(&model),
        SqlGenerator::new().with_default_date_column(&config.generator.default_date_column),
        QueryExecutor::from_config(pool, &config.executor),
    )
    .with_formatter(ResultFormatter::from_config(&config.display));

    if args.schema {
        println!("{}", pipeline.schema_description(args.refresh).await?);
        return Ok(());
    }

    let Some(question) = args.question.as_deref() else {
        return Err("a question is required unless --schema is given".into());
    };

    if !args.force {
        let detector = QueryDetector::default();
        let detection = detector.detect(question, Some(model.as_ref())).await;
        if !detector.accepts(&detection) {
            println!(
                "This does not look like a question about the data ({}). Use --force to run it anyway.",
                detection.reasoning
            );
            return Ok(());
        }
    }

    if args.refresh {
        pipeline.schema(true).await?;
    }

    let answer = match pipeline.answer(question).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("Could not answer the question: {}", e);
            return Err(e.into());
        }
    };

    if args.show_sql {
        println!("-- {}", answer.query.description);
        println!("{}", answer.query.sql);
        if !answer.query.parameters.is_empty() {
            let ordered: BTreeMap<_, _> = answer.query.parameters.iter().collect();
            println!("-- parameters: {}", serde_json::to_string(&ordered)?);
        }
        println!();
    }

    let formatter = pipeline.formatter();
    if args.markdown {
        println!("{}", formatter.format_markdown(&answer.result));
    } else {
        println!("{}", formatter.format_text(&answer.result));
    }
    if answer.result.truncated {
        println!("(results limited to {} rows)", config.executor.max_rows);
    }

    if !answer.result.success {
        let message = answer.result.error_message.unwrap_or_default();
        return Err(Nl2SqlError::QueryExecution(message).into());
    }

    if args.narrate {
        println!();
        println!("{}", pipeline.narrate(&answer).await?);
    }

    Ok(())
}
