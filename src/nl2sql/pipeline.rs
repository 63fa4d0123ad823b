use crate::llm::{LanguageModel, ReplyFormat};
use crate::nl2sql::discovery::{describe_schema, SchemaDiscovery};
use crate::nl2sql::executor::QueryExecutor;
use crate::nl2sql::format::ResultFormatter;
use crate::nl2sql::generator::SqlGenerator;
use crate::nl2sql::intent::{parse_intent, validate_intent};
use crate::nl2sql::models::{DatabaseSchema, ParsedIntent, QueryResult, SqlQuery};
use crate::nl2sql::prompts::{answer_prompt, intent_prompt};
use crate::nl2sql::Nl2SqlError;
use chrono::Local;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything produced while answering one question.
#[derive(Debug, Clone)]
pub struct Answer {
    pub intent: ParsedIntent,
    pub query: SqlQuery,
    pub result: QueryResult,
}

pub struct Nl2SqlPipeline {
    discovery: SchemaDiscovery,
    model: Arc<dyn LanguageModel>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    formatter: ResultFormatter,
}

impl Nl2SqlPipeline {
    pub fn new(
        discovery: SchemaDiscovery,
        model: Arc<dyn LanguageModel>,
        generator: SqlGenerator,
        executor: QueryExecutor,
    ) -> Self {
        Self {
            discovery,
            model,
            generator,
            executor,
            formatter: ResultFormatter::default(),
        }
    }

    pub fn with_formatter(mut self, formatter: ResultFormatter) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn formatter(&self) -> &ResultFormatter {
        &self.formatter
    }

    pub async fn schema(&self, force_refresh: bool) -> Result<Arc<DatabaseSchema>, Nl2SqlError> {
        self.discovery.discover(force_refresh).await
    }

    pub async fn schema_description(&self, force_refresh: bool) -> Result<String, Nl2SqlError> {
        let schema = self.schema(force_refresh).await?;
        Ok(describe_schema(&schema))
    }

    /// Question to compiled query, without running it.
    pub async fn plan(&self, question: &str) -> Result<(ParsedIntent, SqlQuery), Nl2SqlError> {
        let schema = self.schema(false).await?;
        let prompt = intent_prompt(
            &describe_schema(&schema),
            &Local::now().format("%Y-%m-%d").to_string(),
            question,
        );

        let reply = self.model.complete(&prompt, ReplyFormat::Json).await?;
        debug!("Model reply: {}", reply);

        let intent = validate_intent(parse_intent(&reply, question)?, &schema)?;
        info!(
            "Parsed intent over {:?} (confidence {:.2})",
            intent.tables, intent.confidence
        );

        let query = self.generator.generate(&intent, &schema)?;
        Ok((intent, query))
    }

    /// Runs the whole pipeline. Execution failures come back inside the
    /// answer's result; everything before execution is a hard error.
    pub async fn answer(&self, question: &str) -> Result<Answer, Nl2SqlError> {
        info!("Answering: {}", question);
        let (intent, query) = self.plan(question).await?;
        let result = self.executor.execute(&query).await;

        Ok(Answer {
            intent,
            query,
            result,
        })
    }

    /// Asks the model for a prose answer grounded in the query results.
    pub async fn narrate(&self, answer: &Answer) -> Result<String, Nl2SqlError> {
        let prompt = answer_prompt(
            &answer.intent.original_question,
            &answer.query.description,
            &self.formatter.format_markdown(&answer.result),
            answer.result.row_count,
            &answer.result.column_names,
        );
        Ok(self.model.complete(&prompt, ReplyFormat::Text).await?)
    }
}
