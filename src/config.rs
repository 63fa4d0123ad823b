use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    /// Open file-backed databases without write access
    pub read_only: bool,
    /// Catalog schema that discovery introspects
    pub schema: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub include_internal_tables: bool,
    pub internal_tables: Vec<String>,
    pub cache_ttl_secs: u64,
    pub sample_size: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_rows: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub text_rows: usize,
    pub markdown_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeneratorConfig {
    pub default_date_column: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub backend: String, // "ollama" or "remote"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoggingConfig {
    pub json: bool,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub discovery: DiscoveryConfig,
    pub executor: ExecutorConfig,
    pub display: DisplayConfig,
    pub generator: GeneratorConfig,
    pub llm: LlmConfig,
    pub logging: LoggingConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// DuckDB database to query (overrides database.connection_string)
    #[arg(short, long, value_name = "PATH")]
    pub database: Option<String>,

    /// Rediscover the schema instead of using the cached snapshot
    #[arg(long)]
    pub refresh: bool,

    /// Print the schema description and exit
    #[arg(long)]
    pub schema: bool,

    /// Render the result as a markdown table
    #[arg(long)]
    pub markdown: bool,

    /// Print the compiled SQL and its parameters before the result
    #[arg(long)]
    pub show_sql: bool,

    /// Run the pipeline even if the question does not look like a data question
    #[arg(long)]
    pub force: bool,

    /// Follow the result with a prose answer written by the model
    #[arg(long)]
    pub narrate: bool,

    /// Include internal application tables in discovery
    #[arg(long)]
    pub include_internal: bool,

    /// The question to answer
    pub question: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = [
                "config.toml",
                "config/config.toml",
                "/etc/nl-query/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // NLQ_DATABASE__CONNECTION_STRING=... and friends
        config_builder = config_builder.add_source(
            Environment::with_prefix("NLQ")
                .prefix_separator("_")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }
        if args.include_internal {
            config.discovery.include_internal_tables = true;
        }

        Ok(config)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_string: "nl-query.db".to_string(),
            pool_size: 4,
            read_only: true,
            schema: "main".to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include_internal_tables: false,
            internal_tables: ["users", "conversations", "messages", "reports"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            cache_ttl_secs: 3600,
            sample_size: 20,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_rows: 1000,
            timeout_secs: 30,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            text_rows: 50,
            markdown_rows: 30,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            default_date_column: "fecha".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            model: "qwen2.5-coder".to_string(),
            api_key: None,
            api_url: None,
            temperature: 0.1,
        }
    }
}
