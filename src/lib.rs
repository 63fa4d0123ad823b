pub mod config;
pub mod db;
pub mod llm;
pub mod nl2sql;
pub mod util;
