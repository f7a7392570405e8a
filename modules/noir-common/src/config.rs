use std::env;
use std::time::Duration;

use tracing::info;

use crate::error::NoirError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Narrative model
    pub openai_api_key: Option<String>,
    pub model: String,
    pub temperature: f32,

    // Retrieval
    pub max_hops: usize,
    pub query_timeout: Duration,
    pub taxonomy_path: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, NoirError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, NoirError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| NoirError::Config(format!("{key} environment variable is required")))
        };

        let neo4j_user = get("NEO4J_USER")
            .or_else(|| get("NEO4J_USERNAME"))
            .ok_or_else(|| NoirError::Config("NEO4J_USER environment variable is required".into()))?;

        Ok(Self {
            neo4j_uri: required("NEO4J_URI")?,
            neo4j_user,
            neo4j_password: required("NEO4J_PASSWORD")?,
            openai_api_key: get("OPENAI_API_KEY"),
            model: get("NOIR_MODEL").unwrap_or_else(|| "gpt-4o".to_string()),
            temperature: parse_or("NOIR_TEMPERATURE", get("NOIR_TEMPERATURE"), 0.0)?,
            max_hops: parse_or("NOIR_MAX_HOPS", get("NOIR_MAX_HOPS"), 3)?,
            query_timeout: Duration::from_secs(parse_or(
                "NOIR_QUERY_TIMEOUT_SECS",
                get("NOIR_QUERY_TIMEOUT_SECS"),
                10,
            )?),
            taxonomy_path: get("NOIR_TAXONOMY_PATH"),
        })
    }

    /// Log the effective configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = redact(Some(&self.neo4j_password)),
            openai_api_key = redact(self.openai_api_key.as_deref()),
            model = self.model.as_str(),
            temperature = self.temperature,
            max_hops = self.max_hops,
            query_timeout_secs = self.query_timeout.as_secs(),
            taxonomy_path = self.taxonomy_path.as_deref().unwrap_or("<builtin>"),
            "Loaded configuration"
        );
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, value: Option<String>, default: T) -> Result<T, NoirError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| NoirError::Config(format!("{key} has an invalid value: {v}"))),
        None => Ok(default),
    }
}

fn redact(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "****",
        _ => "<unset>",
    }
}
