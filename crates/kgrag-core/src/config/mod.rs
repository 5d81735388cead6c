//! Configuration management with file persistence
//!
//! Settings live in `config.toml` under `$KGRAG_CONFIG_DIR` or the platform
//! config directory. Secrets (model API key, Neo4j credentials) are read from
//! the environment only and rejected when found in the file.

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::domain::ontology::{CUSTOMER_COMMERCE_PROFILE, OntologyRegistry, ProfileDefinition};

/// Default Bolt URI for the Neo4j backend
pub const DEFAULT_NEO4J_URI: &str = "bolt://localhost:7687";

/// Default cap on retrieved context records
pub const DEFAULT_RETRIEVAL_LIMIT: usize = 15;

/// Default number of characters kept from a source preview
pub const DEFAULT_PREVIEW_CHARS: usize = 2000;

/// Topics ingested when none are given on the command line
const DEFAULT_TOPICS: &[&str] = &[
    "PayPal_Inc.",
    "PayPal",
    "Apple_Inc.",
    "Customer_experience",
    "E-commerce",
    "Online_shopping",
    "Consumer_behavior",
    "Product_management",
    "Amazon_(company)",
    "Brand_loyalty",
    "Digital_Payments",
];

/// kgrag configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub graph: GraphConfig,
    pub source: SourceConfig,
    pub ontology: OntologyConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Only ever populated by a misconfigured file; see [`LlmConfig::enforce_env_only`]
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub default_model: String,
    pub fallback_models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            default_model: "google/gemini-2.5-flash".to_string(),
            fallback_models: vec!["openai/gpt-4o-mini".to_string()],
            temperature: 0.0,
            max_tokens: 2048,
            timeout_secs: 120,
        }
    }
}

/// Which graph store backs the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Sqlite,
    Neo4j,
}

impl std::fmt::Display for GraphBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphBackend::Sqlite => write!(f, "sqlite"),
            GraphBackend::Neo4j => write!(f, "neo4j"),
        }
    }
}

impl std::str::FromStr for GraphBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(GraphBackend::Sqlite),
            "neo4j" => Ok(GraphBackend::Neo4j),
            other => Err(anyhow!(
                "Invalid graph backend: {}. Valid options: sqlite, neo4j",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub backend: GraphBackend,
    /// Bolt URI, overridden by `NEO4J_URI`
    pub uri: String,
    #[serde(skip_serializing)]
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// SQLite database file; defaults to `graph.db` in the config directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    pub retrieval_limit: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            backend: GraphBackend::Sqlite,
            uri: DEFAULT_NEO4J_URI.to_string(),
            username: None,
            password: None,
            database_path: None,
            retrieval_limit: DEFAULT_RETRIEVAL_LIMIT,
        }
    }
}

/// Neo4j connection settings resolved from config and environment
#[derive(Clone)]
pub struct Neo4jCredentials {
    pub uri: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Neo4jCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jCredentials")
            .field("uri", &self.uri)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Wikipedia language edition
    pub language: String,
    pub preview_chars: usize,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            user_agent: concat!("kgrag/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OntologyConfig {
    /// Active profile id
    pub profile: String,
    /// Additional profiles declared by the user
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<ProfileDefinition>,
}

impl Default for OntologyConfig {
    fn default() -> Self {
        Self {
            profile: CUSTOMER_COMMERCE_PROFILE.to_string(),
            profiles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub topics: Vec<String>,
    /// Per-call deadline for model, store and source calls; 0 disables it
    pub call_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            call_timeout_secs: 180,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(env::var("KGRAG_API_KEY")
            .or_else(|_| env::var("OPENROUTER_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty()))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| opt.map(|key| redact(&key)))
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }
}

impl GraphConfig {
    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.username.is_some() || self.password.is_some() {
            return Err(anyhow!(
                "Neo4j credentials must be provided via NEO4J_USERNAME and NEO4J_PASSWORD, not stored in configuration"
            ));
        }
        Ok(())
    }

    /// Bolt URI after applying the `NEO4J_URI` override
    pub fn resolved_uri(&self) -> String {
        env::var("NEO4J_URI")
            .ok()
            .filter(|uri| !uri.trim().is_empty())
            .unwrap_or_else(|| self.uri.clone())
    }

    /// Resolve Neo4j credentials; username and password are required
    pub fn neo4j_credentials(&self) -> anyhow::Result<Neo4jCredentials> {
        self.enforce_env_only()?;

        let username = env::var("NEO4J_USERNAME")
            .map_err(|_| anyhow!("NEO4J_USERNAME must be set to use the neo4j backend"))?;
        let password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("NEO4J_PASSWORD must be set to use the neo4j backend"))?;

        Ok(Neo4jCredentials {
            uri: self.resolved_uri(),
            username,
            password,
        })
    }

    /// SQLite database file, falling back to the config directory
    pub fn resolved_database_path(&self) -> anyhow::Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Config::config_dir()?.join("graph.db")),
        }
    }
}

impl OntologyConfig {
    /// Built-in profiles plus the ones declared in the file
    pub fn registry(&self) -> anyhow::Result<OntologyRegistry> {
        let mut registry = OntologyRegistry::builtin();
        for definition in &self.profiles {
            registry
                .register(definition.clone())
                .with_context(|| format!("Invalid ontology profile '{}'", definition.id))?;
        }
        Ok(registry)
    }
}

fn redact(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 4 {
        "***".to_string()
    } else {
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("***{}", suffix)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("KGRAG_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("kgrag")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&contents)
                .with_context(|| format!("Failed to load config file: {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;
        self.graph.enforce_env_only()?;

        let registry = self.ontology.registry()?;
        if registry.get(&self.ontology.profile).is_none() {
            return Err(anyhow!(
                "Unknown ontology profile: {}. Available: {}",
                self.ontology.profile,
                registry.ids().join(", ")
            ));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            "llm.base_url" => Ok(self
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| "(default: https://openrouter.ai/api/v1)".to_string())),
            "llm.default_model" => Ok(self.llm.default_model.clone()),
            "llm.fallback_models" => Ok(self.llm.fallback_models.join(", ")),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            "graph.backend" => Ok(self.graph.backend.to_string()),
            "graph.uri" => Ok(self.graph.resolved_uri()),
            "graph.database_path" => Ok(self.graph.resolved_database_path()?.display().to_string()),
            "graph.retrieval_limit" => Ok(self.graph.retrieval_limit.to_string()),

            "source.language" => Ok(self.source.language.clone()),
            "source.preview_chars" => Ok(self.source.preview_chars.to_string()),
            "source.user_agent" => Ok(self.source.user_agent.clone()),
            "source.timeout_secs" => Ok(self.source.timeout_secs.to_string()),

            "ontology.profile" => Ok(self.ontology.profile.clone()),

            "ingest.topics" => Ok(self.ingest.topics.join(", ")),
            "ingest.call_timeout_secs" => Ok(self.ingest.call_timeout_secs.to_string()),

            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use KGRAG_API_KEY or OPENROUTER_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `kgrag config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.base_url" => {
                let value = value.trim();
                self.llm.base_url = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "llm.default_model" => {
                self.llm.default_model = value.to_string();
            }
            "llm.fallback_models" => {
                self.llm.fallback_models = split_list(value);
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "graph.backend" => {
                self.graph.backend = value.parse()?;
            }
            "graph.uri" => {
                self.graph.uri = value.to_string();
            }
            "graph.database_path" => {
                let value = value.trim();
                self.graph.database_path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            "graph.retrieval_limit" => {
                self.graph.retrieval_limit = value
                    .parse()
                    .with_context(|| format!("Invalid retrieval_limit value: {}", value))?;
            }

            "source.language" => {
                let lang = value.trim();
                if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err(anyhow!("Invalid Wikipedia language code: {}", value));
                }
                self.source.language = lang.to_string();
            }
            "source.preview_chars" => {
                let chars: usize = value
                    .parse()
                    .with_context(|| format!("Invalid preview_chars value: {}", value))?;
                if chars == 0 {
                    return Err(anyhow!("preview_chars must be greater than zero"));
                }
                self.source.preview_chars = chars;
            }
            "source.user_agent" => {
                self.source.user_agent = value.to_string();
            }
            "source.timeout_secs" => {
                self.source.timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid timeout_secs value: {}", value))?;
            }

            "ontology.profile" => {
                let registry = self.ontology.registry()?;
                if registry.get(value).is_none() {
                    return Err(anyhow!(
                        "Unknown ontology profile: {}. Available: {}",
                        value,
                        registry.ids().join(", ")
                    ));
                }
                self.ontology.profile = value.to_string();
            }

            "ingest.topics" => {
                self.ingest.topics = split_list(value);
            }
            "ingest.call_timeout_secs" => {
                self.ingest.call_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid call_timeout_secs value: {}", value))?;
            }

            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the KGRAG_API_KEY or OPENROUTER_API_KEY environment variable instead."
                ));
            }
            "graph.username" | "graph.password" => {
                return Err(anyhow!(
                    "Neo4j credentials cannot be stored in configuration. \
                     Set NEO4J_USERNAME and NEO4J_PASSWORD instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `kgrag config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = [
            "llm.base_url",
            "llm.default_model",
            "llm.fallback_models",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "graph.backend",
            "graph.uri",
            "graph.database_path",
            "graph.retrieval_limit",
            "source.language",
            "source.preview_chars",
            "source.user_agent",
            "source.timeout_secs",
            "ontology.profile",
            "ingest.topics",
            "ingest.call_timeout_secs",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
