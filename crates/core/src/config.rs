//! Configuration management for Aide.
//!
//! Configuration is merged from, in increasing precedence:
//! - Built-in defaults
//! - The workspace config file (`.aide/config.yaml`)
//! - Environment variables
//! - Command-line flags
//!
//! The configuration is workspace-centric: it is built once per session and
//! passed down explicitly to every component that needs it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the per-workspace settings directory.
pub const AIDE_DIR: &str = ".aide";

/// Assistant providers understood by the LLM client factory.
pub const KNOWN_ASSISTANT_PROVIDERS: &[&str] = &["openai", "scripted"];

/// Embedding providers understood by the index crate.
pub const KNOWN_EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "mock"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (the indexed and tool-accessible tree)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Hosted assistant settings
    pub assistant: AssistantSettings,

    /// Embedding provider settings
    pub embedding: EmbeddingSettings,

    /// Index and queue settings
    pub index: IndexSettings,

    /// Explicit API key (`AIDE_API_KEY`), takes precedence over `*_env` lookups
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AssistantSettings {
    pub provider: String,
    pub assistant_id: Option<String>,
    pub api_key_env: String,
    pub endpoint: Option<String>,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            assistant_id: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub model: String,
    pub dimensions: Option<usize>,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            endpoint: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexSettings {
    /// Storage directory, relative to the workspace root
    pub storage_dir: String,
    pub top_k: usize,
    pub code_extensions: Vec<String>,
    pub doc_extensions: Vec<String>,
    pub task_timeout_secs: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            storage_dir: ".embeddings".to_string(),
            top_k: 3,
            code_extensions: ["js", "cjs", "mjs", "jsx", "ts", "tsx", "json", "html", "css"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            doc_extensions: ["md", "mdx"].iter().map(|s| s.to_string()).collect(),
            task_timeout_secs: 120,
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    assistant: Option<AssistantSettings>,
    embedding: Option<EmbeddingSettings>,
    index: Option<IndexSettings>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            assistant: AssistantSettings::default(),
            embedding: EmbeddingSettings::default(),
            index: IndexSettings::default(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the config file and the environment.
    ///
    /// Environment variables:
    /// - `AIDE_WORKSPACE`: Override workspace path
    /// - `AIDE_CONFIG`: Path to config file
    /// - `AIDE_ASSISTANT_ID`: Hosted assistant identifier
    /// - `AIDE_API_KEY`: API key for both assistant and embedding calls
    /// - `AIDE_EMBEDDING_PROVIDER`: Embedding provider
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use aide_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None, None)
    }

    /// Like [`AppConfig::load`], with an explicit workspace and config file
    /// (from the command line) taking precedence over the environment.
    ///
    /// The workspace has to be known before the config file can be found,
    /// so these two are resolved here rather than in `with_overrides`.
    pub fn load_from(
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
    ) -> AppResult<Self> {
        let mut config = Self::default();

        let workspace = workspace.or_else(|| env_path("AIDE_WORKSPACE"));
        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }

        config.config_file = config_file.or_else(|| env_path("AIDE_CONFIG"));

        config.workspace = canonical_workspace(&config.workspace)?;

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.aide_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
            // A workspace path in the file is relative to the process, like the flag
            config.workspace = canonical_workspace(&config.workspace)?;
        }

        // Environment variables override YAML config
        if let Ok(id) = std::env::var("AIDE_ASSISTANT_ID") {
            config.assistant.assistant_id = Some(id);
        }

        if let Ok(provider) = std::env::var("AIDE_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }

        config.api_key = std::env::var("AIDE_API_KEY").ok();

        if config.log_level.is_none() {
            config.log_level = std::env::var("RUST_LOG").ok();
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config_file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            AppError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })?;

        Ok(self.merged_with(config_file))
    }

    fn merged_with(&self, file: ConfigFile) -> Self {
        let mut result = self.clone();

        if let Some(path) = file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(assistant) = file.assistant {
            result.assistant = assistant;
        }
        if let Some(embedding) = file.embedding {
            result.embedding = embedding;
        }
        if let Some(index) = file.index {
            result.index = index;
        }

        result
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over the file and the environment.
    pub fn with_overrides(
        mut self,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .aide directory.
    pub fn aide_dir(&self) -> PathBuf {
        self.workspace.join(AIDE_DIR)
    }

    /// Ensure the .aide directory exists.
    pub fn ensure_aide_dir(&self) -> AppResult<()> {
        let aide_dir = self.aide_dir();
        if !aide_dir.exists() {
            std::fs::create_dir_all(&aide_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .aide directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Absolute path of the embedding storage directory.
    pub fn storage_path(&self) -> PathBuf {
        self.workspace.join(&self.index.storage_dir)
    }

    /// Resolve an API key: `AIDE_API_KEY` first, then the named variable.
    pub fn resolve_api_key(&self, api_key_env: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }
        std::env::var(api_key_env).ok().filter(|k| !k.is_empty())
    }

    /// Validate provider names and the presence of required API keys.
    pub fn validate(&self) -> AppResult<()> {
        let assistant = &self.assistant.provider;
        if !KNOWN_ASSISTANT_PROVIDERS.contains(&assistant.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown assistant provider: {}. Supported: {}",
                assistant,
                KNOWN_ASSISTANT_PROVIDERS.join(", ")
            )));
        }

        let embedding = &self.embedding.provider;
        if !KNOWN_EMBEDDING_PROVIDERS.contains(&embedding.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                embedding,
                KNOWN_EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        if self.index.top_k == 0 {
            return Err(AppError::Config("index.topK must be at least 1".to_string()));
        }

        if embedding == "openai" && self.resolve_api_key(&self.embedding.api_key_env).is_none() {
            return Err(AppError::Config(format!(
                "API key not found in environment variable: {}",
                self.embedding.api_key_env
            )));
        }

        Ok(())
    }

    /// Validate what an assistant session needs on top of [`AppConfig::validate`].
    pub fn validate_assistant(&self) -> AppResult<()> {
        if self.assistant.provider == "openai" {
            if self.assistant.assistant_id.is_none() {
                return Err(AppError::Config(
                    "No assistant id configured (assistant.assistantId or AIDE_ASSISTANT_ID)"
                        .to_string(),
                ));
            }
            if self.resolve_api_key(&self.assistant.api_key_env).is_none() {
                return Err(AppError::Config(format!(
                    "API key not found in environment variable: {}",
                    self.assistant.api_key_env
                )));
            }
        }
        Ok(())
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().map(PathBuf::from)
}

/// Absolute, symlink-free form of an existing workspace directory.
fn canonical_workspace(path: &Path) -> AppResult<PathBuf> {
    if !path.exists() {
        return Err(AppError::Config(format!(
            "Workspace directory does not exist: {:?}",
            path
        )));
    }
    std::fs::canonicalize(path).map_err(|e| {
        AppError::Config(format!("Failed to resolve workspace {:?}: {}", path, e))
    })
}
