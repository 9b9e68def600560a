use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String, // "openai" or "ollama"
    #[serde(default = "default_llm_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_llm_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub openai: OpenAIConfig,
    pub ollama: Option<OllamaConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_links")]
    pub max_links: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_search_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_search_retry_delay")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub brave: BraveConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BraveConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_brave_endpoint")]
    pub endpoint: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_roadmap_steps")]
    pub roadmap_steps: usize,
    #[serde(default = "default_tasks_per_step")]
    pub tasks_per_step: usize,
    #[serde(default = "default_malformed_warn_ratio")]
    pub malformed_warn_ratio: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExportConfig {
    #[serde(default)]
    pub notion: NotionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotionConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default = "default_notion_base_url")]
    pub base_url: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_provider() -> String {
    "openai".to_string()
}
fn default_llm_retry_count() -> usize {
    1
}
fn default_llm_retry_delay() -> u64 {
    500
}
fn default_llm_timeout() -> u64 {
    60
}
fn default_openai_model() -> String {
    "gpt-4".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_true() -> bool {
    true
}
fn default_max_links() -> usize {
    3
}
fn default_search_timeout() -> u64 {
    10
}
fn default_search_retry_count() -> usize {
    1
}
fn default_search_retry_delay() -> u64 {
    250
}
fn default_brave_endpoint() -> String {
    "https://api.search.brave.com/res/v1/web/search".to_string()
}
fn default_roadmap_steps() -> usize {
    10
}
fn default_tasks_per_step() -> usize {
    5
}
fn default_malformed_warn_ratio() -> f64 {
    0.2
}
fn default_notion_base_url() -> String {
    "https://api.notion.com".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            retry_count: default_llm_retry_count(),
            retry_delay_ms: default_llm_retry_delay(),
            timeout_seconds: default_llm_timeout(),
            openai: OpenAIConfig::default(),
            ollama: None,
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_openai_model(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_links: default_max_links(),
            timeout_seconds: default_search_timeout(),
            retry_count: default_search_retry_count(),
            retry_delay_ms: default_search_retry_delay(),
            brave: BraveConfig::default(),
        }
    }
}

impl Default for BraveConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_brave_endpoint(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            roadmap_steps: default_roadmap_steps(),
            tasks_per_step: default_tasks_per_step(),
            malformed_warn_ratio: default_malformed_warn_ratio(),
        }
    }
}

impl Default for NotionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            database_id: String::new(),
            base_url: default_notion_base_url(),
        }
    }
}

impl Config {
    /// Reads `config.yml` when it exists, then layers the process environment on top.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(Path::new("config.yml"))?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("{} not found, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Overrides credentials and bind settings from `lookup` (normally the process environment).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("OPENAI_API_KEY") {
            self.llm.openai.api_key = v;
        }
        if let Some(v) = non_empty("OPENAI_BASE_URL") {
            self.llm.openai.base_url = Some(v);
        }
        if let Some(v) = non_empty("OPENAI_MODEL") {
            self.llm.openai.model = v;
        }
        if let Some(v) = non_empty("BRAVE_API_KEY") {
            self.search.brave.api_key = v;
        }
        if let Some(v) = non_empty("NOTION_API_KEY") {
            self.export.notion.api_key = v;
        }
        if let Some(v) = non_empty("NOTION_DATABASE_ID") {
            self.export.notion.database_id = v;
        }
        if let Some(v) = non_empty("SKILLMAP_HOST") {
            self.server.host = v;
        }
        if let Some(v) = non_empty("SKILLMAP_PORT") {
            match v.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => log::warn!("Ignoring invalid SKILLMAP_PORT: {}", v),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_yields_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let config = Config::load_from(&dir.path().join("config.yml"))?;

        assert_eq!(config.generation.roadmap_steps, 10);
        assert_eq!(config.generation.tasks_per_step, 5);
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.openai.model, "gpt-4");
        assert!(config.llm.openai.api_key.is_empty());
        assert!(config.search.enabled);
        assert_eq!(config.search.max_links, 3);
        Ok(())
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(
            &path,
            "llm:\n  retry_count: 4\n  openai:\n    model: gpt-4o\nsearch:\n  max_links: 2\n",
        )?;

        let config = Config::load_from(&path)?;
        assert_eq!(config.llm.retry_count, 4);
        assert_eq!(config.llm.openai.model, "gpt-4o");
        assert_eq!(config.llm.openai.temperature, 0.7);
        assert_eq!(config.search.max_links, 2);
        assert_eq!(config.server.port, 3000);
        Ok(())
    }

    #[test]
    fn test_invalid_yaml_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.yml");
        fs::write(&path, "llm: [not, a, map")?;
        assert!(Config::load_from(&path).is_err());
        Ok(())
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-test"),
            ("BRAVE_API_KEY", "brave-test"),
            ("NOTION_DATABASE_ID", "db-1"),
            ("SKILLMAP_PORT", "not-a-port"),
            ("NOTION_API_KEY", "   "),
        ]);
        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.llm.openai.api_key, "sk-test");
        assert_eq!(config.search.brave.api_key, "brave-test");
        assert_eq!(config.export.notion.database_id, "db-1");
        assert!(config.export.notion.api_key.is_empty());
        assert_eq!(config.server.port, 3000);
    }
}
