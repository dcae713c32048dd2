//! TOML configuration.
//!
//! Every section is optional; missing fields fall back to the `default_*`
//! helpers below. [`load_config`] parses and validates in one step.
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [generation]
//! language = "english"
//! documentation_mode = "tutorial"
//!
//! [cache]
//! dir = "./data/cache"
//! prompt_db = "./data/prompts.sqlite"
//! ```

use anyhow::{Context, Result};
use chrono::Duration;
use repo_tutor_core::chapter::DependencyPolicy;
use repo_tutor_core::llm::CallOptions;
use repo_tutor_core::models::{DocumentationMode, TokenUsage};
use repo_tutor_core::pack::{
    self, PackOptions, PackStrategy, DEFAULT_CHARS_PER_TOKEN, DEFAULT_CONTEXT_RESERVE,
    DEFAULT_HEAD_RATIO,
};
use repo_tutor_core::plan::{RegenerationPolicy, DEFAULT_FULL_THRESHOLD, DEFAULT_PARTIAL_THRESHOLD};
use repo_tutor_core::prompt_cache::{PromptCleanupPolicy, DEFAULT_FUZZY_THRESHOLD};
use repo_tutor_core::store::RepoCleanupPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub packing: PackingConfig,
    #[serde(default)]
    pub regeneration: RegenerationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub pricing: Option<PricingConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: None,
            api_key_env: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_window: default_context_window(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            pricing: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> usize {
    128_000
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    5
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Configured key variable, or the provider's conventional one.
    pub fn api_key_var(&self) -> String {
        match &self.api_key_env {
            Some(var) => var.clone(),
            None => match self.provider.as_str() {
                "anthropic" => "ANTHROPIC_API_KEY".to_string(),
                _ => "OPENAI_API_KEY".to_string(),
            },
        }
    }

    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or("none")
    }

    pub fn cost(&self, usage: Option<&TokenUsage>) -> Option<f64> {
        let pricing = self.pricing.as_ref()?;
        let usage = usage?;
        Some(pricing.cost(usage))
    }
}

/// USD per million tokens.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PricingConfig {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl PricingConfig {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 * self.input_per_million
            + usage.completion_tokens as f64 * self.output_per_million)
            / 1_000_000.0
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub documentation_mode: DocumentationMode,
    #[serde(default = "default_max_abstractions")]
    pub max_abstractions: usize,
    #[serde(default = "default_max_lines_per_file")]
    pub max_lines_per_file: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default)]
    pub dependency_policy: DependencyPolicy,
    #[serde(default)]
    pub strict_relationship_coverage: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            language: default_language(),
            documentation_mode: DocumentationMode::default(),
            max_abstractions: default_max_abstractions(),
            max_lines_per_file: default_max_lines_per_file(),
            output_dir: default_output_dir(),
            use_cache: true,
            dependency_policy: DependencyPolicy::default(),
            strict_relationship_coverage: false,
        }
    }
}

fn default_language() -> String {
    "english".to_string()
}
fn default_max_abstractions() -> usize {
    10
}
fn default_max_lines_per_file() -> usize {
    400
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("./output")
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PackingConfig {
    #[serde(default = "default_context_reserve")]
    pub context_reserve: f64,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: f64,
    #[serde(default = "default_head_ratio")]
    pub head_ratio: f64,
}

impl Default for PackingConfig {
    fn default() -> Self {
        Self {
            context_reserve: DEFAULT_CONTEXT_RESERVE,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            head_ratio: DEFAULT_HEAD_RATIO,
        }
    }
}

fn default_context_reserve() -> f64 {
    DEFAULT_CONTEXT_RESERVE
}
fn default_chars_per_token() -> f64 {
    DEFAULT_CHARS_PER_TOKEN
}
fn default_head_ratio() -> f64 {
    DEFAULT_HEAD_RATIO
}

impl PackingConfig {
    pub fn pack_options(
        &self,
        mode: DocumentationMode,
        max_lines: usize,
        context_window: usize,
    ) -> PackOptions {
        PackOptions {
            strategy: PackStrategy::for_mode(mode, max_lines),
            token_budget: pack::token_budget(context_window, self.context_reserve),
            chars_per_token: self.chars_per_token,
            head_ratio: self.head_ratio,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegenerationConfig {
    #[serde(default = "default_partial_threshold")]
    pub partial_threshold: f64,
    #[serde(default = "default_full_threshold")]
    pub full_threshold: f64,
}

impl Default for RegenerationConfig {
    fn default() -> Self {
        Self {
            partial_threshold: DEFAULT_PARTIAL_THRESHOLD,
            full_threshold: DEFAULT_FULL_THRESHOLD,
        }
    }
}

fn default_partial_threshold() -> f64 {
    DEFAULT_PARTIAL_THRESHOLD
}
fn default_full_threshold() -> f64 {
    DEFAULT_FULL_THRESHOLD
}

impl RegenerationConfig {
    pub fn policy(&self) -> RegenerationPolicy {
        RegenerationPolicy {
            partial_threshold: self.partial_threshold,
            full_threshold: self.full_threshold,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_prompt_db")]
    pub prompt_db: PathBuf,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default)]
    pub max_prompt_age_days: Option<i64>,
    #[serde(default)]
    pub max_prompt_entries: Option<usize>,
    #[serde(default)]
    pub max_repo_age_days: Option<i64>,
    #[serde(default)]
    pub max_repos: Option<usize>,
    #[serde(default)]
    pub max_repo_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            prompt_db: default_prompt_db(),
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            max_prompt_age_days: None,
            max_prompt_entries: None,
            max_repo_age_days: None,
            max_repos: None,
            max_repo_bytes: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./data/cache")
}
fn default_prompt_db() -> PathBuf {
    PathBuf::from("./data/prompts.sqlite")
}
fn default_fuzzy_threshold() -> f64 {
    DEFAULT_FUZZY_THRESHOLD
}

impl CacheConfig {
    pub fn prompt_cleanup_policy(&self) -> PromptCleanupPolicy {
        PromptCleanupPolicy {
            max_age: self.max_prompt_age_days.map(Duration::days),
            max_entries: self.max_prompt_entries,
        }
    }

    pub fn repo_cleanup_policy(&self) -> RepoCleanupPolicy {
        RepoCleanupPolicy {
            max_age: self.max_repo_age_days.map(Duration::days),
            max_entries: self.max_repos,
            max_total_bytes: self.max_repo_bytes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            max_file_size: default_max_file_size(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    [
        "**/*.rs", "**/*.py", "**/*.js", "**/*.jsx", "**/*.ts", "**/*.tsx", "**/*.go",
        "**/*.java", "**/*.c", "**/*.h", "**/*.cpp", "**/*.rb", "**/*.md", "**/*.toml",
    ]
    .iter()
    .map(|g| g.to_string())
    .collect()
}
fn default_max_file_size() -> u64 {
    100_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Generation
    if config.generation.max_abstractions == 0 {
        anyhow::bail!("generation.max_abstractions must be > 0");
    }
    if config.generation.max_lines_per_file == 0 {
        anyhow::bail!("generation.max_lines_per_file must be > 0");
    }

    // LLM
    if config.llm.context_window == 0 {
        anyhow::bail!("llm.context_window must be > 0");
    }
    match config.llm.provider.as_str() {
        "disabled" | "openai" | "anthropic" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, or anthropic.",
            other
        ),
    }
    if config.llm.is_enabled() && config.llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            config.llm.provider
        );
    }

    // Packing
    if !(0.0..1.0).contains(&config.packing.context_reserve) {
        anyhow::bail!("packing.context_reserve must be in [0.0, 1.0)");
    }
    if config.packing.chars_per_token <= 0.0 {
        anyhow::bail!("packing.chars_per_token must be > 0");
    }
    if !(0.0..=1.0).contains(&config.packing.head_ratio) {
        anyhow::bail!("packing.head_ratio must be in [0.0, 1.0]");
    }

    // Regeneration
    let r = &config.regeneration;
    if !(r.partial_threshold > 0.0 && r.partial_threshold <= r.full_threshold && r.full_threshold <= 100.0) {
        anyhow::bail!(
            "regeneration thresholds must satisfy 0 < partial_threshold <= full_threshold <= 100 (got {} / {})",
            r.partial_threshold,
            r.full_threshold
        );
    }

    // Cache
    if !(config.cache.fuzzy_threshold > 0.0 && config.cache.fuzzy_threshold <= 1.0) {
        anyhow::bail!("cache.fuzzy_threshold must be in (0.0, 1.0]");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_text)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.llm.provider, "disabled");
        assert_eq!(config.generation.documentation_mode, DocumentationMode::Tutorial);
        assert_eq!(config.regeneration.partial_threshold, 30.0);
        assert_eq!(config.cache.fuzzy_threshold, 0.95);
        assert!(config.generation.use_cache);
    }

    #[test]
    fn enabled_provider_requires_model() {
        let err = parse("[llm]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("llm.model"));
        assert!(parse("[llm]\nprovider = \"anthropic\"\nmodel = \"claude\"\n").is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse("[llm]\nprovider = \"ollama\"\n").is_err());
        assert!(parse("[generation]\nmax_abstractions = 0\n").is_err());
        assert!(parse("[packing]\ncontext_reserve = 1.0\n").is_err());
        assert!(parse("[regeneration]\npartial_threshold = 70.0\nfull_threshold = 60.0\n").is_err());
        assert!(parse("[cache]\nfuzzy_threshold = 0.0\n").is_err());
    }

    #[test]
    fn enums_parse_lowercase() {
        let config = parse(
            "[generation]\ndocumentation_mode = \"architecture\"\ndependency_policy = \"related\"\n",
        )
        .unwrap();
        assert_eq!(config.generation.documentation_mode, DocumentationMode::Architecture);
        assert_eq!(config.generation.dependency_policy, DependencyPolicy::Related);
    }

    #[test]
    fn pricing_computes_cost() {
        let pricing = PricingConfig {
            input_per_million: 2.0,
            output_per_million: 8.0,
        };
        let usage = TokenUsage {
            prompt_tokens: 500_000,
            completion_tokens: 250_000,
            total_tokens: 750_000,
        };
        assert!((pricing.cost(&usage) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn api_key_var_defaults_by_provider() {
        let mut llm = LlmConfig {
            provider: "anthropic".into(),
            ..Default::default()
        };
        assert_eq!(llm.api_key_var(), "ANTHROPIC_API_KEY");
        llm.api_key_env = Some("MY_KEY".into());
        assert_eq!(llm.api_key_var(), "MY_KEY");
    }
}
