//! Application configuration for Trustline.
//!
//! User config lives at `~/.trustline/trustline.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrustlineError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "trustline.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".trustline";

// ---------------------------------------------------------------------------
// Config structs (matching trustline.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Draft-generation model settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Optional external publish target (storefront CMS webhook).
    #[serde(default)]
    pub publish_target: PublishTargetConfig,

    /// Trust zone thresholds.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Recommendation classifier thresholds and caps.
    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub growth: GrowthConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "var/trustline.db".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// When false, drafts are always rendered from the deterministic template.
    #[serde(default)]
    pub enabled: bool,

    /// Base URL of an OpenAI-compatible chat completions API.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Model ID used for draft generation.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_llm_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_timeout_secs() -> u64 {
    5
}

/// `[publish_target]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTargetConfig {
    /// Webhook URL receiving one POST per successful publish. Unset disables delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PublishTargetConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// `[policy]` section. Zones: `total >= safe_min` is SAFE,
/// `total >= caution_min` is CAUTION, anything lower is UNSAFE.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_safe_min")]
    pub safe_min: u8,
    #[serde(default = "default_caution_min")]
    pub caution_min: u8,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            safe_min: default_safe_min(),
            caution_min: default_caution_min(),
        }
    }
}

fn default_safe_min() -> u8 {
    70
}
fn default_caution_min() -> u8 {
    40
}

/// `[classifier]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Demand signals below this impact score are deferred.
    #[serde(default = "default_min_impact")]
    pub min_impact: u8,

    /// Hedging score at or above which a sampled answer counts as weak.
    #[serde(default = "default_weak_hedging")]
    pub weak_hedging: u8,

    /// Claims older than this are stale.
    #[serde(default = "default_stale_after_days")]
    pub stale_after_days: i64,

    #[serde(default = "default_cap_product")]
    pub cap_product: usize,
    #[serde(default = "default_cap_blog")]
    pub cap_blog: usize,
    #[serde(default = "default_cap_faq")]
    pub cap_faq: usize,

    /// How many top-impact BLOG questions define the demand themes.
    #[serde(default = "default_blog_theme_top_n")]
    pub blog_theme_top_n: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_impact: default_min_impact(),
            weak_hedging: default_weak_hedging(),
            stale_after_days: default_stale_after_days(),
            cap_product: default_cap_product(),
            cap_blog: default_cap_blog(),
            cap_faq: default_cap_faq(),
            blog_theme_top_n: default_blog_theme_top_n(),
        }
    }
}

fn default_min_impact() -> u8 {
    55
}
fn default_weak_hedging() -> u8 {
    70
}
fn default_stale_after_days() -> i64 {
    90
}
fn default_cap_product() -> usize {
    3
}
fn default_cap_blog() -> usize {
    2
}
fn default_cap_faq() -> usize {
    7
}
fn default_blog_theme_top_n() -> usize {
    5
}

/// `[growth]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Minimum star rating for referral eligibility.
    #[serde(default = "default_min_rating")]
    pub min_rating: u8,

    /// Maximum SUPPRESSED send receipts written per campaign.
    #[serde(default = "default_suppressed_receipt_cap")]
    pub suppressed_receipt_cap: usize,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            min_rating: default_min_rating(),
            suppressed_receipt_cap: default_suppressed_receipt_cap(),
        }
    }
}

fn default_min_rating() -> u8 {
    5
}
fn default_suppressed_receipt_cap() -> usize {
    50
}

/// `[orchestrator]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on drafts generated by one FIX_GAPS run.
    #[serde(default = "default_max_drafts_per_run")]
    pub max_drafts_per_run: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_drafts_per_run: default_max_drafts_per_run(),
        }
    }
}

fn default_max_drafts_per_run() -> usize {
    3
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.trustline/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| TrustlineError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.trustline/trustline.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TrustlineError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| TrustlineError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| TrustlineError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TrustlineError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| TrustlineError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the draft-model API key from the env var named in `[llm]`.
pub fn validate_api_key(config: &LlmConfig) -> Result<String> {
    let var_name = &config.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(TrustlineError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable \
             or disable [llm] in trustline.toml."
        ))),
    }
}
