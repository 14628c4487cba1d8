// Module: Configuration
// Environment-variable-driven configuration for a Conduit run. Every
// sub-config carries safe defaults and a `from_env()` that overrides only
// the values actually set, following the same typed-struct-plus-namespaced-
// env-vars shape used throughout this crate.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;

use crate::ai_engine::AiConfig;
use crate::browser::BrowserConfig;
use crate::errors::{ErrorCode, StructuredError};

/// Reads `key` and parses it as `T`; an absent variable keeps `default`, a
/// present-but-malformed one is a structured error, not a silent fallback.
fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T, StructuredError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(val) => val.parse::<T>().map_err(|_| {
            StructuredError::new(ErrorCode::INVALID_ENV_VALUE, format!("{key}='{val}' is not a valid value"))
        }),
    }
}

fn bool_env(key: &str, default: bool) -> Result<bool, StructuredError> {
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            _ => Err(StructuredError::new(ErrorCode::INVALID_ENV_VALUE, format!("{key}='{val}' is not a valid boolean"))),
        },
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 1000,
            backoff_max_ms: 30_000,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Result<Self, StructuredError> {
        let defaults = Self::default();
        Ok(Self {
            max_retries: parse_env("HERMES_MAX_RETRIES", defaults.max_retries)?,
            backoff_base_ms: parse_env("HERMES_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            backoff_max_ms: parse_env("HERMES_BACKOFF_MAX_MS", defaults.backoff_max_ms)?,
            jitter: bool_env("HERMES_BACKOFF_JITTER", defaults.jitter)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    pub global_timeout_s: u64,
    pub page_load_timeout_s: u64,
    pub interaction_timeout_s: u64,
    pub ai_timeout_s: u64,
    pub extraction_timeout_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            global_timeout_s: 300,
            page_load_timeout_s: 30,
            interaction_timeout_s: 10,
            ai_timeout_s: 60,
            extraction_timeout_s: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn from_env() -> Result<Self, StructuredError> {
        let defaults = Self::default();
        Ok(Self {
            global_timeout_s: parse_env("HERMES_GLOBAL_TIMEOUT_S", defaults.global_timeout_s)?,
            page_load_timeout_s: parse_env("HERMES_PAGE_LOAD_TIMEOUT_S", defaults.page_load_timeout_s)?,
            interaction_timeout_s: parse_env("HERMES_INTERACTION_TIMEOUT_S", defaults.interaction_timeout_s)?,
            ai_timeout_s: parse_env("HERMES_AI_TIMEOUT_S", defaults.ai_timeout_s)?,
            extraction_timeout_s: parse_env("HERMES_EXTRACTION_TIMEOUT_S", defaults.extraction_timeout_s)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: String,
    pub debug_mode: bool,
    pub min_confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            debug_mode: false,
            min_confidence_threshold: 0.5,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, StructuredError> {
        let defaults = Self::default();
        let min_confidence_threshold: f64 = parse_env("HERMES_MIN_CONFIDENCE", defaults.min_confidence_threshold)?;
        if !(0.0..=1.0).contains(&min_confidence_threshold) {
            return Err(StructuredError::new(
                ErrorCode::INVALID_ENV_VALUE,
                format!("HERMES_MIN_CONFIDENCE={min_confidence_threshold} must be between 0 and 1"),
            ));
        }
        Ok(Self {
            data_dir: std::env::var("HERMES_DATA_DIR").unwrap_or(defaults.data_dir),
            debug_mode: bool_env("HERMES_DEBUG_MODE", defaults.debug_mode)?,
            min_confidence_threshold,
        })
    }
}

/// Policy knobs for the SSRF-prevention URL check. The catalogue of private
/// network ranges it blocks is fixed in `url_policy`; this only toggles
/// which checks apply and which schemes pass.
#[derive(Debug, Clone)]
pub struct TargetUrlPolicyConfig {
    pub allowed_schemes: Vec<String>,
    pub block_local_hostnames: bool,
    pub block_private_ips: bool,
}

impl Default for TargetUrlPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["http".to_string(), "https".to_string()],
            block_local_hostnames: true,
            block_private_ips: true,
        }
    }
}

fn ai_config_from_env() -> AiConfig {
    AiConfig {
        api_base_url: std::env::var("HERMES_AI_BASE_URL").unwrap_or_default(),
        api_key: std::env::var("HERMES_AI_API_KEY").unwrap_or_default(),
        model: std::env::var("HERMES_AI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
    }
}

fn browser_config_from_env() -> Result<BrowserConfig, StructuredError> {
    let defaults = BrowserConfig::default();
    Ok(BrowserConfig {
        rendering_service_url: std::env::var("HERMES_RENDERING_URL").unwrap_or_default(),
        rendering_service_token: std::env::var("HERMES_RENDERING_TOKEN").ok(),
        viewport_width: parse_env("HERMES_VIEWPORT_WIDTH", defaults.viewport_width)?,
        viewport_height: parse_env("HERMES_VIEWPORT_HEIGHT", defaults.viewport_height)?,
        headless: bool_env("HERMES_HEADLESS", defaults.headless)?,
        ..defaults
    })
}

/// Root configuration for a single Conduit run. Most fields come from the
/// CLI invocation (target URL, schema, selectors, mode); the ambient
/// sub-configs fall back to environment variables when not overridden.
#[derive(Debug, Clone)]
pub struct HermesConfig {
    pub target_url: String,
    pub extraction_schema: Value,
    pub ai: AiConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub browser: BrowserConfig,
    pub pipeline: PipelineConfig,
    pub target_url_policy: TargetUrlPolicyConfig,
    pub extraction_mode: String,
    pub allow_cross_origin: bool,
    pub heuristic_selectors: HashMap<String, String>,
    pub owner_principal: Option<String>,
    pub log_level: String,
}

impl HermesConfig {
    /// Builds a run configuration from CLI-supplied values, filling every
    /// ambient concern (retry, timeouts, browser, pipeline, AI credentials)
    /// from the environment. A malformed override (an env var present but
    /// not parseable as its field's type) fails fast with a structured
    /// error rather than silently keeping the default.
    pub fn from_env(
        target_url: String,
        extraction_schema: Value,
        extraction_mode: String,
        heuristic_selectors: HashMap<String, String>,
    ) -> Result<Self, StructuredError> {
        Ok(Self {
            target_url,
            extraction_schema,
            ai: ai_config_from_env(),
            retry: RetryConfig::from_env()?,
            timeouts: TimeoutConfig::from_env()?,
            browser: browser_config_from_env()?,
            pipeline: PipelineConfig::from_env()?,
            target_url_policy: TargetUrlPolicyConfig::default(),
            extraction_mode,
            allow_cross_origin: bool_env("HERMES_ALLOW_CROSS_ORIGIN", false)?,
            heuristic_selectors,
            owner_principal: std::env::var("HERMES_OWNER_PRINCIPAL").ok(),
            log_level: std::env::var("HERMES_LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
        })
    }

    /// Builds a run configuration with every ambient sub-config at its
    /// documented default, bypassing the environment entirely. Used by
    /// tests and by any embedder that assembles `HermesConfig` manually.
    pub fn new(
        target_url: String,
        extraction_schema: Value,
        extraction_mode: String,
        heuristic_selectors: HashMap<String, String>,
    ) -> Self {
        Self {
            target_url,
            extraction_schema,
            ai: AiConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            browser: BrowserConfig::default(),
            pipeline: PipelineConfig::default(),
            target_url_policy: TargetUrlPolicyConfig::default(),
            extraction_mode,
            allow_cross_origin: false,
            heuristic_selectors,
            owner_principal: None,
            log_level: "INFO".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_config_defaults_match_original() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base_ms, 1000);
        assert_eq!(config.backoff_max_ms, 30_000);
        assert!(config.jitter);
    }

    #[test]
    fn timeout_config_defaults_match_original() {
        let config = TimeoutConfig::default();
        assert_eq!(config.global_timeout_s, 300);
        assert_eq!(config.page_load_timeout_s, 30);
    }

    #[test]
    fn target_url_policy_defaults_block_everything() {
        let policy = TargetUrlPolicyConfig::default();
        assert!(policy.block_local_hostnames);
        assert!(policy.block_private_ips);
        assert_eq!(policy.allowed_schemes, vec!["http", "https"]);
    }

    #[test]
    fn hermes_config_new_carries_through_cli_values() {
        let mut selectors = HashMap::new();
        selectors.insert("title".to_string(), ".title".to_string());
        let config = HermesConfig::new(
            "https://x.test".to_string(),
            serde_json::json!({"title": "string"}),
            "heuristic".to_string(),
            selectors,
        );
        assert_eq!(config.target_url, "https://x.test");
        assert_eq!(config.extraction_mode, "heuristic");
        assert!(config.heuristic_selectors.contains_key("title"));
    }

    #[test]
    fn malformed_numeric_env_value_fails_fast() {
        std::env::set_var("HERMES_MAX_RETRIES_TEST_MALFORMED", "not-a-number");
        let result = parse_env::<u32>("HERMES_MAX_RETRIES_TEST_MALFORMED", 3);
        std::env::remove_var("HERMES_MAX_RETRIES_TEST_MALFORMED");
        assert!(result.is_err());
    }

    #[test]
    fn malformed_bool_env_value_fails_fast() {
        std::env::set_var("HERMES_DEBUG_MODE_TEST_MALFORMED", "maybe");
        let result = bool_env("HERMES_DEBUG_MODE_TEST_MALFORMED", false);
        std::env::remove_var("HERMES_DEBUG_MODE_TEST_MALFORMED");
        assert!(result.is_err());
    }

    #[test]
    fn absent_env_value_keeps_default() {
        std::env::remove_var("HERMES_DEFINITELY_UNSET_TEST_VAR");
        let result = parse_env::<u32>("HERMES_DEFINITELY_UNSET_TEST_VAR", 42);
        assert_eq!(result.unwrap(), 42);
    }
}
