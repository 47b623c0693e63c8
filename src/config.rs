//! Engine configuration.
//!
//! Everything tunable lives here: per-skill circuit-breaker settings, the
//! feedback retention cap, the severity thresholds the built-in skills use,
//! how agents are activated, and credentials for the LLM collaborator.
//!
//! Configuration can be built in code, parsed from JSON, or read from
//! `CONSIGN_*` environment variables.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::reliability::{CircuitBreakerConfig, FallbackMethod};

/// Default number of feedback records kept per skill.
pub const DEFAULT_FEEDBACK_RETENTION: usize = 1_000;

/// Numeric thresholds used by the built-in skills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillThresholds {
    /// Absolute price deviation from the index, in percent, that warrants a warning
    pub price_warning_pct: f64,
    /// Absolute price deviation from the index, in percent, that is non-compliant
    pub price_critical_pct: f64,
    /// Allowed Mean Kinetic Temperature excursion above the label maximum (°C)
    pub mkt_tolerance_celsius: f64,
    /// Activation energy divided by the gas constant, in kelvin
    pub mkt_activation_energy_over_r: f64,
    /// Days before expiry at which a certificate is flagged
    pub certificate_expiry_warning_days: i64,
}

impl Default for SkillThresholds {
    fn default() -> Self {
        Self {
            price_warning_pct: 15.0,
            price_critical_pct: 30.0,
            mkt_tolerance_celsius: 2.0,
            // ΔH = 83.144 kJ/mol over R = 8.3144 J/(mol·K)
            mkt_activation_energy_over_r: 10_000.0,
            certificate_expiry_warning_days: 30,
        }
    }
}

/// How sub-agents are activated for a shipment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    /// Static predicates only
    #[default]
    Deterministic,
    /// Ask the activation advisor, falling back to the predicate on failure
    Assisted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub mode: ActivationMode,
    /// Per-agent timeout for an advisor call
    pub advisor_timeout_ms: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            mode: ActivationMode::Deterministic,
            advisor_timeout_ms: 5_000,
        }
    }
}

/// Credentials for the LLM collaborator.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl LlmConfig {
    fn default_model() -> String {
        "claude-3-5-haiku-20241022".to_string()
    }

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: Self::default_model(),
            base_url: None,
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Breaker settings for skills without an override
    pub breaker: CircuitBreakerConfig,
    /// Per-skill breaker overrides
    pub breaker_overrides: HashMap<String, CircuitBreakerConfig>,
    /// Feedback records kept per skill before the oldest are pruned
    pub feedback_retention: usize,
    pub thresholds: SkillThresholds,
    pub activation: ActivationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,
    /// Caller-level timeout for a whole orchestration pass
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            breaker_overrides: HashMap::new(),
            feedback_retention: DEFAULT_FEEDBACK_RETENTION,
            thresholds: SkillThresholds::default(),
            activation: ActivationConfig::default(),
            llm: None,
            pass_timeout_ms: None,
        }
    }
}

/// Parse `key` when set; a value that does not parse is a config error.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::config(format!("{}={:?}: {}", key, raw, e))),
        Err(_) => Ok(None),
    }
}

impl EngineConfig {
    /// Build configuration from environment variables on top of defaults.
    ///
    /// Recognized variables:
    /// - `CONSIGN_LLM_API_KEY` (or `ANTHROPIC_API_KEY`), `CONSIGN_LLM_MODEL`,
    ///   `CONSIGN_LLM_BASE_URL`
    /// - `CONSIGN_ACTIVATION_MODE` (`deterministic` | `assisted`)
    /// - `CONSIGN_BREAKER_FAILURE_THRESHOLD`, `CONSIGN_BREAKER_SUCCESS_THRESHOLD`,
    ///   `CONSIGN_BREAKER_TIMEOUT_MS`, `CONSIGN_BREAKER_CALL_TIMEOUT_MS`,
    ///   `CONSIGN_BREAKER_FALLBACK`
    /// - `CONSIGN_BREAKER_OVERRIDES`: JSON object of skill id -> breaker config
    /// - `CONSIGN_FEEDBACK_RETENTION`, `CONSIGN_PASS_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        let api_key = std::env::var("CONSIGN_LLM_API_KEY")
            .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        if let Some(key) = api_key {
            let mut llm = LlmConfig::new(key);
            if let Ok(model) = std::env::var("CONSIGN_LLM_MODEL") {
                llm.model = model;
            }
            llm.base_url = std::env::var("CONSIGN_LLM_BASE_URL").ok();
            config.llm = Some(llm);
        }

        if let Ok(mode) = std::env::var("CONSIGN_ACTIVATION_MODE") {
            config.activation.mode = match mode.trim().to_lowercase().as_str() {
                "assisted" => ActivationMode::Assisted,
                "deterministic" => ActivationMode::Deterministic,
                other => {
                    return Err(Error::config(format!("unknown activation mode: {}", other)))
                }
            };
        }

        if let Some(v) = env_parse("CONSIGN_BREAKER_FAILURE_THRESHOLD")? {
            config.breaker.failure_threshold = v;
        }
        if let Some(v) = env_parse("CONSIGN_BREAKER_SUCCESS_THRESHOLD")? {
            config.breaker.success_threshold = v;
        }
        if let Some(v) = env_parse("CONSIGN_BREAKER_TIMEOUT_MS")? {
            config.breaker.timeout_ms = v;
        }
        if let Some(v) = env_parse("CONSIGN_BREAKER_CALL_TIMEOUT_MS")? {
            config.breaker.call_timeout_ms = v;
        }
        if let Ok(method) = std::env::var("CONSIGN_BREAKER_FALLBACK") {
            config.breaker.fallback_method = method.parse::<FallbackMethod>()?;
        }
        if let Ok(json) = std::env::var("CONSIGN_BREAKER_OVERRIDES") {
            config.breaker_overrides = serde_json::from_str(&json)
                .map_err(|e| Error::config(format!("CONSIGN_BREAKER_OVERRIDES: {}", e)))?;
        }
        if let Some(v) = env_parse("CONSIGN_FEEDBACK_RETENTION")? {
            config.feedback_retention = v;
        }
        config.pass_timeout_ms = env_parse("CONSIGN_PASS_TIMEOUT_MS")?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        for (skill, breaker) in std::iter::once(("<default>", &self.breaker))
            .chain(self.breaker_overrides.iter().map(|(k, v)| (k.as_str(), v)))
        {
            breaker
                .validate()
                .map_err(|e| Error::config(format!("breaker {}: {}", skill, e)))?;
        }
        if self.feedback_retention == 0 {
            return Err(Error::config("feedback_retention must be at least 1"));
        }
        let t = &self.thresholds;
        if t.price_warning_pct <= 0.0 || t.price_critical_pct <= t.price_warning_pct {
            return Err(Error::config(
                "price thresholds must satisfy 0 < warning < critical",
            ));
        }
        if t.mkt_tolerance_celsius < 0.0 || t.mkt_activation_energy_over_r <= 0.0 {
            return Err(Error::config("MKT parameters must be positive"));
        }
        if t.certificate_expiry_warning_days < 0 {
            return Err(Error::config("certificate expiry window must be positive"));
        }
        Ok(())
    }

    /// Breaker settings for a skill: its override, or the default.
    pub fn breaker_config_for(&self, skill_id: &str) -> &CircuitBreakerConfig {
        self.breaker_overrides.get(skill_id).unwrap_or(&self.breaker)
    }

    pub fn with_breaker_override(
        mut self,
        skill_id: impl Into<String>,
        breaker: CircuitBreakerConfig,
    ) -> Self {
        self.breaker_overrides.insert(skill_id.into(), breaker);
        self
    }
}
