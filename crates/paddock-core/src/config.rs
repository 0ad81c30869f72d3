use crate::errors::ConfigError;
use crate::retry::RetryPolicy;
use paddock_metrics::EloParams;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const DEFAULT_CONFIG_PATH: &str = "paddock.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub version: u32,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedules: Schedules,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub elo: EloParams,
    #[serde(default)]
    pub predictions: PredictionsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Task-level retry policy used by the DAG runner.
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            database: DatabaseConfig::default(),
            schedules: Schedules::default(),
            api: ApiConfig::default(),
            elo: EloParams::default(),
            predictions: PredictionsConfig::default(),
            retention: RetentionConfig::default(),
            retry: RetryPolicy::default(),
            scheduler: SchedulerConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("paddock.db"),
        }
    }
}

/// Cron expressions (seconds first, six fields) for `paddock serve`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Schedules {
    pub ingestion: String,
    pub predictions: String,
    pub maintenance: String,
}

impl Default for Schedules {
    fn default() -> Self {
        Self {
            ingestion: "0 0 */6 * * *".into(),
            predictions: "0 30 * * * *".into(),
            maintenance: "0 0 3 * * *".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub sports_base_url: String,
    pub weather_base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sports_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weather_api_key: Option<String>,
    pub timeout_seconds: u64,
    /// Total attempts per fetch, the first one included.
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            sports_base_url: "http://127.0.0.1:8080/v1".into(),
            weather_base_url: "http://127.0.0.1:8081/v1".into(),
            sports_api_key: None,
            weather_api_key: None,
            timeout_seconds: 30,
            max_retries: 3,
            backoff: Backoff::default(),
        }
    }
}

impl ApiConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Backoff shape for the HTTP fetcher; attempts come from `max_retries`.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay_ms: self.backoff.base_delay_ms,
            multiplier: self.backoff.multiplier,
            max_delay_ms: self.backoff.max_delay_ms,
            jitter: self.backoff.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Backoff {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            base_delay_ms: p.base_delay_ms,
            multiplier: p.multiplier,
            max_delay_ms: p.max_delay_ms,
            jitter: p.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionsConfig {
    pub model_version: String,
}

impl Default for PredictionsConfig {
    fn default() -> Self {
        Self {
            model_version: "elo-v1".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { days: 30 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub parallelism: usize,
    pub task_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 4,
            task_timeout_seconds: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Include the built-in rule set in addition to `rules`.
    pub builtin_rules: bool,
    pub rules: Vec<RuleConfig>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            builtin_rules: true,
            rules: Vec::new(),
        }
    }
}

/// A user-defined rule: passes while the predicate's value is at most
/// `fail_threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub name: String,
    pub predicate: String,
    #[serde(default)]
    pub fail_threshold: f64,
    #[serde(default)]
    pub stage: RuleStage,
}

/// Which validation task evaluates a rule. `validate` runs them all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStage {
    #[default]
    All,
    Ingest,
    Predictions,
}

impl RuleStage {
    pub fn includes(&self, stage: RuleStage) -> bool {
        *self == RuleStage::All || stage == RuleStage::All || *self == stage
    }
}

/// Reads, strictly parses, overrides from the environment and validates.
pub fn load_config(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    let mut cfg = parse_config(&raw)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))?;
    cfg.apply_env()?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parses YAML, rejecting unknown keys. Keys starting with `x-` or `_` are
/// allowed for anchors and extensions.
pub fn parse_config(raw: &str) -> Result<PipelineConfig, ConfigError> {
    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);
    let cfg: PipelineConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let mut unknown: Vec<_> = ignored_keys
        .into_iter()
        .filter(|k| {
            let leaf = k.rsplit('.').next().unwrap_or(k);
            !leaf.starts_with('_') && !leaf.starts_with("x-")
        })
        .collect();
    if !unknown.is_empty() {
        unknown.sort();
        return Err(ConfigError(format!("unknown config fields: {:?}", unknown)));
    }

    if cfg.version != SUPPORTED_CONFIG_VERSION {
        return Err(ConfigError(format!(
            "unsupported config version {} (supported: {})",
            cfg.version, SUPPORTED_CONFIG_VERSION
        )));
    }
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError(format!("{key}: cannot parse '{raw}'")))
}

impl PipelineConfig {
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|k| std::env::var(k).ok())
    }

    /// Applies `PADDOCK_*` overrides looked up through `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("PADDOCK_DB") {
            self.database.path = PathBuf::from(v);
        }
        if let Some(v) = lookup("PADDOCK_SPORTS_API_URL") {
            self.api.sports_base_url = v;
        }
        if let Some(v) = lookup("PADDOCK_SPORTS_API_KEY") {
            self.api.sports_api_key = Some(v);
        }
        if let Some(v) = lookup("PADDOCK_WEATHER_API_URL") {
            self.api.weather_base_url = v;
        }
        if let Some(v) = lookup("PADDOCK_WEATHER_API_KEY") {
            self.api.weather_api_key = Some(v);
        }
        if let Some(v) = lookup("PADDOCK_K_FACTOR") {
            self.elo.k_factor = parse_env("PADDOCK_K_FACTOR", &v)?;
        }
        if let Some(v) = lookup("PADDOCK_MODEL_VERSION") {
            self.predictions.model_version = v;
        }
        if let Some(v) = lookup("PADDOCK_RETENTION_DAYS") {
            self.retention.days = parse_env("PADDOCK_RETENTION_DAYS", &v)?;
        }
        if let Some(v) = lookup("PADDOCK_PARALLELISM") {
            self.scheduler.parallelism = parse_env("PADDOCK_PARALLELISM", &v)?;
        }
        Ok(())
    }

    /// Semantic checks; reports every violation at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errs = Vec::new();

        if self.elo.k_factor.is_nan() || self.elo.k_factor <= 0.0 {
            errs.push(format!("elo.k_factor must be > 0 (got {})", self.elo.k_factor));
        }
        if self.elo.rating_floor < 0.0 {
            errs.push("elo.rating_floor must be >= 0".to_string());
        }
        if self.elo.initial_rating < self.elo.rating_floor {
            errs.push("elo.initial_rating must not be below elo.rating_floor".to_string());
        }
        if self.predictions.model_version.trim().is_empty() {
            errs.push("predictions.model_version must not be empty".to_string());
        }
        if self.scheduler.parallelism == 0 {
            errs.push("scheduler.parallelism must be >= 1".to_string());
        }
        if self.scheduler.task_timeout_seconds == 0 {
            errs.push("scheduler.task_timeout_seconds must be >= 1".to_string());
        }
        if self.api.timeout_seconds == 0 {
            errs.push("api.timeout_seconds must be >= 1".to_string());
        }
        if self.api.max_retries == 0 {
            errs.push("api.max_retries must be >= 1".to_string());
        }
        check_policy("retry", &self.retry, &mut errs);
        check_policy("api.backoff", &self.api.retry_policy(), &mut errs);

        for (field, url) in [
            ("api.sports_base_url", &self.api.sports_base_url),
            ("api.weather_base_url", &self.api.weather_base_url),
        ] {
            match reqwest::Url::parse(url) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                Ok(u) => errs.push(format!("{field}: unsupported scheme '{}'", u.scheme())),
                Err(e) => errs.push(format!("{field}: {e}")),
            }
        }

        for (field, expr) in [
            ("schedules.ingestion", &self.schedules.ingestion),
            ("schedules.predictions", &self.schedules.predictions),
            ("schedules.maintenance", &self.schedules.maintenance),
        ] {
            let n = expr.split_whitespace().count();
            if !(6..=7).contains(&n) {
                errs.push(format!(
                    "{field}: expected 6 cron fields (sec min hour dom mon dow), got {n}"
                ));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.validation.rules {
            if rule.name.trim().is_empty() {
                errs.push("validation.rules: rule name must not be empty".to_string());
            } else if !seen.insert(rule.name.as_str()) {
                errs.push(format!("validation.rules: duplicate rule '{}'", rule.name));
            }
            if rule.predicate.trim().is_empty() {
                errs.push(format!("validation.rules.{}: empty predicate", rule.name));
            }
        }

        if errs.is_empty() {
            Ok(())
        } else {
            Err(ConfigError(errs.join("; ")))
        }
    }
}

fn check_policy(field: &str, p: &RetryPolicy, errs: &mut Vec<String>) {
    if p.max_attempts == 0 {
        errs.push(format!("{field}.max_attempts must be >= 1"));
    }
    if p.multiplier < 1.0 {
        errs.push(format!("{field}.multiplier must be >= 1"));
    }
    if !(0.0..1.0).contains(&p.jitter) {
        errs.push(format!("{field}.jitter must be in [0, 1)"));
    }
    if p.max_delay_ms < p.base_delay_ms {
        errs.push(format!("{field}.max_delay_ms must be >= base_delay_ms"));
    }
}
