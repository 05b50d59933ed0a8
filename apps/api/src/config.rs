use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::embedding::SigmoidParams;
use crate::pool::PoolConfig;
use crate::retry::{RetryCategory, RetryPolicy, RetryPolicyTable};

const DEFAULT_EMBEDDING_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    pub engine: EngineConfig,
    pub port: u16,
    pub rust_log: String,
}

/// Credentials and endpoints for the two external AI services.
#[derive(Clone)]
pub struct ProviderConfig {
    pub embedding_api_url: String,
    pub embedding_api_key: String,
    pub embedding_model: String,
    pub anthropic_api_key: String,
}

// Keys stay out of logs.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("embedding_api_url", &self.embedding_api_url)
            .field("embedding_model", &self.embedding_model)
            .finish_non_exhaustive()
    }
}

/// Runtime knobs of the match engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
    pub pool: PoolConfig,
    pub retry: RetryPolicyTable,
    pub sigmoid: SigmoidParams,
    pub partial_results_enabled: bool,
    pub phase_timeout: Duration,
    pub pipeline_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(3600),
            cache_max_size: 1000,
            pool: PoolConfig::default(),
            retry: RetryPolicyTable::default(),
            sigmoid: SigmoidParams::default(),
            partial_results_enabled: true,
            phase_timeout: Duration::from_secs(60),
            pipeline_timeout: Duration::from_secs(150),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. `from_env` passes the process
    /// environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let provider = ProviderConfig {
            embedding_api_url: env.string_or("EMBEDDING_API_URL", DEFAULT_EMBEDDING_URL),
            embedding_api_key: env.require("EMBEDDING_API_KEY")?,
            embedding_model: env.string_or("EMBEDDING_MODEL", DEFAULT_EMBEDDING_MODEL),
            anthropic_api_key: env.require("ANTHROPIC_API_KEY")?,
        };

        let defaults = EngineConfig::default();
        let pool_max = env.parse_or("POOL_MAX_SIZE", defaults.pool.max_size)?.max(1);
        let pool = PoolConfig {
            min_size: env.parse_or("POOL_MIN_SIZE", defaults.pool.min_size)?.min(pool_max),
            max_size: pool_max,
            acquire_timeout: env.millis_or("POOL_ACQUIRE_TIMEOUT_MS", defaults.pool.acquire_timeout)?,
        };

        let engine = EngineConfig {
            cache_ttl: Duration::from_secs(
                env.parse_or("CACHE_TTL_SECS", defaults.cache_ttl.as_secs())?,
            ),
            cache_max_size: env.parse_or("CACHE_MAX_SIZE", defaults.cache_max_size)?,
            pool,
            retry: retry_table(&env, defaults.retry)?,
            sigmoid: SigmoidParams {
                x0: env.parse_or("SIGMOID_X0", defaults.sigmoid.x0)?,
                k: env.parse_or("SIGMOID_K", defaults.sigmoid.k)?,
            },
            partial_results_enabled: env
                .parse_or("PARTIAL_RESULTS_ENABLED", defaults.partial_results_enabled)?,
            phase_timeout: env.millis_or("PHASE_TIMEOUT_MS", defaults.phase_timeout)?,
            pipeline_timeout: env.millis_or("PIPELINE_TIMEOUT_MS", defaults.pipeline_timeout)?,
        };

        Ok(Config {
            provider,
            engine,
            port: env
                .parse_or("PORT", 8080u16)
                .context("PORT must be a valid port number")?,
            rust_log: env.string_or("RUST_LOG", "info"),
        })
    }
}

/// Applies `RETRY_<CATEGORY>_MAX_ATTEMPTS` / `RETRY_<CATEGORY>_BASE_DELAY_MS`
/// over the default table. Backoff kind is not configurable.
fn retry_table<F>(env: &Env<F>, mut table: RetryPolicyTable) -> Result<RetryPolicyTable>
where
    F: Fn(&str) -> Option<String>,
{
    for category in RetryCategory::ALL {
        let current = table.policy(category);
        let prefix = format!("RETRY_{}", category.as_str().to_uppercase());
        let attempts = env.parse_or(&format!("{prefix}_MAX_ATTEMPTS"), current.max_attempts())?;
        let base_delay = env.millis_or(&format!("{prefix}_BASE_DELAY_MS"), current.base_delay)?;
        if attempts != current.max_attempts() || base_delay != current.base_delay {
            table = table.with_policy(RetryPolicy::new(
                category,
                attempts,
                current.backoff,
                base_delay,
            ));
        }
    }
    Ok(table)
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn require(&self, key: &str) -> Result<String> {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("Required environment variable '{key}' is not set"))
    }

    fn string_or(&self, key: &str, default: &str) -> String {
        (self.0)(key).unwrap_or_else(|| default.to_string())
    }

    fn parse_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match (self.0)(key) {
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'")),
            None => Ok(default),
        }
    }

    fn millis_or(&self, key: &str, default: Duration) -> Result<Duration> {
        let millis = self.parse_or(key, default.as_millis() as u64)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::retry::Backoff;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("EMBEDDING_API_KEY", "emb-key"),
        ("ANTHROPIC_API_KEY", "llm-key"),
    ];

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.provider.embedding_api_url, DEFAULT_EMBEDDING_URL);
        assert_eq!(config.engine.cache_max_size, 1000);
        assert_eq!(config.engine.pool.max_size, 10);
        assert_eq!(config.engine.phase_timeout, Duration::from_secs(60));
        assert!(config.engine.partial_results_enabled);
        assert_eq!(config.engine.retry.policy(RetryCategory::RateLimit).max_attempts(), 5);
    }

    #[test]
    fn test_missing_required_key_fails() {
        let err = Config::from_lookup(lookup(&[("EMBEDDING_API_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn test_invalid_number_names_the_variable() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CACHE_MAX_SIZE", "lots"));
        let err = Config::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(format!("{err:#}").contains("CACHE_MAX_SIZE"));
    }

    #[test]
    fn test_pool_min_clamped_to_max() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([("POOL_MIN_SIZE", "20"), ("POOL_MAX_SIZE", "4")]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.engine.pool.min_size, 4);
        assert_eq!(config.engine.pool.max_size, 4);
    }

    #[test]
    fn test_retry_overrides_keep_backoff_kind() {
        let mut pairs = REQUIRED.to_vec();
        pairs.extend([
            ("RETRY_RATE_LIMIT_MAX_ATTEMPTS", "2"),
            ("RETRY_RATE_LIMIT_BASE_DELAY_MS", "250"),
            ("RETRY_UNKNOWN_MAX_ATTEMPTS", "0"),
        ]);
        let config = Config::from_lookup(lookup(&pairs)).unwrap();

        let rate = config.engine.retry.policy(RetryCategory::RateLimit);
        assert_eq!(rate.max_attempts(), 2);
        assert_eq!(rate.base_delay, Duration::from_millis(250));
        assert_eq!(rate.backoff, Backoff::Exponential);

        // Zero is clamped to a single attempt.
        assert_eq!(config.engine.retry.policy(RetryCategory::Unknown).max_attempts(), 1);
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = Config::from_lookup(lookup(&REQUIRED)).unwrap();
        let debug = format!("{:?}", config.provider);
        assert!(!debug.contains("emb-key"));
        assert!(!debug.contains("llm-key"));
    }
}
