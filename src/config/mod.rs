// src/config/mod.rs
// All tunables load from the environment (.env supported), with defaults.

use once_cell::sync::Lazy;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct PochiConfig {
    // ── Groq API (all chat/vision/codegen models)
    pub groq_base_url: String,
    pub groq_api_key: String,

    // ── Wolfram Alpha
    pub wolfram_base_url: String,
    pub wolfram_app_id: String,
    pub wolfram_monthly_limit: i64,
    pub wolfram_cache_ttl_secs: i64,

    // ── Database
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Planner context budget
    pub planner_context_tokens: i64,
    pub response_reserve_tokens: i64,

    // ── Code sandbox
    pub sandbox_interpreter: String,
    pub sandbox_timeout_secs: u64,

    // ── Chat limits
    pub max_images_per_message: usize,
    pub synth_history_messages: usize,

    // ── Server
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            let clean = val.split('#').next().unwrap_or("").trim();
            match clean.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl PochiConfig {
    pub fn from_env() -> Self {
        if dotenvy::dotenv().is_err() {
            eprintln!("Warning: .env file not found. Using environment variables and defaults.");
        }

        Self {
            groq_base_url: env_var_or("GROQ_BASE_URL", "https://api.groq.com/openai/v1".to_string()),
            groq_api_key: env_var_or("GROQ_API_KEY", String::new()),
            wolfram_base_url: env_var_or(
                "WOLFRAM_BASE_URL",
                "https://api.wolframalpha.com/v2/query".to_string(),
            ),
            wolfram_app_id: env_var_or("WOLFRAM_ALPHA_APP_ID", String::new()),
            wolfram_monthly_limit: env_var_or("WOLFRAM_MONTHLY_LIMIT", 2000),
            wolfram_cache_ttl_secs: env_var_or("WOLFRAM_CACHE_TTL_SECS", 3600 * 24 * 7),
            database_url: env_var_or("DATABASE_URL", "sqlite:./pochi.db?mode=rwc".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            planner_context_tokens: env_var_or("POCHI_PLANNER_CONTEXT_TOKENS", 200_000),
            response_reserve_tokens: env_var_or("POCHI_RESPONSE_RESERVE_TOKENS", 4096),
            sandbox_interpreter: env_var_or("POCHI_SANDBOX_INTERPRETER", "python3".to_string()),
            sandbox_timeout_secs: env_var_or("POCHI_SANDBOX_TIMEOUT_SECS", 30),
            max_images_per_message: env_var_or("POCHI_MAX_IMAGES", 5),
            synth_history_messages: env_var_or("POCHI_SYNTH_HISTORY_MESSAGES", 6),
            host: env_var_or("POCHI_HOST", "0.0.0.0".to_string()),
            port: env_var_or("POCHI_PORT", 7860),
            log_level: env_var_or("POCHI_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// Global config instance - loaded once at startup
pub static CONFIG: Lazy<PochiConfig> = Lazy::new(PochiConfig::from_env);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = PochiConfig::from_env();
        assert_eq!(config.wolfram_monthly_limit, 2000);
        assert_eq!(config.sandbox_timeout_secs, 30);
        assert_eq!(config.planner_context_tokens, 200_000);
    }

    #[test]
    fn test_bind_address() {
        let config = PochiConfig::from_env();
        assert!(config.bind_address().contains(':'));
    }
}
