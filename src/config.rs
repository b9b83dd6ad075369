use std::env;
use std::time::Duration;

use crate::error::ConfigError;

const DEFAULT_PREFIX: &str = ".";
const DEFAULT_IDLE_POLL_SECS: u64 = 60;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_SEARCH_LIMIT: usize = 20;
const MAX_SEARCH_LIMIT: usize = 25;

#[derive(Clone, Debug)]
pub struct Config {
    pub token: String,
    pub prefix: String,
    pub idle_poll: Duration,
    pub idle_timeout: Duration,
    pub search_limit: usize,
}

impl Config {
    /// Reads the configuration from the process environment. A `.env` file
    /// is expected to have been loaded beforehand.
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let token = lookup("DISCORD_TOKEN")
            .filter(|token| !token.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let prefix = lookup("COMMAND_PREFIX")
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or_else(|| DEFAULT_PREFIX.to_string());

        let idle_poll = parse_number(&lookup, "IDLE_POLL_SECS", DEFAULT_IDLE_POLL_SECS)?;
        let idle_timeout = parse_number(&lookup, "IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)?;
        let search_limit = parse_number(&lookup, "SEARCH_LIMIT", DEFAULT_SEARCH_LIMIT)?;

        if idle_poll == 0 {
            return Err(ConfigError::Invalid { key: "IDLE_POLL_SECS", value: "0".to_string() });
        }

        Ok(Config {
            token,
            prefix,
            idle_poll: Duration::from_secs(idle_poll),
            idle_timeout: Duration::from_secs(idle_timeout),
            search_limit: search_limit.clamp(1, MAX_SEARCH_LIMIT),
        })
    }
}

fn parse_number<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}
