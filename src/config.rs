use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// ==================== CONFIG ====================

pub const MOBILE_UA: &str = "Mozilla/5.0 (Linux; Android 13; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Mobile Safari/537.36";

pub const INSTAGRAM_APP_UA: &str = "Instagram 219.0.0.12.117 Android";

const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BROWSERS: usize = 2;
const DEFAULT_MAX_REDIRECTS: usize = 3;
const DEFAULT_INSTAGRAM_APP_ID: &str = "936619743392459";

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parse_env<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        None => Ok(default),
    }
}

/// Which transport performs the network calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Plain HTTP with browser emulation.
    Lite,
    /// Headless Chromium dumping the rendered DOM.
    Headless,
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lite" | "http" => Ok(Engine::Lite),
            "headless" | "browser" => Ok(Engine::Headless),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Applied to every network call in a cascade.
    pub request_timeout: Duration,
    pub engine: Engine,
    pub chrome_bin: String,
    pub max_browsers: usize,
    pub max_redirects: usize,
    pub instagram_app_id: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            engine: Engine::Lite,
            chrome_bin: "chromium".to_string(),
            max_browsers: DEFAULT_MAX_BROWSERS,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            instagram_app_id: DEFAULT_INSTAGRAM_APP_ID.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let timeout_secs = parse_env("SOCIAL_STATS_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "SOCIAL_STATS_TIMEOUT_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            request_timeout: Duration::from_secs(timeout_secs),
            engine: parse_env("SOCIAL_STATS_ENGINE", defaults.engine)?,
            chrome_bin: env_var("CHROME_BIN").unwrap_or(defaults.chrome_bin),
            max_browsers: parse_env("SOCIAL_STATS_MAX_BROWSERS", defaults.max_browsers)?.max(1),
            max_redirects: parse_env("SOCIAL_STATS_MAX_REDIRECTS", defaults.max_redirects)?,
            instagram_app_id: env_var("INSTAGRAM_APP_ID").unwrap_or(defaults.instagram_app_id),
        })
    }
}
