use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Counter values at which a subscription is granted. Zero disables the reward.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Thresholds {
    pub uploads: i64,
    pub validations: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            uploads: 10,
            validations: 20,
        }
    }
}

impl Thresholds {
    /// Reads the thresholds from the process environment, with values in `.env`
    /// taking precedence so that edits to the file are picked up on reload.
    pub fn load() -> anyhow::Result<Thresholds> {
        let mut vars: HashMap<String, String> = env::vars().collect();
        if let Ok(iter) = dotenv::dotenv_iter() {
            for item in iter {
                let (key, value) = item.context("Failed to parse .env")?;
                vars.insert(key, value);
            }
        }
        Thresholds::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Thresholds> {
        let defaults = Thresholds::default();
        Ok(Thresholds {
            uploads: parse_var(
                vars.get("UPLOADS_FOR_SUBSCRIPTION"),
                "UPLOADS_FOR_SUBSCRIPTION",
                defaults.uploads,
            )?,
            validations: parse_var(
                vars.get("VALIDATIONS_FOR_SUBSCRIPTION"),
                "VALIDATIONS_FOR_SUBSCRIPTION",
                defaults.validations,
            )?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub database_url: String,
    pub database_pool_size: u32,
    pub storage_dir: String,
    pub thresholds: Thresholds,
    pub http_timeout: Duration,
    pub crossref_api_url: String,
    pub doi_lookup: bool,
    pub api_bind: String,
    pub expiry_sweep_minutes: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = env::vars().collect();
        Config::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Config> {
        let telegram_token = vars
            .get("TELEGRAM_BOT_TOKEN")
            .filter(|token| !token.is_empty())
            .cloned()
            .context("Expected TELEGRAM_BOT_TOKEN in the environment")?;
        let string = |key: &str, default: &str| {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        Ok(Config {
            telegram_token,
            telegram_api_url: string("TELEGRAM_API_URL", "https://api.telegram.org"),
            database_url: string("DATABASE_URL", "sciarticle.db"),
            database_pool_size: parse_var(vars.get("DATABASE_POOL_SIZE"), "DATABASE_POOL_SIZE", 8)?,
            storage_dir: string("STORAGE_DIR", "pdfs"),
            thresholds: Thresholds::from_vars(vars)?,
            http_timeout: Duration::from_secs(parse_var(
                vars.get("HTTP_TIMEOUT_SECS"),
                "HTTP_TIMEOUT_SECS",
                5,
            )?),
            crossref_api_url: string("CROSSREF_API_URL", "https://api.crossref.org"),
            doi_lookup: parse_var(vars.get("DOI_LOOKUP"), "DOI_LOOKUP", true)?,
            api_bind: string("API_BIND", "127.0.0.1:8080"),
            expiry_sweep_minutes: parse_var(
                vars.get("EXPIRY_SWEEP_MINUTES"),
                "EXPIRY_SWEEP_MINUTES",
                10,
            )?,
        })
    }
}

fn parse_var<T>(value: Option<&String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: `{}`", key, raw)),
        None => Ok(default),
    }
}
