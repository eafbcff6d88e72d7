use std::time::Duration;

use anyhow::{bail, Context};

use crate::fetch::DEFAULT_PAGE_SIZE;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_DEBOUNCE_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq)]
pub struct CensusConfig {
    pub database_url: Option<String>,
    pub page_size: usize,
    pub max_connections: u32,
    pub debounce: Duration,
}

impl CensusConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let page_size = parse_or(&lookup, "CENSUS_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        if page_size == 0 {
            bail!("CENSUS_PAGE_SIZE must be at least 1");
        }

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            page_size,
            max_connections: parse_or(&lookup, "CENSUS_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            debounce: Duration::from_millis(parse_or(
                &lookup,
                "CENSUS_DEBOUNCE_MS",
                DEFAULT_DEBOUNCE_MS,
            )?),
        })
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{value}`")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> anyhow::Result<CensusConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        CensusConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.debounce, Duration::from_millis(250));
        assert!(config.database_url().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/census"),
            ("CENSUS_PAGE_SIZE", "25"),
            ("CENSUS_DEBOUNCE_MS", " 100 "),
        ])
        .unwrap();
        assert_eq!(config.page_size, 25);
        assert_eq!(config.debounce, Duration::from_millis(100));
        assert_eq!(config.database_url().unwrap(), "postgres://localhost/census");
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(config_from(&[("CENSUS_PAGE_SIZE", "0")]).is_err());
        assert!(config_from(&[("CENSUS_PAGE_SIZE", "many")]).is_err());
        assert!(config_from(&[("CENSUS_MAX_CONNECTIONS", "-1")]).is_err());
    }
}
