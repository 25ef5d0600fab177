use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;

use tessera_engine::EngineConfig;

fn default_addr() -> String {
    "127.0.0.1:8643".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("tessera.db")
}

fn default_catalog_timeout_ms() -> u64 {
    5000
}

fn default_suggest_limit() -> usize {
    5
}

/// Server settings, read from a TOML file with every field optional.
/// `TESSERA_ADDR` and `TESSERA_DB` override the file for container use.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_catalog_timeout_ms")]
    pub catalog_timeout_ms: u64,
    #[serde(default = "default_suggest_limit")]
    pub suggest_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            db_path: default_db_path(),
            catalog_timeout_ms: default_catalog_timeout_ms(),
            suggest_limit: default_suggest_limit(),
        }
    }
}

impl ServerConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).context("parsing config")
    }

    /// `TESSERA_CONFIG` names the file to load; otherwise `tessera.toml` in
    /// the working directory if it exists; otherwise built-in defaults.
    pub fn load() -> anyhow::Result<Self> {
        let mut cfg = match env::var("TESSERA_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading config {path}"))?;
                Self::from_toml(&content)?
            }
            Err(_) => {
                let fallback = Path::new("tessera.toml");
                if fallback.exists() {
                    Self::from_toml(&std::fs::read_to_string(fallback).context("reading tessera.toml")?)?
                } else {
                    Self::default()
                }
            }
        };
        if let Ok(addr) = env::var("TESSERA_ADDR") {
            cfg.addr = addr;
        }
        if let Ok(db) = env::var("TESSERA_DB") {
            cfg.db_path = PathBuf::from(db);
        }
        Ok(cfg)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            catalog_timeout: Duration::from_millis(self.catalog_timeout_ms),
            suggest_limit: self.suggest_limit,
            ..EngineConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = ServerConfig::from_toml("").unwrap();
        assert_eq!(cfg.addr, "127.0.0.1:8643");
        assert_eq!(cfg.db_path, PathBuf::from("tessera.db"));
        assert_eq!(cfg.suggest_limit, 5);
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let cfg = ServerConfig::from_toml(
            r#"
            addr = "0.0.0.0:9000"
            catalog_timeout_ms = 750
            "#,
        )
        .unwrap();
        assert_eq!(cfg.addr, "0.0.0.0:9000");
        assert_eq!(cfg.catalog_timeout_ms, 750);
        assert_eq!(cfg.db_path, PathBuf::from("tessera.db"));

        let engine = cfg.engine_config();
        assert_eq!(engine.catalog_timeout, Duration::from_millis(750));
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(ServerConfig::from_toml("addr = [1, 2]").is_err());
    }
}
