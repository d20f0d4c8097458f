//! Configuration management
//!
//! Loads configuration from config.toml with support for:
//! - Server binding settings
//! - Sign-in message fields and token lifetime
//! - GitHub API access and repo challenge settings
//! - Approval allow-list
//! - Optional SQLite identity storage

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub github: GitHubConfig,
    #[serde(default)]
    pub allowlist: AllowListConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Wallet sign-in settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub domain: String,
    pub uri: String,
    pub statement: String,
    pub chain_id: u64,
    pub nonce_ttl_secs: i64,
    pub token_expiry_secs: u64,
    #[serde(default)]
    pub jwt_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub api_base: String,
    /// Label required on a birth issue
    pub birth_label: String,
    pub request_timeout_secs: u64,
    pub code_ttl_secs: i64,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllowListConfig {
    /// `owner/repo` or `owner/*` patterns
    #[serde(default)]
    pub repos: Vec<String>,
    #[serde(default)]
    pub allow_agent_registration: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// In-memory identity store when unset
    pub sqlite_path: Option<PathBuf>,
}

impl Config {
    /// Load from CONFIG_PATH, or config.toml, or the embedded defaults
    pub fn load() -> Result<Self> {
        Self::load_from(Self::path())
    }

    /// File the server reads its configuration (and live allow-list) from
    pub fn path() -> PathBuf {
        std::env::var("CONFIG_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Load from specific path, then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            // Use embedded default config
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")?
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(host) = env_non_empty("ORACLE_HOST") {
            self.server.host = host;
        }
        if let Some(port) = env_non_empty("ORACLE_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }
        if let Some(secret) = env_non_empty("JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Some(token) = crate::github::get_github_token() {
            self.github.token = token;
        }
    }

    /// GitHub token, if one is configured
    pub fn github_token(&self) -> Option<String> {
        if self.github.token.is_empty() {
            None
        } else {
            Some(self.github.token.clone())
        }
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

impl Default for Config {
    fn default() -> Self {
        // The embedded default config is validated by tests,
        // so this should never fail. Using a fallback for robustness.
        toml::from_str(DEFAULT_CONFIG).unwrap_or_else(|_| Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
            },
            auth: AuthConfig {
                domain: "oracle-net.local".to_string(),
                uri: "https://oracle-net.local".to_string(),
                statement: "Sign in to Oracle Net.".to_string(),
                chain_id: 1,
                nonce_ttl_secs: crate::nonce::DEFAULT_NONCE_TTL_SECS,
                token_expiry_secs: crate::token::DEFAULT_TOKEN_EXPIRY_SECS,
                jwt_secret: String::new(),
            },
            github: GitHubConfig {
                api_base: crate::github::GITHUB_API_BASE.to_string(),
                birth_label: crate::repo_challenge::DEFAULT_BIRTH_LABEL.to_string(),
                request_timeout_secs: crate::github::DEFAULT_TIMEOUT_SECS,
                code_ttl_secs: crate::repo_challenge::DEFAULT_CODE_TTL_SECS,
                token: String::new(),
            },
            allowlist: AllowListConfig {
                repos: vec!["Soul-Brews-Studio/*".to_string()],
                allow_agent_registration: false,
            },
            storage: StorageConfig::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_default_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.auth.nonce_ttl_secs, 300);
        assert_eq!(config.github.code_ttl_secs, 600);
        assert_eq!(config.github.birth_label, "birth-props");
        assert_eq!(config.allowlist.repos, vec!["Soul-Brews-Studio/*"]);
        assert!(!config.allowlist.allow_agent_registration);
        assert!(config.storage.sqlite_path.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let content = DEFAULT_CONFIG.replace("# sqlite_path", "sqlite_path");
        std::fs::write(&path, content).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(
            config.storage.sqlite_path,
            Some(PathBuf::from("oracle-identity.db"))
        );
        assert_eq!(config.github.api_base, "https://api.github.com");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_from("/nonexistent/oracle-config.toml").unwrap();
        assert_eq!(config.auth.chain_id, 1);
    }
}
