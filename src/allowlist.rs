//! Repository allow-list for automatic approval
//!
//! Patterns are either an exact `owner/repo` or an owner wildcard
//! `owner/*`. Wallet addresses may also be listed verbatim.

use std::path::PathBuf;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoPattern {
    /// `owner/repo`, or a wallet address; compared case-insensitively
    Exact(String),
    /// `owner/*`; stores the `owner/` prefix
    OwnerWildcard(String),
}

impl RepoPattern {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_suffix('*') {
            Some(prefix) if prefix.ends_with('/') && prefix.len() > 1 => {
                Some(Self::OwnerWildcard(prefix.to_ascii_lowercase()))
            }
            Some(_) => None,
            None => Some(Self::Exact(raw.to_ascii_lowercase())),
        }
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_ascii_lowercase();
        match self {
            Self::Exact(value) => candidate == *value,
            Self::OwnerWildcard(prefix) => {
                candidate.len() > prefix.len()
                    && candidate.starts_with(prefix.as_str())
                    && !candidate[prefix.len()..].contains('/')
            }
        }
    }
}

/// Parsed table of patterns.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    patterns: Vec<RepoPattern>,
}

impl AllowList {
    pub fn new<S: AsRef<str>>(raw: &[S]) -> Self {
        let patterns = raw
            .iter()
            .filter_map(|p| {
                let parsed = RepoPattern::parse(p.as_ref());
                if parsed.is_none() && !p.as_ref().trim().is_empty() {
                    warn!("Ignoring malformed allow-list pattern '{}'", p.as_ref());
                }
                parsed
            })
            .collect();
        Self { patterns }
    }

    /// Parse a comma-separated list, e.g. `"org/*, other/repo"`.
    pub fn from_csv(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(',').collect();
        Self::new(parts.as_slice())
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(candidate))
    }

    pub fn patterns(&self) -> &[RepoPattern] {
        &self.patterns
    }
}

/// Where the current allow-list comes from. Consulted on every lookup.
pub trait AllowListSource: Send + Sync {
    fn current(&self) -> AllowList;

    /// Whether wallets may self-register as agents.
    fn agent_registration_enabled(&self) -> bool {
        false
    }
}

/// Allow-list held in memory; can be replaced at runtime.
#[derive(Debug, Default)]
pub struct StaticAllowList {
    list: RwLock<AllowList>,
    agent_registration: RwLock<bool>,
}

impl StaticAllowList {
    pub fn new(list: AllowList, agent_registration: bool) -> Self {
        Self {
            list: RwLock::new(list),
            agent_registration: RwLock::new(agent_registration),
        }
    }

    pub fn replace(&self, list: AllowList) {
        *self.list.write() = list;
    }

    pub fn set_agent_registration(&self, enabled: bool) {
        *self.agent_registration.write() = enabled;
    }
}

impl AllowListSource for StaticAllowList {
    fn current(&self) -> AllowList {
        self.list.read().clone()
    }

    fn agent_registration_enabled(&self) -> bool {
        *self.agent_registration.read()
    }
}

#[derive(Debug, Default, Deserialize)]
struct AllowListFile {
    #[serde(default)]
    allowlist: AllowListSection,
}

#[derive(Debug, Default, Deserialize)]
struct AllowListSection {
    #[serde(default)]
    repos: Vec<String>,
    #[serde(default)]
    allow_agent_registration: bool,
}

/// Re-reads the `[allowlist]` section of a config file on every call, so
/// edits apply without a restart. Falls back to `fallback` when the file
/// is missing or unreadable.
pub struct FileAllowList {
    path: PathBuf,
    fallback: StaticAllowList,
}

impl FileAllowList {
    pub fn new(path: impl Into<PathBuf>, fallback: AllowList, agent_registration: bool) -> Self {
        Self {
            path: path.into(),
            fallback: StaticAllowList::new(fallback, agent_registration),
        }
    }

    fn read(&self) -> Option<AllowListSection> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        match toml::from_str::<AllowListFile>(&content) {
            Ok(file) => Some(file.allowlist),
            Err(e) => {
                warn!("Failed to parse allow-list from {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl AllowListSource for FileAllowList {
    fn current(&self) -> AllowList {
        match self.read() {
            Some(section) => AllowList::new(section.repos.as_slice()),
            None => self.fallback.current(),
        }
    }

    fn agent_registration_enabled(&self) -> bool {
        match self.read() {
            Some(section) => section.allow_agent_registration,
            None => self.fallback.agent_registration_enabled(),
        }
    }
}
