//! Identity records and the store they live in

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{IdentityError, Result};

/// What an identity is, decided when its aspects change and stored with
/// the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// Wallet- or GitHub-verified person with no birth issue
    Human,
    /// Birth issue proven through its repository
    Oracle,
    /// Birth issue recorded but not approved
    UnverifiedOracle,
    /// Self-registered wallet carrying a birth issue, not repo-verified
    Agent,
    /// Nothing verified yet
    Unknown,
}

impl IdentityKind {
    pub fn classify(identity: &Identity) -> Self {
        if !identity.wallet_verified && !identity.repo_verified {
            return Self::Unknown;
        }
        if identity.birth_issue.is_none() {
            return Self::Human;
        }
        if !identity.approved {
            return Self::UnverifiedOracle;
        }
        if identity.repo_verified {
            Self::Oracle
        } else {
            Self::Agent
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Oracle => "oracle",
            Self::UnverifiedOracle => "unverified_oracle",
            Self::Agent => "agent",
            Self::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "human" => Self::Human,
            "oracle" => Self::Oracle,
            "unverified_oracle" => Self::UnverifiedOracle,
            "agent" => Self::Agent,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    /// Canonical lower-case `0x` address
    pub wallet_address: Option<String>,
    pub github_username: Option<String>,
    pub github_repo: Option<String>,
    /// Birth issue URL anchoring this identity
    pub birth_issue: Option<String>,
    pub wallet_verified: bool,
    pub repo_verified: bool,
    pub approved: bool,
    pub kind: IdentityKind,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(display_name: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            wallet_address: None,
            github_username: None,
            github_repo: None,
            birth_issue: None,
            wallet_verified: false,
            repo_verified: false,
            approved: false,
            kind: IdentityKind::Unknown,
            created_at,
        }
    }

    /// Recompute `kind` after aspects changed.
    pub fn reclassify(&mut self) {
        self.kind = IdentityKind::classify(self);
    }
}

/// Persistent record store for identities.
///
/// Implementations must enforce uniqueness of non-empty wallet addresses
/// and GitHub usernames (case-insensitive).
pub trait IdentityStore: Send + Sync {
    fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    fn find_by_wallet(&self, address: &str) -> Result<Option<Identity>>;

    fn find_by_github(&self, username: &str) -> Result<Option<Identity>>;

    fn find_by_name(&self, display_name: &str) -> Result<Option<Identity>>;

    fn create(&self, identity: &Identity) -> Result<()>;

    fn update(&self, identity: &Identity) -> Result<()>;

    /// Consistent snapshot of every record.
    fn list(&self) -> Result<Vec<Identity>>;
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<HashMap<Uuid, Identity>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_unique(records: &HashMap<Uuid, Identity>, identity: &Identity) -> Result<()> {
        for other in records.values().filter(|o| o.id != identity.id) {
            if identity.wallet_address.is_some() && other.wallet_address == identity.wallet_address
            {
                return Err(IdentityError::Storage(format!(
                    "wallet {} already stored",
                    identity.wallet_address.as_deref().unwrap_or_default()
                )));
            }
            if let (Some(a), Some(b)) = (&identity.github_username, &other.github_username) {
                if a.eq_ignore_ascii_case(b) {
                    return Err(IdentityError::Storage(format!(
                        "github user {} already stored",
                        a
                    )));
                }
            }
        }
        Ok(())
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        Ok(self.records.read().get(&id).cloned())
    }

    fn find_by_wallet(&self, address: &str) -> Result<Option<Identity>> {
        let address = address.to_ascii_lowercase();
        Ok(self
            .records
            .read()
            .values()
            .find(|i| i.wallet_address.as_deref() == Some(address.as_str()))
            .cloned())
    }

    fn find_by_github(&self, username: &str) -> Result<Option<Identity>> {
        Ok(self
            .records
            .read()
            .values()
            .find(|i| {
                i.github_username
                    .as_deref()
                    .map(|u| u.eq_ignore_ascii_case(username))
                    .unwrap_or(false)
            })
            .cloned())
    }

    fn find_by_name(&self, display_name: &str) -> Result<Option<Identity>> {
        let records = self.records.read();
        let mut matches: Vec<&Identity> = records
            .values()
            .filter(|i| i.display_name.eq_ignore_ascii_case(display_name))
            .collect();
        matches.sort_by_key(|i| (i.created_at, i.id));
        Ok(matches.first().map(|i| (*i).clone()))
    }

    fn create(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write();
        if records.contains_key(&identity.id) {
            return Err(IdentityError::Storage(format!(
                "identity {} already exists",
                identity.id
            )));
        }
        Self::check_unique(&records, identity)?;
        records.insert(identity.id, identity.clone());
        Ok(())
    }

    fn update(&self, identity: &Identity) -> Result<()> {
        let mut records = self.records.write();
        if !records.contains_key(&identity.id) {
            return Err(IdentityError::Storage(format!(
                "identity {} not found",
                identity.id
            )));
        }
        Self::check_unique(&records, identity)?;
        records.insert(identity.id, identity.clone());
        Ok(())
    }

    fn list(&self) -> Result<Vec<Identity>> {
        let mut all: Vec<Identity> = self.records.read().values().cloned().collect();
        all.sort_by_key(|i| i.created_at);
        Ok(all)
    }
}
