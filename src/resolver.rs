//! Maps verified credentials onto persistent identity records
//!
//! Approval through the allow-list is re-evaluated on every resolution and
//! never cached: removing a pattern revokes it on the next call. Approval
//! earned by proving a repository is permanent.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allowlist::{AllowList, AllowListSource};
use crate::auth::canonical_address;
use crate::clock::Clock;
use crate::error::{IdentityError, Result};
use crate::github::IssueRef;
use crate::identity::{Identity, IdentityStore};

/// Outcome of a resolve call.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub identity: Identity,
    pub created: bool,
}

/// A credential that can be attached to an existing identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aspect {
    Wallet(String),
    Github {
        username: String,
        repo: String,
        birth_issue: Option<String>,
    },
}

pub struct IdentityResolver {
    store: Arc<dyn IdentityStore>,
    allowlist: Arc<dyn AllowListSource>,
    clock: Arc<dyn Clock>,
}

impl IdentityResolver {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        allowlist: Arc<dyn AllowListSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            allowlist,
            clock,
        }
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn allowlist(&self) -> &Arc<dyn AllowListSource> {
        &self.allowlist
    }

    /// Find or create the identity owning a verified wallet.
    pub fn resolve_by_wallet(&self, address: &str, display_name: Option<&str>) -> Result<Resolution> {
        let canonical = canonical_address(address)?;

        if let Some(mut identity) = self.store.find_by_wallet(&canonical)? {
            let mut changed = false;
            if !identity.wallet_verified {
                identity.wallet_verified = true;
                changed = true;
            }
            changed |= self.refresh_approval(&mut identity);
            if changed {
                identity.reclassify();
                self.store.update(&identity)?;
            }
            return Ok(Resolution {
                identity,
                created: false,
            });
        }

        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| short_address(&canonical));
        let mut identity = Identity::new(name, self.clock.now());
        identity.wallet_address = Some(canonical.clone());
        identity.wallet_verified = true;
        self.refresh_approval(&mut identity);
        identity.reclassify();

        self.create_or_reuse(identity, |store| store.find_by_wallet(&canonical))
    }

    /// Find or create the identity for a GitHub user whose birth issue has
    /// just been proven. Always approved.
    pub fn resolve_by_github(
        &self,
        username: &str,
        repo: &str,
        oracle_name: Option<&str>,
        birth_issue: Option<&str>,
    ) -> Result<Resolution> {
        if let Some(mut identity) = self.store.find_by_github(username)? {
            identity.github_repo = Some(repo.to_string());
            if let Some(url) = birth_issue {
                identity.birth_issue = Some(url.to_string());
            }
            identity.repo_verified = true;
            if !identity.approved {
                info!("Approved identity {} via repo {}", identity.id, repo);
            }
            identity.approved = true;
            identity.reclassify();
            self.store.update(&identity)?;
            return Ok(Resolution {
                identity,
                created: false,
            });
        }

        let name = oracle_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(username);
        let mut identity = Identity::new(name, self.clock.now());
        identity.github_username = Some(username.to_string());
        identity.github_repo = Some(repo.to_string());
        identity.birth_issue = birth_issue.map(str::to_string);
        identity.repo_verified = true;
        identity.approved = true;
        identity.reclassify();

        self.create_or_reuse(identity, |store| store.find_by_github(username))
    }

    /// Register a wallet-verified agent carrying a birth issue it has not
    /// proven through the repository. Approved only through the allow-list.
    pub fn resolve_agent(
        &self,
        address: &str,
        issue: &IssueRef,
        display_name: Option<&str>,
    ) -> Result<Resolution> {
        let canonical = canonical_address(address)?;
        let birth_issue = issue.url();

        if let Some(mut identity) = self.store.find_by_wallet(&canonical)? {
            match identity.birth_issue.as_deref() {
                Some(existing) if existing != birth_issue => {
                    return Err(IdentityError::ConflictingLink(format!(
                        "wallet {} already carries birth issue {}",
                        canonical, existing
                    )));
                }
                Some(_) => {}
                None => {
                    identity.birth_issue = Some(birth_issue.clone());
                    if identity.github_repo.is_none() {
                        identity.github_repo = Some(issue.repo_key());
                    }
                }
            }
            identity.wallet_verified = true;
            self.refresh_approval(&mut identity);
            identity.reclassify();
            self.store.update(&identity)?;
            return Ok(Resolution {
                identity,
                created: false,
            });
        }

        let name = display_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| issue.repo.clone());
        let mut identity = Identity::new(name, self.clock.now());
        identity.wallet_address = Some(canonical.clone());
        identity.wallet_verified = true;
        identity.github_repo = Some(issue.repo_key());
        identity.birth_issue = Some(birth_issue);
        self.refresh_approval(&mut identity);
        identity.reclassify();

        self.create_or_reuse(identity, |store| store.find_by_wallet(&canonical))
    }

    /// Attach `aspect` to the identity `identity_id`.
    ///
    /// Fails with `ConflictingLink` when the identity already holds a
    /// different value for that aspect, or when the credential is bound to
    /// another record.
    pub fn link(&self, identity_id: Uuid, aspect: Aspect) -> Result<Identity> {
        let mut identity = self
            .store
            .find_by_id(identity_id)?
            .ok_or_else(|| IdentityError::Storage(format!("identity {} not found", identity_id)))?;

        match aspect {
            Aspect::Wallet(address) => {
                let canonical = canonical_address(&address)?;
                if let Some(existing) = identity.wallet_address.as_deref() {
                    if existing != canonical {
                        return Err(IdentityError::ConflictingLink(format!(
                            "{} is already linked to wallet {}",
                            identity.display_name, existing
                        )));
                    }
                }
                if let Some(owner) = self.store.find_by_wallet(&canonical)? {
                    if owner.id != identity.id {
                        warn!(
                            "Refused to link wallet {} onto {}: bound to {}",
                            canonical, identity.id, owner.id
                        );
                        return Err(IdentityError::ConflictingLink(format!(
                            "wallet {} belongs to another identity",
                            canonical
                        )));
                    }
                }
                identity.wallet_address = Some(canonical);
                identity.wallet_verified = true;
            }
            Aspect::Github {
                username,
                repo,
                birth_issue,
            } => {
                if let Some(existing) = identity.github_username.as_deref() {
                    if !existing.eq_ignore_ascii_case(&username) {
                        return Err(IdentityError::ConflictingLink(format!(
                            "{} is already linked to GitHub user {}",
                            identity.display_name, existing
                        )));
                    }
                }
                if let Some(owner) = self.store.find_by_github(&username)? {
                    if owner.id != identity.id {
                        return Err(IdentityError::ConflictingLink(format!(
                            "GitHub user {} belongs to another identity",
                            username
                        )));
                    }
                }
                identity.github_username = Some(username);
                identity.github_repo = Some(repo);
                if birth_issue.is_some() {
                    identity.birth_issue = birth_issue;
                }
                identity.repo_verified = true;
                identity.approved = true;
            }
        }

        self.refresh_approval(&mut identity);
        identity.reclassify();
        self.store.update(&identity)?;
        info!("Linked aspect onto identity {} ({})", identity.id, identity.kind.as_str());
        Ok(identity)
    }

    /// Recompute approval against the current allow-list.
    /// Returns whether anything changed.
    fn refresh_approval(&self, identity: &mut Identity) -> bool {
        let approved = approval_for(identity, &self.allowlist.current());
        if approved == identity.approved {
            return false;
        }
        if approved {
            info!("Auto-approved identity {} via allow-list", identity.id);
        } else {
            info!("Revoked allow-list approval of identity {}", identity.id);
        }
        identity.approved = approved;
        true
    }

    /// Insert a new record. If a concurrent request created the same
    /// credential first, return that record instead.
    fn create_or_reuse<F>(&self, identity: Identity, lookup: F) -> Result<Resolution>
    where
        F: Fn(&dyn IdentityStore) -> Result<Option<Identity>>,
    {
        match self.store.create(&identity) {
            Ok(()) => {
                info!(
                    "Created identity {} '{}' ({}, approved={})",
                    identity.id,
                    identity.display_name,
                    identity.kind.as_str(),
                    identity.approved
                );
                Ok(Resolution {
                    identity,
                    created: true,
                })
            }
            Err(err) => match lookup(self.store.as_ref())? {
                Some(existing) => {
                    debug!("Identity created concurrently, reusing {}", existing.id);
                    Ok(Resolution {
                        identity: existing,
                        created: false,
                    })
                }
                None => Err(err),
            },
        }
    }
}

/// Whether `identity` is approved under `list`: repo-verified identities
/// always are, anything else only while its wallet or repo is listed.
pub fn approval_for(identity: &Identity, list: &AllowList) -> bool {
    let listed = |value: Option<&str>| value.map(|v| list.matches(v)).unwrap_or(false);
    identity.repo_verified
        || listed(identity.wallet_address.as_deref())
        || listed(identity.github_repo.as_deref())
}

fn short_address(canonical: &str) -> String {
    format!("{}...{}", &canonical[..6], &canonical[canonical.len() - 4..])
}
