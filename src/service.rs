//! Request-level orchestration
//!
//! Ties the protocols together: verify a credential, resolve the identity,
//! mint a session token. A challenge consumed by a request that later fails
//! is put back so the holder can retry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::error::{IdentityError, Result};
use crate::github::IssueRef;
use crate::identity::Identity;
use crate::merkle::MerkleLeaf;
use crate::nonce::IssuedNonce;
use crate::proof::{verify_membership_hex, MembershipProof, MerkleProofService, RootInfo};
use crate::repo_challenge::{RepoVerificationChallenge, StartedChallenge};
use crate::resolver::{Aspect, IdentityResolver, Resolution};
use crate::token::{extract_bearer, SessionTokenIssuer};
use crate::verifier::SignatureVerifier;

/// Result of a successful sign-in.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIn {
    pub token: String,
    pub identity: Identity,
    pub created: bool,
    pub approved: bool,
}

/// Result of a successful repo verification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoVerified {
    pub token: String,
    pub identity: Identity,
    pub created: bool,
    pub approved: bool,
    pub oracle_name: Option<String>,
}

/// A signed wallet credential as submitted by a client.
#[derive(Debug, Clone, Copy)]
pub struct WalletProof<'a> {
    pub address: &'a str,
    /// Signed text; the stored challenge message when absent
    pub message: Option<&'a str>,
    pub signature: &'a str,
}

pub struct IdentityService {
    verifier: Arc<SignatureVerifier>,
    resolver: Arc<IdentityResolver>,
    repo: Arc<RepoVerificationChallenge>,
    proofs: MerkleProofService,
    tokens: Arc<dyn SessionTokenIssuer>,
}

impl IdentityService {
    pub fn new(
        verifier: Arc<SignatureVerifier>,
        resolver: Arc<IdentityResolver>,
        repo: Arc<RepoVerificationChallenge>,
        tokens: Arc<dyn SessionTokenIssuer>,
    ) -> Self {
        let proofs =
            MerkleProofService::new(resolver.store().clone(), resolver.allowlist().clone());
        Self {
            verifier,
            resolver,
            repo,
            proofs,
            tokens,
        }
    }

    pub fn issue_nonce(&self, address: &str) -> Result<IssuedNonce> {
        self.verifier.nonces().issue_nonce(address)
    }

    /// Wallet sign-in: consume the nonce, resolve the identity, mint a token.
    pub fn sign_in_with_wallet(
        &self,
        proof: WalletProof<'_>,
        display_name: Option<&str>,
    ) -> Result<SignedIn> {
        let challenge = self
            .verifier
            .verify(proof.address, proof.message, proof.signature)?;

        let outcome = self
            .resolver
            .resolve_by_wallet(proof.address, display_name)
            .and_then(|resolution| self.signed_in(resolution));

        outcome.map_err(|err| {
            warn!("Wallet sign-in failed after verification: {}", err);
            self.verifier.restore(challenge);
            err
        })
    }

    /// Attach a wallet to the bearer token's identity. `target_name` must
    /// name that identity; display names are not unique, so the token
    /// subject decides which record is meant.
    pub fn link_wallet(
        &self,
        authorization: Option<&str>,
        proof: WalletProof<'_>,
        target_name: &str,
    ) -> Result<Identity> {
        let subject = self.authenticate(authorization)?;
        let target = self
            .resolver
            .store()
            .find_by_id(subject)?
            .filter(|t| t.display_name.eq_ignore_ascii_case(target_name.trim()))
            .ok_or_else(|| {
                IdentityError::Unauthorized(format!("token does not belong to '{}'", target_name))
            })?;

        let challenge = self
            .verifier
            .verify(proof.address, proof.message, proof.signature)?;

        match self
            .resolver
            .link(target.id, Aspect::Wallet(proof.address.to_string()))
        {
            Ok(identity) => {
                info!("Linked wallet onto '{}'", identity.display_name);
                Ok(identity)
            }
            Err(err) => {
                self.verifier.restore(challenge);
                Err(err)
            }
        }
    }

    /// Self-registration for agents that hold a wallet and point at a birth
    /// issue they have not proven through the repository.
    pub fn register_agent(
        &self,
        proof: WalletProof<'_>,
        birth_issue_url: &str,
        display_name: Option<&str>,
    ) -> Result<SignedIn> {
        if !self.resolver.allowlist().agent_registration_enabled() {
            return Err(IdentityError::AgentRegistrationDisabled);
        }
        let issue = IssueRef::parse(birth_issue_url)?;

        let challenge = self
            .verifier
            .verify(proof.address, proof.message, proof.signature)?;

        let outcome = self
            .resolver
            .resolve_agent(proof.address, &issue, display_name)
            .and_then(|resolution| self.signed_in(resolution));

        outcome.map_err(|err| {
            self.verifier.restore(challenge);
            err
        })
    }

    pub async fn start_repo_verification(&self, issue_url: &str) -> Result<StartedChallenge> {
        self.repo.start(issue_url).await
    }

    /// Finish a repo challenge. With a bearer token the GitHub aspect is
    /// linked onto the token's identity.
    pub async fn finish_repo_verification(
        &self,
        authorization: Option<&str>,
        issue_url: &str,
        code: &str,
    ) -> Result<RepoVerified> {
        let link_to = match authorization {
            Some(_) => Some(self.authenticate(authorization)?),
            None => None,
        };

        let verified = self.repo.verify(issue_url, code, link_to).await?;
        let identity = verified.resolution.identity;
        Ok(RepoVerified {
            token: self.tokens.issue(&identity)?,
            approved: identity.approved,
            created: verified.resolution.created,
            oracle_name: verified.oracle_name,
            identity,
        })
    }

    pub fn merkle_root(&self) -> Result<RootInfo> {
        self.proofs.root()
    }

    pub fn merkle_proof(&self, wallet: &str, issue_number: u64) -> Result<MembershipProof> {
        self.proofs.proof_for(wallet, issue_number)
    }

    pub fn merkle_check(&self, leaf: &MerkleLeaf, proof: &[String], root: &str) -> bool {
        verify_membership_hex(leaf, proof, root)
    }

    /// Drop expired challenges from both stores.
    pub fn sweep_expired(&self) -> (usize, usize) {
        (
            self.verifier.nonces().sweep_expired(),
            self.repo.sweep_expired(),
        )
    }

    fn authenticate(&self, authorization: Option<&str>) -> Result<uuid::Uuid> {
        let token = extract_bearer(authorization)
            .ok_or_else(|| IdentityError::Unauthorized("missing bearer token".to_string()))?;
        self.tokens.validate(token)
    }

    fn signed_in(&self, resolution: Resolution) -> Result<SignedIn> {
        let token = self.tokens.issue(&resolution.identity)?;
        Ok(SignedIn {
            token,
            approved: resolution.identity.approved,
            created: resolution.created,
            identity: resolution.identity,
        })
    }
}
