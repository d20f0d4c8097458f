//! Oracle Identity - verifiable identity for Oracles and their owners
//!
//! Identity is proven without passwords, by control of a wallet key and/or
//! control of a GitHub repository anchored to its birth issue. Verified
//! Oracles form a Merkle tree whose inclusion proofs anyone can check
//! against the published root.
//!
//! # How it works
//!
//! 1. Wallet sign-in: request a nonce, sign the returned message, submit the
//!    signature. The nonce is single-use and expires after 5 minutes.
//! 2. Repo verification: start a challenge on issue #1 of the Oracle's repo,
//!    comment `verify:<code>` as the issue author, then verify.
//! 3. Both flows resolve a persistent identity and return a session token.
//!    Wallet and GitHub aspects can be linked onto one identity.
//! 4. Approved Oracles with a wallet and birth issue become Merkle leaves.
//!
//! # Anti-abuse measures
//!
//! - The signed message must match the stored challenge, not client text
//! - Only the birth issue's author can complete a repo challenge
//! - Linking never overwrites a credential bound elsewhere

pub mod allowlist;
pub mod auth;
pub mod challenge_store;
pub mod clock;
pub mod config;
pub mod error;
pub mod github;
pub mod identity;
pub mod merkle;
pub mod nonce;
pub mod proof;
pub mod repo_challenge;
pub mod resolver;
pub mod server;
pub mod service;
pub mod storage;
pub mod token;
pub mod verifier;

pub use allowlist::{AllowList, AllowListSource, FileAllowList, RepoPattern, StaticAllowList};
pub use auth::{canonical_address, checksum_address, recover_personal_signer};
pub use challenge_store::{ChallengeStore, Expiring, MemoryChallengeStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{IdentityError, Result};
pub use github::{GitHubClient, IssueRef, IssueSource};
pub use identity::{Identity, IdentityKind, IdentityStore, MemoryIdentityStore};
pub use merkle::{internal_hash, MerkleLeaf, MerkleTree};
pub use nonce::{MessageTemplate, NonceChallenge, NonceStore, SignInMessage};
pub use proof::{verify_membership, MembershipProof, MerkleProofService};
pub use repo_challenge::{RepoChallenge, RepoChallengeState, RepoVerificationChallenge};
pub use resolver::{Aspect, IdentityResolver, Resolution};
pub use service::{IdentityService, WalletProof};
pub use storage::SqliteIdentityStore;
pub use token::{JwtTokenIssuer, SessionTokenIssuer};
pub use verifier::SignatureVerifier;
