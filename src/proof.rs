//! Membership proofs over the current Oracle family
//!
//! `verify_membership` needs only the leaf, the proof and the root, so any
//! third party (including an on-chain contract) can check it without the
//! leaf set.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::allowlist::AllowListSource;
use crate::error::{IdentityError, Result};
use crate::github::IssueRef;
use crate::identity::{Identity, IdentityKind, IdentityStore};
use crate::merkle::{hash_from_hex, hash_to_hex, internal_hash, Hash, MerkleLeaf, MerkleTree};
use crate::resolver::approval_for;

/// Fold `proof` over the leaf hash and compare with `root`.
pub fn verify_membership(leaf: &MerkleLeaf, proof: &[Hash], root: &Hash) -> bool {
    let canonical = MerkleLeaf::new(
        &leaf.wallet_address,
        leaf.birth_issue_url.clone(),
        leaf.issue_number,
    );
    let leaf_hash = match canonical.and_then(|l| l.hash()) {
        Ok(h) => h,
        Err(_) => return false,
    };
    let computed = proof
        .iter()
        .fold(leaf_hash, |acc, sibling| internal_hash(&acc, sibling));
    &computed == root
}

/// Hex-encoded variant used by the HTTP and CLI surfaces. Malformed hashes
/// make the proof invalid rather than an error.
pub fn verify_membership_hex(leaf: &MerkleLeaf, proof: &[String], root: &str) -> bool {
    let Some(root) = hash_from_hex(root) else {
        return false;
    };
    let proof: Option<Vec<Hash>> = proof.iter().map(|p| hash_from_hex(p)).collect();
    match proof {
        Some(proof) => verify_membership(leaf, &proof, &root),
        None => false,
    }
}

/// Leaf for an identity, if it belongs in the tree: approved, an Oracle or
/// Agent, with both a wallet and a parseable birth issue.
pub fn leaf_for(identity: &Identity) -> Option<MerkleLeaf> {
    let eligible = matches!(identity.kind, IdentityKind::Oracle | IdentityKind::Agent);
    if !identity.approved || !eligible {
        return None;
    }
    let wallet = identity.wallet_address.as_deref()?;
    let url = identity.birth_issue.as_deref()?;
    let issue = match IssueRef::parse(url) {
        Ok(issue) => issue,
        Err(e) => {
            warn!("Skipping identity {} with bad birth issue: {}", identity.id, e);
            return None;
        }
    };
    MerkleLeaf::new(wallet, url, issue.number).ok()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootInfo {
    pub root: Option<String>,
    pub leaf_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipProof {
    pub root: String,
    pub proof: Vec<String>,
    pub leaf: MerkleLeaf,
    pub leaf_index: usize,
}

/// Builds a fresh tree from a snapshot of the identity store on every call.
/// Approval is recomputed against the current allow-list, so a removed
/// pattern drops its leaves before the identity resolves again.
pub struct MerkleProofService {
    store: Arc<dyn IdentityStore>,
    allowlist: Arc<dyn AllowListSource>,
}

impl MerkleProofService {
    pub fn new(store: Arc<dyn IdentityStore>, allowlist: Arc<dyn AllowListSource>) -> Self {
        Self { store, allowlist }
    }

    pub fn leaves(&self) -> Result<Vec<MerkleLeaf>> {
        let list = self.allowlist.current();
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter_map(|mut identity| {
                identity.approved = approval_for(&identity, &list);
                identity.reclassify();
                leaf_for(&identity)
            })
            .collect())
    }

    pub fn tree(&self) -> Result<MerkleTree> {
        let tree = MerkleTree::build(self.leaves()?)?;
        debug!("Built membership tree with {} leaves", tree.len());
        Ok(tree)
    }

    pub fn root(&self) -> Result<RootInfo> {
        let tree = self.tree()?;
        Ok(RootInfo {
            root: tree.root().as_ref().map(hash_to_hex),
            leaf_count: tree.len(),
        })
    }

    pub fn proof_for(&self, wallet: &str, issue_number: u64) -> Result<MembershipProof> {
        let tree = self.tree()?;
        proof_from_tree(&tree, wallet, issue_number)
    }

    /// Like `verify_membership_hex`, but fails with `ProofVerificationFailed`.
    pub fn check(&self, leaf: &MerkleLeaf, proof: &[String], root: &str) -> Result<()> {
        if verify_membership_hex(leaf, proof, root) {
            Ok(())
        } else {
            Err(IdentityError::ProofVerificationFailed)
        }
    }
}

/// Proof for `(wallet, issue_number)` in an already built tree.
pub fn proof_from_tree(
    tree: &MerkleTree,
    wallet: &str,
    issue_number: u64,
) -> Result<MembershipProof> {
    let index = tree
        .index_of(wallet, issue_number)
        .ok_or(IdentityError::LeafNotFound)?;
    let root = tree.root().ok_or(IdentityError::LeafNotFound)?;
    let proof = tree.prove_membership(index)?;
    Ok(MembershipProof {
        root: hash_to_hex(&root),
        proof: proof.iter().map(hash_to_hex).collect(),
        leaf: tree.leaves()[index].clone(),
        leaf_index: index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::{AllowList, StaticAllowList};
    use crate::identity::MemoryIdentityStore;
    use chrono::Utc;

    fn leaf(seed: u8, issue_number: u64) -> MerkleLeaf {
        MerkleLeaf::new(
            &format!("0x{}", hex::encode([seed; 20])),
            format!("https://github.com/org/oracle-{}/issues/{}", seed, issue_number),
            issue_number,
        )
        .unwrap()
    }

    fn oracle(seed: u8, approved: bool) -> Identity {
        let mut identity = Identity::new(format!("oracle-{}", seed), Utc::now());
        identity.wallet_address = Some(format!("0x{}", hex::encode([seed; 20])));
        identity.github_username = Some(format!("user-{}", seed));
        identity.birth_issue = Some(format!("https://github.com/org/oracle-{}/issues/1", seed));
        identity.wallet_verified = true;
        identity.repo_verified = approved;
        identity.approved = approved;
        identity.reclassify();
        identity
    }

    fn no_patterns() -> Arc<StaticAllowList> {
        Arc::new(StaticAllowList::new(AllowList::default(), false))
    }

    #[test]
    fn test_round_trip_all_sizes() {
        for n in 1..=9u8 {
            let leaves: Vec<MerkleLeaf> = (1..=n).map(|i| leaf(i, i as u64)).collect();
            let tree = MerkleTree::build(leaves).unwrap();
            let root = tree.root().unwrap();
            for (i, l) in tree.leaves().iter().enumerate() {
                let proof = tree.prove_membership(i).unwrap();
                assert!(verify_membership(l, &proof, &root), "n={} i={}", n, i);
            }
        }
    }

    #[test]
    fn test_tampering_fails() {
        let tree = MerkleTree::build((1..=4).map(|i| leaf(i, i as u64))).unwrap();
        let root = tree.root().unwrap();
        let target = tree.leaves()[1].clone();
        let proof = tree.prove_membership(1).unwrap();

        let mut bad_proof = proof.clone();
        bad_proof[0][5] ^= 0x01;
        assert!(!verify_membership(&target, &bad_proof, &root));

        let mut bad_leaf = target.clone();
        bad_leaf.issue_number += 1;
        assert!(!verify_membership(&bad_leaf, &proof, &root));

        let mut bad_leaf = target.clone();
        bad_leaf.birth_issue_url.push('x');
        assert!(!verify_membership(&bad_leaf, &proof, &root));

        let mut bad_root = root;
        bad_root[31] ^= 0x80;
        assert!(!verify_membership(&target, &proof, &bad_root));
    }

    #[test]
    fn test_hex_verify_rejects_malformed() {
        let l = leaf(1, 1);
        let root = hash_to_hex(&l.hash().unwrap());
        assert!(verify_membership_hex(&l, &[], &root));
        assert!(!verify_membership_hex(&l, &["0x12".into()], &root));
        assert!(!verify_membership_hex(&l, &[], "not-hex"));
    }

    #[test]
    fn test_service_uses_approved_oracles_only() {
        let store = Arc::new(MemoryIdentityStore::new());
        store.create(&oracle(1, true)).unwrap();
        store.create(&oracle(2, true)).unwrap();
        store.create(&oracle(3, false)).unwrap();
        let mut human = oracle(4, true);
        human.birth_issue = None;
        human.reclassify();
        store.create(&human).unwrap();

        let service = MerkleProofService::new(store, no_patterns());
        let info = service.root().unwrap();
        assert_eq!(info.leaf_count, 2);

        let wallet = format!("0x{}", hex::encode([2u8; 20]));
        let proof = service.proof_for(&wallet, 1).unwrap();
        assert!(service.check(&proof.leaf, &proof.proof, &proof.root).is_ok());
        assert_eq!(Some(proof.root.clone()), info.root);

        assert!(matches!(
            service.proof_for(&format!("0x{}", hex::encode([3u8; 20])), 1),
            Err(IdentityError::LeafNotFound)
        ));
        assert!(matches!(
            service.check(&proof.leaf, &proof.proof, &hash_to_hex(&[0u8; 32])),
            Err(IdentityError::ProofVerificationFailed)
        ));
    }

    #[test]
    fn test_empty_service() {
        let service =
            MerkleProofService::new(Arc::new(MemoryIdentityStore::new()), no_patterns());
        let info = service.root().unwrap();
        assert_eq!(info.root, None);
        assert_eq!(info.leaf_count, 0);
    }

    #[test]
    fn test_removed_pattern_drops_agent_leaf() {
        let store = Arc::new(MemoryIdentityStore::new());
        let mut agent = Identity::new("agent-x", Utc::now());
        agent.wallet_address = Some(format!("0x{}", hex::encode([7u8; 20])));
        agent.github_repo = Some("org/agent-x".into());
        agent.birth_issue = Some("https://github.com/org/agent-x/issues/3".into());
        agent.wallet_verified = true;
        agent.approved = true;
        agent.reclassify();
        store.create(&agent).unwrap();
        store.create(&oracle(1, true)).unwrap();

        let allowlist = Arc::new(StaticAllowList::new(AllowList::new(&["org/*"]), false));
        let service = MerkleProofService::new(store, allowlist.clone());
        assert_eq!(service.root().unwrap().leaf_count, 2);

        allowlist.replace(AllowList::default());
        assert_eq!(service.root().unwrap().leaf_count, 1);
        assert!(matches!(
            service.proof_for(agent.wallet_address.as_deref().unwrap(), 3),
            Err(IdentityError::LeafNotFound)
        ));
    }
}
