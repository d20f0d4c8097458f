//! Merkle tree over verified Oracle leaves
//!
//! The encoding matches what a Solidity verifier recomputes:
//!
//! - `leaf_hash = keccak256(keccak256(abi.encode(address, string, uint256)))`
//!   over `(wallet, birth issue URL, issue number)`
//! - `internal_hash(a, b) = keccak256(min(a, b) ++ max(a, b))`
//!
//! Leaves are ordered by issue number (then wallet, then URL) and exact
//! duplicates are collapsed. The last node of an odd-sized layer is carried
//! up unchanged, never duplicated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::auth::{canonical_address, keccak256};
use crate::error::{IdentityError, Result};

pub type Hash = [u8; 32];

/// One Oracle's entry in the membership tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MerkleLeaf {
    pub wallet_address: String,
    pub birth_issue_url: String,
    pub issue_number: u64,
}

impl MerkleLeaf {
    /// Build a leaf with the wallet in canonical form.
    pub fn new(
        wallet_address: &str,
        birth_issue_url: impl Into<String>,
        issue_number: u64,
    ) -> Result<Self> {
        Ok(Self {
            wallet_address: canonical_address(wallet_address)?,
            birth_issue_url: birth_issue_url.into(),
            issue_number,
        })
    }

    /// `abi.encode(address, string, uint256)`
    pub fn abi_encode(&self) -> Result<Vec<u8>> {
        let address = hex::decode(self.wallet_address.trim_start_matches("0x"))
            .ok()
            .filter(|b| b.len() == 20)
            .ok_or_else(|| IdentityError::InvalidAddress(self.wallet_address.clone()))?;
        let text = self.birth_issue_url.as_bytes();
        let padded_len = text.len().div_ceil(32) * 32;

        let mut out = Vec::with_capacity(32 * 4 + padded_len);
        // head: address, offset of the string tail, number
        out.extend_from_slice(&[0u8; 12]);
        out.extend_from_slice(&address);
        out.extend_from_slice(&word(3 * 32));
        out.extend_from_slice(&word(self.issue_number));
        // tail: string length, then bytes right-padded to a word boundary
        out.extend_from_slice(&word(text.len() as u64));
        out.extend_from_slice(text);
        out.resize(32 * 4 + padded_len, 0);
        Ok(out)
    }

    pub fn hash(&self) -> Result<Hash> {
        Ok(keccak256(&keccak256(&self.abi_encode()?)))
    }

    fn sort_key(&self) -> (u64, &str, &str) {
        (
            self.issue_number,
            self.wallet_address.as_str(),
            self.birth_issue_url.as_str(),
        )
    }
}

/// Big-endian `uint256` word.
fn word(value: u64) -> [u8; 32] {
    let mut out = [0u8; 32];
    out[24..].copy_from_slice(&value.to_be_bytes());
    out
}

/// Order-independent pair hash.
pub fn internal_hash(a: &Hash, b: &Hash) -> Hash {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(lo);
    buf[32..].copy_from_slice(hi);
    keccak256(&buf)
}

pub fn hash_to_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(hash))
}

pub fn hash_from_hex(raw: &str) -> Option<Hash> {
    let raw = raw.trim();
    let raw = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes = hex::decode(raw).ok()?;
    bytes.try_into().ok()
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    leaves: Vec<MerkleLeaf>,
    /// `layers[0]` holds leaf hashes; the last layer holds the root
    layers: Vec<Vec<Hash>>,
    index: HashMap<(String, u64), usize>,
}

impl MerkleTree {
    pub fn build(leaves: impl IntoIterator<Item = MerkleLeaf>) -> Result<Self> {
        let mut leaves = leaves
            .into_iter()
            .map(|l| MerkleLeaf::new(&l.wallet_address, l.birth_issue_url, l.issue_number))
            .collect::<Result<Vec<_>>>()?;
        leaves.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        leaves.dedup();

        let mut index = HashMap::with_capacity(leaves.len());
        let mut hashes = Vec::with_capacity(leaves.len());
        for (i, leaf) in leaves.iter().enumerate() {
            index
                .entry((leaf.wallet_address.clone(), leaf.issue_number))
                .or_insert(i);
            hashes.push(leaf.hash()?);
        }

        let mut layers = vec![hashes];
        while let Some(layer) = layers.last().filter(|l| l.len() > 1) {
            let next = layer
                .chunks(2)
                .map(|pair| match pair {
                    [a, b] => internal_hash(a, b),
                    _ => pair[0],
                })
                .collect();
            layers.push(next);
        }

        Ok(Self {
            leaves,
            layers,
            index,
        })
    }

    /// `None` for an empty tree.
    pub fn root(&self) -> Option<Hash> {
        self.layers.last().and_then(|l| l.first()).copied()
    }

    pub fn leaves(&self) -> &[MerkleLeaf] {
        &self.leaves
    }

    pub fn layers(&self) -> &[Vec<Hash>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Position of the leaf for `(wallet, issue_number)` in sorted order.
    pub fn index_of(&self, wallet: &str, issue_number: u64) -> Option<usize> {
        let wallet = canonical_address(wallet).ok()?;
        self.index.get(&(wallet, issue_number)).copied()
    }

    /// Sibling hashes from the leaf at `leaf_index` up to the root. Layers
    /// where the node was carried up contribute nothing.
    pub fn prove_membership(&self, leaf_index: usize) -> Result<Vec<Hash>> {
        if leaf_index >= self.leaves.len() {
            return Err(IdentityError::LeafNotFound);
        }

        let mut proof = Vec::new();
        let mut idx = leaf_index;
        for layer in &self.layers[..self.layers.len() - 1] {
            if let Some(sibling) = layer.get(idx ^ 1) {
                proof.push(*sibling);
            }
            idx /= 2;
        }
        Ok(proof)
    }
}
