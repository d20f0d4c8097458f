//! Prove command - inclusion proof from a local leaf file

use crate::style::*;
use anyhow::{anyhow, Result};
use oracle_identity::proof::proof_from_tree;
use oracle_identity::MerkleTree;
use std::path::Path;

pub fn run(leaves: &Path, wallet: &str, issue: u64) -> Result<()> {
    let tree = MerkleTree::build(super::load_leaves(leaves)?)?;
    let proof = proof_from_tree(&tree, wallet, issue)
        .map_err(|e| anyhow!("{} (wallet {}, issue #{})", e, wallet, issue))?;

    print_header("Inclusion Proof");
    super::print_proof(&proof);
    Ok(())
}
