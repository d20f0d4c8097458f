//! Check command - verify a proof from its parts

use crate::style::*;
use anyhow::{bail, Result};
use oracle_identity::proof::verify_membership_hex;
use oracle_identity::MerkleLeaf;

pub fn run(wallet: &str, birth_issue: &str, issue: u64, proof: &[String], root: &str) -> Result<()> {
    let leaf = MerkleLeaf::new(wallet, birth_issue, issue)?;

    if verify_membership_hex(&leaf, proof, root) {
        print_success(&format!(
            "Leaf #{} for {} is a member of {}",
            issue,
            leaf.wallet_address,
            truncate_hash(root)
        ));
        Ok(())
    } else {
        bail!("Proof does not verify against root {}", root)
    }
}
