pub mod check;
pub mod prove;
pub mod remote;
pub mod tree;

use std::path::Path;

use anyhow::{Context, Result};
use oracle_identity::MerkleLeaf;

/// Read a JSON array of leaves.
pub fn load_leaves(path: &Path) -> Result<Vec<MerkleLeaf>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid leaf file {}", path.display()))
}

/// Print a proof as `check` expects it.
pub fn print_proof(proof: &oracle_identity::MembershipProof) {
    println!("Leaf index:  {}", proof.leaf_index);
    println!("Root:        {}", proof.root);
    println!("Proof:");
    for (depth, sibling) in proof.proof.iter().enumerate() {
        println!("  {:>2}  {}", depth, sibling);
    }
    println!();
    println!(
        "{}",
        crate::style::style_dim(&format!(
            "oracle-id check --wallet {} --birth-issue {} --issue {} --root {} --proof {}",
            proof.leaf.wallet_address,
            proof.leaf.birth_issue_url,
            proof.leaf.issue_number,
            proof.root,
            proof.proof.join(",")
        ))
    );
}
