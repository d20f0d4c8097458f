//! Tree command - build a tree from a leaf file

use crate::style::*;
use anyhow::Result;
use oracle_identity::merkle::hash_to_hex;
use oracle_identity::MerkleTree;
use std::path::Path;

pub fn run(leaves: &Path) -> Result<()> {
    let tree = MerkleTree::build(super::load_leaves(leaves)?)?;

    print_header("Membership Tree");

    match tree.root() {
        Some(root) => println!("Root:    {}", style_green(&hash_to_hex(&root))),
        None => {
            print_warning("No leaves; the tree has no root.");
            return Ok(());
        }
    }
    println!("Leaves:  {}", style_bold(&tree.len().to_string()));
    println!();

    for (i, leaf) in tree.leaves().iter().enumerate() {
        println!(
            "  {:>3}  #{:<5} {}  {}",
            i,
            leaf.issue_number,
            leaf.wallet_address,
            style_dim(&leaf.birth_issue_url)
        );
    }

    for (depth, layer) in tree.layers().iter().enumerate() {
        println!();
        println!("{}", style_cyan(&format!("Layer {} ({} nodes)", depth, layer.len())));
        for node in layer {
            println!("  {}", truncate_hash(&hash_to_hex(node)));
        }
    }

    Ok(())
}
