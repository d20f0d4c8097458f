//! Root and proof commands - query a running server

use crate::client::OracleClient;
use crate::style::*;
use anyhow::{bail, Result};
use oracle_identity::proof::verify_membership_hex;

pub async fn root(server: &str) -> Result<()> {
    let client = OracleClient::new(server)?;
    let info = client.get_root().await?;

    print_header("Current Root");
    match info.root {
        Some(root) => println!("Root:    {}", style_green(&root)),
        None => print_warning("No verified Oracles yet."),
    }
    println!("Leaves:  {}", info.leaf_count);
    Ok(())
}

pub async fn proof(server: &str, wallet: &str, issue: u64) -> Result<()> {
    let client = OracleClient::new(server)?;
    let proof = client.get_proof(wallet, issue).await?;

    print_header("Inclusion Proof");
    super::print_proof(&proof);

    // Never trust the server's answer blindly
    if !verify_membership_hex(&proof.leaf, &proof.proof, &proof.root) {
        bail!("Proof returned by the server does not verify");
    }
    print_success("Proof verified locally");
    Ok(())
}
