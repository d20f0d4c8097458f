//! Wallet primitives
//!
//! - 20-byte hex account address validation and canonical form
//! - EIP-55 mixed-case checksum rendering
//! - Personal-message (EIP-191) hashing and secp256k1 signer recovery

use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1};
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::error::{IdentityError, Result};

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Check if a string is a syntactically valid `0x`-prefixed 20-byte address
pub fn is_valid_wallet_address(address: &str) -> bool {
    match address.strip_prefix("0x").or_else(|| address.strip_prefix("0X")) {
        Some(body) => body.len() == 40 && body.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Canonical lower-case form of a wallet address, used as every map and
/// store key.
pub fn canonical_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if !is_valid_wallet_address(trimmed) {
        return Err(IdentityError::InvalidAddress(address.to_string()));
    }
    Ok(format!("0x{}", trimmed[2..].to_ascii_lowercase()))
}

/// EIP-55 checksummed rendering of an address.
pub fn checksum_address(address: &str) -> Result<String> {
    let canonical = canonical_address(address)?;
    let body = &canonical[2..];
    let hash = keccak256(body.as_bytes());

    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in body.chars().enumerate() {
        let nibble = (hash[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Hash a message the way wallets do for `personal_sign`.
pub fn personal_message_hash(message: &str) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message.as_bytes());
    hasher.finalize().into()
}

/// Decode a 65-byte `r || s || v` hex signature.
fn parse_signature(signature_hex: &str) -> Result<RecoverableSignature> {
    let sig_hex = signature_hex
        .trim()
        .strip_prefix("0x")
        .unwrap_or(signature_hex.trim())
        .to_lowercase();

    let sig_bytes = hex::decode(&sig_hex)
        .map_err(|e| IdentityError::InvalidSignature(format!("not hex: {}", e)))?;

    if sig_bytes.len() != 65 {
        return Err(IdentityError::InvalidSignature(format!(
            "length {} (expected 65)",
            sig_bytes.len()
        )));
    }

    let v = match sig_bytes[64] {
        0 | 1 => sig_bytes[64] as i32,
        27 | 28 => sig_bytes[64] as i32 - 27,
        other => {
            return Err(IdentityError::InvalidSignature(format!(
                "recovery byte {}",
                other
            )))
        }
    };

    let recovery_id = RecoveryId::from_i32(v)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))?;
    RecoverableSignature::from_compact(&sig_bytes[..64], recovery_id)
        .map_err(|e| IdentityError::InvalidSignature(e.to_string()))
}

/// Recover the canonical address that produced `signature_hex` over
/// `message` with `personal_sign`.
pub fn recover_personal_signer(message: &str, signature_hex: &str) -> Result<String> {
    let signature = parse_signature(signature_hex)?;
    let digest = Message::from_digest(personal_message_hash(message));

    let secp = Secp256k1::verification_only();
    let public_key = secp
        .recover_ecdsa(&digest, &signature)
        .map_err(|e| IdentityError::InvalidSignature(format!("recovery failed: {}", e)))?;

    let uncompressed = public_key.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Ok(format!("0x{}", hex::encode(&hash[12..])))
}

/// Verify that `signature_hex` over `message` was produced by `address`
pub fn verify_personal_signature(address: &str, message: &str, signature_hex: &str) -> bool {
    let expected = match canonical_address(address) {
        Ok(a) => a,
        Err(e) => {
            debug!("Rejecting signature check: {}", e);
            return false;
        }
    };

    match recover_personal_signer(message, signature_hex) {
        Ok(recovered) => recovered == expected,
        Err(e) => {
            debug!("Signer recovery failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
pub(crate) mod test_wallet {
    //! Deterministic signing helpers shared by tests across the crate.

    use super::*;
    use secp256k1::{PublicKey, SecretKey};

    pub struct TestWallet {
        secret: SecretKey,
        pub address: String,
    }

    impl TestWallet {
        pub fn from_seed(seed: u8) -> Self {
            let secret = SecretKey::from_slice(&[seed.max(1); 32]).expect("valid secret key");
            let secp = Secp256k1::new();
            let public = PublicKey::from_secret_key(&secp, &secret);
            let hash = keccak256(&public.serialize_uncompressed()[1..]);
            Self {
                secret,
                address: format!("0x{}", hex::encode(&hash[12..])),
            }
        }

        pub fn sign(&self, message: &str) -> String {
            let secp = Secp256k1::new();
            let digest = Message::from_digest(personal_message_hash(message));
            let (recovery_id, compact) = secp
                .sign_ecdsa_recoverable(&digest, &self.secret)
                .serialize_compact();
            let mut bytes = compact.to_vec();
            bytes.push(recovery_id.to_i32() as u8 + 27);
            format!("0x{}", hex::encode(bytes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_wallet::TestWallet;
    use super::*;

    #[test]
    fn test_address_validation() {
        assert!(is_valid_wallet_address(
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        ));
        assert!(!is_valid_wallet_address(
            "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        ));
        assert!(!is_valid_wallet_address("0x1234"));
        assert!(!is_valid_wallet_address(
            "0xZZAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        ));
        assert!(!is_valid_wallet_address(""));
    }

    #[test]
    fn test_canonical_lowercases() {
        assert_eq!(
            canonical_address("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap(),
            "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed"
        );
        assert!(matches!(
            canonical_address("nope"),
            Err(IdentityError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_eip55_checksum_vectors() {
        for expected in [
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed",
            "0xfB6916095ca1df60bB79Ce92cE3Ea74c37c5d359",
            "0xdbF03B407c01E7cD3CBea99509d93f8DDDC8C6FB",
            "0xD1220A0cf47c7B9Be7A2E6BA89F429762e7b9aDb",
        ] {
            assert_eq!(checksum_address(&expected.to_lowercase()).unwrap(), expected);
        }
    }

    #[test]
    fn test_recover_round_trip() {
        let wallet = TestWallet::from_seed(7);
        let signature = wallet.sign("hello oracle");

        assert_eq!(
            recover_personal_signer("hello oracle", &signature).unwrap(),
            wallet.address
        );
        assert!(verify_personal_signature(
            &wallet.address.to_uppercase().replacen("0X", "0x", 1),
            "hello oracle",
            &signature
        ));
    }

    #[test]
    fn test_signature_over_other_message_rejected() {
        let wallet = TestWallet::from_seed(7);
        let signature = wallet.sign("hello oracle");
        assert!(!verify_personal_signature(
            &wallet.address,
            "hello oracle!",
            &signature
        ));
    }

    #[test]
    fn test_malformed_signatures() {
        assert!(matches!(
            recover_personal_signer("m", "0x1234"),
            Err(IdentityError::InvalidSignature(_))
        ));
        assert!(matches!(
            recover_personal_signer("m", "not-hex"),
            Err(IdentityError::InvalidSignature(_))
        ));
        let bad_v = format!("0x{}{}", "11".repeat(64), "05");
        assert!(matches!(
            recover_personal_signer("m", &bad_v),
            Err(IdentityError::InvalidSignature(_))
        ));
    }
}
