//! Wallet signature verification against stored challenges
//!
//! The client's message is never trusted on its own: it must describe the
//! exact challenge we issued, so a victim cannot be tricked into signing
//! text that doubles as a login.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::{canonical_address, recover_personal_signer};
use crate::error::{IdentityError, Result};
use crate::nonce::{NonceChallenge, NonceStore, SignInMessage};

pub struct SignatureVerifier {
    nonces: Arc<NonceStore>,
}

impl SignatureVerifier {
    pub fn new(nonces: Arc<NonceStore>) -> Self {
        Self { nonces }
    }

    pub fn nonces(&self) -> &Arc<NonceStore> {
        &self.nonces
    }

    /// Check `signature` over `message` (or over the stored challenge text
    /// when the client sends none) and consume the challenge on success.
    ///
    /// On any failure the stored challenge is left in place so the holder
    /// can retry until it expires. The returned challenge is already
    /// consumed; hand it to [`SignatureVerifier::restore`] if a later step
    /// of the request fails.
    pub fn verify(
        &self,
        address: &str,
        message: Option<&str>,
        signature: &str,
    ) -> Result<NonceChallenge> {
        let canonical = canonical_address(address)?;
        let stored = self
            .nonces
            .pending(&canonical)?
            .ok_or(IdentityError::NonceNotFoundOrExpired)?;

        let signed_text = match message {
            Some(text) => {
                check_message_matches(text, &stored)?;
                text.to_string()
            }
            None => stored.message.render(),
        };

        let recovered = recover_personal_signer(&signed_text, signature)?;
        if recovered != canonical {
            debug!("Signature recovered {} but {} was claimed", recovered, canonical);
            return Err(IdentityError::InvalidSignature(
                "signer does not match address".to_string(),
            ));
        }

        // A concurrent request may have consumed or superseded it since the
        // lookup above; the nonce comparison happens under the store lock.
        self.nonces
            .consume(&canonical, &stored.nonce)?
            .ok_or_else(|| {
                warn!("Lost race consuming nonce for {}", canonical);
                IdentityError::NonceNotFoundOrExpired
            })
    }

    /// Return a consumed challenge after a failure later in the request.
    pub fn restore(&self, challenge: NonceChallenge) -> bool {
        self.nonces.restore(challenge)
    }
}

/// A client message must be the issued challenge, byte for byte apart from
/// line endings and trailing whitespace. An older nonce is reported as a
/// replay.
fn check_message_matches(text: &str, stored: &NonceChallenge) -> Result<()> {
    let parsed = SignInMessage::parse(text)?;
    if parsed.nonce != stored.nonce {
        return Err(IdentityError::NonceReplay);
    }

    let normalized = text.replace("\r\n", "\n");
    if normalized.trim_end() != stored.message.render() {
        return Err(IdentityError::InvalidSignature(
            "message does not match the issued challenge".to_string(),
        ));
    }
    Ok(())
}
