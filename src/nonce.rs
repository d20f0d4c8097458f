//! Wallet sign-in challenges
//!
//! A `NonceStore` hands out at most one outstanding challenge per address.
//! The challenge message follows the EIP-4361 layout so wallets render it
//! as a sign-in request.

use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{canonical_address, checksum_address};
use crate::challenge_store::{ChallengeStore, Expiring};
use crate::clock::Clock;
use crate::error::{IdentityError, Result};

pub const DEFAULT_NONCE_TTL_SECS: i64 = 5 * 60;

/// Fields a wallet signs in order to prove control of an address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInMessage {
    pub domain: String,
    /// EIP-55 checksummed address as embedded in the text
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expiration_time: DateTime<Utc>,
}

impl SignInMessage {
    pub fn render(&self) -> String {
        format!(
            "{domain} wants you to sign in with your Ethereum account:\n\
             {address}\n\
             \n\
             {statement}\n\
             \n\
             URI: {uri}\n\
             Version: 1\n\
             Chain ID: {chain_id}\n\
             Nonce: {nonce}\n\
             Issued At: {issued_at}\n\
             Expiration Time: {expiration}",
            domain = self.domain,
            address = self.address,
            statement = self.statement,
            uri = self.uri,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = self.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            expiration = self
                .expiration_time
                .to_rfc3339_opts(SecondsFormat::Secs, true),
        )
    }

    /// Parse a rendered message back into its fields.
    pub fn parse(text: &str) -> Result<Self> {
        let malformed = |what: &str| IdentityError::InvalidSignature(format!("message {}", what));
        let mut lines = text.lines();

        let domain = lines
            .next()
            .and_then(|l| l.strip_suffix(" wants you to sign in with your Ethereum account:"))
            .ok_or_else(|| malformed("header"))?
            .to_string();
        let address = lines.next().ok_or_else(|| malformed("address"))?.trim().to_string();

        let mut statement = None;
        let mut uri = None;
        let mut chain_id = None;
        let mut nonce = None;
        let mut issued_at = None;
        let mut expiration_time = None;

        for line in lines {
            if let Some(v) = line.strip_prefix("URI: ") {
                uri = Some(v.to_string());
            } else if let Some(v) = line.strip_prefix("Chain ID: ") {
                chain_id = v.trim().parse::<u64>().ok();
            } else if let Some(v) = line.strip_prefix("Nonce: ") {
                nonce = Some(v.trim().to_string());
            } else if let Some(v) = line.strip_prefix("Issued At: ") {
                issued_at = DateTime::parse_from_rfc3339(v.trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            } else if let Some(v) = line.strip_prefix("Expiration Time: ") {
                expiration_time = DateTime::parse_from_rfc3339(v.trim())
                    .ok()
                    .map(|t| t.with_timezone(&Utc));
            } else if !line.is_empty() && !line.starts_with("Version: ") && statement.is_none() {
                statement = Some(line.to_string());
            }
        }

        Ok(Self {
            domain,
            address,
            statement: statement.unwrap_or_default(),
            uri: uri.ok_or_else(|| malformed("URI"))?,
            chain_id: chain_id.ok_or_else(|| malformed("chain id"))?,
            nonce: nonce.ok_or_else(|| malformed("nonce"))?,
            issued_at: issued_at.ok_or_else(|| malformed("issued-at"))?,
            expiration_time: expiration_time.ok_or_else(|| malformed("expiration"))?,
        })
    }
}

/// Outstanding sign-in challenge for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceChallenge {
    pub address: String,
    pub nonce: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
    pub message: SignInMessage,
}

impl Expiring for NonceChallenge {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// What the client needs to produce a signature.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedNonce {
    pub nonce: String,
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

/// Static parts of every sign-in message.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub domain: String,
    pub uri: String,
    pub statement: String,
    pub chain_id: u64,
}

pub struct NonceStore {
    challenges: Arc<dyn ChallengeStore<NonceChallenge>>,
    clock: Arc<dyn Clock>,
    template: MessageTemplate,
    ttl: Duration,
}

impl NonceStore {
    pub fn new(
        challenges: Arc<dyn ChallengeStore<NonceChallenge>>,
        clock: Arc<dyn Clock>,
        template: MessageTemplate,
    ) -> Self {
        Self {
            challenges,
            clock,
            template,
            ttl: Duration::seconds(DEFAULT_NONCE_TTL_SECS),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn template(&self) -> &MessageTemplate {
        &self.template
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Issue a fresh challenge for `address`, superseding any prior one.
    pub fn issue_nonce(&self, address: &str) -> Result<IssuedNonce> {
        let canonical = canonical_address(address)?;
        // Whole seconds, so the rendered timestamp parses back to the same value
        let issued_at = self.clock.now().trunc_subsecs(0);
        let expires_at = issued_at + self.ttl;

        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let nonce = hex::encode(raw);

        let message = SignInMessage {
            domain: self.template.domain.clone(),
            address: checksum_address(&canonical)?,
            statement: self.template.statement.clone(),
            uri: self.template.uri.clone(),
            chain_id: self.template.chain_id,
            nonce: nonce.clone(),
            issued_at,
            expiration_time: expires_at,
        };
        let text = message.render();

        let previous = self.challenges.put(
            &canonical,
            NonceChallenge {
                address: canonical.clone(),
                nonce: nonce.clone(),
                issued_at,
                expires_at,
                consumed: false,
                message,
            },
        );
        if previous.is_some() {
            debug!("Superseded outstanding nonce for {}", canonical);
        }
        info!("Issued sign-in nonce for {}", canonical);

        Ok(IssuedNonce {
            nonce,
            message: text,
            expires_at,
        })
    }

    /// Live challenge for an address, without consuming it.
    pub fn pending(&self, address: &str) -> Result<Option<NonceChallenge>> {
        let canonical = canonical_address(address)?;
        Ok(self.challenges.get(&canonical, self.clock.now()))
    }

    /// Atomically consume the challenge for `address` if it still carries
    /// `nonce`. Returns `None` if it was consumed, superseded or expired in
    /// the meantime.
    pub fn consume(&self, address: &str, nonce: &str) -> Result<Option<NonceChallenge>> {
        let canonical = canonical_address(address)?;
        let taken = self
            .challenges
            .take_if(&canonical, self.clock.now(), &|c: &NonceChallenge| {
                c.nonce == nonce
            })
            .map(|mut c| {
                c.consumed = true;
                c
            });
        if taken.is_some() {
            info!("Consumed sign-in nonce for {}", canonical);
        }
        Ok(taken)
    }

    /// Put a consumed challenge back after a downstream failure, unless a
    /// newer challenge has been issued since.
    pub fn restore(&self, challenge: NonceChallenge) -> bool {
        let key = challenge.address.clone();
        let restored = self.challenges.put_if_absent(
            &key,
            self.clock.now(),
            NonceChallenge {
                consumed: false,
                ..challenge
            },
        );
        if restored {
            debug!("Restored sign-in nonce for {}", key);
        }
        restored
    }

    pub fn sweep_expired(&self) -> usize {
        self.challenges.sweep_expired(self.clock.now())
    }
}
