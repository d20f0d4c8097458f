//! Oracle Identity Server
//!
//! Wallet and birth-issue verification with Merkle membership proofs

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use oracle_identity::{
    AllowList, Clock, Config, FileAllowList, GitHubClient, IdentityResolver, IdentityService,
    IdentityStore, JwtTokenIssuer, MemoryChallengeStore, MemoryIdentityStore, MessageTemplate,
    NonceStore, RepoVerificationChallenge, SessionTokenIssuer, SignatureVerifier,
    SqliteIdentityStore, SystemClock,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const SWEEP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Oracle Identity Server");

    let config_path = Config::path();
    let config = Config::load_from(&config_path).context("Failed to load configuration")?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store: Arc<dyn IdentityStore> = match &config.storage.sqlite_path {
        Some(path) => Arc::new(
            SqliteIdentityStore::new(path)
                .with_context(|| format!("Failed to open identity store {}", path.display()))?,
        ),
        None => {
            warn!("No sqlite_path configured; identities are kept in memory");
            Arc::new(MemoryIdentityStore::new())
        }
    };

    let tokens: Arc<dyn SessionTokenIssuer> = if config.auth.jwt_secret.is_empty() {
        warn!("JWT_SECRET not set; using development token secret");
        Arc::new(JwtTokenIssuer::new_dev())
    } else {
        Arc::new(JwtTokenIssuer::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_expiry_secs,
        )?)
    };

    let allowlist = Arc::new(FileAllowList::new(
        config_path,
        AllowList::new(config.allowlist.repos.as_slice()),
        config.allowlist.allow_agent_registration,
    ));

    let nonces = Arc::new(
        NonceStore::new(
            Arc::new(MemoryChallengeStore::new()),
            clock.clone(),
            MessageTemplate {
                domain: config.auth.domain.clone(),
                uri: config.auth.uri.clone(),
                statement: config.auth.statement.clone(),
                chain_id: config.auth.chain_id,
            },
        )
        .with_ttl(chrono::Duration::seconds(config.auth.nonce_ttl_secs)),
    );

    let github = Arc::new(
        GitHubClient::new(
            config.github.api_base.clone(),
            config.github_token(),
            Duration::from_secs(config.github.request_timeout_secs),
        )
        .context("Failed to build GitHub client")?,
    );

    let resolver = Arc::new(IdentityResolver::new(store, allowlist, clock.clone()));
    let repo = Arc::new(
        RepoVerificationChallenge::new(
            Arc::new(MemoryChallengeStore::new()),
            github,
            resolver.clone(),
            clock,
        )
        .with_birth_label(config.github.birth_label.clone())
        .with_ttl(chrono::Duration::seconds(config.github.code_ttl_secs)),
    );

    let service = Arc::new(IdentityService::new(
        Arc::new(SignatureVerifier::new(nonces)),
        resolver,
        repo,
        tokens,
    ));

    // Sweep expired challenges in the background
    let sweep_service = service.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let (nonces, codes) = sweep_service.sweep_expired();
            if nonces + codes > 0 {
                debug!("Swept {} nonces and {} repo codes", nonces, codes);
            }
        }
    });
    info!(
        "Challenge sweeper started (every {} seconds)",
        SWEEP_INTERVAL_SECS
    );

    oracle_identity::server::run_server(&config.server.host, config.server.port, service).await?;

    Ok(())
}
