//! Repository ownership challenges anchored to a birth issue
//!
//! `start` issues a one-time code for `owner/repo`; the issue author proves
//! control by commenting `verify:<code>` on issue #1. Only one challenge per
//! repository is live at a time.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::challenge_store::{ChallengeStore, Expiring};
use crate::clock::Clock;
use crate::error::{IdentityError, Result};
use crate::github::{IssueRef, IssueSource};
use crate::resolver::{Aspect, IdentityResolver, Resolution};

pub const DEFAULT_CODE_TTL_SECS: i64 = 10 * 60;
pub const DEFAULT_BIRTH_LABEL: &str = "birth-props";
const BIRTH_ISSUE_NUMBER: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoChallengeState {
    Pending,
    Consumed,
    Expired,
    /// Superseded by a newer `start` for the same repository
    Invalidated,
}

#[derive(Debug, Clone)]
pub struct RepoChallenge {
    pub issue: IssueRef,
    pub code: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub state: RepoChallengeState,
}

impl RepoChallenge {
    /// State as seen at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> RepoChallengeState {
        if self.state == RepoChallengeState::Pending && self.is_expired(now) {
            RepoChallengeState::Expired
        } else {
            self.state
        }
    }

    fn is_pending_with(&self, code: &str) -> bool {
        self.state == RepoChallengeState::Pending && self.code == code
    }
}

impl Expiring for RepoChallenge {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Returned by `start`: what the user has to post.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedChallenge {
    pub code: String,
    pub instruction: String,
    pub expires_in: i64,
    pub author: String,
    pub oracle_name: Option<String>,
}

/// Successful `verify`.
#[derive(Debug, Clone)]
pub struct RepoVerification {
    pub resolution: Resolution,
    pub oracle_name: Option<String>,
}

pub struct RepoVerificationChallenge {
    challenges: Arc<dyn ChallengeStore<RepoChallenge>>,
    issues: Arc<dyn IssueSource>,
    resolver: Arc<IdentityResolver>,
    clock: Arc<dyn Clock>,
    birth_label: String,
    ttl: Duration,
}

impl RepoVerificationChallenge {
    pub fn new(
        challenges: Arc<dyn ChallengeStore<RepoChallenge>>,
        issues: Arc<dyn IssueSource>,
        resolver: Arc<IdentityResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            challenges,
            issues,
            resolver,
            clock,
            birth_label: DEFAULT_BIRTH_LABEL.to_string(),
            ttl: Duration::seconds(DEFAULT_CODE_TTL_SECS),
        }
    }

    pub fn with_birth_label(mut self, label: impl Into<String>) -> Self {
        self.birth_label = label.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Issue a code for the repository owning `issue_url`.
    pub async fn start(&self, issue_url: &str) -> Result<StartedChallenge> {
        let issue_ref = parse_birth_issue(issue_url)?;
        let issue = self.issues.fetch_issue(&issue_ref).await?;
        if !issue.has_label(&self.birth_label) {
            return Err(IdentityError::MissingLabel(self.birth_label.clone()));
        }

        let mut raw = [0u8; 4];
        rand::thread_rng().fill_bytes(&mut raw);
        let code = hex::encode(raw);

        let now = self.clock.now();
        let key = repo_key(&issue_ref);
        let previous = self.challenges.put(
            &key,
            RepoChallenge {
                issue: issue_ref,
                code: code.clone(),
                issued_at: now,
                expires_at: now + self.ttl,
                state: RepoChallengeState::Pending,
            },
        );
        if let Some(prev) = previous {
            if prev.state_at(now) == RepoChallengeState::Pending {
                info!("Invalidated previous repo challenge for {}", key);
            }
        }
        info!("Started repo challenge for {}", key);
        debug!("Repo challenge code for {}: {}", key, code);

        Ok(StartedChallenge {
            instruction: format!("Comment on issue #1 with: verify:{}", code),
            code,
            expires_in: self.ttl.num_seconds(),
            author: issue.author().to_string(),
            oracle_name: issue.oracle_name(),
        })
    }

    /// Confirm the issue author posted the code, consume the challenge and
    /// resolve the GitHub identity. With `link_to`, the GitHub aspect is
    /// linked onto that identity instead.
    ///
    /// Failures before the consume leave the challenge untouched; failures
    /// after it put the challenge back.
    pub async fn verify(
        &self,
        issue_url: &str,
        code: &str,
        link_to: Option<Uuid>,
    ) -> Result<RepoVerification> {
        let issue_ref = parse_birth_issue(issue_url)?;
        let key = repo_key(&issue_ref);
        let code = code.trim().to_ascii_lowercase();

        let pending = self
            .challenges
            .get(&key, self.clock.now())
            .filter(|c| c.is_pending_with(&code));
        if pending.is_none() {
            debug!("No pending repo challenge matching code for {}", key);
            return Err(IdentityError::CodeMismatchOrExpired);
        }

        let issue = self.issues.fetch_issue(&issue_ref).await?;
        let author = issue.author().to_string();
        let comments = self.issues.fetch_comments(&issue_ref).await?;

        let token = format!("verify:{}", code);
        let found = comments
            .iter()
            .any(|c| c.user.login.eq_ignore_ascii_case(&author) && c.body.contains(&token));
        if !found {
            return Err(IdentityError::CommentAuthorMismatch {
                code,
                expected_author: author,
            });
        }

        let consumed = self.transition(
            &key,
            &code,
            RepoChallengeState::Pending,
            RepoChallengeState::Consumed,
        );
        let challenge = match consumed {
            Some(c) => c,
            None => {
                warn!("Repo challenge for {} consumed concurrently", key);
                return Err(IdentityError::CodeMismatchOrExpired);
            }
        };
        info!("Consumed repo challenge for {} by @{}", key, author);

        let oracle_name = issue.oracle_name();
        let repo = issue_ref.repo_key();
        let birth_issue = issue_ref.url();
        let resolved = match link_to {
            Some(id) => self
                .resolver
                .link(
                    id,
                    Aspect::Github {
                        username: author.clone(),
                        repo: repo.clone(),
                        birth_issue: Some(birth_issue.clone()),
                    },
                )
                .map(|identity| Resolution {
                    identity,
                    created: false,
                }),
            None => self.resolver.resolve_by_github(
                &author,
                &repo,
                oracle_name.as_deref(),
                Some(&birth_issue),
            ),
        };

        match resolved {
            Ok(resolution) => Ok(RepoVerification {
                resolution,
                oracle_name,
            }),
            Err(err) => {
                let restored = self.transition(
                    &key,
                    &challenge.code,
                    RepoChallengeState::Consumed,
                    RepoChallengeState::Pending,
                );
                if restored.is_some() {
                    warn!("Restored repo challenge for {} after error: {}", key, err);
                }
                Err(err)
            }
        }
    }

    /// Current state of the challenge for the repository owning `issue_url`.
    pub fn state(&self, issue_url: &str) -> Result<Option<RepoChallengeState>> {
        let key = repo_key(&IssueRef::parse(issue_url)?);
        let now = self.clock.now();
        Ok(self.challenges.get(&key, now).map(|c| c.state_at(now)))
    }

    pub fn sweep_expired(&self) -> usize {
        self.challenges.sweep_expired(self.clock.now())
    }

    /// Compare-and-swap the state of the live challenge holding `code`.
    fn transition(
        &self,
        key: &str,
        code: &str,
        from: RepoChallengeState,
        to: RepoChallengeState,
    ) -> Option<RepoChallenge> {
        let now = self.clock.now();
        let current = self.challenges.get(key, now)?;
        let next = RepoChallenge {
            state: to,
            ..current
        };
        self.challenges.replace_if(
            key,
            now,
            &|c: &RepoChallenge| c.state == from && c.code == code,
            next,
        )
    }
}

fn parse_birth_issue(issue_url: &str) -> Result<IssueRef> {
    let issue = IssueRef::parse(issue_url)?;
    if issue.number != BIRTH_ISSUE_NUMBER {
        return Err(IdentityError::WrongIssueNumber(issue.number));
    }
    Ok(issue)
}

/// Challenges are keyed case-insensitively, as GitHub treats names.
fn repo_key(issue: &IssueRef) -> String {
    issue.repo_key().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allowlist::{AllowList, StaticAllowList};
    use crate::challenge_store::MemoryChallengeStore;
    use crate::clock::ManualClock;
    use crate::github::fake::FakeIssues;
    use crate::identity::{IdentityKind, IdentityStore, MemoryIdentityStore};

    const URL: &str = "https://github.com/nazt/shrimp-oracle/issues/1";

    struct Harness {
        challenge: RepoVerificationChallenge,
        issues: Arc<FakeIssues>,
        store: Arc<MemoryIdentityStore>,
        clock: ManualClock,
    }

    fn harness(labels: &[&str]) -> Harness {
        let clock = ManualClock::default();
        let issues = Arc::new(FakeIssues::new("nazt", labels));
        let store = Arc::new(MemoryIdentityStore::new());
        let resolver = Arc::new(IdentityResolver::new(
            store.clone(),
            Arc::new(StaticAllowList::new(AllowList::default(), false)),
            Arc::new(clock.clone()),
        ));
        let challenge = RepoVerificationChallenge::new(
            Arc::new(MemoryChallengeStore::new()),
            issues.clone(),
            resolver,
            Arc::new(clock.clone()),
        );
        Harness {
            challenge,
            issues,
            store,
            clock,
        }
    }

    #[tokio::test]
    async fn test_start_requires_issue_one() {
        let h = harness(&["birth-props"]);
        let err = h
            .challenge
            .start("https://github.com/nazt/shrimp-oracle/issues/2")
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::WrongIssueNumber(2)));
    }

    #[tokio::test]
    async fn test_start_requires_label() {
        let h = harness(&["bug"]);
        let err = h.challenge.start(URL).await.unwrap_err();
        assert!(matches!(err, IdentityError::MissingLabel(ref l) if l == "birth-props"));
    }

    #[tokio::test]
    async fn test_start_returns_instruction() {
        let h = harness(&["birth-props"]);
        let started = h.challenge.start(URL).await.unwrap();
        assert_eq!(started.code.len(), 8);
        assert_eq!(
            started.instruction,
            format!("Comment on issue #1 with: verify:{}", started.code)
        );
        assert_eq!(started.expires_in, 600);
        assert_eq!(started.oracle_name.as_deref(), Some("SHRIMP"));
        assert_eq!(
            h.challenge.state(URL).unwrap(),
            Some(RepoChallengeState::Pending)
        );
    }

    #[tokio::test]
    async fn test_verify_by_issue_author() {
        let h = harness(&["birth-props"]);
        let started = h.challenge.start(URL).await.unwrap();
        h.issues.comment("NAZT", &format!("here you go verify:{}", started.code));

        let verified = h.challenge.verify(URL, &started.code, None).await.unwrap();
        let identity = verified.resolution.identity;
        assert!(verified.resolution.created);
        assert!(identity.approved);
        assert!(identity.repo_verified);
        assert_eq!(identity.display_name, "SHRIMP");
        assert_eq!(identity.birth_issue.as_deref(), Some(URL));
        assert_eq!(identity.kind, IdentityKind::Oracle);
        assert_eq!(
            h.challenge.state(URL).unwrap(),
            Some(RepoChallengeState::Consumed)
        );

        // Single use
        let again = h.challenge.verify(URL, &started.code, None).await;
        assert!(matches!(again, Err(IdentityError::CodeMismatchOrExpired)));
    }

    #[tokio::test]
    async fn test_comment_from_other_user_rejected() {
        let h = harness(&["birth-props"]);
        let started = h.challenge.start(URL).await.unwrap();
        h.issues.comment("mallory", &format!("verify:{}", started.code));

        let err = h.challenge.verify(URL, &started.code, None).await.unwrap_err();
        assert!(matches!(
            err,
            IdentityError::CommentAuthorMismatch { ref expected_author, .. } if expected_author == "nazt"
        ));

        // Not consumed; the owner can still finish
        h.issues.comment("nazt", &format!("verify:{}", started.code));
        assert!(h.challenge.verify(URL, &started.code, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrong_code_and_expiry() {
        let h = harness(&["birth-props"]);
        let started = h.challenge.start(URL).await.unwrap();
        h.issues.comment("nazt", &format!("verify:{}", started.code));

        assert!(matches!(
            h.challenge.verify(URL, "deadbeef", None).await,
            Err(IdentityError::CodeMismatchOrExpired)
        ));

        h.clock.advance(Duration::minutes(11));
        assert!(matches!(
            h.challenge.verify(URL, &started.code, None).await,
            Err(IdentityError::CodeMismatchOrExpired)
        ));
        assert_eq!(h.challenge.sweep_expired(), 1);
    }

    #[tokio::test]
    async fn test_restart_invalidates_previous_code() {
        let h = harness(&["birth-props"]);
        let first = h.challenge.start(URL).await.unwrap();
        let second = h
            .challenge
            .start("https://github.com/Nazt/Shrimp-Oracle/issues/1")
            .await
            .unwrap();
        h.issues.comment("nazt", &format!("verify:{}", first.code));

        if first.code != second.code {
            assert!(matches!(
                h.challenge.verify(URL, &first.code, None).await,
                Err(IdentityError::CodeMismatchOrExpired)
            ));
        }
    }

    #[tokio::test]
    async fn test_conflicting_link_restores_challenge() {
        let h = harness(&["birth-props"]);
        let mut other = crate::identity::Identity::new("other", h.clock.now());
        other.github_username = Some("someone".into());
        other.repo_verified = true;
        other.reclassify();
        h.store.create(&other).unwrap();

        let started = h.challenge.start(URL).await.unwrap();
        h.issues.comment("nazt", &format!("verify:{}", started.code));

        let err = h
            .challenge
            .verify(URL, &started.code, Some(other.id))
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::ConflictingLink(_)));
        assert_eq!(
            h.challenge.state(URL).unwrap(),
            Some(RepoChallengeState::Pending)
        );
    }

    #[tokio::test]
    async fn test_upstream_outage_is_retryable() {
        let h = harness(&["birth-props"]);
        let started = h.challenge.start(URL).await.unwrap();
        h.issues.comment("nazt", &format!("verify:{}", started.code));

        h.issues.set_unavailable(true);
        let err = h.challenge.verify(URL, &started.code, None).await.unwrap_err();
        assert!(err.is_retryable());

        h.issues.set_unavailable(false);
        assert!(h.challenge.verify(URL, &started.code, None).await.is_ok());
    }
}
