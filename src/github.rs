//! GitHub API client for birth-issue verification
//!
//! Supports authentication via environment variables:
//! - EXTRA_GITHUB_TOKEN (priority)
//! - GITHUB_TOKEN (fallback)
//!
//! Every request carries a bounded timeout and is retried at most once.
//! Transport failures and 5xx responses surface as `UpstreamUnavailable`.

use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{IdentityError, Result};

pub const GITHUB_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const MAX_COMMENT_PAGES: u32 = 10;
const COMMENTS_PER_PAGE: usize = 100;

lazy_static! {
    static ref ISSUE_URL: Regex =
        Regex::new(r"github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/issues/(\d+)").unwrap();
    static ref NAME_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)\*\*name\*\*[:\s]+([A-Za-z0-9_-]+)").unwrap(),
        Regex::new(r#"(?i)name[:\s]+["']?([A-Za-z0-9_-]+)"#).unwrap(),
        Regex::new(r"(?i)([A-Za-z0-9_-]+)\s+[Oo]racle").unwrap(),
    ];
}

/// Get GitHub token from environment (EXTRA_GITHUB_TOKEN takes priority)
pub fn get_github_token() -> Option<String> {
    std::env::var("EXTRA_GITHUB_TOKEN")
        .or_else(|_| std::env::var("GITHUB_TOKEN"))
        .ok()
        .filter(|t| !t.is_empty())
}

/// A parsed `github.com/owner/repo/issues/N` reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IssueRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl IssueRef {
    pub fn parse(url: &str) -> Result<Self> {
        let caps = ISSUE_URL
            .captures(url)
            .ok_or_else(|| IdentityError::InvalidIssueUrl(url.to_string()))?;
        let number = caps[3]
            .parse::<u64>()
            .map_err(|_| IdentityError::InvalidIssueUrl(url.to_string()))?;
        Ok(Self {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
            number,
        })
    }

    /// `owner/repo`, the key repo challenges are stored under
    pub fn repo_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub fn url(&self) -> String {
        format!(
            "https://github.com/{}/{}/issues/{}",
            self.owner, self.repo, self.number
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub login: String,
    #[serde(default)]
    pub id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubLabel {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubIssue {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub user: GitHubUser,
    #[serde(default)]
    pub labels: Vec<GitHubLabel>,
    #[serde(default)]
    pub html_url: String,
}

impl GitHubIssue {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.name == label)
    }

    pub fn author(&self) -> &str {
        &self.user.login
    }

    /// Oracle name proposed in the issue, if any.
    pub fn oracle_name(&self) -> Option<String> {
        extract_oracle_name(&self.title, self.body.as_deref().unwrap_or(""))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubComment {
    #[serde(default)]
    pub body: String,
    pub user: GitHubUser,
}

/// Pull an oracle name out of a birth issue. Body matches win over title
/// matches for the same pattern.
pub fn extract_oracle_name(title: &str, body: &str) -> Option<String> {
    for pattern in NAME_PATTERNS.iter() {
        for text in [body, title] {
            if let Some(caps) = pattern.captures(text) {
                return Some(caps[1].to_string());
            }
        }
    }
    None
}

/// Read-only view of the GitHub issue API.
#[async_trait]
pub trait IssueSource: Send + Sync {
    async fn fetch_issue(&self, issue: &IssueRef) -> Result<GitHubIssue>;

    async fn fetch_comments(&self, issue: &IssueRef) -> Result<Vec<GitHubComment>>;
}

pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubClient {
    /// Every request is bounded by `timeout`; a client that cannot be built
    /// with it is an error.
    pub fn new(
        api_base: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        if token.is_some() {
            info!("GitHub client initialized with authentication token");
        } else {
            warn!(
                "GitHub client initialized WITHOUT token - rate limits will be very low (60/hour)"
            );
        }

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Check if authenticated
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    fn build_request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .get(url)
            .header("User-Agent", concat!("oracle-identity/", env!("CARGO_PKG_VERSION")))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        req
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Attempt<T> {
        let response = match self.build_request(url).send().await {
            Ok(r) => r,
            Err(e) => return Attempt::Retry(e.to_string()),
        };

        let status = response.status();
        if status.as_u16() == 404 {
            return Attempt::Fatal(IdentityError::IssueNotFound(url.to_string()));
        }
        if status.is_server_error() || status.as_u16() == 429 {
            return Attempt::Retry(format!("status {}", status));
        }
        if !status.is_success() {
            // 401/403 are rate limits or bad credentials; retrying won't help
            return Attempt::Fatal(IdentityError::UpstreamUnavailable(format!(
                "status {}",
                status
            )));
        }

        match response.json::<T>().await {
            Ok(v) => Attempt::Done(v),
            Err(e) => Attempt::Retry(format!("decode: {}", e)),
        }
    }

    /// GET with at most one retry.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut last_error = String::new();
        for attempt in 1..=2 {
            debug!("GitHub GET {} (attempt {})", url, attempt);
            match self.get_once(url).await {
                Attempt::Done(v) => return Ok(v),
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retry(reason) => {
                    warn!("GitHub request failed ({}): {}", attempt, reason);
                    last_error = reason;
                }
            }
        }
        Err(IdentityError::UpstreamUnavailable(last_error))
    }
}

enum Attempt<T> {
    Done(T),
    Retry(String),
    Fatal(IdentityError),
}

#[async_trait]
impl IssueSource for GitHubClient {
    async fn fetch_issue(&self, issue: &IssueRef) -> Result<GitHubIssue> {
        let url = format!(
            "{}/repos/{}/{}/issues/{}",
            self.api_base, issue.owner, issue.repo, issue.number
        );
        self.get_json(&url).await.map_err(|e| match e {
            IdentityError::IssueNotFound(_) => IdentityError::IssueNotFound(issue.url()),
            other => other,
        })
    }

    async fn fetch_comments(&self, issue: &IssueRef) -> Result<Vec<GitHubComment>> {
        let mut all_comments = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/{}/issues/{}/comments?per_page={}&page={}",
                self.api_base, issue.owner, issue.repo, issue.number, COMMENTS_PER_PAGE, page
            );
            let comments: Vec<GitHubComment> = self.get_json(&url).await?;
            let count = comments.len();
            all_comments.extend(comments);

            if count < COMMENTS_PER_PAGE || page >= MAX_COMMENT_PAGES {
                break;
            }
            page += 1;
        }

        debug!(
            "Fetched {} comments for {}",
            all_comments.len(),
            issue.url()
        );
        Ok(all_comments)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-process `IssueSource` for tests.

    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    pub struct FakeIssues {
        pub author: String,
        pub labels: Vec<String>,
        pub title: String,
        pub body: String,
        comments: Mutex<Vec<GitHubComment>>,
        unavailable: AtomicBool,
    }

    impl FakeIssues {
        pub fn new(author: &str, labels: &[&str]) -> Self {
            Self {
                author: author.to_string(),
                labels: labels.iter().map(|l| l.to_string()).collect(),
                title: "Birth of SHRIMP Oracle".into(),
                body: "**name**: SHRIMP".into(),
                comments: Mutex::new(Vec::new()),
                unavailable: AtomicBool::new(false),
            }
        }

        pub fn comment(&self, login: &str, body: &str) {
            self.comments.lock().push(GitHubComment {
                body: body.to_string(),
                user: GitHubUser {
                    login: login.to_string(),
                    id: 0,
                },
            });
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                Err(IdentityError::UpstreamUnavailable("status 503".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl IssueSource for FakeIssues {
        async fn fetch_issue(&self, issue: &IssueRef) -> Result<GitHubIssue> {
            self.check()?;
            Ok(GitHubIssue {
                number: issue.number,
                title: self.title.clone(),
                body: Some(self.body.clone()),
                user: GitHubUser {
                    login: self.author.clone(),
                    id: 1,
                },
                labels: self
                    .labels
                    .iter()
                    .map(|name| GitHubLabel { name: name.clone() })
                    .collect(),
                html_url: issue.url(),
            })
        }

        async fn fetch_comments(&self, _issue: &IssueRef) -> Result<Vec<GitHubComment>> {
            self.check()?;
            Ok(self.comments.lock().clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_issue_url() {
        let issue = IssueRef::parse("https://github.com/Soul-Brews-Studio/mother-oracle/issues/1")
            .unwrap();
        assert_eq!(issue.owner, "Soul-Brews-Studio");
        assert_eq!(issue.repo, "mother-oracle");
        assert_eq!(issue.number, 1);
        assert_eq!(issue.repo_key(), "Soul-Brews-Studio/mother-oracle");

        assert!(IssueRef::parse("https://github.com/a/b/pull/1").is_err());
        assert!(IssueRef::parse("not a url").is_err());
    }

    #[test]
    fn test_extract_oracle_name() {
        assert_eq!(
            extract_oracle_name("Birth", "**Name**: Shrimp\nmore"),
            Some("Shrimp".to_string())
        );
        assert_eq!(
            extract_oracle_name("Birth of Arthur Oracle", "no hints here"),
            Some("Arthur".to_string())
        );
        assert_eq!(extract_oracle_name("hello", "world"), None);
    }

    fn issue_json(labels: &[&str]) -> serde_json::Value {
        serde_json::json!({
            "number": 1,
            "title": "Birth of Shrimp Oracle",
            "body": "**name**: Shrimp",
            "user": { "login": "nazt", "id": 1 },
            "labels": labels.iter().map(|l| serde_json::json!({ "name": l })).collect::<Vec<_>>(),
            "html_url": "https://github.com/nazt/shrimp/issues/1"
        })
    }

    fn issue_ref() -> IssueRef {
        IssueRef {
            owner: "nazt".into(),
            repo: "shrimp".into(),
            number: 1,
        }
    }

    #[tokio::test]
    async fn test_fetch_issue() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/nazt/shrimp/issues/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issue_json(&["birth-props"])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), None, Duration::from_secs(2)).unwrap();
        let issue = client.fetch_issue(&issue_ref()).await.unwrap();
        assert_eq!(issue.author(), "nazt");
        assert!(issue.has_label("birth-props"));
        assert_eq!(issue.oracle_name(), Some("Shrimp".to_string()));
    }

    #[tokio::test]
    async fn test_missing_issue_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), None, Duration::from_secs(2)).unwrap();
        assert!(matches!(
            client.fetch_issue(&issue_ref()).await,
            Err(IdentityError::IssueNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_server_error_retried_once_then_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(2)
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), None, Duration::from_secs(2)).unwrap();
        let err = client.fetch_issue(&issue_ref()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(issue_json(&[]))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), None, Duration::from_millis(100)).unwrap();
        assert!(matches!(
            client.fetch_issue(&issue_ref()).await,
            Err(IdentityError::UpstreamUnavailable(_))
        ));
    }

    #[test]
    fn test_client_carries_timeout() {
        let client =
            GitHubClient::new("https://api.github.com/", None, Duration::from_secs(3)).unwrap();
        assert_eq!(client.api_base, "https://api.github.com");
        assert!(!client.is_authenticated());
    }

    #[tokio::test]
    async fn test_fetch_comments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/nazt/shrimp/issues/1/comments"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "body": "hello", "user": { "login": "someone" } },
                { "body": "verify:abcd1234", "user": { "login": "nazt" } }
            ])))
            .mount(&server)
            .await;

        let client = GitHubClient::new(server.uri(), None, Duration::from_secs(2)).unwrap();
        let comments = client.fetch_comments(&issue_ref()).await.unwrap();
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[1].user.login, "nazt");
    }
}
