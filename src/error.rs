//! Error taxonomy for identity verification
//!
//! Validation failures are returned to the caller as-is and never retried
//! server-side. Only `UpstreamUnavailable` is retryable.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IdentityError>;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Invalid wallet address: {0}")]
    InvalidAddress(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("No pending nonce for this address, or it has expired. Request a new one.")]
    NonceNotFoundOrExpired,

    #[error("Nonce does not match the outstanding challenge for this address")]
    NonceReplay,

    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    #[error("Must be Issue #1 (birth issue), got #{0}")]
    WrongIssueNumber(u64),

    #[error("Issue #1 must have '{0}' label")]
    MissingLabel(String),

    #[error("Invalid or expired code. Start again.")]
    CodeMismatchOrExpired,

    #[error("Comment with 'verify:{code}' not found from @{expected_author}")]
    CommentAuthorMismatch { code: String, expected_author: String },

    #[error("Conflicting link: {0}")]
    ConflictingLink(String),

    #[error("Leaf not found in the current tree")]
    LeafNotFound,

    #[error("Proof does not verify against the given root")]
    ProofVerificationFailed,

    #[error("GitHub unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid GitHub issue URL: {0}")]
    InvalidIssueUrl(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Agent self-registration is disabled")]
    AgentRegistrationDisabled,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Token error: {0}")]
    Token(String),
}

impl IdentityError {
    /// Stable machine-readable identifier used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress(_) => "INVALID_ADDRESS",
            Self::InvalidSignature(_) => "INVALID_SIGNATURE",
            Self::NonceNotFoundOrExpired => "NONCE_NOT_FOUND_OR_EXPIRED",
            Self::NonceReplay => "NONCE_REPLAY",
            Self::IssueNotFound(_) => "ISSUE_NOT_FOUND",
            Self::WrongIssueNumber(_) => "WRONG_ISSUE_NUMBER",
            Self::MissingLabel(_) => "MISSING_LABEL",
            Self::CodeMismatchOrExpired => "CODE_MISMATCH_OR_EXPIRED",
            Self::CommentAuthorMismatch { .. } => "COMMENT_AUTHOR_MISMATCH",
            Self::ConflictingLink(_) => "CONFLICTING_LINK",
            Self::LeafNotFound => "LEAF_NOT_FOUND",
            Self::ProofVerificationFailed => "PROOF_VERIFICATION_FAILED",
            Self::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            Self::InvalidIssueUrl(_) => "INVALID_ISSUE_URL",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::AgentRegistrationDisabled => "AGENT_REGISTRATION_DISABLED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Token(_) => "TOKEN_ERROR",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable(_))
    }
}

impl From<rusqlite::Error> for IdentityError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Storage(err.to_string())
    }
}
