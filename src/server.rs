//! Oracle Identity Server
//!
//! HTTP endpoints for wallet sign-in, repo verification and membership
//! proofs.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::error::IdentityError;
use crate::identity::Identity;
use crate::merkle::MerkleLeaf;
use crate::nonce::IssuedNonce;
use crate::proof::{MembershipProof, RootInfo};
use crate::repo_challenge::StartedChallenge;
use crate::service::{IdentityService, SignedIn, WalletProof};

pub struct AppState {
    pub service: Arc<IdentityService>,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/wallet/nonce", post(nonce_handler))
        .route("/auth/wallet/verify", post(wallet_verify_handler))
        .route("/auth/wallet/link", post(wallet_link_handler))
        .route("/auth/agent/register", post(agent_register_handler))
        .route("/auth/github/start", post(github_start_handler))
        .route("/auth/github/verify", post(github_verify_handler))
        .route("/merkle/root", get(merkle_root_handler))
        .route(
            "/merkle/proof/:wallet/:issue_number",
            get(merkle_proof_handler),
        )
        .route("/merkle/verify", post(merkle_verify_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
    pub retryable: bool,
}

pub fn status_for(err: &IdentityError) -> StatusCode {
    match err {
        IdentityError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        IdentityError::AgentRegistrationDisabled => StatusCode::FORBIDDEN,
        IdentityError::ConflictingLink(_) => StatusCode::CONFLICT,
        IdentityError::LeafNotFound | IdentityError::IssueNotFound(_) => StatusCode::NOT_FOUND,
        IdentityError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        IdentityError::Storage(_) | IdentityError::Token(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl From<&IdentityError> for ErrorResponse {
    fn from(err: &IdentityError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code(),
            retryable: err.is_retryable(),
        }
    }
}

impl IntoResponse for IdentityError {
    fn into_response(self) -> Response {
        let status = status_for(&self);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        (status, Json(ErrorResponse::from(&self))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, IdentityError>;

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
}

// ============================================================================
// Health
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    pub uptime_secs: u64,
    pub version: String,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        uptime_secs: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Wallet sign-in
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct NonceRequest {
    pub address: String,
}

async fn nonce_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NonceRequest>,
) -> ApiResult<IssuedNonce> {
    Ok(Json(state.service.issue_nonce(&request.address)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletVerifyRequest {
    pub address: String,
    pub signature: String,
    /// Signed text; defaults to the issued challenge message
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

async fn wallet_verify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WalletVerifyRequest>,
) -> ApiResult<SignedIn> {
    let proof = WalletProof {
        address: &request.address,
        message: request.message.as_deref(),
        signature: &request.signature,
    };
    let signed_in = state
        .service
        .sign_in_with_wallet(proof, request.display_name.as_deref())?;
    info!(
        "Wallet sign-in for {} (created={})",
        signed_in.identity.id, signed_in.created
    );
    Ok(Json(signed_in))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletLinkRequest {
    pub address: String,
    pub signature: String,
    #[serde(default)]
    pub message: Option<String>,
    pub target_name: String,
}

#[derive(Debug, Serialize)]
pub struct WalletLinkResponse {
    pub linked: bool,
    pub identity: Identity,
}

async fn wallet_link_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<WalletLinkRequest>,
) -> ApiResult<WalletLinkResponse> {
    let proof = WalletProof {
        address: &request.address,
        message: request.message.as_deref(),
        signature: &request.signature,
    };
    let identity = state
        .service
        .link_wallet(bearer(&headers), proof, &request.target_name)?;
    Ok(Json(WalletLinkResponse {
        linked: true,
        identity,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegisterRequest {
    pub address: String,
    pub signature: String,
    #[serde(default)]
    pub message: Option<String>,
    pub birth_issue_url: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

async fn agent_register_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AgentRegisterRequest>,
) -> ApiResult<SignedIn> {
    let proof = WalletProof {
        address: &request.address,
        message: request.message.as_deref(),
        signature: &request.signature,
    };
    let signed_in = state.service.register_agent(
        proof,
        &request.birth_issue_url,
        request.display_name.as_deref(),
    )?;
    Ok(Json(signed_in))
}

// ============================================================================
// GitHub repo verification
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubStartRequest {
    pub issue_url: String,
}

async fn github_start_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GithubStartRequest>,
) -> ApiResult<StartedChallenge> {
    Ok(Json(
        state
            .service
            .start_repo_verification(&request.issue_url)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubVerifyRequest {
    pub issue_url: String,
    pub code: String,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubVerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approved: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oracle_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

async fn github_verify_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<GithubVerifyRequest>,
) -> (StatusCode, Json<GithubVerifyResponse>) {
    match state
        .service
        .finish_repo_verification(bearer(&headers), &request.issue_url, &request.code)
        .await
    {
        Ok(verified) => {
            info!(
                "Repo verified for {} ({})",
                verified.identity.display_name, request.issue_url
            );
            (
                StatusCode::OK,
                Json(GithubVerifyResponse {
                    success: true,
                    token: Some(verified.token),
                    approved: Some(verified.approved),
                    created: Some(verified.created),
                    oracle_name: verified.oracle_name,
                    identity: Some(verified.identity),
                    ..Default::default()
                }),
            )
        }
        Err(e) => {
            warn!("Repo verification failed for {}: {}", request.issue_url, e);
            (
                status_for(&e),
                Json(GithubVerifyResponse {
                    success: false,
                    error: Some(e.to_string()),
                    code: Some(e.code()),
                    retryable: Some(e.is_retryable()),
                    ..Default::default()
                }),
            )
        }
    }
}

// ============================================================================
// Merkle membership
// ============================================================================

async fn merkle_root_handler(State(state): State<Arc<AppState>>) -> ApiResult<RootInfo> {
    Ok(Json(state.service.merkle_root()?))
}

async fn merkle_proof_handler(
    State(state): State<Arc<AppState>>,
    Path((wallet, issue_number)): Path<(String, u64)>,
) -> ApiResult<MembershipProof> {
    Ok(Json(state.service.merkle_proof(&wallet, issue_number)?))
}

#[derive(Debug, Deserialize)]
pub struct MerkleVerifyRequest {
    pub leaf: MerkleLeaf,
    pub proof: Vec<String>,
    pub root: String,
}

#[derive(Debug, Serialize)]
pub struct MerkleVerifyResponse {
    pub valid: bool,
}

async fn merkle_verify_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<MerkleVerifyRequest>,
) -> Json<MerkleVerifyResponse> {
    Json(MerkleVerifyResponse {
        valid: state
            .service
            .merkle_check(&request.leaf, &request.proof, &request.root),
    })
}

/// Run the server
pub async fn run_server(
    host: &str,
    port: u16,
    service: Arc<IdentityService>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState {
        service,
        started_at: std::time::Instant::now(),
    });

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Oracle Identity server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (IdentityError::NonceReplay, StatusCode::BAD_REQUEST),
            (IdentityError::WrongIssueNumber(2), StatusCode::BAD_REQUEST),
            (
                IdentityError::Unauthorized("x".into()),
                StatusCode::UNAUTHORIZED,
            ),
            (
                IdentityError::ConflictingLink("x".into()),
                StatusCode::CONFLICT,
            ),
            (IdentityError::LeafNotFound, StatusCode::NOT_FOUND),
            (
                IdentityError::UpstreamUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                IdentityError::Storage("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{:?}", err);
        }
    }

    #[test]
    fn test_error_body() {
        let body = ErrorResponse::from(&IdentityError::UpstreamUnavailable("timeout".into()));
        assert_eq!(body.code, "UPSTREAM_UNAVAILABLE");
        assert!(body.retryable);
    }
}
