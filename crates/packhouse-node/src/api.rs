//! HTTP API for the packhouse node.
//!
//! Implements the git smart HTTP endpoints on top of
//! [`packhouse_git::Session`], plus a health check and a repository list.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use packhouse_git::{advertise_refs, GitError, ProtocolConfig, Service, Session};
use packhouse_storage::{GitStorage, MemoryStore, StorageError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use validator::ValidationError;

use crate::config::Config;
use crate::stream::{BodyDecoder, ChannelSink};
use crate::validation::{repo_name, ValidationErrorResponse};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Repository store.
    pub repos: Arc<RepoStore>,
    /// Protocol engine tuning handed to every session.
    pub protocol: ProtocolConfig,
    /// Largest accepted request body.
    pub max_body_bytes: usize,
}

impl AppState {
    /// Creates state for a node configured by `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            repos: Arc::new(RepoStore::new(config.compress_at_rest)),
            protocol: config.protocol.clone(),
            max_body_bytes: config.max_body_bytes,
        }
    }
}

/// In-memory repository store.
#[derive(Default)]
pub struct RepoStore {
    repos: RwLock<HashMap<String, Arc<MemoryStore>>>,
    compress_at_rest: bool,
}

impl RepoStore {
    /// Creates a new empty repository store.
    pub fn new(compress_at_rest: bool) -> Self {
        Self {
            repos: RwLock::new(HashMap::new()),
            compress_at_rest,
        }
    }

    /// Gets a repository by name.
    pub fn get(&self, name: &str) -> Result<Arc<MemoryStore>, ApiError> {
        self.repos
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::RepoNotFound(name.to_string()))
    }

    /// Gets a repository, creating it empty if it does not exist.
    pub fn get_or_create(&self, name: &str) -> Arc<MemoryStore> {
        let mut repos = self.repos.write();
        repos
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(repo = %name, "Repository created");
                Arc::new(MemoryStore::new().with_compression(self.compress_at_rest))
            })
            .clone()
    }

    /// Lists all repositories, sorted by name.
    pub async fn list(&self) -> Result<Vec<RepoInfo>, ApiError> {
        let mut repos: Vec<(String, Arc<MemoryStore>)> = self
            .repos
            .read()
            .iter()
            .map(|(name, store)| (name.clone(), store.clone()))
            .collect();
        repos.sort_by(|a, b| a.0.cmp(&b.0));

        let mut infos = Vec::with_capacity(repos.len());
        for (name, store) in repos {
            infos.push(RepoInfo {
                name,
                head: store.get_head_ref().await?,
                refs: store.get_refs().await?.len(),
                objects: store.object_count(),
            });
        }
        Ok(infos)
    }
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("repository not found: {0}")]
    RepoNotFound(String),
    #[error("unsupported service: {0}")]
    UnsupportedService(String),
    #[error("invalid repository name: {0}")]
    InvalidName(ValidationError),
    #[error("unsupported content encoding")]
    UnsupportedEncoding,
    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("failed to read request body: {0}")]
    Body(String),
    #[error("git error: {0}")]
    Git(GitError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<GitError> for ApiError {
    fn from(err: GitError) -> Self {
        match err {
            GitError::UnsupportedService(service) => ApiError::UnsupportedService(service),
            other => ApiError::Git(other),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::InvalidName(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::RepoNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::UnsupportedService(_) => {
                let status = StatusCode::FORBIDDEN;
                return (
                    status,
                    Json(ServiceErrorResponse {
                        status: status.as_u16(),
                        message: self.to_string(),
                    }),
                )
                    .into_response();
            }
            ApiError::InvalidName(err) => {
                return ValidationErrorResponse::for_field("repo", err).into_response()
            }
            ApiError::UnsupportedEncoding => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Body(_) => StatusCode::BAD_REQUEST,
            ApiError::Git(_) | ApiError::Storage(_) => {
                tracing::error!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ServiceErrorResponse {
    status: u16,
    message: String,
}

/// Repository info for listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name: String,
    pub head: Option<String>,
    pub refs: usize,
    pub objects: usize,
}

/// Query string of `info/refs`.
#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub service: Option<String>,
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Repository listing
        .route("/api/repos", get(list_repos))
        // Git smart HTTP protocol
        .route("/{repo}/info/refs", get(git_info_refs))
        .route("/{repo}/git-upload-pack", post(git_upload_pack))
        .route("/{repo}/git-receive-pack", post(git_receive_pack))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Lists all repositories.
async fn list_repos(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.repos.list().await?))
}

/// Git info/refs endpoint - advertises references.
///
/// An unknown repository advertises as empty to receive-pack, so the
/// first push can create it.
async fn git_info_refs(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    Query(query): Query<ServiceQuery>,
) -> Result<Response, ApiError> {
    let name = repo_name(&repo)?;
    let service: Service = query.service.as_deref().unwrap_or_default().parse()?;

    let store = match state.repos.get(name) {
        Ok(store) => store,
        Err(ApiError::RepoNotFound(_)) if service == Service::ReceivePack => {
            Arc::new(MemoryStore::new())
        }
        Err(e) => return Err(e),
    };
    let output = advertise_refs(store.as_ref(), service).await?;

    Ok((
        [
            (header::CONTENT_TYPE, service.advertisement_content_type()),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        output,
    )
        .into_response())
}

/// Git upload-pack endpoint - handles fetch/clone.
async fn git_upload_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let name = repo_name(&repo)?;
    let store = state.repos.get(name)?;
    run_session(&state, name, store, Service::UploadPack, &headers, body).await
}

/// Git receive-pack endpoint - handles push.
///
/// Pushing to an unknown repository creates it.
async fn git_receive_pack(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let name = repo_name(&repo)?;
    let store = state.repos.get_or_create(name);
    run_session(&state, name, store, Service::ReceivePack, &headers, body).await
}

/// Feeds the request body to a session as it arrives, then streams the
/// response from a background task.
async fn run_session(
    state: &AppState,
    repo: &str,
    store: Arc<MemoryStore>,
    service: Service,
    headers: &HeaderMap,
    body: Body,
) -> Result<Response, ApiError> {
    let mut decoder = BodyDecoder::from_headers(headers).ok_or(ApiError::UnsupportedEncoding)?;
    let storage: Arc<dyn GitStorage> = store;
    let mut session = Session::new(service, storage, state.protocol.clone());

    let mut stream = body.into_data_stream();
    // The limit applies to the wire bytes and to what they decode to.
    let mut received = 0usize;
    let mut decoded = 0usize;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ApiError::Body(e.to_string()))?;
        received += chunk.len();
        if received > state.max_body_bytes {
            return Err(ApiError::PayloadTooLarge(state.max_body_bytes));
        }
        let data = decoder
            .decode(chunk)
            .map_err(|e| ApiError::Body(e.to_string()))?;
        decoded += data.len();
        if decoded > state.max_body_bytes {
            return Err(ApiError::PayloadTooLarge(state.max_body_bytes));
        }
        session.feed(&data).await?;
    }
    let tail = decoder.finish().map_err(|e| ApiError::Body(e.to_string()))?;
    decoded += tail.len();
    if decoded > state.max_body_bytes {
        return Err(ApiError::PayloadTooLarge(state.max_body_bytes));
    }
    session.feed(&tail).await?;
    session.finish().await?;

    tracing::debug!(repo = %repo, %service, bytes = received, decoded, "Request body consumed");

    let (mut sink, rx) = ChannelSink::channel();
    let repo = repo.to_string();
    tokio::spawn(async move {
        if let Err(e) = session.respond(&mut sink).await {
            tracing::error!(repo = %repo, %service, error = %e, "Response failed");
        }
    });

    Ok((
        [(header::CONTENT_TYPE, service.result_content_type())],
        Body::from_stream(rx),
    )
        .into_response())
}
