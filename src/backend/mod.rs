//! Client seam for the hosted backend (auth + row storage).
//!
//! Everything the dashboard knows about the backend goes through [`Backend`].
//! [`rest::RestBackend`] talks to the hosted platform; [`memory::MemoryBackend`]
//! is an in-process stand-in for offline use and tests.

pub mod memory;
pub mod rest;
pub mod token;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::models::{AuthUser, Session};

pub use memory::MemoryBackend;
pub use rest::RestBackend;

/// Session changes announced by the backend client.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut { access_token: String },
}

/// `column = value` row filter; the only filter the dashboard needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub column: String,
    pub value: String,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Rejected credentials or token. The message is the backend's own.
    #[error("{message}")]
    Auth { status: u16, message: String },
    /// A single-row select matched nothing.
    #[error("no matching record")]
    NotFound,
    #[error("{message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("connection error: {0}")]
    Transport(String),
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound)
    }

    pub fn is_unauthorized(&self) -> bool {
        match self {
            BackendError::Auth { .. } => true,
            BackendError::Api { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }

    /// The row already exists (HTTP 409 or Postgres `unique_violation`).
    pub fn is_conflict(&self) -> bool {
        match self {
            BackendError::Api { status, code, .. } => {
                *status == 409 || code.as_deref() == Some(UNIQUE_VIOLATION)
            }
            _ => false,
        }
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError>;

    /// Current user behind an access token.
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, BackendError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError>;

    /// Exactly one row; zero rows is [`BackendError::NotFound`].
    async fn select_single(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Value, BackendError>;

    async fn update(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<(), BackendError>;

    async fn insert(&self, access_token: &str, table: &str, row: Value) -> Result<(), BackendError>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}
