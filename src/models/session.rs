use serde::{Deserialize, Serialize};

/// The authenticated user as the backend reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A signed-in session: the user plus the backend's tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: AuthUser,
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.user.id
    }

    pub fn email(&self) -> Option<&str> {
        self.user.email.as_deref()
    }

    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.expires_at.map(|exp| exp <= now_secs).unwrap_or(false)
    }
}
