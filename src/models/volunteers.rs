use serde::{Deserialize, Serialize};

pub const DEFAULT_NICKNAME: &str = "New Operator";
pub const DEFAULT_ROLE: &str = "admin";
pub const DEFAULT_STATUS: &str = "active";

/// One row of the `volunteers` table. `id` is the backend's auth user id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolunteerRow {
    pub id: String,
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub last_login_at: Option<String>,
}

/// Insert payload for the self-service "create profile" action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewVolunteer {
    pub id: String,
    pub nickname: String,
    pub role: String,
    pub status: String,
}

impl NewVolunteer {
    pub fn for_user(user_id: &str, email: Option<&str>) -> Self {
        Self {
            id: user_id.to_string(),
            nickname: default_nickname(email),
            role: DEFAULT_ROLE.to_string(),
            status: DEFAULT_STATUS.to_string(),
        }
    }
}

/// The only two fields a volunteer may change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileEdit {
    pub nickname: String,
    pub phone: String,
}

fn default_nickname(email: Option<&str>) -> String {
    email
        .and_then(|e| e.split('@').next())
        .map(str::trim)
        .filter(|local| !local.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_NICKNAME.to_string())
}
