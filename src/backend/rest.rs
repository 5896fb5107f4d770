use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{AuthEvent, Backend, BackendError, Filter};
use crate::models::{AuthUser, Session};

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";
const NO_ROWS_CODE: &str = "PGRST116";

/// Client for the hosted platform: auth under `/auth/v1`, tables under
/// `/rest/v1`.
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    events: broadcast::Sender<AuthEvent>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| super::token::now_secs() + secs));
        Session {
            user: self.user,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
        }
    }
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            events,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// `apikey` always carries the public key; the bearer is the user's token
    /// when there is one, so row security applies to that user.
    fn headers(&self, access_token: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(key) = HeaderValue::from_str(&self.anon_key) {
            headers.insert("apikey", key);
        }
        let bearer = access_token.unwrap_or(&self.anon_key);
        if let Ok(auth_value) = HeaderValue::from_str(&format!("Bearer {}", bearer)) {
            headers.insert(AUTHORIZATION, auth_value);
        }
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn announce(&self, event: AuthEvent) {
        // No listeners is fine; the context may not be initialised yet.
        let _ = self.events.send(event);
    }

    async fn token_grant(&self, grant_type: &str, body: Value) -> Result<Session, BackendError> {
        let url = self.auth_url("token");
        let resp = self
            .client
            .post(&url)
            .query(&[("grant_type", grant_type)])
            .headers(self.headers(None))
            .json(&body)
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = read_error_body(resp).await;
            return Err(BackendError::Auth {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))?;
        Ok(token.into_session())
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = self
            .token_grant(
                "password",
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        debug!(user_id = %session.user.id, "backend sign-in ok");
        self.announce(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        let url = self.auth_url("logout");
        let resp = self
            .client
            .post(&url)
            .headers(self.headers(Some(access_token)))
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;
        self.announce(AuthEvent::SignedOut {
            access_token: access_token.to_string(),
        });
        check_status(resp).await.map(|_| ())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let url = self.auth_url("user");
        let resp = self
            .client
            .get(&url)
            .headers(self.headers(Some(access_token)))
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;
        let resp = check_status(resp).await?;
        resp.json::<AuthUser>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let session = self
            .token_grant(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        self.announce(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn select_single(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Value, BackendError> {
        let url = self.table_url(table);
        let resp = self
            .client
            .get(&url)
            .query(&select_query(filter))
            .headers(self.headers(Some(access_token)))
            .header(ACCEPT, SINGLE_OBJECT)
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;
        let resp = check_status(resp).await?;
        resp.json::<Value>()
            .await
            .map_err(|e| BackendError::Decode(e.to_string()))
    }

    async fn update(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<(), BackendError> {
        let url = self.table_url(table);
        let resp = self
            .client
            .patch(&url)
            .query(&[filter_param(filter)])
            .headers(self.headers(Some(access_token)))
            .header("Prefer", "return=minimal")
            .json(&patch)
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;
        check_status(resp).await.map(|_| ())
    }

    async fn insert(&self, access_token: &str, table: &str, row: Value) -> Result<(), BackendError> {
        let url = self.table_url(table);
        let resp = self
            .client
            .post(&url)
            .headers(self.headers(Some(access_token)))
            .header("Prefer", "return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| connect_failed(&url, e))?;
        check_status(resp).await.map(|_| ())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

fn filter_param(filter: &Filter) -> (String, String) {
    (filter.column.clone(), format!("eq.{}", filter.value))
}

fn select_query(filter: &Filter) -> Vec<(String, String)> {
    vec![("select".to_string(), "*".to_string()), filter_param(filter)]
}

fn connect_failed(url: &str, err: impl ToString) -> BackendError {
    warn!(url = %url, "backend unreachable");
    BackendError::Transport(err.to_string())
}

async fn read_error_body(resp: Response) -> Value {
    resp.json::<Value>().await.unwrap_or(Value::Null)
}

async fn check_status(resp: Response) -> Result<Response, BackendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = read_error_body(resp).await;
    Err(classify_failure(status, &body))
}

fn classify_failure(status: StatusCode, body: &Value) -> BackendError {
    let code = body
        .get("code")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());
    if code.as_deref() == Some(NO_ROWS_CODE) && no_rows(body) {
        return BackendError::NotFound;
    }
    BackendError::Api {
        status: status.as_u16(),
        code,
        message: error_message(body, status),
    }
}

/// PGRST116 is also used for "more than one row"; only "0 rows" means absent.
fn no_rows(body: &Value) -> bool {
    body.get("details")
        .and_then(|d| d.as_str())
        .map(|d| d.contains("0 rows"))
        .unwrap_or(true)
}

fn error_message(body: &Value, status: StatusCode) -> String {
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| status.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn urls_are_built_from_a_trimmed_base() {
        let backend = RestBackend::new("https://project.example.co/", "anon");
        assert_eq!(
            backend.auth_url("token"),
            "https://project.example.co/auth/v1/token"
        );
        assert_eq!(
            backend.table_url("volunteers"),
            "https://project.example.co/rest/v1/volunteers"
        );
    }

    #[test]
    fn bearer_falls_back_to_the_public_key() {
        let backend = RestBackend::new("http://localhost", "anon-key");
        let headers = backend.headers(None);
        assert_eq!(headers.get("apikey").unwrap(), "anon-key");
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer anon-key");

        let headers = backend.headers(Some("user-token"));
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer user-token");
    }

    #[test]
    fn filters_use_eq_operator() {
        let query = select_query(&Filter::eq("id", "abc"));
        assert_eq!(
            query,
            vec![
                ("select".to_string(), "*".to_string()),
                ("id".to_string(), "eq.abc".to_string())
            ]
        );
    }

    #[test]
    fn zero_row_single_select_is_not_found() {
        let body = json!({
            "code": "PGRST116",
            "details": "The result contains 0 rows",
            "message": "JSON object requested, multiple (or no) rows returned"
        });
        assert_eq!(
            classify_failure(StatusCode::NOT_ACCEPTABLE, &body),
            BackendError::NotFound
        );
    }

    #[test]
    fn multi_row_single_select_is_an_api_error() {
        let body = json!({
            "code": "PGRST116",
            "details": "The result contains 2 rows",
            "message": "JSON object requested, multiple (or no) rows returned"
        });
        let err = classify_failure(StatusCode::NOT_ACCEPTABLE, &body);
        assert!(!err.is_not_found());
    }

    #[test]
    fn error_messages_prefer_the_most_specific_field() {
        let gotrue = json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" });
        assert_eq!(
            error_message(&gotrue, StatusCode::BAD_REQUEST),
            "Invalid login credentials"
        );

        let newer = json!({ "code": 400, "msg": "Email not confirmed" });
        assert_eq!(
            error_message(&newer, StatusCode::BAD_REQUEST),
            "Email not confirmed"
        );

        assert_eq!(
            error_message(&Value::Null, StatusCode::BAD_GATEWAY),
            "502 Bad Gateway"
        );
    }

    #[test]
    fn permission_errors_are_unauthorized() {
        let body = json!({ "code": "42501", "message": "permission denied for table volunteers" });
        let err = classify_failure(StatusCode::FORBIDDEN, &body);
        assert!(err.is_unauthorized());
        assert_eq!(err.to_string(), "permission denied for table volunteers");
    }

    fn token_response(expires_in: Option<i64>, expires_at: Option<i64>) -> TokenResponse {
        serde_json::from_value(json!({
            "access_token": "a",
            "refresh_token": "r",
            "expires_in": expires_in,
            "expires_at": expires_at,
            "user": { "id": "u1", "email": "op@example.org" }
        }))
        .unwrap()
    }

    #[test]
    fn expires_in_becomes_an_absolute_expiry() {
        let before = crate::backend::token::now_secs();
        let session = token_response(Some(3600), None).into_session();
        let after = crate::backend::token::now_secs();

        let expires_at = session.expires_at.unwrap();
        assert!(expires_at >= before + 3600 && expires_at <= after + 3600);
        assert_eq!(session.user_id(), "u1");
        assert_eq!(session.refresh_token, "r");
    }

    #[test]
    fn explicit_expires_at_wins_over_expires_in() {
        let session = token_response(Some(3600), Some(1_900_000_000)).into_session();
        assert_eq!(session.expires_at, Some(1_900_000_000));
        assert_eq!(token_response(None, None).into_session().expires_at, None);
    }
}
