use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::info;

use super::token::{self, TokenClaims};
use super::{AuthEvent, Backend, BackendError, Filter};
use crate::models::{AuthUser, Session};

const TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    SignIn,
    SignOut,
    GetUser,
    Refresh,
    Select,
    Update,
    Insert,
}

struct Account {
    user: AuthUser,
    password: String,
}

struct StoredRow {
    value: Value,
    /// Selects that still miss this row (simulated read-after-write lag).
    hidden_for: usize,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    sessions: HashMap<String, Session>,
    refresh_tokens: HashMap<String, String>,
    tables: HashMap<String, Vec<StoredRow>>,
    faults: HashMap<Operation, VecDeque<BackendError>>,
    calls: HashMap<Operation, usize>,
    read_lag: usize,
}

/// In-process backend: accounts, sessions and tables held in memory.
///
/// Used when no backend URL is configured and by tests, which can script
/// failures per operation and delay visibility of inserted rows.
pub struct MemoryBackend {
    state: Mutex<State>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(State::default()),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock cannot leave the maps half-written.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_user(&self, email: &str, password: &str) -> AuthUser {
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
        };
        self.state().accounts.insert(
            email.to_lowercase(),
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        info!(email = %email, user_id = %user.id, "memory backend: user added");
        user
    }

    pub fn put_row(&self, table: &str, row: Value) {
        self.state()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(StoredRow {
                value: row,
                hidden_for: 0,
            });
    }

    /// Reads a row directly, ignoring lag and faults.
    pub fn row(&self, table: &str, column: &str, value: &str) -> Option<Value> {
        let filter = Filter::eq(column, value);
        let state = self.state();
        let found = state
            .tables
            .get(table)?
            .iter()
            .find(|r| matches_filter(&r.value, &filter))
            .map(|r| r.value.clone());
        found
    }

    /// The next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: Operation, times: usize, error: BackendError) {
        let mut state = self.state();
        let queue = state.faults.entry(op).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Rows inserted from now on stay invisible to the next `selects` selects.
    pub fn set_read_lag(&self, selects: usize) {
        self.state().read_lag = selects;
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    fn enter(&self, op: Operation) -> Result<MutexGuard<'_, State>, BackendError> {
        let mut state = self.state();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.faults.get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(state)
    }

    fn issue_session(state: &mut State, user: &AuthUser) -> Session {
        let expires_at = token::now_secs() + TOKEN_TTL_SECS;
        let access_token = token::mint_unsigned(&TokenClaims {
            sub: user.id.clone(),
            email: user.email.clone(),
            exp: Some(expires_at),
        });
        let refresh_token = uuid::Uuid::new_v4().simple().to_string();
        let session = Session {
            user: user.clone(),
            access_token: access_token.clone(),
            refresh_token: refresh_token.clone(),
            expires_at: Some(expires_at),
        };
        state.sessions.insert(access_token, session.clone());
        state.refresh_tokens.insert(refresh_token, user.id.clone());
        session
    }

    fn announce(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }
}

fn require_session(state: &State, access_token: &str) -> Result<AuthUser, BackendError> {
    state
        .sessions
        .get(access_token)
        .map(|s| s.user.clone())
        .ok_or_else(|| BackendError::Api {
            status: 401,
            code: None,
            message: "invalid JWT".to_string(),
        })
}

fn matches_filter(row: &Value, filter: &Filter) -> bool {
    match row.get(&filter.column) {
        Some(Value::String(s)) => *s == filter.value,
        Some(other) => other.to_string() == filter.value,
        None => false,
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        let session = {
            let mut state = self.enter(Operation::SignIn)?;
            let user = match state.accounts.get(&email.trim().to_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => {
                    return Err(BackendError::Auth {
                        status: 400,
                        message: "Invalid login credentials".to_string(),
                    })
                }
            };
            Self::issue_session(&mut state, &user)
        };
        self.announce(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), BackendError> {
        {
            let mut state = self.enter(Operation::SignOut)?;
            if let Some(session) = state.sessions.remove(access_token) {
                state.refresh_tokens.remove(&session.refresh_token);
            }
        }
        self.announce(AuthEvent::SignedOut {
            access_token: access_token.to_string(),
        });
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, BackendError> {
        let state = self.enter(Operation::GetUser)?;
        require_session(&state, access_token)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let session = {
            let mut state = self.enter(Operation::Refresh)?;
            let Some(user_id) = state.refresh_tokens.remove(refresh_token) else {
                return Err(BackendError::Auth {
                    status: 400,
                    message: "Invalid Refresh Token".to_string(),
                });
            };
            state.sessions.retain(|_, s| s.refresh_token != refresh_token);
            let user = state
                .accounts
                .values()
                .find(|a| a.user.id == user_id)
                .map(|a| a.user.clone())
                .ok_or_else(|| BackendError::Auth {
                    status: 400,
                    message: "User not found".to_string(),
                })?;
            Self::issue_session(&mut state, &user)
        };
        self.announce(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn select_single(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
    ) -> Result<Value, BackendError> {
        let mut state = self.enter(Operation::Select)?;
        require_session(&state, access_token)?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Err(BackendError::NotFound);
        };
        let mut found = None;
        for row in rows.iter_mut().filter(|r| matches_filter(&r.value, filter)) {
            if row.hidden_for > 0 {
                row.hidden_for -= 1;
            } else if found.is_none() {
                found = Some(row.value.clone());
            }
        }
        found.ok_or(BackendError::NotFound)
    }

    async fn update(
        &self,
        access_token: &str,
        table: &str,
        filter: &Filter,
        patch: Value,
    ) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Update)?;
        require_session(&state, access_token)?;
        let Some(fields) = patch.as_object() else {
            return Err(BackendError::Api {
                status: 400,
                code: None,
                message: "patch must be an object".to_string(),
            });
        };
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches_filter(&r.value, filter)) {
                if let Some(obj) = row.value.as_object_mut() {
                    for (k, v) in fields {
                        obj.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        Ok(())
    }

    async fn insert(&self, access_token: &str, table: &str, row: Value) -> Result<(), BackendError> {
        let mut state = self.enter(Operation::Insert)?;
        require_session(&state, access_token)?;
        let duplicate = row
            .get("id")
            .and_then(|id| id.as_str())
            .map(|id| {
                state
                    .tables
                    .get(table)
                    .map(|rows| rows.iter().any(|r| matches_filter(&r.value, &Filter::eq("id", id))))
                    .unwrap_or(false)
            })
            .unwrap_or(false);
        if duplicate {
            return Err(BackendError::Api {
                status: 409,
                code: Some("23505".to_string()),
                message: format!("duplicate key value violates unique constraint \"{}_pkey\"", table),
            });
        }
        let mut row = row;
        if let Some(obj) = row.as_object_mut() {
            obj.entry("created_at")
                .or_insert_with(|| Value::String(chrono::Utc::now().to_rfc3339()));
        }
        let hidden_for = state.read_lag;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .push(StoredRow { value: row, hidden_for });
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
