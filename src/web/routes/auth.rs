use askama::Template;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Extension, Form,
};
use serde::Deserialize;
use tracing::{info, warn};

use crate::session::SessionState;
use crate::web::cookies::{append_cleared_cookies, append_session_cookies, read_tokens};
use crate::web::middleware::auth::AuthenticatedUser;
use crate::web::render::{render, render_with_status};
use crate::web::state::AppState;

pub const CREDENTIALS_REQUIRED: &str = "Email and password are required.";
pub const LOGIN_FAILED: &str = "Login failed. Please try again.";

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub email: String,
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

pub async fn login_page(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let tokens = read_tokens(&headers);
    if !tokens.is_empty() {
        let resolution = state
            .sessions
            .resolve(tokens.access.as_deref(), tokens.refresh.as_deref())
            .await;
        if let SessionState::Present(session) = resolution.state {
            let mut response = Redirect::to("/dashboard").into_response();
            if resolution.refreshed {
                append_session_cookies(response.headers_mut(), &session);
            }
            return response;
        }
    }

    render(&LoginTemplate {
        email: String::new(),
        error: None,
    })
}

pub async fn login_handler(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
    let email = form.email.trim().to_string();
    if email.is_empty() || form.password.is_empty() {
        return render_with_status(
            StatusCode::UNPROCESSABLE_ENTITY,
            &LoginTemplate {
                email,
                error: Some(CREDENTIALS_REQUIRED.to_string()),
            },
        );
    }

    info!(email = %email, "login attempt");
    match state.backend.sign_in(&email, &form.password).await {
        Ok(session) => {
            info!(user_id = %session.user_id(), "login succeeded");
            let mut response = Redirect::to("/dashboard").into_response();
            append_session_cookies(response.headers_mut(), &session);
            response
        }
        Err(err) => {
            warn!(email = %email, error = %err, "login failed");
            let message = err.to_string();
            let message = if message.trim().is_empty() {
                LOGIN_FAILED.to_string()
            } else {
                message
            };
            render_with_status(
                StatusCode::UNAUTHORIZED,
                &LoginTemplate {
                    email,
                    error: Some(message),
                },
            )
        }
    }
}

pub async fn logout_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
) -> Response {
    let token = auth_user.session.access_token.as_str();
    if let Err(err) = state.backend.sign_out(token).await {
        warn!(user_id = %auth_user.id(), error = %err, "backend sign-out failed");
    }
    state.sessions.forget(token).await;
    state.profiles.remove(auth_user.id()).await;
    info!(user_id = %auth_user.id(), "logged out");

    let mut response = Redirect::to("/login").into_response();
    append_cleared_cookies(response.headers_mut());
    response
}
