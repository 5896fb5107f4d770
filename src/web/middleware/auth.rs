use askama::Template;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tracing::debug;

use crate::models::Session;
use crate::session::{gate, GateView};
use crate::web::cookies::{append_cleared_cookies, append_session_cookies, read_tokens};
use crate::web::render::render;
use crate::web::state::AppState;

/// The signed-in user, injected into request extensions by [`require_session`].
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub session: Session,
}

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        self.session.user_id()
    }

    /// Shown in the top bar.
    pub fn label(&self) -> String {
        self.session
            .email()
            .map(str::to_string)
            .unwrap_or_else(|| self.id().to_string())
    }
}

#[derive(Template)]
#[template(path = "loading.html")]
pub struct LoadingTemplate {
    pub refresh_secs: u64,
}

pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let tokens = read_tokens(request.headers());
    let resolution = state
        .sessions
        .resolve(tokens.access.as_deref(), tokens.refresh.as_deref())
        .await;

    let session = match gate(&resolution.state) {
        GateView::Loading => {
            debug!(path = %request.uri().path(), "session unresolved, showing loading page");
            return render(&LoadingTemplate { refresh_secs: 2 });
        }
        GateView::Login => {
            let mut response = Redirect::to("/login").into_response();
            if !tokens.is_empty() {
                append_cleared_cookies(response.headers_mut());
            }
            return response;
        }
        GateView::Protected(session) => session.clone(),
    };

    request.extensions_mut().insert(AuthenticatedUser {
        session: session.clone(),
    });
    let mut response = next.run(request).await;
    if resolution.refreshed {
        append_session_cookies(response.headers_mut(), &session);
    }
    response
}
