use askama::Template;
use axum::{
    extract::State,
    response::{IntoResponse, Redirect, Response},
    Extension, Form,
};
use serde::Deserialize;

use crate::models::{NewVolunteer, ProfileEdit};
use crate::services::profile_service::{
    Notice, ProfileScreen, ProfileState, VolunteerProfile, PROPAGATING_MESSAGE,
};
use crate::web::middleware::auth::AuthenticatedUser;
use crate::web::render::render;
use crate::web::routes::dashboard::today_label;
use crate::web::state::AppState;

/// Flattened profile screen for the template.
pub struct ProfilePageView {
    pub user_id: String,
    pub loading: bool,
    pub profile: Option<VolunteerProfile>,
    pub offer_create: bool,
    pub propagating: bool,
    pub propagating_message: &'static str,
    pub error: Option<String>,
    pub notice: Option<Notice>,
    pub dismiss_ms: u64,
    /// What an administrator can run instead of the self-service button.
    pub admin_sql: String,
}

#[derive(Template)]
#[template(path = "profile.html")]
pub struct ProfileTemplate {
    pub operator: String,
    pub today: String,
    pub page: ProfilePageView,
}

#[derive(Debug, Deserialize)]
pub struct ProfileForm {
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub phone: String,
}

pub async fn profile_page(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
) -> Response {
    let mut screen = ProfileScreen::new();
    screen
        .load(state.backend.as_ref(), &auth_user.session, &state.fetch_policy())
        .await;
    state.profiles.put(auth_user.id(), screen.clone()).await;
    render_screen(&state, &auth_user, &screen)
}

pub async fn update_profile_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
    Form(form): Form<ProfileForm>,
) -> Response {
    let Some(mut screen) = state.profiles.get(auth_user.id()).await else {
        return reload();
    };
    let edit = ProfileEdit {
        nickname: form.nickname.trim().to_string(),
        phone: form.phone.trim().to_string(),
    };
    // Failure is already reflected in the screen's notice.
    let _ = screen
        .submit_edit(state.backend.as_ref(), &auth_user.session, edit)
        .await;
    state.profiles.put(auth_user.id(), screen.clone()).await;
    render_screen(&state, &auth_user, &screen)
}

pub async fn create_profile_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
) -> Response {
    let Some(mut screen) = state.profiles.get(auth_user.id()).await else {
        return reload();
    };
    let _ = screen
        .create(
            state.backend.as_ref(),
            &auth_user.session,
            &state.refetch_policy(),
        )
        .await;
    state.profiles.put(auth_user.id(), screen.clone()).await;
    render_screen(&state, &auth_user, &screen)
}

/// Form posts need a screen loaded by `GET /profile` first (lost on restart).
fn reload() -> Response {
    Redirect::to("/profile").into_response()
}

fn render_screen(state: &AppState, auth_user: &AuthenticatedUser, screen: &ProfileScreen) -> Response {
    let template = ProfileTemplate {
        operator: auth_user.label(),
        today: today_label(),
        page: page_view(state, auth_user, screen),
    };
    render(&template)
}

fn page_view(state: &AppState, auth_user: &AuthenticatedUser, screen: &ProfileScreen) -> ProfilePageView {
    let error = match screen.state() {
        ProfileState::Error(message) => Some(message.clone()),
        _ => None,
    };
    ProfilePageView {
        user_id: auth_user.id().to_string(),
        loading: *screen.state() == ProfileState::Loading,
        profile: screen.profile().cloned(),
        offer_create: screen.offers_create(),
        propagating: *screen.state() == ProfileState::Propagating,
        propagating_message: PROPAGATING_MESSAGE,
        error,
        notice: screen.notice().cloned(),
        dismiss_ms: state.config.notice_dismiss.as_millis() as u64,
        admin_sql: admin_insert_sql(auth_user),
    }
}

fn admin_insert_sql(auth_user: &AuthenticatedUser) -> String {
    let row = NewVolunteer::for_user(auth_user.id(), auth_user.session.email());
    format!(
        "INSERT INTO volunteers (id, nickname, role, status) VALUES ('{}', '{}', '{}', '{}');",
        row.id,
        row.nickname.replace('\'', "''"),
        row.role,
        row.status
    )
}
