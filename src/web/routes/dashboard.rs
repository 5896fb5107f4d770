use askama::Template;
use axum::{extract::State, response::Response, Extension};

use crate::services::dashboard_service::{self, DashboardView};
use crate::web::middleware::auth::AuthenticatedUser;
use crate::web::render::render;
use crate::web::state::AppState;

#[derive(Template)]
#[template(path = "dashboard.html")]
pub struct DashboardTemplate {
    pub operator: String,
    pub today: String,
    pub map_api_key: String,
    pub dashboard: DashboardView,
}

pub async fn dashboard_handler(
    Extension(auth_user): Extension<AuthenticatedUser>,
    State(state): State<AppState>,
) -> Response {
    render(&DashboardTemplate {
        operator: auth_user.label(),
        today: today_label(),
        map_api_key: state.config.map_api_key.clone(),
        dashboard: dashboard_service::load_dashboard_view(),
    })
}

pub fn today_label() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
