pub mod cookies;
pub mod middleware;
pub mod render;
pub mod routes;
pub mod state;

use axum::{
    middleware as axum_middleware,
    response::Redirect,
    routing::{get, get_service, post},
    Router,
};
use http::header::{HeaderValue, CACHE_CONTROL};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;

use self::middleware::auth as auth_middleware;
use self::routes::{auth, dashboard, health, profile};
pub use self::state::AppState;

/// Full router: public login/health routes, gated dashboard routes, assets.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/dashboard", get(dashboard::dashboard_handler))
        .route(
            "/profile",
            get(profile::profile_page).post(profile::update_profile_handler),
        )
        .route("/profile/create", post(profile::create_profile_handler))
        .route("/logout", post(auth::logout_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::require_session,
        ));

    Router::new()
        .route("/", get(|| async { Redirect::to("/dashboard") }))
        .route("/login", get(auth::login_page).post(auth::login_handler))
        .route("/health", get(health::health_handler))
        .merge(protected_routes)
        .nest_service(
            "/assets",
            get_service(ServeDir::new("assets")).layer(SetResponseHeaderLayer::if_not_present(
                CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            )),
        )
        .layer(SetResponseHeaderLayer::if_not_present(
            CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
