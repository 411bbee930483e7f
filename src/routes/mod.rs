use axum::http::HeaderValue;
use axum::{
    middleware,
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod client;
pub mod companies;
pub mod health;
pub mod permissions;
pub mod projects;
pub mod rfis;
pub mod users;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                (!trimmed.is_empty()).then(|| {
                    trimmed
                        .parse::<HeaderValue>()
                        .expect("invalid CORS allowed origin")
                })
            })
            .collect();

        let allow_origin = AllowOrigin::list(headers);

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let companies_routes = Router::new()
        .route(
            "/",
            get(companies::list_companies).post(companies::create_company),
        )
        .route("/:id", patch(companies::update_company));

    let projects_routes = Router::new()
        .route(
            "/",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/:id",
            get(projects::get_project)
                .patch(projects::update_project)
                .delete(projects::delete_project),
        )
        .route(
            "/:id/rfis",
            get(rfis::list_project_rfis).post(rfis::create_rfi),
        );

    let rfis_routes = Router::new()
        .route(
            "/:id",
            get(rfis::get_rfi)
                .patch(rfis::update_rfi)
                .delete(rfis::delete_rfi),
        )
        .route("/:id/activate", post(rfis::activate_rfi))
        .route("/:id/field-work", post(rfis::begin_field_work))
        .route("/:id/clarify", post(rfis::request_clarification))
        .route("/:id/submit", post(rfis::submit_rfi))
        .route("/:id/respond", post(rfis::respond_to_rfi))
        .route("/:id/close", post(rfis::close_rfi))
        .route(
            "/:id/client-link",
            post(rfis::mint_client_link).delete(rfis::revoke_client_link),
        )
        .route("/:id/history", get(rfis::rfi_history));

    let users_routes = Router::new()
        .route("/", get(users::list_users).post(users::create_user))
        .route("/invite", post(users::invite_user))
        .route("/:id", delete(users::delete_user))
        .route("/:id/role", patch(users::update_user_role));

    // Client links are the anonymous path: the token in the URL is the whole
    // capability, so these routes sit outside the authenticated nest.
    let client_routes = Router::new()
        .route("/client/:token", get(client::view_rfi))
        .route("/client/:token/response", post(client::submit_response));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .nest("/api/companies", companies_routes)
        .nest("/api/projects", projects_routes)
        .nest("/api/rfis", rfis_routes)
        .nest("/api/users", users_routes)
        .route("/api/permissions", get(permissions::list_permissions))
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(client_routes)
        .merge(protected_routes)
        .nest("/api/auth", auth_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
}
