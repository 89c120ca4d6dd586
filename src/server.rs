//! HTTP server and routes.

mod extract;
mod handlers;
mod state;

pub use extract::{AdminUser, AuthUser, BookSubmission, MaybeUser};
pub use state::AppState;

use crate::uploads::PUBLIC_PREFIX;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

/// Slack above the cover ceiling for the other multipart fields.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/register", post(handlers::auth_register))
        .route("/login", post(handlers::auth_login))
        .route("/me", get(handlers::auth_me))
        .route("/profile", put(handlers::auth_profile))
        .route("/password", put(handlers::auth_password));

    let book_routes = Router::new()
        .route("/", get(handlers::books_list).post(handlers::books_create))
        .route("/search", get(handlers::books_search))
        .route("/search-external", get(handlers::books_search_external))
        .route("/stats", get(handlers::books_stats))
        .route("/genres", get(handlers::books_genres))
        .route("/authors", get(handlers::books_authors))
        .route(
            "/{id}",
            get(handlers::books_get)
                .put(handlers::books_update)
                .delete(handlers::books_delete),
        );

    let admin_routes = Router::new().route("/users", get(handlers::admin_users));

    let body_limit = usize::try_from(state.uploads().max_bytes())
        .unwrap_or(usize::MAX)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let uploads_dir = ServeDir::new(state.uploads().dir());

    Router::new()
        .route("/api/health", get(handlers::health))
        .nest("/api/auth", auth_routes)
        .nest("/api/books", book_routes)
        .nest("/api/admin", admin_routes)
        .nest_service(PUBLIC_PREFIX, uploads_dir)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
