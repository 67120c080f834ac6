// Export route modules
pub mod chat;
pub mod health;

use crate::state::AppState;
use axum::Router;
use std::path::Path;
use tower_http::services::ServeDir;

// Function to configure all routes
//
// The chat endpoints are reachable both at the root and under `/api`, where the
// bundled browser client calls them.
pub fn configure(state: AppState) -> Router {
    let chat = chat::routes(state);

    Router::new()
        .merge(chat.clone())
        .nest("/api", chat)
        .merge(health::routes())
}

/// Serve the browser client from `dir` for every path no route matches
pub fn with_static_files(router: Router, dir: &Path) -> Router {
    router.fallback_service(ServeDir::new(dir))
}
