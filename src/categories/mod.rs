//! Category resource.
//!
//! # Routes
//! ```text
//! GET    /categories        → list_categories   (GetCategories)
//! POST   /categories        → create_category   (CreateCategory)
//! GET    /categories/{id}   → get_category      (GetCategory)
//! PUT    /categories/{id}   → update_category   (UpdateCategory)
//! DELETE /categories/{id}   → delete_category   (DeleteCategory)
//! ```

pub mod handlers;
pub mod model;
pub mod store;

use axum::routing::get;
use axum::Router;

use crate::http::server::AppState;
use self::handlers::*;

pub use model::Category;
pub use store::{CategoryStore, MemoryStore, StoreError};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/{id}",
            get(get_category).put(update_category).delete(delete_category),
        )
}
