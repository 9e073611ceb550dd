//! Gateway: REST session CRUD, bearer auth, and the daemon bootstrap
//! sequence tying every subsystem together.

mod auth;
mod daemon;
mod routes;

pub use auth::{ensure_token, require_bearer_token, verify_ws_token};
pub use daemon::{bootstrap, AppState};
pub use routes::router;
