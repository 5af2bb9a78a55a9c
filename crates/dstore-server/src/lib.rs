//! HTTP server for dstore.
//!
//! Every configured collection is mounted under its own path with item
//! endpoints (`PUT`/`GET`/`DELETE /{path}/:id`) and bulk endpoints
//! (`__count`, `__ids`, `__export`). Admin endpoints for pings, build info,
//! health and good-to-go sit at the root.

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod router;
pub mod server;

pub use config::{ServerConfig, StoreConfig};
pub use error::{ServerError, ServerResult};
pub use router::{build_router, AppState};
pub use server::DstoreServer;
