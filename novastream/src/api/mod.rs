//! HTTP API surface: axum server setup, shared application state, error mapping,
//! and route handlers.

pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
