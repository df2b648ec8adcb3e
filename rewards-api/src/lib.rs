//! HTTP surface of the rewards backend
//!
//! Thin actix-web handlers over [`rewards_core::RewardsService`]. Every
//! route lives under `/api/v1`; `/health` and `/metrics` sit at the root.

pub mod errors;
pub mod handlers;
pub mod models;

pub use errors::ApiError;
pub use handlers::configure_routes;
