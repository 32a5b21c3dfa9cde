//! HTTP boundary for the Zapline scheduler, consumed by the admin UI.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, run};
