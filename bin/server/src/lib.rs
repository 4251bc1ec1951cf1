//! conduit HTTP server.
//!
//! This crate wires the workflow services to an axum router, loads
//! configuration from the environment and provides the PostgreSQL
//! implementation of the graph store.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub use state::AppState;
