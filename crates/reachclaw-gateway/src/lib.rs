//! REST gateway.
//!
//! Serves the dashboard API under `/api/v1`. The gateway never talks to the
//! platform itself: writes go into the store as pending work and the engine
//! picks them up on its own clock. An enqueue response therefore means
//! "accepted", never "done".

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start_server};
