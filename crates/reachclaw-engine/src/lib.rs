//! ReachClaw automation engine.
//!
//! The engine owns the background side of the system: claiming due work from
//! the store in scheduling order, admitting it through the rate limiter,
//! executing it against the platform bridge, and applying outcomes with
//! idempotent retry. The REST gateway only enqueues and reads; everything
//! that talks to the platform goes through here.

pub mod coordinator;
pub mod executor;
pub mod limiter;
pub mod scheduler;

pub use coordinator::Coordinator;
pub use executor::{Executor, backoff_delay};
pub use limiter::{PolicySnapshot, RateLimiter};
pub use scheduler::Scheduler;
