//! # ReachClaw Store
//!
//! Durable records for target contacts, interactions (the unified task
//! record), posts, settings, and derived rate counters. All engine-triggered
//! mutations go through guarded, transactional update paths that enforce the
//! task state machine; rate-counter consumption happens only inside the
//! atomic `reserve` path.

pub mod db;
pub mod entities;

pub use db::{EngineDb, Reservation};
pub use entities::{
    Contact, ContactStatus, Interaction, InteractionStatus, InteractionType, Post, PostStatus,
    RateCategory,
};
