//! # Vantage Runtime
//!
//! Event-driven multi-agent runtime for the detection-to-dispatch pipeline.
//!
//! This crate provides:
//! - A typed publish-subscribe event bus
//! - The agent lifecycle/health contract and shared health registry
//! - A supervisor applying the bounded retry/backoff policy
//! - The Watcher, Diagnostician and Strategist pipeline agents
//!
//! Workers coordinate only through the bus and the finding store; no worker
//! calls another worker's internals.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod agent;
pub mod bus;
pub mod diagnostician;
pub mod strategist;
pub mod supervisor;
pub mod watcher;

pub use agent::{Agent, AgentHealth, AgentState, HealthRegistry};
pub use bus::{Bus, Envelope};
pub use diagnostician::Diagnostician;
pub use strategist::Strategist;
pub use supervisor::Supervisor;
pub use watcher::Watcher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{Agent, AgentHealth, AgentState, HealthRegistry};
    pub use crate::bus::{Bus, Envelope};
    pub use crate::diagnostician::Diagnostician;
    pub use crate::strategist::Strategist;
    pub use crate::supervisor::Supervisor;
    pub use crate::watcher::Watcher;
}
