//! # Vantage Dispatch
//!
//! Closes the loop on approved recommendations:
//! - [`engine::ExecutionEngine`] executes against the external target with
//!   rollback-plan capture, dry-run support and the uniform retry policy
//! - validation re-reads the affected state against declared
//!   post-conditions and gates the explicit rollback decision
//! - [`outcome::OutcomeMonitor`] drives durable multi-day outcome sessions
//! - [`notify::NotificationRouter`] maps category × severity to channels
//!
//! Execution records are owned exclusively by this subsystem.

#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

pub mod dispatcher;
pub mod engine;
pub mod notify;
pub mod outcome;
pub mod target;

pub use dispatcher::Dispatcher;
pub use engine::{change_set_of, ExecutionEngine};
pub use notify::{LogChannel, NotificationChannel, NotificationRouter, Notifier};
pub use outcome::OutcomeMonitor;
pub use target::{ExecutionTarget, MemoryTarget, TargetState};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::dispatcher::Dispatcher;
    pub use crate::engine::ExecutionEngine;
    pub use crate::notify::{LogChannel, NotificationChannel, NotificationRouter, Notifier};
    pub use crate::outcome::OutcomeMonitor;
    pub use crate::target::{ExecutionTarget, MemoryTarget};
}
