//! # rescue
//!
//! Distributed task queue over a shared ordered store.
//!
//! Workers claim tasks under fair-share limits and hold them on expiring
//! leases. Cron templates emit tasks on interval boundaries, gate templates
//! emit once all their dependencies are acknowledged, and broadcasts are
//! delivered once to every participating worker.

pub mod balancer;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod ticker;
pub mod timer;

pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use task::Task;
