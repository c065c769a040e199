//! # PxFlora Common Library
//!
//! Shared code for the PxFlora identification core and its presentation layer:
//! - Error type shared across crates
//! - TOML configuration and root folder resolution
//! - Tracing initialisation
//! - Pipeline event types and the event bus

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
pub use events::{ClassificationSource, EventBus, PipelineEvent};
