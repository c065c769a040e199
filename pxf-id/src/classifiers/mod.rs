//! Classifier adapters
//!
//! - [`LocalClassifier`]: on-device runtime, failures become a placeholder result
//! - [`RemoteClassifier`]: network transport wrapped in timeout and backoff retry
//! - [`HttpClassifierTransport`]: JSON-over-HTTP transport for remote services

pub mod http_transport;
pub mod local;
pub mod remote;

pub use http_transport::HttpClassifierTransport;
pub use local::LocalClassifier;
pub use remote::{RemoteClassifier, RetryPolicy};
