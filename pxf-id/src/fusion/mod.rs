//! Fusion of classifier results
//!
//! - [`arbitrate`]: majority vote with mean-confidence tie-break

pub mod arbiter;

pub use arbiter::{arbitrate, Verdict};
