//! Test Helper Utilities
//!
//! Shared utilities for testing pxf-id

#![allow(dead_code)]

pub mod db_utils;
pub mod fakes;
pub mod log_capture;

pub use db_utils::create_test_db;
pub use fakes::{CountingFetcher, Scripted, ScriptedClassifier, ScriptedRuntime};
pub use log_capture::LogCapture;

use pxf_id::ImageInput;

/// Image whose bytes double as the script key for fake classifiers
pub fn test_image(key: u8) -> ImageInput {
    ImageInput::new(vec![key; 8], 2, 4)
}
