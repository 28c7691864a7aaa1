//! Utility functions shared across the codebase

pub mod json;

pub use json::{clean_response, parse_lenient, truncate_chars};
