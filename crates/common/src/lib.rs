//! Shared utilities for the drip services.

pub mod utils;
