//! Utility modules: shared HTTP plumbing.

pub mod http;
