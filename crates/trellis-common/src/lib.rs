//! Trellis common types, errors, and utilities.
//!
//! This crate provides shared definitions used across all Trellis components.

pub mod config;
pub mod error;
pub mod types;

pub use config::LogConfig;
pub use error::{Result, TrellisError};
pub use types::Seq;
