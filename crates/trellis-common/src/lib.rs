//! Trellis common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Trellis components.

pub mod block;
pub mod config;
pub mod error;

pub use block::{BlockHeader, BlockId, BlockType};
pub use config::StorageConfig;
pub use error::{Result, TrellisError};
