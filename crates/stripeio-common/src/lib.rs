//! Stripeio Common - Shared types and utilities
//!
//! This crate provides the core types, error definitions, checksum helpers,
//! and configuration structures used across all stripeio components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DriverConfig, DriverKind, EngineConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
