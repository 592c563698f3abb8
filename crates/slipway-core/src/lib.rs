//! Core types and configuration for slipway.
//!
//! This crate defines the `slipway.toml` schema ([`SlipwayConfig`]),
//! Python source tree discovery ([`PythonProject`]), and shared error types.

pub mod config;
pub mod error;
pub mod project;

pub use config::{
    BuilderConfig, IdentityConfig, ImageConfig, ProjectConfig, RuntimeConfig, SlipwayConfig,
};
pub use error::{Error, Result};
pub use project::PythonProject;
