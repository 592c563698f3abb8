//! Image pipeline model, Dockerfile generation, source bundling, and eject.
//!
//! # Build pipeline
//!
//! ```text
//! slipway build
//!   1. Dirty check  ── git status --porcelain (skip with --allow-dirty)
//!   2. Definition   ── ImageDefinition::from_config() (typestate pipeline)
//!   3. Dockerfile   ── DockerfileGenerator::render() or .slipway/Dockerfile
//!   4. Bundle       ── git ls-files → .slipway-bundle/
//!   5. Docker       ── docker build --target builder | runtime | release
//! ```
//!
//! # Stage boundary
//!
//! The `builder` stage sees the whole bundle. The `runtime` stage starts from
//! a fresh base image and sees exactly one thing from `builder`: its artifact
//! directory, bind-mounted read-only at the staging directory for the single
//! `RUN` that installs the wheel. No layer ever contains the wheel. `release` derives from `runtime`, creates the application
//! identity, and switches `USER` before the entry point is declared.

pub mod bundle;
pub mod dockerfile;
pub mod eject;
pub mod pipeline;

pub use dockerfile::DockerfileGenerator;
pub use pipeline::{
    AppPaths, ApplicationIdentity, BuildArtifact, BuildTarget, EntryPoint, ImageDefinition,
    Pipeline, PipelineState, Privilege,
};
