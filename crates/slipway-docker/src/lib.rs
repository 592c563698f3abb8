//! Docker CLI integration: staged image builds, post-build verification,
//! and local toolchain diagnostics.

pub mod client;
pub mod docker;
pub mod executor;
pub mod report;

pub use client::{BuildOptions, BuildOutcome, DockerClient, PipelineError, VerifyError};
pub use docker::DockerError;
pub use executor::{DockerExecutor, RealExecutor};
pub use report::{CheckResult, DoctorReport, VerifyReport};
