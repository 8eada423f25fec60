//! Subprocess abstraction layer for the external judge
//!
//! A trait-based seam over process execution so the judge client can be
//! exercised against mocks in tests. The production runner supports
//! deadlines with partial-output capture (the process tree is killed and
//! whatever stdout arrived is kept) and cooperative cancellation.

pub mod builder;
pub mod error;
pub mod mock;
pub mod runner;

pub use builder::ProcessCommandBuilder;
pub use error::ProcessError;
pub use mock::MockProcessRunner;
pub use runner::{ExitStatus, ProcessCommand, ProcessOutput, ProcessRunner, TokioProcessRunner};
