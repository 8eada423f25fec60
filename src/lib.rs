//! # Gavel
//!
//! An iterative, adversarial code-audit orchestrator. A language model
//! submits "thoughts" (candidate code plus reasoning); gavel drives each
//! one through a bounded review loop against an external judge process and
//! returns structured feedback until the work is complete, stagnant, or
//! out of budget.
//!
//! ## Modules
//!
//! - `audit` - The audit engine: per-thought orchestration and feedback
//! - `cache` - Fingerprint-keyed verdict cache with TTL
//! - `cli` - Command-line interface for the `gavel` binary
//! - `completion` - Completion tiers, hard stops, and termination analysis
//! - `config` - Runtime and per-session configuration with sanitization
//! - `context` - Project context packing for the judge
//! - `detector` - Loop-gated stagnation detection
//! - `error` - Error taxonomy and the transport error envelope
//! - `fingerprint` - Deterministic digests identifying audit inputs
//! - `gate` - Concurrency bounds and idle-session eviction
//! - `judge` - Judge wire types and the subprocess-backed client
//! - `session` - Durable per-session iteration history
//! - `similarity` - Candidate similarity analysis
//! - `subprocess` - Testable subprocess abstraction layer
//! - `testing` - Mocks and fixtures for tests

pub mod audit;
pub mod cache;
pub mod cli;
pub mod completion;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod fingerprint;
pub mod gate;
pub mod judge;
pub mod session;
pub mod similarity;
pub mod subprocess;

pub mod testing;
