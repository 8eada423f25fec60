//! Testing utilities and fixtures
//!
//! Mock collaborators for exercising the engine and gate without spawning
//! real judge processes or touching a real workspace.

pub mod mocks;
