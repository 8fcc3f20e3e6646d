//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules are free of I/O side effects. The validator in particular must
//! give the same verdict for the same command on any machine.

pub mod budget;
pub mod normalizer;
pub mod path;
pub mod pricing;
pub mod shell;
pub mod types;
pub mod validator;
