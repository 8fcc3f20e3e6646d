//! An agent loop that lets a language model work inside a confined workspace.
//!
//! The model proposes one structured action per turn. Every action passes a
//! syntactic security validator before a confined executor runs it, and the
//! outcome is fed back as the next observation until the model signals
//! completion or the iteration budget runs out.
//!
//! - **[`core`]**: pure logic (shell parsing, validation, response decoding, pricing).
//! - **[`io`]**: processes, filesystem layout, prompts and the completion seam.
//! - **[`orchestrator`]**: the run state machine tying both together.
//! - **[`monitor`]**: token, cost and outcome counters.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod monitor;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
