//! Side-effecting operations: processes, filesystem, completion service.

pub mod completion;
pub mod config;
pub mod context;
pub mod init;
pub mod iteration_log;
pub mod process;
pub mod prompt;
pub mod report;
pub mod run_state;
pub mod sandbox;
pub mod task;
pub mod workspace;
