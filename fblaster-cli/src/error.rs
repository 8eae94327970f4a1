//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and the exit codes the launcher relies on: 0 for a clean shutdown, 1
//! for anything that prevented the supervisor from running.

use std::fmt;
use std::io;
use std::process;

use fblaster::config::ConfigError;
use fblaster::runtime::RuntimeError;
use fblaster::supervisor::SupervisorError;

/// CLI-specific errors.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(io::Error),
    /// Invalid operator configuration
    Config(ConfigError),
    /// The supervisor failed to start or crashed
    Supervisor(SupervisorError),
    /// The poll signal could not be delivered to a running peer
    SignalPoll(RuntimeError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        if let CliError::SignalPoll(_) = self {
            eprintln!();
            eprintln!("Warning: no running supervisor accepted the poll signal.");
            eprintln!("Check that a supervisor owns this directory and that its");
            eprintln!("container is reachable through the runtime.");
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Supervisor(e) => write!(f, "Supervisor error: {}", e),
            CliError::SignalPoll(e) => write!(f, "Failed to deliver poll signal: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::LoggingInit(e) => Some(e),
            CliError::Config(e) => Some(e),
            CliError::Supervisor(e) => Some(e),
            CliError::SignalPoll(e) => Some(e),
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e)
    }
}

impl From<SupervisorError> for CliError {
    fn from(e: SupervisorError) -> Self {
        CliError::Supervisor(e)
    }
}
