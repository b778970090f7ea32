//! Meshgate Core - shared foundations for the meshgate control plane
//!
//! Carries the error vocabulary used across every crate (validation,
//! address exhaustion, external command failures), the engine
//! configuration types, and the `tracing` bootstrap.
//!
//! # Modules
//!
//! - [`config`] - Engine and logging configuration
//! - [`error`] - Error types shared across the workspace
//! - [`logging`] - Structured logging initialization

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    EngineConfig, FileLoggingConfig, LogFormat, LogLevel, LoggingConfig, RotationStrategy,
    DEFAULT_KEEPALIVE_SECS, DEFAULT_LISTEN_PORT,
};
pub use error::{AllocError, CommandError, ValidationError};
pub use logging::{init_logging, LogGuard};
