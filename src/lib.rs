//! rotalog - rotating file logging for tracing
//!
//! This library provides a self-rotating log file ([`rotation::RotatingFile`])
//! and a config-driven logger built on top of it ([`logging::init`]).

pub mod config;
pub mod error;
pub mod logging;
pub mod rotation;

pub use error::RotateError;
