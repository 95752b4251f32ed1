//! Stackup - resolve, order and launch a fleet of compose-managed services
//!
//! Stackup reads per-service declarations, decides which services are
//! enabled and starts them group by group. It provides:
//!
//! - Shell-style environment expansion (`${VAR:-default}` and friends)
//! - Compose topology resolution across `include` and `extends`
//! - A service registry with per-service behaviors and runtime state
//! - Enablement resolution and dependency-ordered batch plans

pub mod compose;
pub mod config;
pub mod diagnostics;
pub mod env;
pub mod error;
pub mod registry;
pub mod resolver;

pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, Outcome, Severity};
pub use error::{Result, StackError};
