//! Environment handling
//!
//! Builds the variable map every downstream action sees and expands
//! shell-style placeholders against it.

pub mod expand;
pub mod map;

pub use expand::{expand, Expander, MAX_PASSES};
pub use map::{EnvironmentMap, ResolvedEnv, VarLookup};
