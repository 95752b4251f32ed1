//! Service registry
//!
//! Static service declarations, per-service behaviors and mutable runtime
//! state.

pub mod behavior;
pub mod declaration;
pub mod loader;
pub mod state;

pub use behavior::{
    BehaviorRegistry, DefaultBehavior, ManualStartBehavior, PrepareContext, ServiceBehavior,
};
pub use declaration::{EnabledSetting, Group, SeedSpec, ServiceDeclaration};
pub use loader::{RegisteredService, ServiceRegistry};
pub use state::{Enablement, ServiceState, StateChange, StateField, StateListener};
