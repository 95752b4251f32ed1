//! Compose manifest handling
//!
//! Parses compose manifests and resolves the services reachable from one
//! through `include` and `extends`.

pub mod config;
pub mod parser;
pub mod topology;

pub use config::{ComposeFile, ServiceConfig};
pub use parser::ComposeParser;
pub use topology::{
    ComposeEdge, ComposeNode, EdgeKind, FsSource, ImageSource, ManifestCache, ManifestSource,
    ServiceImageEntry, TopologyResolver,
};
