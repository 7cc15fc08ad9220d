// Public modules
pub mod batch;
pub mod cluster;
pub mod clusterfile;
pub mod collab;
pub mod config_render;
pub mod defaults;
pub mod env;
pub mod error;
pub mod exec;
pub mod node;
pub mod paths;
pub mod pipeline;
pub mod plugin;
pub mod processor;
pub mod ssh;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export common types for convenience
pub use cluster::Cluster;
pub use error::{Error, ErrorCode, Result};
