//! Compiler configuration
//!
//! YAML-backed settings for naming conventions and pool sizing, plus the DSL prototype
//! registry that is supplied next to them.

pub mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::CompilerConfig;
