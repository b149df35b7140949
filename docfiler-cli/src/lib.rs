// All core functionality is in docfiler-core
// This CLI acts as a thin wrapper around the core library

// CLI-specific modules
pub mod config_locator;

// Re-export core types for convenience
pub use docfiler_core::*;

// Re-export CLI utilities
pub use config_locator::{ConfigLocator, ConfigSource, CONFIG_ENV};
