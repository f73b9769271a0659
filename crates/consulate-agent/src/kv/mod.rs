//! Key/Value Configuration
//!
//! - `bootstrap`: Versioned reconciliation of compile-time defaults
//! - `template`: Read/write helpers keyed relative to the service base key

pub mod bootstrap;
pub mod template;

pub use bootstrap::{read_defaults_file, BootstrapOutcome, ConfigBootstrapper};
pub use template::KvTemplate;
