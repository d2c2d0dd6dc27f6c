//! Configuration types for the kiln dependency optimizer.
//!
//! The optimizer is configured once per dev session. All fields have serde
//! defaults so a partial config file deserializes into something usable;
//! `OptimizerConfig::validate` catches the combinations that cannot work.

pub mod error;
pub mod optimizer;
pub mod validation;

pub use error::ConfigError;
pub use optimizer::{ManualDep, OptimizerConfig};
pub use validation::validate;
