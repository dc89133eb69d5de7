//! Shared types, error model, and configuration for the identity reconciler.
//!
//! This crate is the foundation depended on by all other identity crates.
//! It provides:
//! - [`IdentityError`], the unified error type
//! - Domain types ([`Contact`], [`ContactId`], [`LinkPrecedence`], [`ContactResult`])
//! - Configuration ([`AppConfig`], [`ReconcileOptions`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DatabaseConfig, ReconcileConfig, ReconcileOptions, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from,
};
pub use error::{IdentityError, Result};
pub use types::{
    Contact, ContactId, ContactResult, IdentifyRequest, IdentifyResponse, LinkPrecedence,
    NewContact, TieBreakPolicy,
};
