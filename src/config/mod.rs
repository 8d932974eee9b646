// src/config/mod.rs

//! Configuration loading and validation for privhelper.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate paths, names and digests before anything binds or installs
//!   (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{AuthoritySection, ConfigFile, HelperSection, IdentitySection, InstallSection};
pub use validate::validate_config;
