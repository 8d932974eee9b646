// src/client/mod.rs

//! Unprivileged side: the controller a UI (here, the CLI) drives.
//!
//! - [`controller`] owns the connection to the worker and exposes install,
//!   uninstall, version and command operations.
//! - [`connection`] is one live socket to the worker with reply routing.
//! - [`install`] is the privileged installation service.
//! - [`sink`] receives worker output.
//! - [`token_file`] stores a caller-held token between invocations.

pub mod connection;
pub mod controller;
pub mod install;
pub mod sink;
pub mod token_file;

pub use connection::HelperConnection;
pub use controller::ClientController;
pub use install::{read_descriptor, FileInstallService, InstallService, InstalledDescriptor};
pub use sink::{LogSink, StdioSink};
