// src/lib.rs

pub mod authority;
pub mod cli;
pub mod client;
pub mod config;
pub mod errors;
pub mod exec;
pub mod identity;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod types;
pub mod worker;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::authority::{load_or_create_key, AuthorityAdapter, LocalAuthority, TerminalPrompter};
use crate::cli::{CliArgs, Command};
use crate::client::{token_file, ClientController, FileInstallService, StdioSink};
use crate::config::{load_or_default, ConfigFile};
use crate::errors::HelperError;
use crate::exec::RealExecutorBackend;
use crate::identity::CodeIdentityVerifier;
use crate::types::HelperVersion;
use crate::worker::{ListenerHandle, WorkerContext, WorkerListener};

/// Exit code for a request the credential authority denied.
pub const EXIT_DENIED: i32 = 77;

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let cfg = load_or_default(args.config.as_deref())?;

    match args.command {
        Command::Worker => run_worker(&cfg).await,
        command => run_client(&cfg, command).await,
    }
}

/// Client-side adapter: registers rights and, when `[authority].interactive`
/// is set, confirms on the terminal before asking the worker for a token.
pub fn build_client_adapter(cfg: &ConfigFile) -> AuthorityAdapter {
    let authority = LocalAuthority::new(&cfg.authority.rights_path);
    let adapter = AuthorityAdapter::new(Arc::new(authority), cfg.helper.service_name.clone());
    if cfg.authority.interactive {
        adapter.with_prompter(Arc::new(TerminalPrompter))
    } else {
        adapter
    }
}

/// Worker-side adapter: mints and verifies tokens with the key at
/// `[authority].key_path`. It never prompts.
pub fn build_worker_adapter(cfg: &ConfigFile) -> Result<AuthorityAdapter> {
    let key = load_or_create_key(&cfg.authority.key_path)?;
    let authority = LocalAuthority::new(&cfg.authority.rights_path).with_key(key);
    Ok(AuthorityAdapter::new(
        Arc::new(authority),
        cfg.helper.service_name.clone(),
    ))
}

/// Privileged side: serve connections until the shutdown flag is set.
async fn run_worker(cfg: &ConfigFile) -> Result<i32> {
    let verifier = CodeIdentityVerifier::for_current_exe(&cfg.identity.trusted_digests)
        .context("computing worker executable digest")?;

    let ctx = WorkerContext {
        authority: build_worker_adapter(cfg).context("loading authority key")?,
        backend: Arc::new(RealExecutorBackend::new()),
        install: cfg.install.clone(),
        version: HelperVersion::bundled(),
    };

    let listener = WorkerListener::bind(
        &cfg.helper.socket_path,
        cfg.helper.poll_interval(),
        ctx,
        Arc::new(verifier),
    )
    .context("starting worker listener")?;

    spawn_signal_handler(listener.handle());
    listener.run().await?;
    Ok(0)
}

/// Ctrl-C / SIGTERM → shutdown flag.
fn spawn_signal_handler(handle: ListenerHandle) {
    tokio::spawn(async move {
        let mut term =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(term) => term,
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        handle.request_shutdown();
                    }
                    return;
                }
            };

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
            }
            _ = term.recv() => {}
        }
        info!("signal received");
        handle.request_shutdown();
    });
}

async fn run_client(cfg: &ConfigFile, command: Command) -> Result<i32> {
    let adapter = build_client_adapter(cfg);

    if let Command::RegisterRights = command {
        let written = adapter
            .ensure_rights_registered()
            .context("registering authorization rights")?;
        println!("{written} right(s) registered");
        return Ok(0);
    }

    let installer = FileInstallService::from_config(cfg)?;
    let controller = ClientController::new(cfg, adapter, Arc::new(installer), Arc::new(StdioSink))
        .context("initialising client controller")?;

    let outcome = dispatch(&controller, command).await;
    match outcome {
        Ok(code) => Ok(code),
        Err(HelperError::AuthorizationDenied) => {
            eprintln!("privhelper: authorization denied");
            Ok(EXIT_DENIED)
        }
        Err(err) => Err(err.into()),
    }
}

async fn dispatch(controller: &ClientController, command: Command) -> errors::Result<i32> {
    match command {
        Command::Status => {
            let state = controller.install_state()?;
            println!("worker: {state} (bundled {})", controller.bundled_version());
            Ok(if state.is_current() { 0 } else { 1 })
        }
        Command::Version => {
            let version = controller.remote_version().await?;
            println!("{version}");
            Ok(0)
        }
        Command::Install => {
            if controller.install().await? {
                println!("worker installed ({})", controller.bundled_version());
                Ok(0)
            } else {
                eprintln!("privhelper: install was declined");
                Ok(1)
            }
        }
        Command::Uninstall { token_file } => {
            let cached = load_token(token_file.as_deref())?;
            controller.uninstall(cached).await?;
            println!("worker uninstalled");
            Ok(0)
        }
        Command::Run {
            command,
            args,
            token_file,
        } => {
            let cached = load_token(token_file.as_deref())?;
            controller.run_command(command, args, cached).await
        }
        Command::Authorize { token_file } => {
            let token = controller.authorize().await?;
            token_file::store(&token_file, &token)?;
            println!("token stored in {}", token_file.display());
            Ok(0)
        }
        Command::Forget { token_file } => {
            if token_file::forget(&token_file)? {
                println!("token discarded");
            } else {
                println!("no stored token");
            }
            Ok(0)
        }
        Command::Worker | Command::RegisterRights => Err(HelperError::Config(
            "subcommand is not a client operation".to_string(),
        )),
    }
}

fn load_token(path: Option<&Path>) -> errors::Result<Option<authority::AuthorizationToken>> {
    match path {
        Some(path) => token_file::load(path),
        None => Ok(None),
    }
}
