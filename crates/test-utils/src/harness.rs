use std::path::PathBuf;
use std::sync::Arc;

use privhelper::authority::{AuthorityAdapter, CredentialAuthority, Prompter};
use privhelper::client::{ClientController, InstallService, LogSink};
use privhelper::config::ConfigFile;
use privhelper::exec::ExecutorBackend;
use privhelper::identity::IdentityVerifier;
use privhelper::types::HelperVersion;
use privhelper::worker::{ListenerHandle, WorkerContext, WorkerListener};
use tokio::task::JoinHandle;

/// A worker listener running on a background task.
pub struct WorkerHarness {
    pub handle: ListenerHandle,
    pub socket_path: PathBuf,
    pub join: JoinHandle<privhelper::errors::Result<()>>,
}

/// Bind and run a worker for `config` with the given collaborators.
pub fn start_worker(
    config: &ConfigFile,
    authority: Arc<dyn CredentialAuthority>,
    backend: Arc<dyn ExecutorBackend>,
    verifier: Arc<dyn IdentityVerifier>,
) -> privhelper::errors::Result<WorkerHarness> {
    let ctx = WorkerContext {
        authority: AuthorityAdapter::new(authority, config.helper.service_name.clone()),
        backend,
        install: config.install.clone(),
        version: HelperVersion::bundled(),
    };
    let listener = WorkerListener::bind(
        &config.helper.socket_path,
        config.helper.poll_interval(),
        ctx,
        verifier,
    )?;
    let handle = listener.handle();
    let socket_path = listener.socket_path().to_path_buf();
    let join = tokio::spawn(listener.run());
    Ok(WorkerHarness {
        handle,
        socket_path,
        join,
    })
}

/// Client controller for `config` sharing `authority` with the worker.
pub fn controller(
    config: &ConfigFile,
    authority: Arc<dyn CredentialAuthority>,
    installer: Arc<dyn InstallService>,
    sink: Arc<dyn LogSink>,
) -> privhelper::errors::Result<ClientController> {
    let adapter = AuthorityAdapter::new(authority, config.helper.service_name.clone());
    ClientController::new(config, adapter, installer, sink)
}

/// Like [`controller`], confirming through `prompter` before tokens are
/// requested and rights registered.
pub fn prompting_controller(
    config: &ConfigFile,
    authority: Arc<dyn CredentialAuthority>,
    installer: Arc<dyn InstallService>,
    sink: Arc<dyn LogSink>,
    prompter: Arc<dyn Prompter>,
) -> privhelper::errors::Result<ClientController> {
    let adapter = AuthorityAdapter::new(authority, config.helper.service_name.clone())
        .with_prompter(prompter);
    ClientController::new(config, adapter, installer, sink)
}
