// src/client/controller.rs

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::authority::{AuthorityAdapter, AuthorizationToken};
use crate::config::ConfigFile;
use crate::errors::{HelperError, Result};
use crate::registry::{self, CommandId};
use crate::types::{HelperInstallState, HelperVersion, AUTHORIZATION_FAILED_EXIT_CODE};

use super::connection::HelperConnection;
use super::install::InstallService;
use super::sink::LogSink;

/// Caller-side entry point to the privileged worker.
///
/// The controller holds at most one live [`HelperConnection`]. It is created
/// on first use and replaced whenever it has been invalidated (worker exit,
/// install, uninstall). Tokens are never cached here; callers that want to
/// reuse one pass it back in.
pub struct ClientController {
    service_name: String,
    socket_path: PathBuf,
    bundled: HelperVersion,
    adapter: AuthorityAdapter,
    installer: Arc<dyn InstallService>,
    sink: Arc<dyn LogSink>,
    connection: Mutex<Option<Arc<HelperConnection>>>,
}

impl ClientController {
    /// Build a controller and make sure every authorized command has its
    /// right registered with the credential authority.
    pub fn new(
        config: &ConfigFile,
        adapter: AuthorityAdapter,
        installer: Arc<dyn InstallService>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        let registered = adapter.ensure_rights_registered()?;
        debug!(registered, "authorization rights checked");

        Ok(Self {
            service_name: config.helper.service_name.clone(),
            socket_path: config.helper.socket_path.clone(),
            bundled: HelperVersion::bundled(),
            adapter,
            installer,
            sink,
            connection: Mutex::new(None),
        })
    }

    /// Compare against `version` instead of the version built into this
    /// binary.
    pub fn with_bundled_version(mut self, version: HelperVersion) -> Self {
        self.bundled = version;
        self
    }

    pub fn bundled_version(&self) -> &HelperVersion {
        &self.bundled
    }

    pub fn install_state(&self) -> Result<HelperInstallState> {
        self.installer.install_state(&self.bundled)
    }

    /// `true` only when the installed worker matches the bundled version.
    pub fn helper_status(&self) -> Result<bool> {
        Ok(self.install_state()?.is_current())
    }

    /// Version reported by the running worker.
    pub async fn remote_version(&self) -> Result<HelperVersion> {
        let connection = self.connection().await?;
        let result = connection.get_version().await;
        self.forget_if_broken(&connection, &result).await;
        result
    }

    /// Install (or reinstall) the bundled worker.
    pub async fn install(&self) -> Result<bool> {
        let installed = self.installer.install(&self.service_name)?;
        self.invalidate().await;
        if installed {
            info!(service = %self.service_name, version = %self.bundled, "worker installed");
        } else {
            warn!(service = %self.service_name, "install service declined");
        }
        Ok(installed)
    }

    /// Ask the worker to uninstall itself.
    ///
    /// An absent worker is reported as [`HelperError::NotInstalled`]. The
    /// current connection is dropped afterwards whatever the outcome.
    pub async fn uninstall(&self, cached: Option<AuthorizationToken>) -> Result<()> {
        if self.install_state()? == HelperInstallState::Absent {
            return Err(HelperError::NotInstalled);
        }

        let result = self
            .with_authorized_helper(cached, |connection, token| async move {
                connection.run_uninstall(token).await
            })
            .await;
        self.invalidate().await;

        match result? {
            0 => {
                info!("worker uninstalled");
                Ok(())
            }
            AUTHORIZATION_FAILED_EXIT_CODE => Err(HelperError::AuthorizationDenied),
            code => Err(HelperError::Install(format!(
                "worker could not remove its files (exit code {code})"
            ))),
        }
    }

    /// Obtain a token from the worker (reusing `cached` when given) and run
    /// `block` with the live connection and that token.
    pub async fn with_authorized_helper<F, Fut, T>(
        &self,
        cached: Option<AuthorizationToken>,
        block: F,
    ) -> Result<T>
    where
        F: FnOnce(Arc<HelperConnection>, AuthorizationToken) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let connection = self.connection().await?;
        let token = self
            .adapter
            .mint_empty_or_cached(cached, connection.as_ref())
            .await;
        self.forget_if_broken(&connection, &token).await;
        let result = block(Arc::clone(&connection), token?).await;
        self.forget_if_broken(&connection, &result).await;
        result
    }

    /// Run `command`, authorizing first when its policy requires it.
    ///
    /// The authorization-failed sentinel becomes
    /// [`HelperError::AuthorizationDenied`]; any other code is returned as is.
    pub async fn run_command(
        &self,
        command: CommandId,
        args: Vec<String>,
        cached: Option<AuthorizationToken>,
    ) -> Result<i32> {
        let code = if registry::lookup(command).policy.requires_authorization {
            self.with_authorized_helper(cached, |connection, token| async move {
                connection.run_command(command, args, Some(token)).await
            })
            .await?
        } else {
            let connection = self.connection().await?;
            let result = connection.run_command(command, args, None).await;
            self.forget_if_broken(&connection, &result).await;
            result?
        };

        if code == AUTHORIZATION_FAILED_EXIT_CODE {
            return Err(HelperError::AuthorizationDenied);
        }
        Ok(code)
    }

    /// Obtain a fresh token from the worker for the caller to keep and
    /// replay. The user is asked to confirm when a prompter is configured.
    pub async fn authorize(&self) -> Result<AuthorizationToken> {
        let connection = self.connection().await?;
        let token = self
            .adapter
            .mint_empty_or_cached(None, connection.as_ref())
            .await;
        self.forget_if_broken(&connection, &token).await;
        token
    }

    /// The live connection, connecting if there is none or the last one died.
    async fn connection(&self) -> Result<Arc<HelperConnection>> {
        let mut slot = self.connection.lock().await;
        if let Some(existing) = slot.as_ref() {
            if existing.is_valid() {
                return Ok(Arc::clone(existing));
            }
            debug!("discarding invalidated worker connection");
        }

        let fresh =
            Arc::new(HelperConnection::connect(&self.socket_path, Arc::clone(&self.sink)).await?);
        *slot = Some(Arc::clone(&fresh));
        Ok(fresh)
    }

    /// Drop the current connection; the next call reconnects.
    pub async fn invalidate(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("worker connection invalidated");
        }
    }

    async fn forget_if_broken<T>(&self, connection: &Arc<HelperConnection>, result: &Result<T>) {
        if matches!(result, Err(HelperError::Connection(_))) || !connection.is_valid() {
            let mut slot = self.connection.lock().await;
            if slot
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, connection))
            {
                *slot = None;
            }
        }
    }
}
