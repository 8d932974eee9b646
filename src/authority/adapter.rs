// src/authority/adapter.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::authority::{
    AuthorityError, AuthorizationToken, CredentialAuthority, Prompter, RightRule, Subject,
    TokenIssuer,
};
use crate::errors::{HelperError, Result};
use crate::registry::{self, CommandId};

/// Glue between the command registry and the external credential authority.
///
/// Both sides use it. The client controller obtains (or reuses) tokens and
/// registers rights, confirming with the user first when it has a
/// [`Prompter`]. The worker session mints tokens for its peers and verifies
/// them per command; it never has a prompter.
#[derive(Clone)]
pub struct AuthorityAdapter {
    authority: Arc<dyn CredentialAuthority>,
    service_name: String,
    prompter: Option<Arc<dyn Prompter>>,
}

impl AuthorityAdapter {
    pub fn new(authority: Arc<dyn CredentialAuthority>, service_name: impl Into<String>) -> Self {
        Self {
            authority,
            service_name: service_name.into(),
            prompter: None,
        }
    }

    /// Confirm with `prompter` before requesting a token or registering rights.
    pub fn with_prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = Some(prompter);
        self
    }

    /// Name of the right guarding `command`.
    pub fn right_name(&self, command: CommandId) -> String {
        registry::lookup(command).right_name(&self.service_name)
    }

    /// Reuse `cached` when present, otherwise confirm with the user and ask
    /// `issuer` for a fresh empty token.
    ///
    /// A refusal at the prompt is [`HelperError::AuthorizationDenied`]; a
    /// prompt that gets no answer is [`AuthorityError::Canceled`].
    pub async fn mint_empty_or_cached(
        &self,
        cached: Option<AuthorizationToken>,
        issuer: &dyn TokenIssuer,
    ) -> Result<AuthorizationToken> {
        if let Some(token) = cached {
            debug!("reusing cached authorization token");
            return Ok(token);
        }

        let message = format!("Allow {} to run privileged commands?", self.service_name);
        if !self.confirm(message).await? {
            info!("authorization refused at prompt");
            return Err(HelperError::AuthorizationDenied);
        }

        debug!("requesting empty authorization token");
        issuer.issue_token().await
    }

    /// Mint a token bound to `subject`. Worker side.
    pub async fn issue_token(
        &self,
        subject: &Subject,
    ) -> std::result::Result<AuthorizationToken, AuthorityError> {
        let authority = Arc::clone(&self.authority);
        let subject = *subject;
        tokio::task::spawn_blocking(move || authority.create_empty_token(&subject))
            .await
            .map_err(|e| AuthorityError::Internal(format!("token task failed: {e}")))?
    }

    /// Check whether `token` lets `subject` run `command`.
    ///
    /// Commands whose policy does not require authorization always pass.
    /// A missing token for a command that does require it is a denial, not
    /// an error. Evaluation may block on database IO, so it runs on the
    /// blocking pool.
    pub async fn verify(
        &self,
        token: Option<&AuthorizationToken>,
        command: CommandId,
        subject: &Subject,
    ) -> std::result::Result<bool, AuthorityError> {
        let descriptor = registry::lookup(command);
        if !descriptor.policy.requires_authorization {
            return Ok(true);
        }

        let Some(token) = token.cloned() else {
            debug!(%command, "no token supplied for authorized command");
            return Ok(false);
        };

        let authority = Arc::clone(&self.authority);
        let right = self.right_name(command);
        let default_rule = RightRule::from(&descriptor.policy);
        let subject = *subject;

        let decision = tokio::task::spawn_blocking(move || {
            authority.copy_right(&token, &right, &default_rule, &subject)
        })
        .await
        .map_err(|e| AuthorityError::Internal(format!("authorization task failed: {e}")))??;

        debug!(%command, ?decision, uid = subject.uid, "authorization evaluated");
        Ok(decision.is_granted())
    }

    /// Register every authorized command's policy as a named right, skipping
    /// rights that are already present. Returns how many were written.
    ///
    /// With a prompter, the user confirms once before anything is written.
    pub fn ensure_rights_registered(&self) -> std::result::Result<usize, AuthorityError> {
        let mut missing = Vec::new();
        for descriptor in registry::authorized() {
            let name = descriptor.right_name(&self.service_name);
            if self.authority.right_get(&name)?.is_none() {
                missing.push((name, descriptor));
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        if let Some(prompter) = &self.prompter {
            let message = format!("Register {} authorization right(s)?", missing.len());
            if !prompter.confirm(&message)? {
                return Err(AuthorityError::Canceled);
            }
        }

        for (name, descriptor) in &missing {
            let rule = RightRule::from(&descriptor.policy);
            if let Err(err) = self
                .authority
                .right_set(name, &rule, descriptor.policy.description)
            {
                warn!(right = %name, error = %err, "failed to register authorization right");
                return Err(err);
            }
            info!(right = %name, "authorization right registered");
        }
        Ok(missing.len())
    }

    async fn confirm(&self, message: String) -> std::result::Result<bool, AuthorityError> {
        let Some(prompter) = self.prompter.clone() else {
            return Ok(true);
        };
        tokio::task::spawn_blocking(move || prompter.confirm(&message))
            .await
            .map_err(|e| AuthorityError::Internal(format!("prompt task failed: {e}")))?
    }
}
