// src/authority/prompt.rs

use std::io::{self, BufRead, Write};

use crate::authority::AuthorityError;

/// Interactive confirmation asked by the client before it requests a token.
pub trait Prompter: Send + Sync {
    /// Ask the user to confirm `message`. `Ok(false)` is a refusal;
    /// [`AuthorityError::Canceled`] means no answer could be obtained.
    fn confirm(&self, message: &str) -> Result<bool, AuthorityError>;
}

/// Asks on the controlling terminal (stderr for the question, stdin for the
/// answer).
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, message: &str) -> Result<bool, AuthorityError> {
        let mut stderr = io::stderr();
        write!(stderr, "{message} [y/N] ")
            .and_then(|_| stderr.flush())
            .map_err(|e| AuthorityError::Internal(format!("writing prompt: {e}")))?;

        let mut answer = String::new();
        let read = io::stdin()
            .lock()
            .read_line(&mut answer)
            .map_err(|e| AuthorityError::Internal(format!("reading answer: {e}")))?;
        if read == 0 {
            return Err(AuthorityError::Canceled);
        }

        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}
