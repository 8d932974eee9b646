// src/registry/descriptor.rs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Group whose members satisfy the default `user` rule.
pub const DEFAULT_GROUP: &str = "admin";

/// Identifier of an allow-listed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandId {
    Ls,
    LsAuthorized,
    Uninstall,
}

impl CommandId {
    pub const ALL: [CommandId; 3] = [CommandId::Ls, CommandId::LsAuthorized, CommandId::Uninstall];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandId::Ls => "ls",
            CommandId::LsAuthorized => "ls-authorized",
            CommandId::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommandId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CommandId::ALL
            .into_iter()
            .find(|id| id.as_str() == s.trim())
            .ok_or_else(|| {
                format!("unknown command '{s}' (expected ls, ls-authorized or uninstall)")
            })
    }
}

/// Rule class of a named right, as understood by the credential authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleClass {
    /// Always granted.
    Allow,
    /// Never granted.
    Deny,
    /// Granted to root or members of the rule's group.
    User,
}

/// Authorization policy attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub requires_authorization: bool,
    pub class: RuleClass,
    pub group: &'static str,
    /// How long a grant may be reused for the same token. `0` means every
    /// request is evaluated from scratch.
    pub timeout_secs: u64,
    pub version: u32,
    pub description: &'static str,
}

/// One position in an argument template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSlot {
    /// Passed through unchanged.
    Literal(&'static str),
    /// Filled from the caller's arguments, in order, after matching `pattern`.
    Caller {
        name: &'static str,
        pattern: &'static str,
    },
}

/// What the worker does for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandAction {
    Spawn {
        executable: &'static str,
        args: &'static [ArgSlot],
    },
    /// Remove the installed worker; only reachable through `run_uninstall`.
    Uninstall,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("command '{command}' takes {expected} argument(s), got {got}")]
    WrongArity {
        command: CommandId,
        expected: usize,
        got: usize,
    },

    #[error("argument '{slot}' of command '{command}' rejected: {value:?}")]
    Rejected {
        command: CommandId,
        slot: &'static str,
        value: String,
    },

    #[error("command '{0}' cannot be run as a process")]
    NotSpawnable(CommandId),
}

/// Immutable description of one allow-listed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub id: CommandId,
    pub action: CommandAction,
    pub policy: Policy,
}

impl CommandDescriptor {
    /// Name of the authorization right guarding this command.
    pub fn right_name(&self, service_name: &str) -> String {
        format!("{}.{}", service_name, self.id)
    }

    /// Fixed executable, or an error for non-process commands.
    pub fn executable(&self) -> Result<&'static str, ArgumentError> {
        match self.action {
            CommandAction::Spawn { executable, .. } => Ok(executable),
            CommandAction::Uninstall => Err(ArgumentError::NotSpawnable(self.id)),
        }
    }

    /// Number of caller-supplied arguments the template expects.
    pub fn caller_arity(&self) -> usize {
        match self.action {
            CommandAction::Spawn { args, .. } => args
                .iter()
                .filter(|slot| matches!(slot, ArgSlot::Caller { .. }))
                .count(),
            CommandAction::Uninstall => 0,
        }
    }

    /// Build the literal argument vector from the template and the caller's
    /// values. Caller strings only ever become arguments, never the program.
    pub fn expand_args(&self, caller: &[String]) -> Result<Vec<String>, ArgumentError> {
        let CommandAction::Spawn { args, .. } = self.action else {
            return Err(ArgumentError::NotSpawnable(self.id));
        };

        let expected = self.caller_arity();
        if caller.len() != expected {
            return Err(ArgumentError::WrongArity {
                command: self.id,
                expected,
                got: caller.len(),
            });
        }

        let mut values = caller.iter();
        let mut out = Vec::with_capacity(args.len());
        for slot in args {
            match *slot {
                ArgSlot::Literal(lit) => out.push(lit.to_string()),
                ArgSlot::Caller { name, pattern } => {
                    let value = values.next().ok_or(ArgumentError::WrongArity {
                        command: self.id,
                        expected,
                        got: caller.len(),
                    })?;
                    if !slot_matches(pattern, value) {
                        return Err(ArgumentError::Rejected {
                            command: self.id,
                            slot: name,
                            value: value.clone(),
                        });
                    }
                    out.push(value.clone());
                }
            }
        }
        Ok(out)
    }
}

/// Compiled slot patterns, keyed by their source text.
static PATTERNS: OnceLock<Mutex<HashMap<&'static str, Option<Regex>>>> = OnceLock::new();

fn slot_matches(pattern: &'static str, value: &str) -> bool {
    let cache = PATTERNS.get_or_init(|| Mutex::new(HashMap::new()));
    let Ok(mut cache) = cache.lock() else {
        return false;
    };
    // A broken pattern in the static table rejects everything.
    cache
        .entry(pattern)
        .or_insert_with(|| Regex::new(pattern).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(value))
}
