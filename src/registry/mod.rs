// src/registry/mod.rs

//! Command registry: the closed allow-list of operations the worker will
//! perform on a caller's behalf.
//!
//! Every entry pairs a [`CommandId`] with a fixed executable, an argument
//! template and an authorization [`Policy`]. Nothing here is derived from
//! caller input except the values of explicit caller slots, and those are
//! validated before they are substituted.

pub mod descriptor;

pub use descriptor::{
    ArgSlot, ArgumentError, CommandAction, CommandDescriptor, CommandId, Policy, RuleClass,
};

use descriptor::DEFAULT_GROUP;

/// Caller-supplied path for `ls`: non-empty, no NUL, and not an option.
const PATH_ARG: &str = r"^[^\-\x00][^\x00]*$";

static COMMANDS: [CommandDescriptor; 3] = [
    CommandDescriptor {
        id: CommandId::Ls,
        action: CommandAction::Spawn {
            executable: "/bin/ls",
            args: &[ArgSlot::Caller {
                name: "path",
                pattern: PATH_ARG,
            }],
        },
        policy: Policy {
            requires_authorization: false,
            class: RuleClass::User,
            group: DEFAULT_GROUP,
            timeout_secs: 0,
            version: 1,
            description: "List a directory without elevated authorization.",
        },
    },
    CommandDescriptor {
        id: CommandId::LsAuthorized,
        action: CommandAction::Spawn {
            executable: "/bin/ls",
            args: &[ArgSlot::Caller {
                name: "path",
                pattern: PATH_ARG,
            }],
        },
        policy: Policy {
            requires_authorization: true,
            class: RuleClass::User,
            group: DEFAULT_GROUP,
            timeout_secs: 0,
            version: 1,
            description: "List a directory as the privileged worker.",
        },
    },
    CommandDescriptor {
        id: CommandId::Uninstall,
        action: CommandAction::Uninstall,
        policy: Policy {
            requires_authorization: true,
            class: RuleClass::User,
            group: DEFAULT_GROUP,
            timeout_secs: 0,
            version: 1,
            description: "Remove the privileged worker from this machine.",
        },
    },
];

/// Look up the descriptor for a command. The table is total over
/// [`CommandId`], so this never fails.
pub fn lookup(id: CommandId) -> &'static CommandDescriptor {
    match id {
        CommandId::Ls => &COMMANDS[0],
        CommandId::LsAuthorized => &COMMANDS[1],
        CommandId::Uninstall => &COMMANDS[2],
    }
}

/// All registered descriptors, in table order.
pub fn all() -> &'static [CommandDescriptor] {
    &COMMANDS
}

/// Descriptors whose policy must be registered as a named right.
pub fn authorized() -> impl Iterator<Item = &'static CommandDescriptor> {
    COMMANDS.iter().filter(|d| d.policy.requires_authorization)
}
