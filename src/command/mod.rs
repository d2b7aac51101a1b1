//! Chat command layer
//!
//! Chat lines starting with `!` are parsed into an [`Invocation`], looked up
//! in [`COMMAND_TABLE`] and handled by the [`CommandDispatcher`], which
//! turns `PickupManager` results into [`Reply`] values for the connectors.

pub mod handlers;
pub mod parser;

pub use handlers::{deliver, CommandDispatcher};
pub use parser::{parse_command_line, parse_player, Invocation};

use crate::announce::text::PlatformText;
use crate::types::PlayerIdentity;

/// Every command the bot understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Add,
    Remove,
    Renew,
    Who,
    Pickups,
    Push,
    Pull,
    Start,
    Subscribe,
    Unsubscribe,
    Promote,
    AddGametype,
    RemoveGametype,
    Help,
}

/// Static description of one command
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub kind: CommandKind,
    pub name: &'static str,
    pub usage: &'static str,
    pub admin_only: bool,
}

/// Lookup table from command name to handler kind
pub static COMMAND_TABLE: &[CommandSpec] = &[
    CommandSpec {
        kind: CommandKind::Add,
        name: "add",
        usage: "!add <gametype> [gametype ...] - join pickup queues",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Remove,
        name: "remove",
        usage: "!remove [gametype ...] - leave some or all pickup queues",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Renew,
        name: "renew",
        usage: "!renew [gametype ...] - reset the expiry timer of your added games",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Who,
        name: "who",
        usage: "!who - list active pickups and their players",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Pickups,
        name: "pickups",
        usage: "!pickups - list possible gametypes",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Push,
        name: "push",
        usage: "!push <player> <gametype> [gametype ...] - add a player to pickup queues",
        admin_only: true,
    },
    CommandSpec {
        kind: CommandKind::Pull,
        name: "pull",
        usage: "!pull <player> [player ...] - remove players from every pickup queue",
        admin_only: true,
    },
    CommandSpec {
        kind: CommandKind::Start,
        name: "start",
        usage: "!start <gametype> - start a pickup with the players added so far",
        admin_only: true,
    },
    CommandSpec {
        kind: CommandKind::Subscribe,
        name: "subscribe",
        usage: "!subscribe [gametype ...] - get notified when a pickup is promoted",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Unsubscribe,
        name: "unsubscribe",
        usage: "!unsubscribe [gametype ...] - drop some or all subscriptions",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::Promote,
        name: "promote",
        usage: "!promote <gametype> [gametype ...] - invite subscribed players",
        admin_only: false,
    },
    CommandSpec {
        kind: CommandKind::AddGametype,
        name: "addgametype",
        usage: "!addgametype <title> <playercount> [teamcount] [statsname] - e.g. !addgametype 2v2v2ca 6 3 ca",
        admin_only: true,
    },
    CommandSpec {
        kind: CommandKind::RemoveGametype,
        name: "removegametype",
        usage: "!removegametype <title> [title ...] - delete gametypes",
        admin_only: true,
    },
    CommandSpec {
        kind: CommandKind::Help,
        name: "help",
        usage: "!help [command] - list commands or describe one",
        admin_only: false,
    },
];

impl CommandKind {
    /// Resolve a command name (case-insensitive, without the `!`)
    pub fn lookup(name: &str) -> Option<CommandKind> {
        Self::spec_by_name(name).map(|spec| spec.kind)
    }

    pub fn spec_by_name(name: &str) -> Option<&'static CommandSpec> {
        let name = name.trim_start_matches('!');
        COMMAND_TABLE
            .iter()
            .find(|spec| spec.name.eq_ignore_ascii_case(name))
    }

    /// Table entries are declared in variant order
    pub fn spec(self) -> &'static CommandSpec {
        &COMMAND_TABLE[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn is_admin_only(self) -> bool {
        self.spec().admin_only
    }
}

/// Message produced by a command handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Private notice to one player
    Notice { to: PlayerIdentity, text: String },
    /// Message to every bridged channel, rendered per platform
    Broadcast(PlatformText),
    /// Updated pickup text for the channel topic
    Topic(String),
}

impl Reply {
    pub fn notice(to: &PlayerIdentity, text: impl Into<String>) -> Self {
        Reply::Notice {
            to: to.clone(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_has_one_table_entry() {
        let kinds = [
            CommandKind::Add,
            CommandKind::Remove,
            CommandKind::Renew,
            CommandKind::Who,
            CommandKind::Pickups,
            CommandKind::Push,
            CommandKind::Pull,
            CommandKind::Start,
            CommandKind::Subscribe,
            CommandKind::Unsubscribe,
            CommandKind::Promote,
            CommandKind::AddGametype,
            CommandKind::RemoveGametype,
            CommandKind::Help,
        ];
        assert_eq!(kinds.len(), COMMAND_TABLE.len());
        for kind in kinds {
            assert_eq!(CommandKind::lookup(kind.name()), Some(kind));
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(CommandKind::lookup("ADD"), Some(CommandKind::Add));
        assert_eq!(CommandKind::lookup("!who"), Some(CommandKind::Who));
        assert_eq!(CommandKind::lookup("kill"), None);
    }

    #[test]
    fn test_admin_only_commands() {
        let admin: Vec<_> = COMMAND_TABLE
            .iter()
            .filter(|spec| spec.admin_only)
            .map(|spec| spec.name)
            .collect();
        assert_eq!(
            admin,
            vec!["push", "pull", "start", "addgametype", "removegametype"]
        );
    }
}
