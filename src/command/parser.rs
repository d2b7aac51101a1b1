//! Parsing of chat lines into command invocations

use crate::command::CommandKind;
use crate::types::{Platform, PlayerIdentity};

/// Prefix marking a chat line as a command
pub const COMMAND_PREFIX: char = '!';

/// A command issued by a chat user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub caller: PlayerIdentity,
    /// Channel operator (IRC) or moderator (Discord/Matrix)
    pub is_admin: bool,
    /// Lower-cased command name without the prefix
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Parse a chat line; `None` if it is not a command
    pub fn parse(caller: PlayerIdentity, is_admin: bool, line: &str) -> Option<Self> {
        let (name, args) = parse_command_line(line)?;
        Some(Self {
            caller,
            is_admin,
            name,
            args,
        })
    }

    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::lookup(&self.name)
    }
}

/// Split `!name arg arg` into its name and arguments
pub fn parse_command_line(line: &str) -> Option<(String, Vec<String>)> {
    let rest = line.trim().strip_prefix(COMMAND_PREFIX)?;
    let mut words = rest.split_whitespace();
    let name = words.next()?.to_lowercase();
    Some((name, words.map(str::to_string).collect()))
}

/// Parse a player argument of an admin command.
///
/// `discord:alice` names a player on another platform; a bare handle is
/// taken to be on `default_platform`.
pub fn parse_player(arg: &str, default_platform: Platform) -> PlayerIdentity {
    if let Some((prefix, handle)) = arg.split_once(':') {
        if let Ok(platform) = prefix.parse::<Platform>() {
            if !handle.is_empty() {
                return PlayerIdentity::new(platform, handle);
            }
        }
    }
    PlayerIdentity::new(default_platform, arg)
}
