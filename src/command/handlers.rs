//! Command handlers
//!
//! Each handler calls into the `PickupManager` and phrases the outcome as
//! replies. Nothing is sent from here; `deliver` hands replies to a
//! `ChatPublisher`.

use crate::announce::publisher::ChatPublisher;
use crate::announce::text::{Announcer, PlatformText};
use crate::command::parser::{parse_player, Invocation};
use crate::command::{CommandKind, Reply, COMMAND_TABLE};
use crate::error::{PickupError, Result};
use crate::metrics::MetricsCollector;
use crate::pickup::manager::PickupManager;
use crate::subscription::Presence;
use crate::types::{AddOutcome, Gametype, Match, PlayerIdentity};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const RESTRICTED_TEXT: &str = "Sorry, this command is restricted to operators and moderators.";
const UNKNOWN_COMMAND_TEXT: &str = "Unknown command, type !help for a list of commands.";
const NO_GAME_ADDED_TEXT: &str = "No game added!";

/// Replies of one handler plus whether it achieved what was asked
struct Response {
    replies: Vec<Reply>,
    success: bool,
}

impl Response {
    fn ok(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            success: true,
        }
    }

    fn failed(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            success: false,
        }
    }
}

/// Routes invocations to their handlers
pub struct CommandDispatcher {
    manager: Arc<PickupManager>,
    announcer: Announcer,
    presence: Arc<dyn Presence>,
    metrics: Arc<MetricsCollector>,
}

impl CommandDispatcher {
    pub fn new(
        manager: Arc<PickupManager>,
        announcer: Announcer,
        presence: Arc<dyn Presence>,
    ) -> Self {
        let metrics = manager.metrics();
        Self {
            manager,
            announcer,
            presence,
            metrics,
        }
    }

    pub fn manager(&self) -> &Arc<PickupManager> {
        &self.manager
    }

    /// Parse and handle a chat line; non-command lines yield no replies
    pub fn handle_line(
        &self,
        caller: PlayerIdentity,
        is_admin: bool,
        line: &str,
    ) -> Vec<Reply> {
        match Invocation::parse(caller, is_admin, line) {
            Some(invocation) => self.dispatch(&invocation),
            None => Vec::new(),
        }
    }

    /// Handle one invocation
    pub fn dispatch(&self, invocation: &Invocation) -> Vec<Reply> {
        info!(
            "Command '{}' from '{}' ({}), admin: {}, args: {:?}",
            invocation.name,
            invocation.caller.handle,
            invocation.caller.platform,
            invocation.is_admin,
            invocation.args
        );

        let Some(kind) = invocation.kind() else {
            debug!("Unknown command '{}'", invocation.name);
            self.metrics.record_command("unknown", false);
            return vec![Reply::notice(&invocation.caller, UNKNOWN_COMMAND_TEXT)];
        };

        if kind.is_admin_only() && !invocation.is_admin {
            warn!(
                "'{}' tried restricted command '{}'",
                invocation.caller.handle,
                kind.name()
            );
            self.metrics.record_command(kind.name(), false);
            return vec![Reply::notice(&invocation.caller, RESTRICTED_TEXT)];
        }

        let response = match kind {
            CommandKind::Add => self.add(invocation),
            CommandKind::Remove => self.remove(invocation),
            CommandKind::Renew => self.renew(invocation),
            CommandKind::Who => self.who(invocation),
            CommandKind::Pickups => self.pickups(invocation),
            CommandKind::Push => self.push(invocation),
            CommandKind::Pull => self.pull(invocation),
            CommandKind::Start => self.start(invocation),
            CommandKind::Subscribe => self.subscribe(invocation),
            CommandKind::Unsubscribe => self.unsubscribe(invocation),
            CommandKind::Promote => self.promote(invocation),
            CommandKind::AddGametype => self.add_gametype(invocation),
            CommandKind::RemoveGametype => self.remove_gametype(invocation),
            CommandKind::Help => self.help(invocation),
        };

        self.metrics.record_command(kind.name(), response.success);
        response.replies
    }

    fn add(&self, invocation: &Invocation) -> Response {
        if invocation.args.is_empty() {
            return Response::failed(vec![self.gametype_list(invocation)]);
        }

        let outcome = self
            .manager
            .add_player(&invocation.caller, &invocation.args, None);
        self.add_replies(invocation, outcome)
    }

    fn push(&self, invocation: &Invocation) -> Response {
        let Some((player, gametypes)) = invocation.args.split_first() else {
            return self.usage(invocation, CommandKind::Push);
        };
        if gametypes.is_empty() {
            return self.usage(invocation, CommandKind::Push);
        }

        let player = parse_player(player, invocation.caller.platform);
        let outcome = self.manager.push(&player, gametypes, &invocation.caller);
        self.add_replies(invocation, outcome)
    }

    fn add_replies(&self, invocation: &Invocation, outcome: AddOutcome) -> Response {
        let mut replies = Vec::new();

        if let Some(formed) = &outcome.match_formed {
            replies.push(self.match_reply(formed));
        }
        if outcome.ok {
            replies.push(self.topic_reply());
        }
        replies.extend(self.error_notices(invocation, &outcome.errors));

        Response {
            replies,
            success: outcome.ok,
        }
    }

    fn remove(&self, invocation: &Invocation) -> Response {
        let gametypes = (!invocation.args.is_empty()).then_some(invocation.args.as_slice());
        let removed = self.manager.withdraw_player(&invocation.caller, gametypes);

        if removed == 0 {
            return Response::failed(vec![Reply::notice(
                &invocation.caller,
                NO_GAME_ADDED_TEXT,
            )]);
        }
        Response::ok(vec![self.topic_reply()])
    }

    fn renew(&self, invocation: &Invocation) -> Response {
        let errors = self.manager.renew(&invocation.caller, &invocation.args);
        let success = errors.is_empty();
        Response {
            replies: self.error_notices(invocation, &errors),
            success,
        }
    }

    fn who(&self, invocation: &Invocation) -> Response {
        match self.manager.list_active() {
            Ok(active) if active.is_empty() => Response::ok(vec![Reply::notice(
                &invocation.caller,
                NO_GAME_ADDED_TEXT,
            )]),
            Ok(active) => Response::ok(vec![Reply::notice(
                &invocation.caller,
                self.announcer.who_lines(&active).join(" "),
            )]),
            Err(e) => Response::failed(self.error_notices(invocation, &[e])),
        }
    }

    fn pickups(&self, invocation: &Invocation) -> Response {
        Response::ok(vec![self.gametype_list(invocation)])
    }

    fn pull(&self, invocation: &Invocation) -> Response {
        if invocation.args.is_empty() {
            return self.usage(invocation, CommandKind::Pull);
        }

        let mut not_added = Vec::new();
        for arg in &invocation.args {
            let player = parse_player(arg, invocation.caller.platform);
            if self.manager.pull(&player, &invocation.caller) == 0 {
                not_added.push(arg.as_str());
            }
        }

        let mut replies = Vec::new();
        if !not_added.is_empty() {
            replies.push(Reply::notice(
                &invocation.caller,
                format!(
                    "The following player(s) was/were not added! → {}",
                    not_added.join(", ")
                ),
            ));
        }
        let success = not_added.len() < invocation.args.len();
        if success {
            replies.push(self.topic_reply());
        }
        Response { replies, success }
    }

    fn start(&self, invocation: &Invocation) -> Response {
        let Some(gametype) = invocation.args.first() else {
            return Response::failed(vec![Reply::notice(
                &invocation.caller,
                "You need to include a specific gametype!",
            )]);
        };

        match self.manager.force_start(gametype) {
            Ok(formed) => Response::ok(vec![self.match_reply(&formed), self.topic_reply()]),
            Err(e) => Response::failed(self.error_notices(invocation, &[e])),
        }
    }

    fn subscribe(&self, invocation: &Invocation) -> Response {
        if invocation.args.is_empty() {
            return match self.manager.list_subscriptions(&invocation.caller) {
                Ok(subscriptions) if !subscriptions.is_empty() => Response::ok(vec![
                    Reply::notice(
                        &invocation.caller,
                        format!("You are subscribed to: {}", subscriptions.join(", ")),
                    ),
                ]),
                Ok(_) => Response::ok(vec![self.gametype_list(invocation)]),
                Err(e) => Response::failed(self.error_notices(invocation, &[e])),
            };
        }

        let mut replies = Vec::new();
        let mut subscribed = Vec::new();
        let mut unknown = false;

        for gametype in unique(&invocation.args) {
            match self.manager.subscribe(&invocation.caller, gametype) {
                Ok(true) => subscribed.push(gametype),
                Ok(false) => replies.push(Reply::notice(
                    &invocation.caller,
                    format!("You are already subscribed to {}", gametype),
                )),
                Err(e) => {
                    unknown |= matches!(e, PickupError::UnknownGametype { .. });
                    replies.extend(self.error_notices(invocation, &[e]));
                }
            }
        }

        if !subscribed.is_empty() {
            replies.push(Reply::notice(
                &invocation.caller,
                format!("You are now subscribed to: {}", subscribed.join(", ")),
            ));
        } else if unknown {
            replies.push(self.gametype_list(invocation));
        }

        Response {
            replies,
            success: !subscribed.is_empty(),
        }
    }

    fn unsubscribe(&self, invocation: &Invocation) -> Response {
        let mut replies = Vec::new();

        if invocation.args.is_empty() {
            if let Err(e) = self.manager.unsubscribe(&invocation.caller, None) {
                replies.extend(self.error_notices(invocation, &[e]));
            }
        } else {
            for gametype in unique(&invocation.args) {
                if let Err(e) = self.manager.unsubscribe(&invocation.caller, Some(gametype)) {
                    replies.extend(self.error_notices(invocation, &[e]));
                }
            }
        }

        let text = match self.manager.list_subscriptions(&invocation.caller) {
            Ok(remaining) if !remaining.is_empty() => {
                format!("You are subscribed to: {}", remaining.join(", "))
            }
            Ok(_) => "You are subscribed to nothing!".to_string(),
            Err(e) => e.to_string(),
        };
        replies.push(Reply::notice(&invocation.caller, text));

        let success = replies.len() == 1;
        Response { replies, success }
    }

    fn promote(&self, invocation: &Invocation) -> Response {
        if invocation.args.is_empty() {
            return self.usage(invocation, CommandKind::Promote);
        }

        let mut replies = Vec::new();
        let mut promoted = false;

        for gametype in unique(&invocation.args) {
            match self.manager.promote(gametype, self.presence.as_ref()) {
                Ok(promotion) => {
                    promoted = true;
                    replies.push(Reply::Broadcast(PlatformText::same(
                        promotion.broadcast.clone(),
                    )));
                    for player in &promotion.notify {
                        replies.push(Reply::notice(
                            player,
                            self.announcer
                                .promotion_notice(player, &promotion.broadcast),
                        ));
                    }
                }
                Err(e) => replies.extend(self.error_notices(invocation, &[e])),
            }
        }

        Response {
            replies,
            success: promoted,
        }
    }

    fn add_gametype(&self, invocation: &Invocation) -> Response {
        let args = &invocation.args;
        let (Some(title), Some(players)) = (
            args.first(),
            args.get(1).and_then(|arg| arg.parse::<usize>().ok()),
        ) else {
            return self.usage(invocation, CommandKind::AddGametype);
        };

        // Team count defaults to the player count
        let teams = args
            .get(2)
            .and_then(|arg| arg.parse::<usize>().ok())
            .unwrap_or(players);
        let stats_name = args.get(3).cloned();

        let result = Gametype::new(title.as_str(), players, teams, stats_name)
            .and_then(|gametype| self.manager.add_gametype(gametype));

        match result {
            Ok(()) => Response::ok(vec![Reply::notice(
                &invocation.caller,
                format!(
                    "Gametype {} added ({} players, {} teams)",
                    title, players, teams
                ),
            )]),
            Err(e) => Response::failed(self.error_notices(invocation, &[e])),
        }
    }

    fn remove_gametype(&self, invocation: &Invocation) -> Response {
        if invocation.args.is_empty() {
            return self.usage(invocation, CommandKind::RemoveGametype);
        }

        let outcome = self.manager.remove_gametypes(&invocation.args);
        let mut replies: Vec<Reply> = outcome
            .removed
            .iter()
            .map(|removal| {
                Reply::notice(
                    &invocation.caller,
                    format!("Gametype {} removed", removal.gametype),
                )
            })
            .collect();
        replies.extend(self.error_notices(invocation, &outcome.errors));

        if outcome
            .removed
            .iter()
            .any(|removal| removal.cleared_entries > 0)
        {
            replies.push(self.topic_reply());
        }

        Response {
            replies,
            success: !outcome.removed.is_empty(),
        }
    }

    fn help(&self, invocation: &Invocation) -> Response {
        if let Some(spec) = invocation
            .args
            .first()
            .and_then(|name| CommandKind::spec_by_name(name))
        {
            return Response::ok(vec![Reply::notice(&invocation.caller, spec.usage)]);
        }

        let names: Vec<String> = COMMAND_TABLE
            .iter()
            .filter(|spec| invocation.is_admin || !spec.admin_only)
            .map(|spec| format!("!{}", spec.name))
            .collect();
        Response::ok(vec![Reply::notice(
            &invocation.caller,
            format!(
                "Commands: {}. Type !help <command> for details.",
                names.join(", ")
            ),
        )])
    }

    fn usage(&self, invocation: &Invocation, kind: CommandKind) -> Response {
        Response::failed(vec![Reply::notice(&invocation.caller, kind.spec().usage)])
    }

    fn gametype_list(&self, invocation: &Invocation) -> Reply {
        let text = match self.manager.list_gametypes() {
            Ok(gametypes) => {
                let titles: Vec<String> = gametypes.into_iter().map(|g| g.title).collect();
                format!("Possible gametypes: {}", titles.join(", "))
            }
            Err(e) => e.to_string(),
        };
        Reply::notice(&invocation.caller, text)
    }

    fn match_reply(&self, formed: &Match) -> Reply {
        Reply::Broadcast(self.announcer.match_text(formed))
    }

    fn topic_reply(&self) -> Reply {
        match self.manager.list_active() {
            Ok(active) => Reply::Topic(self.announcer.pickup_text(&active)),
            Err(e) => {
                warn!("Failed to snapshot queues for pickup text: {}", e);
                Reply::Topic(self.announcer.pickup_text(&[]))
            }
        }
    }

    fn error_notices(&self, invocation: &Invocation, errors: &[PickupError]) -> Vec<Reply> {
        errors
            .iter()
            .map(|e| Reply::notice(&invocation.caller, e.to_string()))
            .collect()
    }
}

fn unique(args: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    args.iter()
        .map(String::as_str)
        .filter(|arg| seen.insert(*arg))
        .collect()
}

/// Hand replies to the chat connectors in order
pub async fn deliver(publisher: &dyn ChatPublisher, replies: &[Reply]) -> Result<()> {
    for reply in replies {
        match reply {
            Reply::Notice { to, text } => publisher.notify(to, text).await?,
            Reply::Broadcast(text) => publisher.broadcast(text).await?,
            Reply::Topic(text) => publisher.set_topic(text).await?,
        }
    }
    Ok(())
}
