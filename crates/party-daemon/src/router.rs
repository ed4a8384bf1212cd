//! Chat command routing: decides what an inbound chat line means for the
//! live session.
//!
//! [`classify`] looks at a message in isolation; [`route`] applies the
//! classification to a session, enforcing the announcement cooldown and the
//! per-user vote ledger.

use party_proto::party::{CommandKind, MessageType, PartyConfig};
use tokio::time::Instant;

use crate::session::PartySession;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub has_next: bool,
    pub has_stay: bool,
    pub has_current: bool,
}

impl Classification {
    pub fn has_vote(&self) -> bool {
        self.has_next || self.has_stay
    }

    /// Vote kinds present in the message, next before stay.
    pub fn votes(&self) -> impl Iterator<Item = CommandKind> {
        [
            (self.has_next, CommandKind::Next),
            (self.has_stay, CommandKind::Stay),
        ]
        .into_iter()
        .filter_map(|(present, kind)| present.then_some(kind))
    }
}

/// Case-insensitive substring match of every enabled command.  Returns
/// `None` when the message type is not one the party listens to.
pub fn classify(config: &PartyConfig, message_type: MessageType, text: &str) -> Option<Classification> {
    if !config.accepts(message_type) {
        return None;
    }
    let lowered = text.to_lowercase();
    let contains = |kind| {
        config
            .command(kind)
            .is_some_and(|command| lowered.contains(&command.to_lowercase()))
    };
    Some(Classification {
        has_next: contains(CommandKind::Next),
        has_stay: contains(CommandKind::Stay),
        has_current: contains(CommandKind::Current),
    })
}

/// Result of routing one message against the session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    /// Stream to name in a chat reply.
    pub announce: Option<String>,
    /// The message carried at least one vote command, accepted or not.
    pub had_vote: bool,
    pub accepted: Vec<CommandKind>,
}

pub fn route(
    session: &mut PartySession,
    config: &PartyConfig,
    classification: Classification,
    user_id: &str,
    now: Instant,
) -> RouteOutcome {
    let mut outcome = RouteOutcome::default();

    if classification.has_current {
        let cooled_down = session
            .last_announcement
            .map_or(true, |last| now.saturating_duration_since(last) >= config.current_cooldown());
        if cooled_down {
            if let Some(stream) = session.current_stream.clone() {
                session.last_announcement = Some(now);
                outcome.announce = Some(stream);
            }
        }
    }

    if !classification.has_vote() {
        return outcome;
    }
    outcome.had_vote = true;

    let cooldown = config.vote_cooldown();
    for kind in classification.votes() {
        if session.ledger.record_vote(kind, user_id, now, cooldown) {
            session.apply_vote(kind, config);
            outcome.accepted.push(kind);
        }
    }
    outcome
}

/// Chat reply for the "current stream" command.
pub fn announcement(stream: &str, watch_base_url: &str) -> String {
    format!(
        "We are currently watching {stream}. You can check it out here: {}/{stream}",
        watch_base_url.trim_end_matches('/')
    )
}
