use party_proto::party::CommandKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-user vote throttle.  Remembers, for each `(kind, user)`, when that
/// user's last vote of that kind was accepted.
#[derive(Debug, Default)]
pub struct VoteLedger {
    last_accepted: HashMap<(CommandKind, String), Instant>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept the vote when the user has no earlier vote of this kind or the
    /// earlier one is at least `cooldown` old.  A rejected vote leaves the
    /// ledger untouched, so the window keeps running from the last accepted
    /// vote rather than the last attempt.
    pub fn record_vote(
        &mut self,
        kind: CommandKind,
        user_id: &str,
        now: Instant,
        cooldown: Duration,
    ) -> bool {
        let key = (kind, user_id.to_string());
        if let Some(last) = self.last_accepted.get(&key) {
            if now.saturating_duration_since(*last) < cooldown {
                return false;
            }
        }
        self.last_accepted.insert(key, now);
        true
    }

    #[cfg(test)]
    pub fn last_vote(&self, kind: CommandKind, user_id: &str) -> Option<Instant> {
        self.last_accepted
            .get(&(kind, user_id.to_string()))
            .copied()
    }

    /// All `(user, instant)` pairs recorded for `kind`.
    pub fn votes_of(&self, kind: CommandKind) -> impl Iterator<Item = (&str, Instant)> {
        self.last_accepted
            .iter()
            .filter(move |((k, _), _)| *k == kind)
            .map(|((_, user), at)| (user.as_str(), *at))
    }

    pub fn len(&self) -> usize {
        self.last_accepted.len()
    }
}
