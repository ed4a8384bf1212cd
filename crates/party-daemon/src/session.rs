use party_proto::party::{CommandKind, PartyConfig};
use party_proto::protocol::SessionSnapshot;
use std::collections::BTreeMap;
use tokio::time::Instant;

use crate::ledger::VoteLedger;

/// State of one featured-stream period.  Rotation builds a fresh value and
/// swaps it in whole; nothing carries over except the catalog, which the
/// controller keeps outside the session.
#[derive(Debug)]
pub struct PartySession {
    pub current_stream: Option<String>,
    /// Monotonic start of the countdown.
    pub started: Instant,
    /// Wall-clock start (epoch ms) reported to clients.
    pub started_at_ms: i64,
    /// Allotted duration from `started`.  Votes move this, never the start.
    pub duration_ms: i64,
    pub vote_count: u32,
    pub last_announcement: Option<Instant>,
    pub ledger: VoteLedger,
}

impl PartySession {
    /// Session opened by `start()`, before any stream is featured.
    pub fn opening(config: &PartyConfig, now: Instant, now_ms: i64) -> Self {
        Self {
            current_stream: None,
            started: now,
            started_at_ms: now_ms,
            duration_ms: config.current_stream_initial_duration_ms,
            vote_count: 0,
            last_announcement: None,
            ledger: VoteLedger::new(),
        }
    }

    pub fn featuring(stream: String, config: &PartyConfig, now: Instant, now_ms: i64) -> Self {
        Self {
            current_stream: Some(stream),
            ..Self::opening(config, now, now_ms)
        }
    }

    pub fn deadline_reached(&self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.started).as_millis();
        i128::from(self.duration_ms) <= elapsed as i128
    }

    pub fn remaining_ms(&self, now: Instant) -> i64 {
        let elapsed = now.saturating_duration_since(self.started).as_millis() as i64;
        self.duration_ms.saturating_sub(elapsed)
    }

    /// Apply one accepted vote: count it and shift the duration.
    pub fn apply_vote(&mut self, kind: CommandKind, config: &PartyConfig) {
        self.vote_count = self.vote_count.saturating_add(1);
        self.duration_ms = self.duration_ms.saturating_add(config.duration_delta_ms(kind));
    }

    pub fn snapshot(&self, streams: &[String], now: Instant, now_ms: i64) -> SessionSnapshot {
        let to_wall = |at: Instant| now_ms - now.saturating_duration_since(at).as_millis() as i64;
        let votes = |kind: CommandKind| -> BTreeMap<String, i64> {
            self.ledger
                .votes_of(kind)
                .map(|(user, at)| (user.to_string(), to_wall(at)))
                .collect()
        };
        SessionSnapshot {
            streams: streams.to_vec(),
            current_stream: self.current_stream.clone(),
            current_stream_vote_count: self.vote_count,
            next_command_timestamps: votes(CommandKind::Next),
            stay_command_timestamps: votes(CommandKind::Stay),
            current_command_timestamp: self.last_announcement.map(to_wall),
            is_partying: true,
            current_stream_start: Some(self.started_at_ms),
            current_stream_duration_ms: self.duration_ms,
        }
    }
}
