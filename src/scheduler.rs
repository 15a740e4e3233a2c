//! Round-robin match graph.
//!
//! [`schedule`] pairs every player with every other player exactly once using the circle
//! method: the first player stays put while the others rotate one seat per round. With an odd
//! roster a synthetic bye seat is added; whoever faces it sits the round out. `n` players give
//! `n·(n−1)/2` matches over `n−1` rounds (`n` rounds when `n` is odd), and nobody plays twice
//! in the same round.
//!
//! Referees are assigned by rotating over the referee list in match order, independently of the
//! pairing. The output is a pure function of the ordered inputs.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::LeagueError;
use crate::message::MatchSummary;

/// Lifecycle of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundStatus {
    /// Not started yet.
    Pending,
    /// Matches dispatched, results coming in.
    Active,
    /// Every match settled.
    Completed,
}

/// League manager's view of a scheduled match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchProgress {
    /// Waiting for its round.
    Scheduled,
    /// Handed to its referee.
    Dispatched,
    /// The referee never confirmed the assignment, but may still be running the match.
    Unconfirmed,
    /// Result received, not yet applied to the standings.
    Reported,
    /// Result applied.
    Finished,
    /// Could not be played.
    Failed,
}

impl MatchProgress {
    /// Nothing more will happen to the match.
    pub fn is_settled(self) -> bool {
        matches!(self, MatchProgress::Finished | MatchProgress::Failed)
    }
}

/// One match of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledMatch {
    /// `R<round>M<index>`.
    pub match_id: String,
    /// Round the match belongs to.
    pub round_id: u32,
    /// First player.
    pub player_a_id: String,
    /// Second player.
    pub player_b_id: String,
    /// Referee in charge.
    pub referee_id: String,
    /// Conversation id used by every leg of the match.
    pub conversation_id: String,
    /// Bookkeeping state.
    pub progress: MatchProgress,
}

impl ScheduledMatch {
    /// Whether `player_id` plays this match.
    pub fn involves(&self, player_id: &str) -> bool {
        self.player_a_id == player_id || self.player_b_id == player_id
    }

    /// Wire summary for announcements.
    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            match_id: self.match_id.clone(),
            player_a_id: self.player_a_id.clone(),
            player_b_id: self.player_b_id.clone(),
            referee_id: self.referee_id.clone(),
        }
    }
}

impl fmt::Display for ScheduledMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}: {} VS {} by {}]",
            self.match_id, self.player_a_id, self.player_b_id, self.referee_id
        )
    }
}

/// A set of matches played concurrently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based round number.
    pub round_id: u32,
    /// Matches of the round.
    pub matches: Vec<ScheduledMatch>,
    /// Player sitting this round out (odd rosters only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bye: Option<String>,
    /// Lifecycle.
    pub status: RoundStatus,
}

impl Round {
    /// All matches finished or failed.
    pub fn is_settled(&self) -> bool {
        self.matches.iter().all(|m| m.progress.is_settled())
    }

    /// Match `match_id` of this round.
    pub fn find_match_mut(&mut self, match_id: &str) -> Option<&mut ScheduledMatch> {
        self.matches.iter_mut().find(|m| m.match_id == match_id)
    }
}

/// Build the complete round-robin graph for `players`, refereed by `referees`.
///
/// `league_id` only seeds the conversation ids.
#[instrument(skip_all, fields(players = players.len(), referees = referees.len()))]
pub fn schedule(
    league_id: &str,
    players: &[String],
    referees: &[String],
) -> Result<Vec<Round>, LeagueError> {
    if players.len() < 2 {
        return Err(LeagueError::Validation(format!(
            "at least two players are needed, got {}",
            players.len()
        )));
    }
    if referees.is_empty() {
        return Err(LeagueError::Validation(
            "at least one referee is needed".to_string(),
        ));
    }
    check_unique(players, "player")?;
    check_unique(referees, "referee")?;

    let mut seats: Vec<Option<&String>> = players.iter().map(Some).collect();
    if seats.len() % 2 == 1 {
        seats.push(None);
    }
    let n = seats.len();

    let mut rounds = Vec::with_capacity(n - 1);
    let mut match_counter = 0usize;
    for round_index in 0..n - 1 {
        let round_id = round_index as u32 + 1;
        let mut matches = vec![];
        let mut bye = None;

        for i in 0..n / 2 {
            match (seats[i], seats[n - 1 - i]) {
                (Some(a), Some(b)) => {
                    let match_id = format!("R{round_id}M{}", matches.len() + 1);
                    matches.push(ScheduledMatch {
                        conversation_id: format!("{league_id}-{match_id}"),
                        match_id,
                        round_id,
                        player_a_id: a.clone(),
                        player_b_id: b.clone(),
                        referee_id: referees[match_counter % referees.len()].clone(),
                        progress: MatchProgress::Scheduled,
                    });
                    match_counter += 1;
                }
                (Some(p), None) | (None, Some(p)) => bye = Some(p.clone()),
                (None, None) => {}
            }
        }

        debug!(round_id, matches = matches.len(), ?bye, "round scheduled");
        rounds.push(Round {
            round_id,
            matches,
            bye,
            status: RoundStatus::Pending,
        });

        // first seat is fixed, the others move one step around the circle
        seats[1..].rotate_right(1);
    }

    Ok(rounds)
}

fn check_unique(ids: &[String], what: &str) -> Result<(), LeagueError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(LeagueError::Validation(format!("empty {what} id")));
        }
        if !seen.insert(id) {
            return Err(LeagueError::Validation(format!("{what} '{id}' listed twice")));
        }
    }
    Ok(())
}
