//! Player agent.
//!
//! A player answers invitations and parity calls from referees and keeps a journal of what the
//! league manager broadcasts. How the parity is chosen is a [`ParityStrategy`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::agent::{register_with_league, Credentials};
use crate::configuration::Configuration;
use crate::error::LeagueError;
use crate::message::{AgentType, MatchResult, Message, Parity, Payload, StandingsEntry};
use crate::network::{MessageHandler, Transport};
use crate::resilience::ResilientClient;

/// Chooses a parity for one match.
pub trait ParityStrategy: Send + Sync {
    /// Parity to play in `match_id` against `opponent_id`.
    fn choose(&self, match_id: &str, opponent_id: &str) -> Parity;
}

/// Even or odd with equal probability.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomParity;

impl ParityStrategy for RandomParity {
    fn choose(&self, _match_id: &str, _opponent_id: &str) -> Parity {
        if rand::thread_rng().gen_bool(0.5) {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

/// Always the same parity.
#[derive(Debug, Clone, Copy)]
pub struct FixedParity(pub Parity);

impl ParityStrategy for FixedParity {
    fn choose(&self, _match_id: &str, _opponent_id: &str) -> Parity {
        self.0
    }
}

/// What a player has seen of the league so far.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    /// Invitations accepted.
    pub invitations: u32,
    /// Results announced by referees, in arrival order.
    pub results: Vec<MatchResult>,
    /// Rounds announced.
    pub announced_rounds: Vec<u32>,
    /// Rounds completed.
    pub completed_rounds: Vec<u32>,
    /// Latest standings received.
    pub standings: Vec<StandingsEntry>,
    /// Set once the league is over; holds the champion, if any.
    pub league_completed: Option<Option<String>>,
}

/// A player.
pub struct Player {
    player_id: String,
    endpoint: String,
    league_endpoint: String,
    client: ResilientClient,
    request_timeout: Duration,
    strategy: Arc<dyn ParityStrategy>,
    credentials: Mutex<Option<Credentials>>,
    journal: Mutex<Journal>,
}

impl Player {
    /// Player `player_id` listening at `endpoint`, choosing parities at random.
    pub fn new(
        player_id: impl Into<String>,
        endpoint: impl Into<String>,
        league_endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: &Configuration,
    ) -> Self {
        Self {
            player_id: player_id.into(),
            endpoint: endpoint.into(),
            league_endpoint: league_endpoint.into(),
            client: ResilientClient::new(transport, config.retry, config.breaker),
            request_timeout: config.request_timeout,
            strategy: Arc::new(RandomParity),
            credentials: Mutex::new(None),
            journal: Mutex::new(Journal::default()),
        }
    }

    /// Replace the strategy.
    pub fn with_strategy(mut self, strategy: Arc<dyn ParityStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Player id.
    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    /// Register with the league manager and keep the credentials.
    pub async fn register(&self) -> Result<Credentials, LeagueError> {
        let credentials = register_with_league(
            &self.client,
            &self.league_endpoint,
            AgentType::Player,
            &self.player_id,
            &self.endpoint,
            self.request_timeout,
        )
        .await?;
        *self
            .credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(credentials.clone());
        Ok(credentials)
    }

    /// Credentials, once registered.
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Copy of the journal.
    pub fn journal(&self) -> Journal {
        self.lock_journal().clone()
    }

    fn lock_journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Referees are not known to players; any credential is enough.
    fn check_referee(&self, message: &Message) -> Result<(), LeagueError> {
        match message.envelope().auth_token.as_deref() {
            Some(token) if !token.is_empty() => Ok(()),
            _ => Err(LeagueError::Authentication(format!(
                "{} from {} carries no token",
                message.kind(),
                message.sender_id()
            ))),
        }
    }

    fn check_league(&self, message: &Message) -> Result<(), LeagueError> {
        let credentials = self.credentials().ok_or_else(|| {
            LeagueError::LifecycleConflict(format!("{} is not registered", self.player_id))
        })?;
        if !message.envelope().token_matches(&credentials.league_token) {
            return Err(LeagueError::Authentication(format!(
                "{} does not carry the league token",
                message.kind()
            )));
        }
        Ok(())
    }

    fn answer(&self, message: &Message) -> Result<Payload, LeagueError> {
        match message.payload() {
            Payload::GameInvitation { match_id, opponent_id, .. } => {
                self.check_referee(message)?;
                self.lock_journal().invitations += 1;
                debug!(player = %self.player_id, %match_id, %opponent_id, "invitation accepted");
                Ok(Payload::GameJoinAck {
                    match_id: match_id.clone(),
                    accept: true,
                })
            }
            Payload::ChooseParityCall { match_id, opponent_id, .. } => {
                self.check_referee(message)?;
                let parity_choice = self.strategy.choose(match_id, opponent_id);
                debug!(player = %self.player_id, %match_id, %parity_choice, "parity chosen");
                Ok(Payload::ChooseParityResponse {
                    match_id: match_id.clone(),
                    parity_choice,
                })
            }
            Payload::GameOver { result } => {
                self.check_referee(message)?;
                if result.player_a_id != self.player_id && result.player_b_id != self.player_id {
                    return Err(LeagueError::Validation(format!(
                        "{} did not play match {}",
                        self.player_id, result.match_id
                    )));
                }
                info!(
                    player = %self.player_id,
                    match_id = %result.match_id,
                    winner = ?result.winner_id,
                    "game over"
                );
                self.lock_journal().results.push(result.clone());
                Ok(Payload::Ack {})
            }
            Payload::RoundAnnouncement { round_id, .. } => {
                self.check_league(message)?;
                self.lock_journal().announced_rounds.push(*round_id);
                Ok(Payload::Ack {})
            }
            Payload::LeagueStandingsUpdate { standings, .. } => {
                self.check_league(message)?;
                self.lock_journal().standings = standings.clone();
                Ok(Payload::Ack {})
            }
            Payload::RoundCompleted { round_id, .. } => {
                self.check_league(message)?;
                self.lock_journal().completed_rounds.push(*round_id);
                Ok(Payload::Ack {})
            }
            Payload::LeagueCompleted {
                champion_id,
                standings,
                ..
            } => {
                self.check_league(message)?;
                info!(player = %self.player_id, champion = ?champion_id, "league completed");
                let mut journal = self.lock_journal();
                journal.standings = standings.clone();
                journal.league_completed = Some(champion_id.clone());
                Ok(Payload::Ack {})
            }
            other => Err(LeagueError::Validation(format!(
                "{} is not served by players",
                other.kind()
            ))),
        }
    }
}

#[async_trait]
impl MessageHandler for Player {
    async fn handle(&self, message: Message) -> Message {
        match self.answer(&message) {
            Ok(payload) => Message::reply_to(
                &message,
                &self.player_id,
                self.credentials().map(|c| c.issued_token),
                payload,
            ),
            Err(e) => {
                warn!(player = %self.player_id, "request rejected: {e}");
                Message::error_reply(&message, &self.player_id, &e)
            }
        }
    }

    fn agent_id(&self) -> &str {
        &self.player_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::network::LocalNetwork;

    struct League;

    #[async_trait]
    impl MessageHandler for League {
        async fn handle(&self, message: Message) -> Message {
            let payload = match message.payload() {
                Payload::RegisterRequest { agent_id, .. } => Payload::RegisterResponse {
                    agent_id: agent_id.clone(),
                    issued_token: "p-token".into(),
                    league_token: "league-token".into(),
                },
                _ => Payload::Ack {},
            };
            Message::reply_to(&message, "league-manager", None, payload)
        }

        fn agent_id(&self) -> &str {
            "league-manager"
        }
    }

    async fn registered_player(parity: Parity) -> Player {
        let network = LocalNetwork::new();
        network.bind("league", Arc::new(League));
        let player = Player::new("P1", "p1", "league", Arc::new(network), &Configuration::default())
            .with_strategy(Arc::new(FixedParity(parity)));
        player.register().await.unwrap();
        player
    }

    fn completed(token: Option<&str>) -> Message {
        Message::request(
            "league-manager",
            "c-end",
            token.map(str::to_string),
            Payload::LeagueCompleted {
                total_rounds: 3,
                total_matches: 6,
                champion_id: Some("P1".into()),
                standings: vec![StandingsEntry::new("P1")],
            },
        )
    }

    #[tokio::test]
    async fn broadcast_without_league_token_rejected() {
        let player = registered_player(Parity::Even).await;

        for token in [None, Some("p-token"), Some("forged")] {
            let reply = player.handle(completed(token)).await;
            assert_eq!(reply.into_result().unwrap_err().code(), ErrorCode::Authentication);
        }
        assert!(player.journal().league_completed.is_none());

        let reply = player.handle(completed(Some("league-token"))).await;
        assert!(reply.into_result().is_ok());
        assert_eq!(player.journal().league_completed, Some(Some("P1".into())));
    }

    #[tokio::test]
    async fn answers_referee_with_strategy() {
        let player = registered_player(Parity::Odd).await;

        let call = Message::request(
            "REF",
            "c-R1M1",
            Some("ref-token".into()),
            Payload::ChooseParityCall {
                match_id: "R1M1".into(),
                opponent_id: "P2".into(),
                timeout_ms: 30_000,
            },
        );
        let reply = player.handle(call).await;
        assert_eq!(reply.conversation_id(), "c-R1M1");
        assert!(reply.envelope().token_matches("p-token"));
        assert_eq!(
            reply.into_payload(),
            Payload::ChooseParityResponse {
                match_id: "R1M1".into(),
                parity_choice: Parity::Odd,
            }
        );

        let invitation = |token: Option<String>| {
            Message::request(
                "REF",
                "c-R1M1",
                token,
                Payload::GameInvitation {
                    match_id: "R1M1".into(),
                    round_id: 1,
                    opponent_id: "P2".into(),
                },
            )
        };
        let reply = player.handle(invitation(None)).await;
        assert_eq!(reply.into_result().unwrap_err().code(), ErrorCode::Authentication);
        let reply = player.handle(invitation(Some("ref-token".into()))).await;
        assert!(matches!(reply.into_payload(), Payload::GameJoinAck { accept: true, .. }));
        assert_eq!(player.journal().invitations, 1);
    }

    #[test]
    fn random_parity_yields_both() {
        let seen: std::collections::HashSet<Parity> =
            (0..200).map(|_| RandomParity.choose("m", "o")).collect();
        assert_eq!(seen.len(), 2);
    }
}
