//! Referee agent: accepts match assignments and runs one [`MatchConductor`] per match.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::agent::{register_with_league, Credentials};
use crate::configuration::Configuration;
use crate::error::LeagueError;
use crate::match_conductor::{
    Deadlines, MatchAssignment, MatchConductor, NumberDrawer, RandomDraw, RefereeContext,
};
use crate::message::{AgentType, Message, Payload};
use crate::network::{MessageHandler, Transport};
use crate::resilience::ResilientClient;
use crate::store::DocumentStore;

/// A referee.
pub struct Referee {
    referee_id: String,
    endpoint: String,
    league_endpoint: String,
    client: ResilientClient,
    store: DocumentStore,
    drawer: Arc<dyn NumberDrawer>,
    deadlines: Deadlines,
    credentials: Mutex<Option<Credentials>>,
    accepted: Mutex<HashSet<String>>,
}

impl Referee {
    /// Referee `referee_id` listening at `endpoint`, writing match documents to `store`.
    pub fn new(
        referee_id: impl Into<String>,
        endpoint: impl Into<String>,
        league_endpoint: impl Into<String>,
        transport: Arc<dyn Transport>,
        store: DocumentStore,
        config: &Configuration,
    ) -> Self {
        Self {
            referee_id: referee_id.into(),
            endpoint: endpoint.into(),
            league_endpoint: league_endpoint.into(),
            client: ResilientClient::new(transport, config.retry, config.breaker),
            store,
            drawer: Arc::new(RandomDraw),
            deadlines: Deadlines::from(config),
            credentials: Mutex::new(None),
            accepted: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the number source.
    pub fn with_drawer(mut self, drawer: Arc<dyn NumberDrawer>) -> Self {
        self.drawer = drawer;
        self
    }

    /// Register with the league manager and keep the credentials.
    pub async fn register(&self) -> Result<Credentials, LeagueError> {
        let credentials = register_with_league(
            &self.client,
            &self.league_endpoint,
            AgentType::Referee,
            &self.referee_id,
            &self.endpoint,
            self.request_timeout(),
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

    fn request_timeout(&self) -> Duration {
        self.deadlines.request
    }

    fn start_match(&self, message: &Message) -> Result<Payload, LeagueError> {
        let credentials = self.credentials().ok_or_else(|| {
            LeagueError::LifecycleConflict(format!("{} is not registered", self.referee_id))
        })?;
        if !message.envelope().token_matches(&credentials.league_token) {
            return Err(LeagueError::Authentication(
                "match assignments must come from the league manager".to_string(),
            ));
        }
        let Payload::StartMatch {
            match_id,
            round_id,
            player_a,
            player_b,
        } = message.payload()
        else {
            return Err(LeagueError::Validation(format!(
                "expected START_MATCH, got {}",
                message.kind()
            )));
        };

        let fresh = self
            .accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(match_id.clone());
        if !fresh {
            debug!(%match_id, "assignment already accepted");
            return Ok(Payload::Ack {});
        }

        let ctx = RefereeContext {
            referee_id: self.referee_id.clone(),
            token: credentials.issued_token,
            league_endpoint: self.league_endpoint.clone(),
            client: self.client.clone(),
            store: self.store.clone(),
            drawer: self.drawer.clone(),
            deadlines: self.deadlines,
        };
        let conductor = MatchConductor::new(
            ctx,
            MatchAssignment {
                match_id: match_id.clone(),
                round_id: *round_id,
                conversation_id: message.conversation_id().to_string(),
                player_a: player_a.clone(),
                player_b: player_b.clone(),
            },
        );
        info!(
            %match_id,
            round_id,
            a = %player_a.player_id,
            b = %player_b.player_id,
            "match accepted"
        );
        tokio::spawn(conductor.run());
        Ok(Payload::Ack {})
    }
}

#[async_trait]
impl MessageHandler for Referee {
    async fn handle(&self, message: Message) -> Message {
        let answer = match message.payload() {
            Payload::StartMatch { .. } => self.start_match(&message),
            other => Err(LeagueError::Validation(format!(
                "{} is not served by referees",
                other.kind()
            ))),
        };
        match answer {
            Ok(payload) => Message::reply_to(
                &message,
                &self.referee_id,
                self.credentials().map(|c| c.issued_token),
                payload,
            ),
            Err(e) => {
                warn!(referee = %self.referee_id, "request rejected: {e}");
                Message::error_reply(&message, &self.referee_id, &e)
            }
        }
    }

    fn agent_id(&self) -> &str {
        &self.referee_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::message::Participant;
    use crate::network::LocalNetwork;

    struct League;

    #[async_trait]
    impl MessageHandler for League {
        async fn handle(&self, message: Message) -> Message {
            let payload = match message.payload() {
                Payload::RegisterRequest { agent_id, .. } => Payload::RegisterResponse {
                    agent_id: agent_id.clone(),
                    issued_token: "ref-token".into(),
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

    fn start_match(token: Option<&str>) -> Message {
        Message::request(
            "league-manager",
            "L-R1M1",
            token.map(str::to_string),
            Payload::StartMatch {
                match_id: "R1M1".into(),
                round_id: 1,
                player_a: Participant {
                    player_id: "A".into(),
                    endpoint: "nowhere-a".into(),
                },
                player_b: Participant {
                    player_id: "B".into(),
                    endpoint: "nowhere-b".into(),
                },
            },
        )
    }

    fn referee(dir: &tempfile::TempDir) -> Referee {
        let network = LocalNetwork::new();
        network.bind("league", Arc::new(League));
        Referee::new(
            "REF",
            "ref",
            "league",
            Arc::new(network),
            DocumentStore::open(dir.path()).unwrap(),
            &Configuration::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn assignments_need_registration_and_league_token() {
        let dir = tempfile::tempdir().unwrap();
        let referee = referee(&dir);

        let reply = referee.handle(start_match(Some("league-token"))).await;
        assert_eq!(reply.into_result().unwrap_err().code(), ErrorCode::LifecycleConflict);

        let credentials = referee.register().await.unwrap();
        assert_eq!(credentials.issued_token, "ref-token");

        for token in [None, Some("ref-token")] {
            let reply = referee.handle(start_match(token)).await;
            assert_eq!(reply.into_result().unwrap_err().code(), ErrorCode::Authentication);
        }

        let reply = referee.handle(start_match(Some("league-token"))).await;
        assert_eq!(reply.conversation_id(), "L-R1M1");
        assert!(reply.envelope().token_matches("ref-token"));
        assert!(reply.into_result().is_ok());
        // the same assignment again is acknowledged without a second conductor
        assert!(referee.handle(start_match(Some("league-token"))).await.into_result().is_ok());
    }

    #[tokio::test]
    async fn other_kinds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let referee = referee(&dir);
        let reply = referee
            .handle(Message::request("x", "c", None, Payload::Ack {}))
            .await;
        assert_eq!(reply.into_result().unwrap_err().code(), ErrorCode::Validation);
    }
}
