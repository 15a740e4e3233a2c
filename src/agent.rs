//! Agents known to the league and the registration handshake.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, instrument};

use crate::error::LeagueError;
use crate::message::{AgentType, Message, Payload};
use crate::resilience::ResilientClient;

/// An agent accepted by the league manager. Never modified once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    /// Unique id.
    pub agent_id: String,
    /// Referee or player.
    pub agent_type: AgentType,
    /// Where the agent listens.
    pub endpoint: String,
    /// Token the agent presents on its requests.
    pub issued_token: String,
    /// Registration time.
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

impl PartialEq for RegistrationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.agent_id == other.agent_id
    }
}

impl Eq for RegistrationRecord {}

impl Hash for RegistrationRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.agent_id.hash(state);
    }
}

/// Registration records in registration order.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    records: Vec<RegistrationRecord>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new agent and issue its token. Ids are unique across agent types.
    ///
    /// Registering the same id, type and endpoint again returns the existing record, so a
    /// registration whose response was lost can be retried.
    pub fn register(
        &mut self,
        agent_type: AgentType,
        agent_id: &str,
        endpoint: &str,
    ) -> Result<&RegistrationRecord, LeagueError> {
        if agent_id.trim().is_empty() {
            return Err(LeagueError::Validation("empty agent id".to_string()));
        }
        if endpoint.trim().is_empty() {
            return Err(LeagueError::Validation(format!(
                "agent '{agent_id}' has no endpoint"
            )));
        }
        if let Some(&i) = self.index.get(agent_id) {
            let existing = &self.records[i];
            if existing.agent_type == agent_type && existing.endpoint == endpoint {
                return Ok(existing);
            }
            return Err(LeagueError::Duplicate(agent_id.to_string()));
        }

        self.index.insert(agent_id.to_string(), self.records.len());
        self.records.push(RegistrationRecord {
            agent_id: agent_id.to_string(),
            agent_type,
            endpoint: endpoint.to_string(),
            issued_token: uuid::Uuid::new_v4().to_string(),
            registered_at: OffsetDateTime::now_utc(),
        });
        Ok(&self.records[self.records.len() - 1])
    }

    /// Record of `agent_id`.
    pub fn get(&self, agent_id: &str) -> Option<&RegistrationRecord> {
        self.index.get(agent_id).map(|&i| &self.records[i])
    }

    /// Check that `agent_id` is a registered `agent_type` presenting its own token.
    pub fn authenticate(
        &self,
        agent_type: AgentType,
        agent_id: &str,
        token: Option<&str>,
    ) -> Result<&RegistrationRecord, LeagueError> {
        let record = self
            .get(agent_id)
            .filter(|r| r.agent_type == agent_type)
            .ok_or_else(|| {
                LeagueError::Authentication(format!("unknown {agent_type} '{agent_id}'"))
            })?;
        if token != Some(record.issued_token.as_str()) {
            return Err(LeagueError::Authentication(format!(
                "invalid token for '{agent_id}'"
            )));
        }
        Ok(record)
    }

    /// Records of `agent_type`, in registration order.
    pub fn of_type(&self, agent_type: AgentType) -> impl Iterator<Item = &RegistrationRecord> {
        self.records.iter().filter(move |r| r.agent_type == agent_type)
    }

    /// Ids of `agent_type`, in registration order.
    pub fn ids(&self, agent_type: AgentType) -> Vec<String> {
        self.of_type(agent_type).map(|r| r.agent_id.clone()).collect()
    }

    /// Number of `agent_type` agents.
    pub fn count(&self, agent_type: AgentType) -> usize {
        self.of_type(agent_type).count()
    }
}

/// What an agent keeps from its registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Registered id.
    pub agent_id: String,
    /// Token to present to the league manager.
    pub issued_token: String,
    /// Token the league manager presents on its own messages.
    pub league_token: String,
}

/// Register with the league manager at `league_endpoint`.
#[instrument(skip(client, timeout))]
pub async fn register_with_league(
    client: &ResilientClient,
    league_endpoint: &str,
    agent_type: AgentType,
    agent_id: &str,
    endpoint: &str,
    timeout: Duration,
) -> Result<Credentials, LeagueError> {
    let request = Message::request(
        agent_id,
        Message::new_conversation_id(),
        None,
        Payload::RegisterRequest {
            agent_type,
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
        },
    );
    match client.call(league_endpoint, request, timeout).await?.into_payload() {
        Payload::RegisterResponse {
            agent_id: registered,
            issued_token,
            league_token,
        } if registered == agent_id => {
            info!("registered");
            Ok(Credentials {
                agent_id: registered,
                issued_token,
                league_token,
            })
        }
        other => Err(LeagueError::Validation(format!(
            "unexpected {} in answer to a registration",
            other.kind()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_authenticate() {
        let mut registry = Registry::new();
        let token = registry
            .register(AgentType::Player, "p1", "127.0.0.1:9001")
            .unwrap()
            .issued_token
            .clone();
        registry.register(AgentType::Referee, "r1", "127.0.0.1:9100").unwrap();

        assert!(registry.authenticate(AgentType::Player, "p1", Some(&token)).is_ok());
        assert!(matches!(
            registry.authenticate(AgentType::Player, "p1", Some("forged")),
            Err(LeagueError::Authentication(_))
        ));
        assert!(registry.authenticate(AgentType::Player, "p1", None).is_err());
        // right token, wrong role
        assert!(registry.authenticate(AgentType::Referee, "p1", Some(&token)).is_err());
        assert!(registry.authenticate(AgentType::Player, "ghost", Some(&token)).is_err());
    }

    #[test]
    fn duplicates_and_blanks_rejected() {
        let mut registry = Registry::new();
        registry.register(AgentType::Player, "p1", "a").unwrap();
        assert_eq!(
            registry.register(AgentType::Referee, "p1", "b").unwrap_err(),
            LeagueError::Duplicate("p1".into())
        );
        assert!(matches!(
            registry.register(AgentType::Player, " ", "b"),
            Err(LeagueError::Validation(_))
        ));
        assert!(matches!(
            registry.register(AgentType::Player, "p2", ""),
            Err(LeagueError::Validation(_))
        ));
        assert_eq!(
            registry.register(AgentType::Player, "p1", "b").unwrap_err(),
            LeagueError::Duplicate("p1".into())
        );
        assert_eq!(registry.get("p1").unwrap().endpoint, "a");
    }

    #[test]
    fn repeated_registration_returns_the_same_record() {
        let mut registry = Registry::new();
        let first = registry.register(AgentType::Player, "p1", "a").unwrap().clone();
        let again = registry.register(AgentType::Player, "p1", "a").unwrap().clone();
        assert_eq!(again.issued_token, first.issued_token);
        assert_eq!(registry.count(AgentType::Player), 1);
    }

    #[test]
    fn registration_order_is_kept() {
        let mut registry = Registry::new();
        for id in ["p3", "p1", "p2"] {
            registry.register(AgentType::Player, id, "x").unwrap();
        }
        registry.register(AgentType::Referee, "r", "x").unwrap();
        assert_eq!(registry.ids(AgentType::Player), ["p3", "p1", "p2"]);
        assert_eq!(registry.count(AgentType::Referee), 1);
    }

    #[test]
    fn tokens_are_unique() {
        let mut registry = Registry::new();
        let mut token = |id| {
            registry
                .register(AgentType::Player, id, "x")
                .unwrap()
                .issued_token
                .clone()
        };
        let a = token("a");
        let b = token("b");
        assert_ne!(a, b);
    }
}
