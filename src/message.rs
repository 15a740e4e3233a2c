//! Wire messages exchanged between the league manager, referees and players.
//!
//! Every message is an [`Envelope`] flattened together with one [`Payload`] variant, encoded as
//! a single JSON object:
//!
//! ```json
//! {
//!   "protocol_version": "league.v2",
//!   "sender_id": "referee-1",
//!   "timestamp": "2026-01-01T10:00:00Z",
//!   "conversation_id": "c-R1M1",
//!   "auth_token": "…",
//!   "message_kind": "CHOOSE_PARITY_CALL",
//!   "match_id": "R1M1",
//!   "opponent_id": "p2",
//!   "timeout_ms": 30000
//! }
//! ```
//!
//! Messages are immutable once built. [`Message::parse`] is the only way to turn bytes into a
//! message and it rejects anything that is not exactly valid: missing envelope fields, a foreign
//! protocol version, unknown kinds or literals in the wrong case.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::error::{ErrorCode, LeagueError};

/// Protocol version spoken by this crate. Messages carrying any other version are rejected.
pub const PROTOCOL_VERSION: &str = "league.v2";

/// A parity choice. Only the lowercase literals `"even"` and `"odd"` are accepted on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    /// Divisible by two.
    Even,
    /// Not divisible by two.
    Odd,
}

impl Parity {
    /// Parity of `number`.
    pub fn of(number: u32) -> Parity {
        if number % 2 == 0 {
            Parity::Even
        } else {
            Parity::Odd
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parity::Even => f.write_str("even"),
            Parity::Odd => f.write_str("odd"),
        }
    }
}

/// Kind of agent taking part in the league.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    /// Runs matches.
    Referee,
    /// Plays matches.
    Player,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Referee => f.write_str("referee"),
            AgentType::Player => f.write_str("player"),
        }
    }
}

/// Why a match ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeReason {
    /// Both players chose and the drawn number decided.
    Normal,
    /// One player missed a deadline; the opponent wins.
    TechnicalLoss,
    /// Both players missed a deadline; nobody wins and both are charged a loss.
    DoubleForfeit,
    /// The referee could not run the match; no points change.
    Aborted,
}

/// Final result of one match, as reported by its referee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Match id.
    pub match_id: String,
    /// Round the match belongs to.
    pub round_id: u32,
    /// First scheduled player.
    pub player_a_id: String,
    /// Second scheduled player.
    pub player_b_id: String,
    /// Winner, if any.
    pub winner_id: Option<String>,
    /// True when the match is a draw.
    pub is_draw: bool,
    /// How the match ended.
    pub reason: OutcomeReason,
    /// Number drawn by the referee, when the match got that far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawn_number: Option<u32>,
    /// Choices submitted by the players.
    #[serde(default)]
    pub choices: BTreeMap<String, Parity>,
}

impl MatchResult {
    /// Check internal consistency: the winner is a participant, a draw has no winner, and a
    /// double forfeit or aborted match has neither.
    pub fn validate(&self) -> Result<(), LeagueError> {
        if self.player_a_id == self.player_b_id {
            return Err(LeagueError::Validation(format!(
                "match {} opposes {} to itself",
                self.match_id, self.player_a_id
            )));
        }
        if let Some(winner) = &self.winner_id {
            if winner != &self.player_a_id && winner != &self.player_b_id {
                return Err(LeagueError::Validation(format!(
                    "winner {winner} did not play match {}",
                    self.match_id
                )));
            }
        }
        let consistent = match self.reason {
            OutcomeReason::Normal => self.is_draw != self.winner_id.is_some(),
            OutcomeReason::TechnicalLoss => !self.is_draw && self.winner_id.is_some(),
            OutcomeReason::DoubleForfeit | OutcomeReason::Aborted => {
                !self.is_draw && self.winner_id.is_none()
            }
        };
        if !consistent {
            return Err(LeagueError::Validation(format!(
                "inconsistent outcome for match {}: reason {:?}, winner {:?}, draw {}",
                self.match_id, self.reason, self.winner_id, self.is_draw
            )));
        }
        Ok(())
    }
}

/// Address of a player as handed to a referee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Player id.
    pub player_id: String,
    /// Where the player listens.
    pub endpoint: String,
}

/// One line of a round announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchSummary {
    /// Match id.
    pub match_id: String,
    /// First player.
    pub player_a_id: String,
    /// Second player.
    pub player_b_id: String,
    /// Referee running the match.
    pub referee_id: String,
}

/// Standings of one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandingsEntry {
    /// Player id.
    pub player_id: String,
    /// Matches played.
    pub played: u32,
    /// Wins, technical wins included.
    pub wins: u32,
    /// Draws.
    pub draws: u32,
    /// Losses, forfeits included.
    pub losses: u32,
    /// Points accumulated.
    pub points: u32,
}

impl StandingsEntry {
    /// Blank entry for `player_id`.
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            ..Default::default()
        }
    }
}

/// Fields shared by every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Must equal [`PROTOCOL_VERSION`].
    pub protocol_version: String,
    /// Id of the sending agent.
    pub sender_id: String,
    /// Creation time, RFC 3339.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Correlation key, echoed verbatim by the responder.
    pub conversation_id: String,
    /// Sender credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Envelope {
    /// True when the envelope carries exactly `expected` as credential.
    pub fn token_matches(&self, expected: &str) -> bool {
        self.auth_token.as_deref() == Some(expected)
    }
}

/// Kind-specific content of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message_kind")]
pub enum Payload {
    /// Agent → league manager.
    #[serde(rename = "REGISTER_REQUEST")]
    RegisterRequest {
        /// Kind of agent.
        agent_type: AgentType,
        /// Requested id.
        agent_id: String,
        /// Where the agent listens.
        endpoint: String,
    },
    /// League manager → agent.
    #[serde(rename = "REGISTER_RESPONSE")]
    RegisterResponse {
        /// Registered id.
        agent_id: String,
        /// Token the agent must present on every request to the league manager.
        issued_token: String,
        /// Credential the league manager presents on its own messages.
        league_token: String,
    },
    /// League manager → referee.
    #[serde(rename = "START_MATCH")]
    StartMatch {
        /// Match id.
        match_id: String,
        /// Round id.
        round_id: u32,
        /// First player.
        player_a: Participant,
        /// Second player.
        player_b: Participant,
    },
    /// Referee → player.
    #[serde(rename = "GAME_INVITATION")]
    GameInvitation {
        /// Match id.
        match_id: String,
        /// Round id.
        round_id: u32,
        /// Opponent id.
        opponent_id: String,
    },
    /// Player → referee.
    #[serde(rename = "GAME_JOIN_ACK")]
    GameJoinAck {
        /// Match id.
        match_id: String,
        /// Whether the player joins.
        accept: bool,
    },
    /// Referee → player.
    #[serde(rename = "CHOOSE_PARITY_CALL")]
    ChooseParityCall {
        /// Match id.
        match_id: String,
        /// Opponent id.
        opponent_id: String,
        /// Time the player has to answer.
        timeout_ms: u64,
    },
    /// Player → referee.
    #[serde(rename = "CHOOSE_PARITY_RESPONSE")]
    ChooseParityResponse {
        /// Match id.
        match_id: String,
        /// The choice.
        parity_choice: Parity,
    },
    /// Referee → player.
    #[serde(rename = "GAME_OVER")]
    GameOver {
        /// Final result.
        result: MatchResult,
    },
    /// Referee → league manager.
    #[serde(rename = "MATCH_RESULT_REPORT")]
    MatchResultReport {
        /// Final result.
        result: MatchResult,
    },
    /// League manager → players.
    #[serde(rename = "ROUND_ANNOUNCEMENT")]
    RoundAnnouncement {
        /// Round id.
        round_id: u32,
        /// Matches of the round.
        matches: Vec<MatchSummary>,
    },
    /// League manager → players.
    #[serde(rename = "LEAGUE_STANDINGS_UPDATE")]
    LeagueStandingsUpdate {
        /// Round that just completed.
        round_id: u32,
        /// Ranked standings.
        standings: Vec<StandingsEntry>,
    },
    /// League manager → players.
    #[serde(rename = "ROUND_COMPLETED")]
    RoundCompleted {
        /// Round that just completed.
        round_id: u32,
        /// Next round, if any.
        next_round_id: Option<u32>,
    },
    /// League manager → players.
    #[serde(rename = "LEAGUE_COMPLETED")]
    LeagueCompleted {
        /// Rounds played.
        total_rounds: u32,
        /// Matches played.
        total_matches: u32,
        /// First of the final standings, if anybody scored.
        champion_id: Option<String>,
        /// Ranked final standings.
        standings: Vec<StandingsEntry>,
    },
    /// Generic positive answer.
    #[serde(rename = "ACK")]
    Ack {},
    /// Generic negative answer.
    #[serde(rename = "ERROR")]
    Error {
        /// Classification.
        error_code: ErrorCode,
        /// Detail.
        error_message: String,
    },
}

/// Closed set of message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MessageKind {
    RegisterRequest,
    RegisterResponse,
    StartMatch,
    GameInvitation,
    GameJoinAck,
    ChooseParityCall,
    ChooseParityResponse,
    GameOver,
    MatchResultReport,
    RoundAnnouncement,
    LeagueStandingsUpdate,
    RoundCompleted,
    LeagueCompleted,
    Ack,
    Error,
}

/// Wire names, canonical names first, then accepted aliases.
const WIRE_NAMES: &[(&str, MessageKind)] = &[
    ("REGISTER_REQUEST", MessageKind::RegisterRequest),
    ("REGISTER_RESPONSE", MessageKind::RegisterResponse),
    ("START_MATCH", MessageKind::StartMatch),
    ("GAME_INVITATION", MessageKind::GameInvitation),
    ("GAME_JOIN_ACK", MessageKind::GameJoinAck),
    ("CHOOSE_PARITY_CALL", MessageKind::ChooseParityCall),
    ("CHOOSE_PARITY_RESPONSE", MessageKind::ChooseParityResponse),
    ("GAME_OVER", MessageKind::GameOver),
    ("MATCH_RESULT_REPORT", MessageKind::MatchResultReport),
    ("ROUND_ANNOUNCEMENT", MessageKind::RoundAnnouncement),
    ("LEAGUE_STANDINGS_UPDATE", MessageKind::LeagueStandingsUpdate),
    ("ROUND_COMPLETED", MessageKind::RoundCompleted),
    ("LEAGUE_COMPLETED", MessageKind::LeagueCompleted),
    ("ACK", MessageKind::Ack),
    ("ERROR", MessageKind::Error),
    // aliases
    ("LEAGUE_REGISTER_REQUEST", MessageKind::RegisterRequest),
    ("REFEREE_REGISTER_REQUEST", MessageKind::RegisterRequest),
    ("LEAGUE_REGISTER_RESPONSE", MessageKind::RegisterResponse),
    ("REFEREE_REGISTER_RESPONSE", MessageKind::RegisterResponse),
    ("JOIN_ACK", MessageKind::GameJoinAck),
    ("PARITY_CALL", MessageKind::ChooseParityCall),
    ("PARITY_CHOICE", MessageKind::ChooseParityResponse),
    ("MATCH_RESULT", MessageKind::MatchResultReport),
    ("STANDINGS_UPDATE", MessageKind::LeagueStandingsUpdate),
    ("LEAGUE_ERROR", MessageKind::Error),
    ("GAME_ERROR", MessageKind::Error),
];

impl MessageKind {
    /// Resolve a wire name, aliases included. Case-sensitive.
    pub fn from_wire(name: &str) -> Option<MessageKind> {
        WIRE_NAMES
            .iter()
            .find_map(|(wire, kind)| (*wire == name).then_some(*kind))
    }

    /// Canonical wire name.
    pub fn as_str(self) -> &'static str {
        WIRE_NAMES
            .iter()
            .find_map(|(wire, kind)| (*kind == self).then_some(*wire))
            .unwrap_or("ERROR")
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    /// Kind of this payload.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::RegisterRequest { .. } => MessageKind::RegisterRequest,
            Payload::RegisterResponse { .. } => MessageKind::RegisterResponse,
            Payload::StartMatch { .. } => MessageKind::StartMatch,
            Payload::GameInvitation { .. } => MessageKind::GameInvitation,
            Payload::GameJoinAck { .. } => MessageKind::GameJoinAck,
            Payload::ChooseParityCall { .. } => MessageKind::ChooseParityCall,
            Payload::ChooseParityResponse { .. } => MessageKind::ChooseParityResponse,
            Payload::GameOver { .. } => MessageKind::GameOver,
            Payload::MatchResultReport { .. } => MessageKind::MatchResultReport,
            Payload::RoundAnnouncement { .. } => MessageKind::RoundAnnouncement,
            Payload::LeagueStandingsUpdate { .. } => MessageKind::LeagueStandingsUpdate,
            Payload::RoundCompleted { .. } => MessageKind::RoundCompleted,
            Payload::LeagueCompleted { .. } => MessageKind::LeagueCompleted,
            Payload::Ack {} => MessageKind::Ack,
            Payload::Error { .. } => MessageKind::Error,
        }
    }
}

/// A complete, validated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    envelope: Envelope,
    #[serde(flatten)]
    payload: Payload,
}

impl Message {
    /// Start a new request.
    pub fn request(
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        auth_token: Option<String>,
        payload: Payload,
    ) -> Message {
        Message {
            envelope: Envelope {
                protocol_version: PROTOCOL_VERSION.to_string(),
                sender_id: sender_id.into(),
                timestamp: OffsetDateTime::now_utc(),
                conversation_id: conversation_id.into(),
                auth_token,
            },
            payload,
        }
    }

    /// Answer `request`, echoing its conversation id.
    pub fn reply_to(
        request: &Message,
        sender_id: impl Into<String>,
        auth_token: Option<String>,
        payload: Payload,
    ) -> Message {
        Message::request(
            sender_id,
            request.envelope.conversation_id.clone(),
            auth_token,
            payload,
        )
    }

    /// Answer `request` with an `ERROR` message describing `error`.
    pub fn error_reply(
        request: &Message,
        sender_id: impl Into<String>,
        error: &LeagueError,
    ) -> Message {
        Message::rejection(sender_id, request.envelope.conversation_id.clone(), error)
    }

    /// `ERROR` message for a request that may not even have been parsed.
    pub fn rejection(
        sender_id: impl Into<String>,
        conversation_id: impl Into<String>,
        error: &LeagueError,
    ) -> Message {
        Message::request(
            sender_id,
            conversation_id,
            None,
            Payload::Error {
                error_code: error.code(),
                error_message: error.to_string(),
            },
        )
    }

    /// Fresh random conversation id.
    pub fn new_conversation_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Envelope fields.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Kind-specific content.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consume the message, keeping the payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Kind of the message.
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Conversation id.
    pub fn conversation_id(&self) -> &str {
        &self.envelope.conversation_id
    }

    /// Sender id.
    pub fn sender_id(&self) -> &str {
        &self.envelope.sender_id
    }

    /// Turn an `ERROR` reply into the matching error, pass anything else through.
    pub fn into_result(self) -> Result<Message, LeagueError> {
        match self.payload {
            Payload::Error {
                error_code,
                error_message,
            } => Err(LeagueError::from_remote(error_code, error_message)),
            _ => Ok(self),
        }
    }

    /// Fail unless this message belongs to conversation `expected`.
    pub fn check_conversation(&self, expected: &str) -> Result<(), LeagueError> {
        if self.envelope.conversation_id != expected {
            return Err(LeagueError::Validation(format!(
                "conversation id mismatch: expected '{expected}', got '{}'",
                self.envelope.conversation_id
            )));
        }
        Ok(())
    }

    /// Encode as a single JSON line (no embedded newline).
    pub fn to_json(&self) -> Result<String, LeagueError> {
        serde_json::to_string(self).map_err(|e| LeagueError::Validation(e.to_string()))
    }

    /// Decode and validate a message.
    pub fn parse(text: &str) -> Result<Message, LeagueError> {
        let mut value: Value = serde_json::from_str(text)
            .map_err(|e| LeagueError::Validation(format!("malformed message: {e}")))?;

        let object = value
            .as_object_mut()
            .ok_or_else(|| LeagueError::Validation("message is not a JSON object".to_string()))?;
        let wire_kind = object
            .get("message_kind")
            .and_then(Value::as_str)
            .ok_or_else(|| LeagueError::Validation("missing field `message_kind`".to_string()))?;
        let kind = MessageKind::from_wire(wire_kind).ok_or_else(|| {
            LeagueError::Validation(format!("unknown message kind '{wire_kind}'"))
        })?;
        object.insert(
            "message_kind".to_string(),
            Value::String(kind.as_str().to_string()),
        );

        let message: Message = serde_json::from_value(value)
            .map_err(|e| LeagueError::Validation(format!("invalid {kind}: {e}")))?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), LeagueError> {
        let envelope = &self.envelope;
        if envelope.protocol_version != PROTOCOL_VERSION {
            return Err(LeagueError::Validation(format!(
                "unsupported protocol version '{}', expected '{PROTOCOL_VERSION}'",
                envelope.protocol_version
            )));
        }
        if envelope.sender_id.is_empty() {
            return Err(LeagueError::Validation("empty `sender_id`".to_string()));
        }
        if envelope.conversation_id.is_empty() {
            return Err(LeagueError::Validation("empty `conversation_id`".to_string()));
        }
        match &self.payload {
            Payload::MatchResultReport { result } | Payload::GameOver { result } => {
                result.validate()
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice_json(parity: &str) -> String {
        format!(
            r#"{{"protocol_version":"league.v2","sender_id":"p1","timestamp":"2026-01-01T10:00:00Z",
            "conversation_id":"c-1","auth_token":"tok","message_kind":"CHOOSE_PARITY_RESPONSE",
            "match_id":"R1M1","parity_choice":"{parity}"}}"#
        )
    }

    #[test]
    fn parse_valid_choice() {
        let message = Message::parse(&choice_json("even")).unwrap();
        assert_eq!(message.kind(), MessageKind::ChooseParityResponse);
        assert_eq!(message.conversation_id(), "c-1");
        assert!(message.envelope().token_matches("tok"));
        match message.payload() {
            Payload::ChooseParityResponse { parity_choice, .. } => {
                assert_eq!(*parity_choice, Parity::Even)
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn parity_is_case_sensitive() {
        for bad in ["Even", "EVEN", "odd ", "2"] {
            let err = Message::parse(&choice_json(bad)).unwrap_err();
            assert_eq!(err.code(), ErrorCode::Validation, "{bad}");
        }
    }

    #[test]
    fn missing_envelope_field_rejected() {
        let text = r#"{"protocol_version":"league.v2","timestamp":"2026-01-01T10:00:00Z",
            "conversation_id":"c-1","message_kind":"ACK"}"#;
        let err = Message::parse(text).unwrap_err();
        assert!(matches!(err, LeagueError::Validation(m) if m.contains("sender_id")));
    }

    #[test]
    fn foreign_protocol_version_rejected() {
        let text = choice_json("odd").replace("league.v2", "league.v1");
        assert!(matches!(
            Message::parse(&text),
            Err(LeagueError::Validation(m)) if m.contains("league.v1")
        ));
    }

    #[test]
    fn aliases_resolve_to_canonical_kind() {
        let text = choice_json("odd").replace("CHOOSE_PARITY_RESPONSE", "PARITY_CHOICE");
        let message = Message::parse(&text).unwrap();
        assert_eq!(message.kind(), MessageKind::ChooseParityResponse);
        assert!(message.to_json().unwrap().contains("\"CHOOSE_PARITY_RESPONSE\""));

        let misnamed = choice_json("odd").replace("CHOOSE_PARITY_RESPONSE", "parity_choice");
        assert!(Message::parse(&misnamed).is_err());
    }

    #[test]
    fn reply_echoes_conversation() {
        let request = Message::request(
            "referee",
            "conv-42",
            Some("t".into()),
            Payload::GameInvitation {
                match_id: "R1M1".into(),
                round_id: 1,
                opponent_id: "p2".into(),
            },
        );
        let reply = Message::reply_to(
            &request,
            "p1",
            None,
            Payload::GameJoinAck {
                match_id: "R1M1".into(),
                accept: true,
            },
        );
        assert!(reply.check_conversation("conv-42").is_ok());
        assert!(reply.check_conversation("conv-43").is_err());

        let parsed = Message::parse(&reply.to_json().unwrap()).unwrap();
        assert_eq!(parsed, reply);
    }

    #[test]
    fn error_reply_becomes_error() {
        let request = Message::request("x", "c", None, Payload::Ack {});
        let reply = Message::error_reply(&request, "league", &LeagueError::NotFound("R9M9".into()));
        let parsed = Message::parse(&reply.to_json().unwrap()).unwrap();
        assert_eq!(
            parsed.into_result().unwrap_err(),
            LeagueError::NotFound("not found: R9M9".into())
        );
    }

    #[test]
    fn inconsistent_result_rejected() {
        let mut result = MatchResult {
            match_id: "R1M1".into(),
            round_id: 1,
            player_a_id: "a".into(),
            player_b_id: "b".into(),
            winner_id: Some("c".into()),
            is_draw: false,
            reason: OutcomeReason::Normal,
            drawn_number: Some(4),
            choices: BTreeMap::new(),
        };
        assert!(result.validate().is_err());
        result.winner_id = Some("a".into());
        assert!(result.validate().is_ok());
        result.is_draw = true;
        assert!(result.validate().is_err());
        result.winner_id = None;
        result.reason = OutcomeReason::DoubleForfeit;
        assert!(result.validate().is_err());
        result.is_draw = false;
        assert!(result.validate().is_ok());
    }

    #[test]
    fn parity_of_number() {
        assert_eq!(Parity::of(4), Parity::Even);
        assert_eq!(Parity::of(7), Parity::Odd);
    }
}
