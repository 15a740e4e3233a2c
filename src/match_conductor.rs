//! Drives one even/odd match from invitation to report.
//!
//! A [`MatchConductor`] is created by a referee for every `START_MATCH` it accepts and runs in its
//! own task. It owns the match document and walks it through:
//!
//! ```text
//! WAITING_FOR_PLAYERS ──► COLLECTING_CHOICES ──► RESOLVING ──► FINISHED
//!          │                     │                   │
//!          └─────────────────────┴───────────────────┴──────► FAILED
//! ```
//!
//! with two shortcuts to `FINISHED` when a player misses a deadline. Missing a deadline covers
//! every way a player can fail to answer: silence, refusal, transport failure after retries, or an
//! invalid reply. One player missing gives a technical loss, both missing a double forfeit.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn, Instrument};

use crate::configuration::Configuration;
use crate::error::{ErrorCode, LeagueError};
use crate::message::{MatchResult, Message, OutcomeReason, Parity, Participant, Payload};
use crate::resilience::ResilientClient;
use crate::store::{match_document, DocumentStore};

/// Numbers the referee may draw.
pub const DRAW_RANGE: RangeInclusive<u32> = 1..=10;

/// Lifecycle of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    /// Invitations sent, waiting for both join acknowledgments.
    WaitingForPlayers,
    /// Both joined, waiting for both choices.
    CollectingChoices,
    /// Both chose, drawing the number.
    Resolving,
    /// Outcome decided.
    Finished,
    /// The match could not be run.
    Failed,
}

impl MatchState {
    /// No transition leaves this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, MatchState::Finished | MatchState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_become(self, next: MatchState) -> bool {
        use MatchState::*;
        match (self, next) {
            (WaitingForPlayers, CollectingChoices) => true,
            (CollectingChoices, Resolving) => true,
            // a forfeit ends the match early
            (WaitingForPlayers | CollectingChoices | Resolving, Finished) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Persisted state of one match, owned by its referee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// Match id.
    pub match_id: String,
    /// Round of the match.
    pub round_id: u32,
    /// First player.
    pub player_a_id: String,
    /// Second player.
    pub player_b_id: String,
    /// Referee running the match.
    pub referee_id: String,
    /// Conversation id of every leg.
    pub conversation_id: String,
    /// Current state.
    pub state: MatchState,
    /// Drawn number, once resolved.
    pub drawn_number: Option<u32>,
    /// Choices received so far.
    pub choices: BTreeMap<String, Parity>,
    /// Winner, if any.
    pub winner_id: Option<String>,
    /// How the match ended, once terminal.
    pub outcome: Option<OutcomeReason>,
    /// Creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Time the match reached a terminal state.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub finished_at: Option<OffsetDateTime>,
}

impl MatchRecord {
    /// Final result, once the match has an outcome.
    pub fn result(&self) -> Option<MatchResult> {
        let reason = self.outcome?;
        Some(MatchResult {
            match_id: self.match_id.clone(),
            round_id: self.round_id,
            player_a_id: self.player_a_id.clone(),
            player_b_id: self.player_b_id.clone(),
            winner_id: self.winner_id.clone(),
            is_draw: reason == OutcomeReason::Normal && self.winner_id.is_none(),
            reason,
            drawn_number: self.drawn_number,
            choices: self.choices.clone(),
        })
    }

    #[cfg(test)]
    pub(crate) fn from_result(result: &MatchResult, referee_id: &str, state: MatchState) -> Self {
        Self {
            match_id: result.match_id.clone(),
            round_id: result.round_id,
            player_a_id: result.player_a_id.clone(),
            player_b_id: result.player_b_id.clone(),
            referee_id: referee_id.to_string(),
            conversation_id: format!("c-{}", result.match_id),
            state,
            drawn_number: result.drawn_number,
            choices: result.choices.clone(),
            winner_id: result.winner_id.clone(),
            outcome: Some(result.reason),
            created_at: OffsetDateTime::now_utc(),
            finished_at: Some(OffsetDateTime::now_utc()),
        }
    }
}

/// Source of the referee's number.
pub trait NumberDrawer: Send + Sync {
    /// A number in [`DRAW_RANGE`].
    fn draw(&self) -> u32;
}

/// Uniform draw over [`DRAW_RANGE`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomDraw;

impl NumberDrawer for RandomDraw {
    fn draw(&self) -> u32 {
        rand::thread_rng().gen_range(DRAW_RANGE)
    }
}

/// Always the same number.
#[derive(Debug, Clone, Copy)]
pub struct FixedDraw(pub u32);

impl NumberDrawer for FixedDraw {
    fn draw(&self) -> u32 {
        self.0
    }
}

/// How long the conductor waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// For a join acknowledgment.
    pub join: Duration,
    /// For a parity choice.
    pub choice: Duration,
    /// Per attempt, for game-over notices and the result report.
    pub request: Duration,
}

impl From<&Configuration> for Deadlines {
    fn from(config: &Configuration) -> Self {
        Self {
            join: config.join_timeout,
            choice: config.choice_timeout,
            request: config.request_timeout,
        }
    }
}

/// Everything a referee lends to its conductors.
#[derive(Clone)]
pub struct RefereeContext {
    /// Referee id, used as sender.
    pub referee_id: String,
    /// Token issued to the referee at registration.
    pub token: String,
    /// Where results are reported.
    pub league_endpoint: String,
    /// Client shared by the referee's matches.
    pub client: ResilientClient,
    /// Where match documents go.
    pub store: DocumentStore,
    /// Number source.
    pub drawer: Arc<dyn NumberDrawer>,
    /// Waiting budgets.
    pub deadlines: Deadlines,
}

/// Content of a `START_MATCH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchAssignment {
    /// Match id.
    pub match_id: String,
    /// Round of the match.
    pub round_id: u32,
    /// Conversation id of the dispatch, reused for every leg.
    pub conversation_id: String,
    /// First player.
    pub player_a: Participant,
    /// Second player.
    pub player_b: Participant,
}

/// Runs one match.
pub struct MatchConductor {
    ctx: RefereeContext,
    player_a: Participant,
    player_b: Participant,
    record: MatchRecord,
}

impl MatchConductor {
    /// New match in `WAITING_FOR_PLAYERS`, not persisted yet.
    pub fn new(ctx: RefereeContext, assignment: MatchAssignment) -> Self {
        let record = MatchRecord {
            match_id: assignment.match_id,
            round_id: assignment.round_id,
            player_a_id: assignment.player_a.player_id.clone(),
            player_b_id: assignment.player_b.player_id.clone(),
            referee_id: ctx.referee_id.clone(),
            conversation_id: assignment.conversation_id,
            state: MatchState::WaitingForPlayers,
            drawn_number: None,
            choices: BTreeMap::new(),
            winner_id: None,
            outcome: None,
            created_at: OffsetDateTime::now_utc(),
            finished_at: None,
        };
        Self {
            ctx,
            player_a: assignment.player_a,
            player_b: assignment.player_b,
            record,
        }
    }

    /// Current document.
    pub fn record(&self) -> &MatchRecord {
        &self.record
    }

    /// Play the match to a terminal state, report it, and return the final document.
    #[instrument(
        skip_all,
        fields(match_id = %self.record.match_id, referee = %self.ctx.referee_id)
    )]
    pub async fn run(mut self) -> MatchRecord {
        let result = match self.conduct().await {
            Ok(result) => result,
            Err(e) => {
                error!("match aborted: {e}");
                self.abort().await
            }
        };
        self.report(result).await;
        self.record
    }

    async fn conduct(&mut self) -> Result<MatchResult, LeagueError> {
        self.check_assignment()?;
        self.persist(&self.record).await?;

        let (join_a, join_b) = tokio::join!(
            self.request_join(&self.player_a, &self.player_b.player_id),
            self.request_join(&self.player_b, &self.player_a.player_id),
        );
        let forfeit = self.forfeit(
            missed(&self.player_a, join_a),
            missed(&self.player_b, join_b),
        );
        if let Some(forfeit) = forfeit {
            return self.finish(forfeit).await;
        }

        self.advance(MatchState::CollectingChoices).await?;
        let (choice_a, choice_b) = tokio::join!(
            self.request_choice(&self.player_a, &self.player_b.player_id),
            self.request_choice(&self.player_b, &self.player_a.player_id),
        );
        for (player, choice) in [(&self.player_a, &choice_a), (&self.player_b, &choice_b)] {
            if let Ok(parity) = choice {
                self.record.choices.insert(player.player_id.clone(), *parity);
            }
        }
        let (choice_a, choice_b) = match (choice_a, choice_b) {
            (Ok(a), Ok(b)) => (a, b),
            (a, b) => {
                let forfeit = self
                    .forfeit(missed(&self.player_a, a), missed(&self.player_b, b))
                    .ok_or_else(|| {
                        LeagueError::LifecycleConflict("forfeit without a miss".into())
                    })?;
                return self.finish(forfeit).await;
            }
        };

        self.advance(MatchState::Resolving).await?;
        let number = self.ctx.drawer.draw();
        if !DRAW_RANGE.contains(&number) {
            return Err(LeagueError::Validation(format!(
                "drawn number {number} out of range"
            )));
        }
        self.record.drawn_number = Some(number);
        let parity = Parity::of(number);
        let winner = match (choice_a == parity, choice_b == parity) {
            (true, false) => Some(self.player_a.player_id.clone()),
            (false, true) => Some(self.player_b.player_id.clone()),
            _ => None,
        };
        info!(number, %parity, ?winner, "number drawn");
        let outcome = self.outcome(winner, OutcomeReason::Normal);
        self.finish(outcome).await
    }

    fn check_assignment(&self) -> Result<(), LeagueError> {
        let (a, b) = (&self.player_a, &self.player_b);
        if a.player_id.is_empty() || b.player_id.is_empty() {
            return Err(LeagueError::Validation("missing player id".to_string()));
        }
        if a.player_id == b.player_id {
            return Err(LeagueError::Validation(format!(
                "{} cannot play against itself",
                a.player_id
            )));
        }
        if a.endpoint.is_empty() || b.endpoint.is_empty() {
            return Err(LeagueError::Validation("missing player endpoint".to_string()));
        }
        Ok(())
    }

    async fn request_join(
        &self,
        player: &Participant,
        opponent_id: &str,
    ) -> Result<(), LeagueError> {
        let invitation = self.request(Payload::GameInvitation {
            match_id: self.record.match_id.clone(),
            round_id: self.record.round_id,
            opponent_id: opponent_id.to_string(),
        });
        let answer = self.ask(player, invitation, self.ctx.deadlines.join).await?;
        match answer.into_payload() {
            Payload::GameJoinAck { match_id, accept } if match_id == self.record.match_id => {
                if accept {
                    Ok(())
                } else {
                    Err(LeagueError::Validation("invitation declined".to_string()))
                }
            }
            other => Err(LeagueError::Validation(format!(
                "unexpected {} in answer to an invitation",
                other.kind()
            ))),
        }
    }

    async fn request_choice(
        &self,
        player: &Participant,
        opponent_id: &str,
    ) -> Result<Parity, LeagueError> {
        let deadline = self.ctx.deadlines.choice;
        let call = self.request(Payload::ChooseParityCall {
            match_id: self.record.match_id.clone(),
            opponent_id: opponent_id.to_string(),
            timeout_ms: deadline.as_millis() as u64,
        });
        match self.ask(player, call, deadline).await?.into_payload() {
            Payload::ChooseParityResponse {
                match_id,
                parity_choice,
            } if match_id == self.record.match_id => Ok(parity_choice),
            other => Err(LeagueError::Validation(format!(
                "unexpected {} in answer to a parity call",
                other.kind()
            ))),
        }
    }

    fn request(&self, payload: Payload) -> Message {
        Message::request(
            &self.ctx.referee_id,
            &self.record.conversation_id,
            Some(self.ctx.token.clone()),
            payload,
        )
    }

    async fn ask(
        &self,
        player: &Participant,
        request: Message,
        deadline: Duration,
    ) -> Result<Message, LeagueError> {
        let client = self.ctx.client.clone();
        let endpoint = player.endpoint.clone();
        let what = format!("{} ({})", player.player_id, request.kind());
        let reply = within_deadline(what, deadline, async move {
            client.call(&endpoint, request, deadline).await
        })
        .await?;
        if reply.sender_id() != player.player_id {
            return Err(LeagueError::Authentication(format!(
                "answer from {} on behalf of {}",
                reply.sender_id(),
                player.player_id
            )));
        }
        Ok(reply)
    }

    /// Outcome when at least one player missed, `None` when both answered.
    fn forfeit(&self, a_missed: bool, b_missed: bool) -> Option<MatchResult> {
        match (a_missed, b_missed) {
            (false, false) => None,
            (false, true) => Some(self.outcome(
                Some(self.player_a.player_id.clone()),
                OutcomeReason::TechnicalLoss,
            )),
            (true, false) => Some(self.outcome(
                Some(self.player_b.player_id.clone()),
                OutcomeReason::TechnicalLoss,
            )),
            (true, true) => Some(self.outcome(None, OutcomeReason::DoubleForfeit)),
        }
    }

    fn outcome(&self, winner_id: Option<String>, reason: OutcomeReason) -> MatchResult {
        MatchResult {
            match_id: self.record.match_id.clone(),
            round_id: self.record.round_id,
            player_a_id: self.player_a.player_id.clone(),
            player_b_id: self.player_b.player_id.clone(),
            is_draw: reason == OutcomeReason::Normal && winner_id.is_none(),
            winner_id,
            reason,
            drawn_number: self.record.drawn_number,
            choices: self.record.choices.clone(),
        }
    }

    async fn finish(&mut self, result: MatchResult) -> Result<MatchResult, LeagueError> {
        self.record.winner_id = result.winner_id.clone();
        self.record.outcome = Some(result.reason);
        self.advance(MatchState::Finished).await?;
        self.announce(&result);
        Ok(result)
    }

    async fn abort(&mut self) -> MatchResult {
        self.record.winner_id = None;
        self.record.outcome = Some(OutcomeReason::Aborted);
        if !self.record.state.is_terminal() {
            if let Err(e) = self.advance(MatchState::Failed).await {
                error!("could not persist failed match: {e}");
                self.record.state = MatchState::Failed;
                self.record.finished_at = Some(OffsetDateTime::now_utc());
            }
        }
        self.outcome(None, OutcomeReason::Aborted)
    }

    /// Move to `next`, persisting before the change becomes visible.
    async fn advance(&mut self, next: MatchState) -> Result<(), LeagueError> {
        let from = self.record.state;
        if !from.can_become(next) {
            return Err(LeagueError::LifecycleConflict(format!(
                "match {} cannot go from {from:?} to {next:?}",
                self.record.match_id
            )));
        }
        let mut staged = self.record.clone();
        staged.state = next;
        if next.is_terminal() {
            staged.finished_at = Some(OffsetDateTime::now_utc());
        }
        self.persist(&staged).await?;
        self.record = staged;
        info!(?from, to = ?next, "match state changed");
        Ok(())
    }

    async fn persist(&self, record: &MatchRecord) -> Result<(), LeagueError> {
        self.ctx
            .store
            .write_async(&match_document(&record.match_id), record)
            .await
    }

    /// Best-effort `GAME_OVER` to both players, without holding up the report.
    fn announce(&self, result: &MatchResult) {
        for player in [&self.player_a, &self.player_b] {
            let client = self.ctx.client.clone();
            let endpoint = player.endpoint.clone();
            let notice = self.request(Payload::GameOver {
                result: result.clone(),
            });
            let timeout = self.ctx.deadlines.request;
            tokio::spawn(
                async move {
                    if let Err(e) = client.call(&endpoint, notice, timeout).await {
                        warn!(%endpoint, "game over not delivered: {e}");
                    }
                }
                .in_current_span(),
            );
        }
    }

    async fn report(&self, result: MatchResult) {
        let report = self.request(Payload::MatchResultReport { result });
        match self
            .ctx
            .client
            .call(&self.ctx.league_endpoint, report, self.ctx.deadlines.request)
            .await
        {
            Ok(_) => info!("result reported"),
            Err(e) => error!("result report failed: {e}"),
        }
    }
}

fn missed<T>(player: &Participant, answer: Result<T, LeagueError>) -> bool {
    match answer {
        Ok(_) => false,
        Err(e) => {
            warn!(player = %player.player_id, "missed deadline: {e}");
            true
        }
    }
}

/// Await `call` for at most `deadline`. The call keeps running in the background after the
/// deadline so a late answer can be logged; its value is dropped.
async fn within_deadline<T, F>(
    what: String,
    deadline: Duration,
    call: F,
) -> Result<T, LeagueError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, LeagueError>> + Send + 'static,
{
    let mut handle = tokio::spawn(call.in_current_span());
    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(join_error)) => Err(LeagueError::Transient {
            code: ErrorCode::Internal,
            message: format!("call to {what} crashed: {join_error}"),
        }),
        Err(_elapsed) => {
            let error = LeagueError::timeout(&what);
            tokio::spawn(
                async move {
                    if let Ok(Ok(_)) = handle.await {
                        warn!(%what, "late answer discarded");
                    }
                }
                .in_current_span(),
            );
            Err(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::network::{LocalNetwork, MessageHandler};
    use crate::resilience::{BreakerPolicy, RetryPolicy};

    #[derive(Clone, Copy, Debug)]
    enum Script {
        Play(Parity),
        Decline,
        SilentOnJoin,
        SilentOnChoice,
        WrongMatch,
        /// Accepts the first invitation a second after the join deadline, later ones at once.
        LateJoin,
    }

    struct ScriptedPlayer {
        id: String,
        script: Script,
        invitations: AtomicUsize,
    }

    impl ScriptedPlayer {
        fn new(id: &str, script: Script) -> Self {
            Self {
                id: id.into(),
                script,
                invitations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for ScriptedPlayer {
        async fn handle(&self, message: Message) -> Message {
            if let Payload::GameInvitation { .. } = message.payload() {
                let seen = self.invitations.fetch_add(1, Ordering::SeqCst);
                if matches!(self.script, Script::LateJoin) && seen == 0 {
                    let join = Configuration::default().join_timeout;
                    tokio::time::sleep(join + Duration::from_secs(1)).await;
                }
            }
            let payload = match (message.payload(), self.script) {
                (Payload::GameInvitation { .. }, Script::SilentOnJoin)
                | (Payload::ChooseParityCall { .. }, Script::SilentOnChoice) => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
                (Payload::GameInvitation { match_id, .. }, script) => Payload::GameJoinAck {
                    match_id: match_id.clone(),
                    accept: !matches!(script, Script::Decline),
                },
                (Payload::ChooseParityCall { .. }, Script::WrongMatch) => {
                    Payload::ChooseParityResponse {
                        match_id: "R9M9".into(),
                        parity_choice: Parity::Odd,
                    }
                }
                (Payload::ChooseParityCall { match_id, .. }, script) => {
                    Payload::ChooseParityResponse {
                        match_id: match_id.clone(),
                        parity_choice: match script {
                            Script::Play(parity) => parity,
                            _ => Parity::Even,
                        },
                    }
                }
                _ => Payload::Ack {},
            };
            Message::reply_to(&message, &self.id, None, payload)
        }

        fn agent_id(&self) -> &str {
            &self.id
        }
    }

    /// Records every report; acknowledges them unless `unavailable`.
    #[derive(Default)]
    struct League {
        reports: Mutex<Vec<MatchResult>>,
        unavailable: bool,
    }

    #[async_trait]
    impl MessageHandler for League {
        async fn handle(&self, message: Message) -> Message {
            if let Payload::MatchResultReport { result } = message.payload() {
                self.reports.lock().unwrap().push(result.clone());
            }
            if self.unavailable {
                let down = LeagueError::unavailable("league is down");
                return Message::error_reply(&message, "league", &down);
            }
            Message::reply_to(&message, "league", None, Payload::Ack {})
        }

        fn agent_id(&self) -> &str {
            "league"
        }
    }

    struct Setup {
        _dir: tempfile::TempDir,
        store: DocumentStore,
        league: Arc<League>,
        player_a: Arc<ScriptedPlayer>,
        ctx: RefereeContext,
    }

    fn setup(a: Script, b: Script, number: u32) -> Setup {
        setup_with_league(a, b, number, League::default())
    }

    fn setup_with_league(a: Script, b: Script, number: u32, league: League) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        let network = LocalNetwork::new();
        let league = Arc::new(league);
        network.bind("league", league.clone());
        let player_a = Arc::new(ScriptedPlayer::new("A", a));
        network.bind("pa", player_a.clone());
        network.bind("pb", Arc::new(ScriptedPlayer::new("B", b)));
        let ctx = RefereeContext {
            referee_id: "REF".into(),
            token: "ref-token".into(),
            league_endpoint: "league".into(),
            client: ResilientClient::new(
                Arc::new(network),
                RetryPolicy::default(),
                BreakerPolicy::default(),
            ),
            store: store.clone(),
            drawer: Arc::new(FixedDraw(number)),
            deadlines: Deadlines::from(&Configuration::default()),
        };
        Setup {
            _dir: dir,
            store,
            league,
            player_a,
            ctx,
        }
    }

    fn assignment(a_endpoint: &str) -> MatchAssignment {
        MatchAssignment {
            match_id: "R1M1".into(),
            round_id: 1,
            conversation_id: "L-R1M1".into(),
            player_a: Participant {
                player_id: "A".into(),
                endpoint: a_endpoint.into(),
            },
            player_b: Participant {
                player_id: "B".into(),
                endpoint: "pb".into(),
            },
        }
    }

    async fn play(a: Script, b: Script, number: u32) -> (MatchRecord, Setup) {
        let setup = setup(a, b, number);
        let record = MatchConductor::new(setup.ctx.clone(), assignment("pa")).run().await;
        (record, setup)
    }

    fn reports(setup: &Setup) -> Vec<MatchResult> {
        setup.league.reports.lock().unwrap().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn even_odd_resolution() {
        let (record, setup) = play(Script::Play(Parity::Even), Script::Play(Parity::Odd), 8).await;
        assert_eq!(record.state, MatchState::Finished);
        assert_eq!(record.drawn_number, Some(8));
        assert_eq!(record.winner_id.as_deref(), Some("A"));
        assert_eq!(record.choices["A"], Parity::Even);
        assert_eq!(record.choices["B"], Parity::Odd);

        let reported = reports(&setup);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].reason, OutcomeReason::Normal);
        assert_eq!(reported[0].winner_id.as_deref(), Some("A"));

        let stored: MatchRecord = setup.store.read_required("matches/R1M1").unwrap();
        assert_eq!(stored, record);
        assert!(stored.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn same_choice_is_a_draw() {
        for number in [3, 6] {
            let (record, setup) =
                play(Script::Play(Parity::Odd), Script::Play(Parity::Odd), number).await;
            let result = record.result().unwrap();
            assert!(result.is_draw);
            assert_eq!(result.winner_id, None);
            assert_eq!(reports(&setup)[0], result);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_player_loses_at_join_deadline() {
        let start = Instant::now();
        let (record, setup) = play(Script::Play(Parity::Even), Script::SilentOnJoin, 2).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(record.state, MatchState::Finished);
        assert_eq!(record.outcome, Some(OutcomeReason::TechnicalLoss));
        assert_eq!(record.winner_id.as_deref(), Some("A"));
        assert!(record.choices.is_empty());
        assert_eq!(reports(&setup).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_join_is_discarded() {
        let setup = setup(Script::LateJoin, Script::Play(Parity::Odd), 2);
        let start = Instant::now();
        let record = MatchConductor::new(setup.ctx.clone(), assignment("pa")).run().await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(record.outcome, Some(OutcomeReason::TechnicalLoss));
        assert_eq!(record.winner_id.as_deref(), Some("B"));

        // the retried invitation is accepted after the decision
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(setup.player_a.invitations.load(Ordering::SeqCst), 2);
        let stored: MatchRecord = setup.store.read_required("matches/R1M1").unwrap();
        assert_eq!(stored, record);
        assert_eq!(reports(&setup), [record.result().unwrap()]);
    }

    #[tokio::test(start_paused = true)]
    async fn finished_document_survives_a_lost_report() {
        let league = League {
            unavailable: true,
            ..League::default()
        };
        let setup = setup_with_league(
            Script::Play(Parity::Even),
            Script::Play(Parity::Odd),
            4,
            league,
        );
        let record = MatchConductor::new(setup.ctx.clone(), assignment("pa")).run().await;
        assert_eq!(record.state, MatchState::Finished);
        assert_eq!(record.winner_id.as_deref(), Some("A"));
        // every attempt reached the league
        assert_eq!(reports(&setup).len(), RetryPolicy::default().max_attempts as usize);

        let stored: MatchRecord = setup.store.read_required("matches/R1M1").unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.result(), record.result());
    }

    #[tokio::test(start_paused = true)]
    async fn declining_is_a_technical_loss() {
        let (record, _setup) = play(Script::Decline, Script::Play(Parity::Odd), 2).await;
        assert_eq!(record.outcome, Some(OutcomeReason::TechnicalLoss));
        assert_eq!(record.winner_id.as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn both_silent_on_choice_is_a_double_forfeit() {
        let start = Instant::now();
        let (record, setup) = play(Script::SilentOnChoice, Script::SilentOnChoice, 2).await;
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(record.state, MatchState::Finished);
        let result = record.result().unwrap();
        assert_eq!(result.reason, OutcomeReason::DoubleForfeit);
        assert_eq!(result.winner_id, None);
        assert!(!result.is_draw);
        assert_eq!(reports(&setup)[0], result);
    }

    #[tokio::test(start_paused = true)]
    async fn answer_for_another_match_is_a_miss() {
        let (record, _setup) = play(Script::Play(Parity::Even), Script::WrongMatch, 2).await;
        assert_eq!(record.outcome, Some(OutcomeReason::TechnicalLoss));
        assert_eq!(record.winner_id.as_deref(), Some("A"));
        assert_eq!(record.choices.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_assignment_fails() {
        let setup = setup(Script::Play(Parity::Even), Script::Play(Parity::Even), 2);
        let record = MatchConductor::new(setup.ctx.clone(), assignment("")).run().await;
        assert_eq!(record.state, MatchState::Failed);
        assert_eq!(record.outcome, Some(OutcomeReason::Aborted));
        assert_eq!(reports(&setup)[0].reason, OutcomeReason::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn unpersistable_match_fails() {
        let setup = setup(Script::Play(Parity::Even), Script::Play(Parity::Odd), 2);
        std::fs::write(setup.store.root().join("matches"), b"in the way").unwrap();
        let record = MatchConductor::new(setup.ctx.clone(), assignment("pa")).run().await;
        assert_eq!(record.state, MatchState::Failed);
        let reported = reports(&setup);
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].reason, OutcomeReason::Aborted);
        assert_eq!(reported[0].winner_id, None);
    }

    #[tokio::test(start_paused = true)]
    async fn every_behaviour_reaches_a_terminal_state() {
        let scripts = [
            Script::Play(Parity::Even),
            Script::Play(Parity::Odd),
            Script::Decline,
            Script::SilentOnJoin,
            Script::SilentOnChoice,
            Script::WrongMatch,
            Script::LateJoin,
        ];
        for a in scripts {
            for b in scripts {
                let (record, setup) = play(a, b, 5).await;
                assert!(record.state.is_terminal(), "{a:?} vs {b:?}");
                let reported = reports(&setup);
                assert_eq!(reported.len(), 1, "{a:?} vs {b:?}");
                assert!(reported[0].validate().is_ok());
            }
        }
    }

    #[test]
    fn transition_table() {
        use MatchState::*;
        assert!(WaitingForPlayers.can_become(CollectingChoices));
        assert!(WaitingForPlayers.can_become(Finished));
        assert!(CollectingChoices.can_become(Resolving));
        assert!(Resolving.can_become(Finished));
        assert!(Resolving.can_become(Failed));
        assert!(!WaitingForPlayers.can_become(Resolving));
        assert!(!CollectingChoices.can_become(WaitingForPlayers));
        assert!(!Finished.can_become(Failed));
        assert!(!Failed.can_become(Finished));
        assert!(!Finished.can_become(Finished));
    }

    #[test]
    fn random_draw_stays_in_range() {
        for _ in 0..1000 {
            assert!(DRAW_RANGE.contains(&RandomDraw.draw()));
        }
    }
}
