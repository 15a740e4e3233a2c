//! The league manager.
//!
//! All league state lives in one `LeagueState` owned by a single control-loop task. The outside
//! world talks to that task through a [`LeagueHandle`] (commands with one-shot replies) and, over
//! the network, through a [`LeagueEndpoint`]. Remote calls never run inside the loop: they are
//! spawned with copies of what they need and report back as commands, so the loop never waits on
//! the network and never sees two operations interleave.
//!
//! Round progression:
//!
//! 1. `start_league` schedules every round, persists them, blanks the standings and activates
//!    round 1: its matches are dispatched to their referees and announced to every player.
//! 2. Referees report results; each accepted report is queued to the result processor.
//! 3. Each processed result closes its match. When every match of the active round is closed, the
//!    round completes, standings are broadcast, and the next round is activated, or the league
//!    completes.
//!
//! Recovery: a report can be lost after all its retries, and a dispatch can fail even though the
//! referee received it. Neither closes a match. A dispatch the referee never confirmed leaves the
//! match unconfirmed, still open to its report. Every activated round arms a deadline; when it
//! expires, each match of the round still waiting for a report is settled from its match
//! document: a terminal document is fed to the result processor as if reported, anything else
//! closes the match as failed. [`LeagueHandle::reconcile`] runs the same sweep on demand, without
//! closing anything.
//!
//! Broadcasts go through one queue per player, so every player receives the notices in the
//! order they were emitted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, instrument, warn, Instrument};

use crate::agent::{Credentials, Registry};
use crate::configuration::Configuration;
use crate::error::{ErrorCode, LeagueError};
use crate::match_conductor::MatchRecord;
use crate::message::{AgentType, MatchResult, Message, Participant, Payload, StandingsEntry};
use crate::network::{MessageHandler, Transport};
use crate::resilience::ResilientClient;
use crate::result_processor::{
    Processing, ProcessedResult, ResultProcessor, ResultSubmitter, Standings,
};
use crate::scheduler::{schedule, MatchProgress, Round, RoundStatus, ScheduledMatch};
use crate::store::{match_document, DocumentStore, ROUNDS_DOCUMENT};

/// Sender id of every message the league manager emits.
pub const LEAGUE_MANAGER_ID: &str = "league-manager";

/// Where the league stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeagueStatus {
    /// Accepting registrations.
    NotStarted,
    /// Playing `round_id`.
    Running {
        /// Active round.
        round_id: u32,
    },
    /// Every round completed.
    Completed,
}

/// Copy of the league state at one point in time.
#[derive(Debug, Clone)]
pub struct LeagueSnapshot {
    /// Status.
    pub status: LeagueStatus,
    /// Every round with its matches.
    pub rounds: Vec<Round>,
    /// Ranked standings as last processed.
    pub standings: Vec<StandingsEntry>,
    /// Registered players, in registration order.
    pub players: Vec<String>,
    /// Registered referees, in registration order.
    pub referees: Vec<String>,
}

/// Outcome of a result report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReportDisposition {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RoundEnd {
    round_id: u32,
    next_index: Option<usize>,
    next_round_id: Option<u32>,
}

/// Authoritative league state. Only the control loop touches it.
#[derive(Debug)]
struct LeagueState {
    league_id: String,
    league_token: String,
    min_players: usize,
    status: LeagueStatus,
    registry: Registry,
    rounds: Vec<Round>,
    current: Option<usize>,
    standings: Vec<StandingsEntry>,
}

impl LeagueState {
    /// Empty league waiting for `min_players` players.
    fn new(league_id: impl Into<String>, min_players: usize) -> Self {
        Self {
            league_id: league_id.into(),
            league_token: uuid::Uuid::new_v4().to_string(),
            min_players: min_players.max(2),
            status: LeagueStatus::NotStarted,
            registry: Registry::new(),
            rounds: vec![],
            current: None,
            standings: vec![],
        }
    }

    fn register(
        &mut self,
        agent_type: AgentType,
        agent_id: &str,
        endpoint: &str,
    ) -> Result<Credentials, LeagueError> {
        if self.status != LeagueStatus::NotStarted {
            return Err(LeagueError::LifecycleConflict(
                "registrations are closed once the league started".to_string(),
            ));
        }
        let record = self.registry.register(agent_type, agent_id, endpoint)?;
        info!(%agent_type, agent_id, endpoint, "agent registered");
        Ok(Credentials {
            agent_id: record.agent_id.clone(),
            issued_token: record.issued_token.clone(),
            league_token: self.league_token.clone(),
        })
    }

    /// Schedule the league without changing anything yet.
    fn plan(&self) -> Result<Vec<Round>, LeagueError> {
        if self.status != LeagueStatus::NotStarted {
            return Err(LeagueError::LifecycleConflict("league already started".to_string()));
        }
        let players = self.registry.ids(AgentType::Player);
        let referees = self.registry.ids(AgentType::Referee);
        if players.len() < self.min_players || referees.is_empty() {
            return Err(LeagueError::LifecycleConflict(format!(
                "quorum not met: {} of {} players, {} referees",
                players.len(),
                self.min_players,
                referees.len()
            )));
        }
        schedule(&self.league_id, &players, &referees)
    }

    fn begin(&mut self, rounds: Vec<Round>) {
        self.standings = Standings::new(&self.registry.ids(AgentType::Player)).ranked();
        self.rounds = rounds;
    }

    /// Activate round `index` and return its matches, now dispatched.
    fn activate(&mut self, index: usize) -> Vec<ScheduledMatch> {
        self.current = Some(index);
        let round = &mut self.rounds[index];
        round.status = RoundStatus::Active;
        for m in &mut round.matches {
            m.progress = MatchProgress::Dispatched;
        }
        self.status = LeagueStatus::Running {
            round_id: round.round_id,
        };
        info!(
            round_id = round.round_id,
            matches = round.matches.len(),
            bye = ?round.bye,
            "round activated"
        );
        round.matches.clone()
    }

    fn active_round_id(&self) -> Option<u32> {
        self.current.map(|index| self.rounds[index].round_id)
    }

    fn locate(&self, match_id: &str) -> Option<(usize, usize)> {
        self.rounds.iter().enumerate().find_map(|(r, round)| {
            round
                .matches
                .iter()
                .position(|m| m.match_id == match_id)
                .map(|m| (r, m))
        })
    }

    fn accept_report(
        &mut self,
        referee_id: &str,
        token: Option<&str>,
        result: &MatchResult,
    ) -> Result<ReportDisposition, LeagueError> {
        self.registry.authenticate(AgentType::Referee, referee_id, token)?;
        self.admit(referee_id, result)
    }

    /// Check `result` against the schedule and mark its match reported.
    fn admit(
        &mut self,
        referee_id: &str,
        result: &MatchResult,
    ) -> Result<ReportDisposition, LeagueError> {
        let (r, m) = self
            .locate(&result.match_id)
            .ok_or_else(|| LeagueError::NotFound(format!("match {}", result.match_id)))?;
        let scheduled = &self.rounds[r].matches[m];

        if scheduled.referee_id != referee_id {
            return Err(LeagueError::Authentication(format!(
                "match {} is not assigned to {referee_id}",
                scheduled.match_id
            )));
        }
        if scheduled.round_id != result.round_id
            || scheduled.player_a_id != result.player_a_id
            || scheduled.player_b_id != result.player_b_id
        {
            return Err(LeagueError::Validation(format!(
                "result does not match the schedule of {scheduled}"
            )));
        }
        match scheduled.progress {
            MatchProgress::Reported | MatchProgress::Finished => {
                return Ok(ReportDisposition::Duplicate)
            }
            MatchProgress::Failed => {
                return Err(LeagueError::LifecycleConflict(format!(
                    "match {} was closed as failed",
                    scheduled.match_id
                )))
            }
            MatchProgress::Scheduled => {
                return Err(LeagueError::LifecycleConflict(format!(
                    "match {} has not been dispatched",
                    scheduled.match_id
                )))
            }
            MatchProgress::Dispatched | MatchProgress::Unconfirmed => {}
        }
        if self.current != Some(r) {
            return Err(LeagueError::LifecycleConflict(format!(
                "round {} is not active",
                result.round_id
            )));
        }

        self.rounds[r].matches[m].progress = MatchProgress::Reported;
        Ok(ReportDisposition::Accepted)
    }

    /// Mark a dispatched match as unconfirmed. Returns whether it changed.
    fn unconfirm(&mut self, match_id: &str) -> bool {
        let Some((r, m)) = self.locate(match_id) else {
            return false;
        };
        let scheduled = &mut self.rounds[r].matches[m];
        if scheduled.progress != MatchProgress::Dispatched {
            return false;
        }
        scheduled.progress = MatchProgress::Unconfirmed;
        true
    }

    /// Matches of round `round_id` still waiting for a report, if that round is active.
    fn unreported(&self, round_id: u32) -> Vec<ScheduledMatch> {
        let Some(index) = self.current.filter(|&i| self.rounds[i].round_id == round_id) else {
            return vec![];
        };
        self.rounds[index]
            .matches
            .iter()
            .filter(|m| {
                matches!(
                    m.progress,
                    MatchProgress::Dispatched | MatchProgress::Unconfirmed
                )
            })
            .cloned()
            .collect()
    }

    /// Close a match unless it is already closed.
    fn settle(&mut self, match_id: &str, progress: MatchProgress) {
        if let Some((r, m)) = self.locate(match_id) {
            let scheduled = &mut self.rounds[r].matches[m];
            if !scheduled.progress.is_settled() {
                scheduled.progress = progress;
            }
        }
    }

    /// Complete the active round if all its matches are closed.
    fn close_round(&mut self) -> Option<RoundEnd> {
        let index = self.current?;
        let round = &mut self.rounds[index];
        if round.status != RoundStatus::Active || !round.is_settled() {
            return None;
        }
        round.status = RoundStatus::Completed;
        let round_id = round.round_id;
        let next_index = (index + 1 < self.rounds.len()).then_some(index + 1);
        if next_index.is_none() {
            self.current = None;
            self.status = LeagueStatus::Completed;
        }
        info!(round_id, "round completed");
        Some(RoundEnd {
            round_id,
            next_index,
            next_round_id: next_index.map(|i| self.rounds[i].round_id),
        })
    }

    fn snapshot(&self) -> LeagueSnapshot {
        LeagueSnapshot {
            status: self.status,
            rounds: self.rounds.clone(),
            standings: self.standings.clone(),
            players: self.registry.ids(AgentType::Player),
            referees: self.registry.ids(AgentType::Referee),
        }
    }

    fn participant(&self, player_id: &str) -> Participant {
        Participant {
            player_id: player_id.to_string(),
            endpoint: self
                .registry
                .get(player_id)
                .map(|r| r.endpoint.clone())
                .unwrap_or_default(),
        }
    }
}

type Reply<T> = oneshot::Sender<Result<T, LeagueError>>;

enum Command {
    Register {
        agent_type: AgentType,
        agent_id: String,
        endpoint: String,
        reply: Reply<Credentials>,
    },
    StartLeague {
        reply: Reply<u32>,
    },
    Report {
        referee_id: String,
        token: Option<String>,
        result: MatchResult,
        reply: Reply<()>,
    },
    DispatchFailed {
        match_id: String,
        error: LeagueError,
    },
    RoundDeadline {
        round_id: u32,
    },
    Reconcile {
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<LeagueSnapshot>,
    },
}

fn stopped() -> LeagueError {
    LeagueError::Transient {
        code: ErrorCode::Unavailable,
        message: "league manager stopped".to_string(),
    }
}

/// Client side of the control loop. Cheap to clone; the loop stops when every handle is gone.
#[derive(Clone)]
pub struct LeagueHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<LeagueStatus>,
    league_token: Arc<str>,
}

impl LeagueHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, LeagueError> {
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| stopped())?;
        answer.await.map_err(|_| stopped())?
    }

    /// Register an agent and get its credentials.
    pub async fn register(
        &self,
        agent_type: AgentType,
        agent_id: &str,
        endpoint: &str,
    ) -> Result<Credentials, LeagueError> {
        self.request(|reply| Command::Register {
            agent_type,
            agent_id: agent_id.to_string(),
            endpoint: endpoint.to_string(),
            reply,
        })
        .await
    }

    /// Schedule and start the league. Returns the number of rounds.
    pub async fn start_league(&self) -> Result<u32, LeagueError> {
        self.request(|reply| Command::StartLeague { reply }).await
    }

    /// Hand in a result reported by `referee_id`.
    pub async fn report(
        &self,
        referee_id: &str,
        token: Option<&str>,
        result: MatchResult,
    ) -> Result<(), LeagueError> {
        self.request(|reply| Command::Report {
            referee_id: referee_id.to_string(),
            token: token.map(str::to_string),
            result,
            reply,
        })
        .await
    }

    /// Settle the unreported matches of the active round whose match documents are terminal,
    /// as if their referees had reported them. Returns the number of results recovered.
    pub async fn reconcile(&self) -> Result<usize, LeagueError> {
        self.request(|reply| Command::Reconcile { reply }).await
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> Result<LeagueSnapshot, LeagueError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Latest status.
    pub fn status(&self) -> LeagueStatus {
        *self.status.borrow()
    }

    /// Credential the league manager presents on its messages.
    pub fn league_token(&self) -> &str {
        &self.league_token
    }

    /// Resolve once the league completed.
    pub async fn wait_until_completed(&self) -> Result<(), LeagueError> {
        let mut status = self.status.clone();
        status
            .wait_for(|s| *s == LeagueStatus::Completed)
            .await
            .map(|_| ())
            .map_err(|_| stopped())
    }
}

/// The control loop.
pub struct LeagueManager {
    state: LeagueState,
    client: ResilientClient,
    store: DocumentStore,
    request_timeout: Duration,
    match_deadline: Duration,
    outboxes: Vec<mpsc::UnboundedSender<Payload>>,
    results: ResultSubmitter,
    processed: mpsc::UnboundedReceiver<ProcessedResult>,
    commands: mpsc::Receiver<Command>,
    feedback: mpsc::WeakSender<Command>,
    status: watch::Sender<LeagueStatus>,
}

impl LeagueManager {
    /// Start the league manager and its result processor.
    pub fn spawn(
        config: &Configuration,
        transport: Arc<dyn Transport>,
        store: DocumentStore,
    ) -> LeagueHandle {
        let (commands_tx, commands) = mpsc::channel(64);
        let (status_tx, status) = watch::channel(LeagueStatus::NotStarted);
        let (results, processed, _consumer) =
            ResultProcessor::spawn(store.clone(), config.scoring);
        let state = LeagueState::new(config.league_id.clone(), config.min_players);
        let league_token: Arc<str> = state.league_token.as_str().into();

        let manager = LeagueManager {
            state,
            client: ResilientClient::new(transport, config.retry, config.breaker),
            store,
            request_timeout: config.request_timeout,
            match_deadline: config.match_deadline,
            outboxes: vec![],
            results,
            processed,
            commands,
            feedback: commands_tx.downgrade(),
            status: status_tx,
        };
        tokio::spawn(manager.run());

        LeagueHandle {
            commands: commands_tx,
            status,
            league_token,
        }
    }

    #[instrument(name = "league", skip_all, fields(league_id = %self.state.league_id))]
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = self.processed.recv() => self.on_processed(event).await,
            }
        }
        debug!("league manager stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Register {
                agent_type,
                agent_id,
                endpoint,
                reply,
            } => {
                let _ = reply.send(self.state.register(agent_type, &agent_id, &endpoint));
            }
            Command::StartLeague { reply } => {
                let _ = reply.send(self.start_league().await);
            }
            Command::Report {
                referee_id,
                token,
                result,
                reply,
            } => {
                let _ = reply.send(self.on_report(&referee_id, token.as_deref(), result));
            }
            Command::DispatchFailed { match_id, error } => {
                // only a definite refusal proves no conductor runs the match
                let refused = !matches!(
                    error,
                    LeagueError::Transient { .. } | LeagueError::CircuitOpen(_)
                );
                if refused {
                    error!(match_id, "dispatch refused: {error}");
                    self.state.settle(&match_id, MatchProgress::Failed);
                    self.persist_rounds().await;
                    self.progress().await;
                } else if self.state.unconfirm(&match_id) {
                    warn!(match_id, "dispatch unconfirmed: {error}");
                    self.persist_rounds().await;
                }
            }
            Command::RoundDeadline { round_id } => {
                self.recover(round_id, true).await;
            }
            Command::Reconcile { reply } => {
                let recovered = match self.state.active_round_id() {
                    Some(round_id) => self.recover(round_id, false).await,
                    None => 0,
                };
                let _ = reply.send(Ok(recovered));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.state.snapshot()));
            }
        }
    }

    async fn start_league(&mut self) -> Result<u32, LeagueError> {
        let rounds = self.state.plan()?;
        self.store.write_async(ROUNDS_DOCUMENT, &rounds).await?;
        self.results.reset(self.state.registry.ids(AgentType::Player))?;
        let total = rounds.len() as u32;
        self.state.begin(rounds);
        self.outboxes = self
            .state
            .registry
            .of_type(AgentType::Player)
            .map(|player| self.outbox(&player.endpoint))
            .collect();
        info!(rounds = total, "league started");

        let announcement = self.activate(0).await;
        self.status.send_replace(self.state.status);
        self.broadcast(vec![announcement]);
        Ok(total)
    }

    fn on_report(
        &mut self,
        referee_id: &str,
        token: Option<&str>,
        result: MatchResult,
    ) -> Result<(), LeagueError> {
        match self.state.accept_report(referee_id, token, &result)? {
            ReportDisposition::Duplicate => {
                debug!(match_id = result.match_id, "duplicate report acknowledged");
                Ok(())
            }
            ReportDisposition::Accepted => {
                debug!(
                    match_id = result.match_id,
                    reason = ?result.reason,
                    "report accepted"
                );
                self.results.submit(result)
            }
        }
    }

    async fn on_processed(&mut self, event: ProcessedResult) {
        let progress = match &event.processing {
            Processing::Applied | Processing::Duplicate => MatchProgress::Finished,
            Processing::Failed(e) => {
                error!(match_id = event.match_id, "result could not be recorded: {e}");
                MatchProgress::Failed
            }
        };
        if !event.standings.is_empty() {
            self.state.standings = event.standings;
        }
        self.state.settle(&event.match_id, progress);
        self.persist_rounds().await;
        self.progress().await;
    }

    /// Settle the unreported matches of round `round_id` from their match documents and return
    /// how many results were recovered. Once `deadline_passed`, a match without a terminal
    /// document is closed as failed.
    #[instrument(skip(self))]
    async fn recover(&mut self, round_id: u32, deadline_passed: bool) -> usize {
        let pending = self.state.unreported(round_id);
        if pending.is_empty() {
            return 0;
        }
        let mut recovered = 0;
        for scheduled in pending {
            let match_id = scheduled.match_id.as_str();
            let document = match_document(match_id);
            let record = self
                .store
                .run_blocking(move |store| store.read_required::<MatchRecord>(&document))
                .await;
            let finished = match record {
                Ok(record) if record.state.is_terminal() => record
                    .result()
                    .map(|result| (record.referee_id.clone(), result)),
                Ok(record) => {
                    debug!(match_id, state = ?record.state, "match still running");
                    None
                }
                Err(e) => {
                    debug!(match_id, "no match document: {e}");
                    None
                }
            };

            let Some((referee_id, result)) = finished else {
                if deadline_passed {
                    warn!(match_id, "match unfinished at its deadline, closed as failed");
                    self.state.settle(match_id, MatchProgress::Failed);
                }
                continue;
            };
            match self.state.admit(&referee_id, &result) {
                Ok(ReportDisposition::Accepted) => {
                    info!(
                        match_id,
                        reason = ?result.reason,
                        "result recovered from match document"
                    );
                    match self.results.submit(result) {
                        Ok(()) => recovered += 1,
                        Err(e) => {
                            error!(match_id, "recovered result not queued: {e}");
                            self.state.settle(match_id, MatchProgress::Failed);
                        }
                    }
                }
                Ok(ReportDisposition::Duplicate) => {}
                Err(e) => {
                    warn!(match_id, "match document rejected: {e}");
                    if deadline_passed {
                        self.state.settle(match_id, MatchProgress::Failed);
                    }
                }
            }
        }
        self.persist_rounds().await;
        self.progress().await;
        recovered
    }

    /// Close the active round if it is done and move the league forward.
    async fn progress(&mut self) {
        let Some(end) = self.state.close_round() else {
            return;
        };
        let mut notices = vec![
            Payload::LeagueStandingsUpdate {
                round_id: end.round_id,
                standings: self.state.standings.clone(),
            },
            Payload::RoundCompleted {
                round_id: end.round_id,
                next_round_id: end.next_round_id,
            },
        ];
        match end.next_index {
            Some(index) => notices.push(self.activate(index).await),
            None => {
                let champion_id = self
                    .state
                    .standings
                    .first()
                    .filter(|e| e.points > 0)
                    .map(|e| e.player_id.clone());
                info!(?champion_id, "league completed");
                notices.push(Payload::LeagueCompleted {
                    total_rounds: self.state.rounds.len() as u32,
                    total_matches: self
                        .state
                        .rounds
                        .iter()
                        .map(|r| r.matches.len() as u32)
                        .sum(),
                    champion_id,
                    standings: self.state.standings.clone(),
                });
            }
        }
        self.persist_rounds().await;
        self.status.send_replace(self.state.status);
        self.broadcast(notices);
    }

    /// Activate round `index`, dispatch its matches, and return its announcement.
    async fn activate(&mut self, index: usize) -> Payload {
        let matches = self.state.activate(index);
        let round_id = self.state.rounds[index].round_id;
        self.persist_rounds().await;
        for m in &matches {
            self.dispatch(m);
        }
        self.arm_deadline(round_id);
        Payload::RoundAnnouncement {
            round_id,
            matches: matches.iter().map(ScheduledMatch::summary).collect(),
        }
    }

    fn arm_deadline(&self, round_id: u32) {
        let feedback = self.feedback.clone();
        let deadline = self.match_deadline;
        tokio::spawn(
            async move {
                tokio::time::sleep(deadline).await;
                if let Some(commands) = feedback.upgrade() {
                    let _ = commands.send(Command::RoundDeadline { round_id }).await;
                }
            }
            .in_current_span(),
        );
    }

    fn dispatch(&self, scheduled: &ScheduledMatch) {
        let endpoint = self
            .state
            .registry
            .get(&scheduled.referee_id)
            .map(|r| r.endpoint.clone())
            .unwrap_or_default();
        let request = Message::request(
            LEAGUE_MANAGER_ID,
            &scheduled.conversation_id,
            Some(self.state.league_token.clone()),
            Payload::StartMatch {
                match_id: scheduled.match_id.clone(),
                round_id: scheduled.round_id,
                player_a: self.state.participant(&scheduled.player_a_id),
                player_b: self.state.participant(&scheduled.player_b_id),
            },
        );
        let client = self.client.clone();
        let feedback = self.feedback.clone();
        let timeout = self.request_timeout;
        let match_id = scheduled.match_id.clone();
        debug!(%scheduled, "dispatching");

        tokio::spawn(
            async move {
                if let Err(error) = client.call(&endpoint, request, timeout).await {
                    if let Some(commands) = feedback.upgrade() {
                        let _ = commands.send(Command::DispatchFailed { match_id, error }).await;
                    }
                }
            }
            .in_current_span(),
        );
    }

    /// Queue delivering notices to the player at `endpoint` one at a time, in queue order.
    fn outbox(&self, endpoint: &str) -> mpsc::UnboundedSender<Payload> {
        let (notices, mut queue) = mpsc::unbounded_channel::<Payload>();
        let client = self.client.clone();
        let endpoint = endpoint.to_string();
        let token = self.state.league_token.clone();
        let timeout = self.request_timeout;
        tokio::spawn(
            async move {
                while let Some(payload) = queue.recv().await {
                    let kind = payload.kind();
                    let message = Message::request(
                        LEAGUE_MANAGER_ID,
                        Message::new_conversation_id(),
                        Some(token.clone()),
                        payload,
                    );
                    if let Err(e) = client.call(&endpoint, message, timeout).await {
                        warn!(%endpoint, %kind, "broadcast not delivered: {e}");
                    }
                }
            }
            .in_current_span(),
        );
        notices
    }

    /// Queue `notices`, in order, for every player.
    fn broadcast(&self, notices: Vec<Payload>) {
        for outbox in &self.outboxes {
            for notice in &notices {
                // queues only close with the manager
                let _ = outbox.send(notice.clone());
            }
        }
    }

    async fn persist_rounds(&self) {
        if let Err(e) = self.store.write_async(ROUNDS_DOCUMENT, &self.state.rounds).await {
            error!("could not persist rounds: {e}");
        }
    }
}

/// Network face of the league manager.
pub struct LeagueEndpoint {
    handle: LeagueHandle,
}

impl LeagueEndpoint {
    /// Serve requests through `handle`.
    pub fn new(handle: LeagueHandle) -> Self {
        Self { handle }
    }
}

#[async_trait]
impl MessageHandler for LeagueEndpoint {
    async fn handle(&self, message: Message) -> Message {
        let answer = match message.payload() {
            Payload::RegisterRequest {
                agent_type,
                agent_id,
                endpoint,
            } => {
                if message.sender_id() != agent_id {
                    Err(LeagueError::Validation(format!(
                        "{} cannot register {agent_id}",
                        message.sender_id()
                    )))
                } else {
                    self.handle
                        .register(*agent_type, agent_id, endpoint)
                        .await
                        .map(|credentials| Payload::RegisterResponse {
                            agent_id: credentials.agent_id,
                            issued_token: credentials.issued_token,
                            league_token: credentials.league_token,
                        })
                }
            }
            Payload::MatchResultReport { result } => self
                .handle
                .report(
                    message.sender_id(),
                    message.envelope().auth_token.as_deref(),
                    result.clone(),
                )
                .await
                .map(|()| Payload::Ack {}),
            other => Err(LeagueError::Validation(format!(
                "{} is not served by the league manager",
                other.kind()
            ))),
        };
        match answer {
            Ok(payload) => Message::reply_to(
                &message,
                LEAGUE_MANAGER_ID,
                Some(self.handle.league_token().to_string()),
                payload,
            ),
            Err(e) => {
                warn!(
                    sender = message.sender_id(),
                    kind = %message.kind(),
                    "request rejected: {e}"
                );
                Message::error_reply(&message, LEAGUE_MANAGER_ID, &e)
            }
        }
    }

    fn agent_id(&self) -> &str {
        LEAGUE_MANAGER_ID
    }
}
