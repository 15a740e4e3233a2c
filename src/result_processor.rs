//! Sequential application of match results to the standings.
//!
//! Referees report concurrently, but the standings document must never lose an update. Every
//! result goes through one unbounded queue drained by a single task: load the document, apply
//! the result, store the document, in that order and without yielding in between (the job runs
//! on tokio's blocking pool, and the consumer waits for it before taking the next one). The queue
//! imposes a total order on updates, and since points only add up the final standings do not
//! depend on that order.
//!
//! The standings document remembers which matches it already counted, so a result delivered twice
//! (a retried report, a replayed queue) is ignored the second time.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ErrorCode, LeagueError};
use crate::match_conductor::MatchRecord;
use crate::message::{MatchResult, OutcomeReason, StandingsEntry};
use crate::store::{DocumentStore, MATCH_COLLECTION, STANDINGS_DOCUMENT};

/// Points awarded per outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scoring {
    /// Points for a win, technical wins included.
    pub win: u32,
    /// Points for a draw.
    pub draw: u32,
    /// Points for a loss, forfeits included.
    pub loss: u32,
}

impl Default for Scoring {
    fn default() -> Self {
        Self {
            win: 3,
            draw: 1,
            loss: 0,
        }
    }
}

/// The standings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Standings {
    /// One entry per player, keyed by player id.
    pub entries: BTreeMap<String, StandingsEntry>,
    /// Matches already counted.
    #[serde(default)]
    pub applied: BTreeSet<String>,
}

impl Standings {
    /// Blank standings for `players`.
    pub fn new<S: AsRef<str>>(players: &[S]) -> Self {
        let entries = players
            .iter()
            .map(|p| (p.as_ref().to_string(), StandingsEntry::new(p.as_ref())))
            .collect();
        Self {
            entries,
            applied: BTreeSet::new(),
        }
    }

    /// Count `result`. Returns `false` if its match was already counted.
    pub fn apply(&mut self, result: &MatchResult, scoring: &Scoring) -> bool {
        if !self.applied.insert(result.match_id.clone()) {
            return false;
        }

        match result.reason {
            OutcomeReason::Aborted => {}
            OutcomeReason::DoubleForfeit => {
                for player in [&result.player_a_id, &result.player_b_id] {
                    let entry = self.entry(player);
                    entry.played += 1;
                    entry.losses += 1;
                    entry.points += scoring.loss;
                }
            }
            OutcomeReason::Normal | OutcomeReason::TechnicalLoss => match &result.winner_id {
                Some(winner) => {
                    let loser = if winner == &result.player_a_id {
                        &result.player_b_id
                    } else {
                        &result.player_a_id
                    };
                    let entry = self.entry(winner);
                    entry.played += 1;
                    entry.wins += 1;
                    entry.points += scoring.win;
                    let entry = self.entry(loser);
                    entry.played += 1;
                    entry.losses += 1;
                    entry.points += scoring.loss;
                }
                None => {
                    for player in [&result.player_a_id, &result.player_b_id] {
                        let entry = self.entry(player);
                        entry.played += 1;
                        entry.draws += 1;
                        entry.points += scoring.draw;
                    }
                }
            },
        }
        true
    }

    fn entry(&mut self, player_id: &str) -> &mut StandingsEntry {
        self.entries
            .entry(player_id.to_string())
            .or_insert_with(|| StandingsEntry::new(player_id))
    }

    /// Entries ranked by points, then wins, then player id.
    pub fn ranked(&self) -> Vec<StandingsEntry> {
        let mut ranked = self.entries.values().cloned().collect::<Vec<_>>();
        ranked.sort_by(|a, b| {
            b.points
                .cmp(&a.points)
                .then(b.wins.cmp(&a.wins))
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        ranked
    }

    /// First of the ranking, if anybody scored at all.
    pub fn champion(&self) -> Option<String> {
        self.ranked()
            .into_iter()
            .next()
            .filter(|e| e.points > 0)
            .map(|e| e.player_id)
    }
}

/// Recompute standings for `players` from scratch.
pub fn rebuild_standings<'a, S: AsRef<str>>(
    players: &[S],
    results: impl IntoIterator<Item = &'a MatchResult>,
    scoring: &Scoring,
) -> Standings {
    let mut standings = Standings::new(players);
    for result in results {
        standings.apply(result, scoring);
    }
    standings
}

/// Stored standings next to the ones rebuilt from the match documents.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Content of the standings document.
    pub stored: Standings,
    /// Standings recomputed from every terminal match document.
    pub rebuilt: Standings,
}

impl Reconciliation {
    /// Players whose stored entry differs from the rebuilt one.
    pub fn mismatches(&self) -> Vec<String> {
        let players = self
            .stored
            .entries
            .keys()
            .chain(self.rebuilt.entries.keys())
            .collect::<BTreeSet<_>>();
        players
            .into_iter()
            .filter(|p| self.stored.entries.get(*p) != self.rebuilt.entries.get(*p))
            .cloned()
            .collect()
    }

    /// The stored document agrees with the match history.
    pub fn is_consistent(&self) -> bool {
        self.mismatches().is_empty()
    }
}

/// Compare the standings document with the match documents found in `store`.
#[instrument(skip_all)]
pub fn reconcile(store: &DocumentStore, scoring: &Scoring) -> Result<Reconciliation, LeagueError> {
    let stored: Standings = store.read(STANDINGS_DOCUMENT)?;
    let mut results = vec![];
    for id in store.list(MATCH_COLLECTION)? {
        let record: MatchRecord = store.read_required(&id)?;
        if let Some(result) = record.result() {
            results.push(result);
        }
    }
    let players = stored.entries.keys().collect::<Vec<_>>();
    let rebuilt = rebuild_standings(&players, &results, scoring);

    let reconciliation = Reconciliation { stored, rebuilt };
    let mismatches = reconciliation.mismatches();
    if mismatches.is_empty() {
        info!(matches = results.len(), "standings consistent with match history");
    } else {
        warn!(?mismatches, "standings disagree with match history");
    }
    Ok(reconciliation)
}

/// What happened to one submitted result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processing {
    /// Counted.
    Applied,
    /// Its match was already counted.
    Duplicate,
    /// The standings document could not be updated.
    Failed(LeagueError),
}

/// Emitted by the consumer after each result.
#[derive(Debug, Clone)]
pub struct ProcessedResult {
    /// Match of the result.
    pub match_id: String,
    /// Round of the match.
    pub round_id: u32,
    /// Outcome of the update.
    pub processing: Processing,
    /// Ranked standings after the update.
    pub standings: Vec<StandingsEntry>,
}

enum Job {
    Reset(Vec<String>),
    Apply(MatchResult),
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct ResultSubmitter {
    jobs: mpsc::UnboundedSender<Job>,
}

impl ResultSubmitter {
    /// Queue `result`. Never waits.
    pub fn submit(&self, result: MatchResult) -> Result<(), LeagueError> {
        self.send(Job::Apply(result))
    }

    /// Queue the replacement of the standings with blank entries for `players`.
    pub fn reset(&self, players: Vec<String>) -> Result<(), LeagueError> {
        self.send(Job::Reset(players))
    }

    fn send(&self, job: Job) -> Result<(), LeagueError> {
        self.jobs.send(job).map_err(|_| LeagueError::Transient {
            code: ErrorCode::Internal,
            message: "result processor stopped".to_string(),
        })
    }
}

/// Single consumer of the result queue.
pub struct ResultProcessor {
    store: DocumentStore,
    scoring: Scoring,
    jobs: mpsc::UnboundedReceiver<Job>,
    events: mpsc::UnboundedSender<ProcessedResult>,
}

impl ResultProcessor {
    /// Start the consumer. It stops once every [`ResultSubmitter`] is dropped and the queue is
    /// drained.
    pub fn spawn(
        store: DocumentStore,
        scoring: Scoring,
    ) -> (
        ResultSubmitter,
        mpsc::UnboundedReceiver<ProcessedResult>,
        JoinHandle<()>,
    ) {
        let (jobs_tx, jobs) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let processor = ResultProcessor {
            store,
            scoring,
            jobs,
            events,
        };
        let handle = tokio::spawn(processor.run());
        (ResultSubmitter { jobs: jobs_tx }, events_rx, handle)
    }

    async fn run(mut self) {
        while let Some(job) = self.jobs.recv().await {
            match job {
                Job::Reset(players) => {
                    let blank = Standings::new(&players);
                    if let Err(e) = self.store.write_async(STANDINGS_DOCUMENT, &blank).await {
                        error!("could not reset standings: {e}");
                    }
                }
                Job::Apply(result) => {
                    let event = self.process(&result).await;
                    // nobody listening is fine
                    let _ = self.events.send(event);
                }
            }
        }
        debug!("result queue closed");
    }

    #[instrument(skip_all, fields(match_id = %result.match_id))]
    async fn process(&self, result: &MatchResult) -> ProcessedResult {
        let scoring = self.scoring;
        let job = result.clone();
        let outcome = self
            .store
            .run_blocking(move |store| load_apply_store(store, &scoring, &job))
            .await;
        let (processing, standings) = match outcome {
            Ok((true, standings)) => {
                info!(reason = ?result.reason, winner = ?result.winner_id, "result applied");
                (Processing::Applied, standings.ranked())
            }
            Ok((false, standings)) => {
                debug!("result already applied");
                (Processing::Duplicate, standings.ranked())
            }
            Err(e) => {
                error!("result not applied: {e}");
                (Processing::Failed(e), vec![])
            }
        };
        ProcessedResult {
            match_id: result.match_id.clone(),
            round_id: result.round_id,
            processing,
            standings,
        }
    }
}

/// One job of the consumer. Runs on the blocking pool without yielding.
fn load_apply_store(
    store: &DocumentStore,
    scoring: &Scoring,
    result: &MatchResult,
) -> Result<(bool, Standings), LeagueError> {
    let mut standings: Standings = store.read(STANDINGS_DOCUMENT)?;
    let applied = standings.apply(result, scoring);
    if applied {
        store.write(STANDINGS_DOCUMENT, &standings)?;
    }
    Ok((applied, standings))
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    use super::*;

    fn result(
        match_id: &str,
        a: &str,
        b: &str,
        winner: Option<&str>,
        reason: OutcomeReason,
    ) -> MatchResult {
        MatchResult {
            match_id: match_id.to_string(),
            round_id: 1,
            player_a_id: a.to_string(),
            player_b_id: b.to_string(),
            winner_id: winner.map(str::to_string),
            is_draw: winner.is_none() && reason == OutcomeReason::Normal,
            reason,
            drawn_number: None,
            choices: BTreeMap::new(),
        }
    }

    fn season() -> Vec<MatchResult> {
        use OutcomeReason::*;
        vec![
            result("R1M1", "p1", "p2", Some("p1"), Normal),
            result("R1M2", "p3", "p4", None, Normal),
            result("R2M1", "p1", "p3", Some("p3"), TechnicalLoss),
            result("R2M2", "p2", "p4", None, DoubleForfeit),
            result("R3M1", "p1", "p4", None, Aborted),
            result("R3M2", "p2", "p3", Some("p2"), Normal),
        ]
    }

    fn players() -> Vec<String> {
        ["p1", "p2", "p3", "p4"].map(String::from).to_vec()
    }

    #[test]
    fn outcome_deltas() {
        let standings = rebuild_standings(&players(), &season(), &Scoring::default());
        let e = |p: &str| standings.entries[p].clone();

        assert_eq!((e("p1").played, e("p1").wins, e("p1").losses, e("p1").points), (2, 1, 1, 3));
        assert_eq!((e("p2").played, e("p2").wins, e("p2").losses, e("p2").points), (3, 1, 2, 3));
        assert_eq!((e("p3").played, e("p3").draws, e("p3").wins, e("p3").points), (3, 1, 1, 4));
        assert_eq!((e("p4").played, e("p4").draws, e("p4").losses, e("p4").points), (2, 1, 1, 1));
        assert_eq!(standings.applied.len(), 6);
    }

    #[test]
    fn ranking_breaks_ties_by_wins_then_id() {
        let standings = rebuild_standings(&players(), &season(), &Scoring::default());
        let order = standings
            .ranked()
            .into_iter()
            .map(|e| e.player_id)
            .collect::<Vec<_>>();
        assert_eq!(order, ["p3", "p1", "p2", "p4"]);
        assert_eq!(standings.champion().as_deref(), Some("p3"));
        assert_eq!(Standings::new(&players()).champion(), None);
    }

    #[test]
    fn order_does_not_matter() {
        let scoring = Scoring::default();
        let expected = rebuild_standings(&players(), &season(), &scoring);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let mut shuffled = season();
            shuffled.shuffle(&mut rng);
            assert_eq!(rebuild_standings(&players(), &shuffled, &scoring), expected);
        }
    }

    #[test]
    fn duplicates_are_ignored() {
        let scoring = Scoring::default();
        let mut standings = Standings::new(&players());
        let first = result("R1M1", "p1", "p2", Some("p2"), OutcomeReason::Normal);
        assert!(standings.apply(&first, &scoring));
        let snapshot = standings.clone();
        assert!(!standings.apply(&first, &scoring));
        assert_eq!(standings, snapshot);
    }

    #[test]
    fn custom_scoring() {
        let scoring = Scoring {
            win: 2,
            draw: 1,
            loss: 1,
        };
        let standings = rebuild_standings(
            &players(),
            &[result("R1M1", "p1", "p2", Some("p1"), OutcomeReason::Normal)],
            &scoring,
        );
        assert_eq!(standings.entries["p1"].points, 2);
        assert_eq!(standings.entries["p2"].points, 1);
    }

    #[tokio::test]
    async fn consumer_serializes_concurrent_submissions() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        let (submitter, mut events, handle) =
            ResultProcessor::spawn(store.clone(), Scoring::default());
        submitter.reset(players()).unwrap();

        let mut producers = vec![];
        for result in season() {
            let submitter = submitter.clone();
            producers.push(tokio::spawn(async move { submitter.submit(result) }));
        }
        for producer in producers {
            producer.await.unwrap().unwrap();
        }
        submitter
            .submit(result("R1M1", "p1", "p2", Some("p2"), OutcomeReason::Normal))
            .unwrap();
        drop(submitter);
        handle.await.unwrap();

        let mut applied = 0;
        let mut duplicates = 0;
        while let Some(event) = events.recv().await {
            match event.processing {
                Processing::Applied => applied += 1,
                Processing::Duplicate => duplicates += 1,
                Processing::Failed(e) => panic!("{e}"),
            }
        }
        assert_eq!((applied, duplicates), (6, 1));

        let stored: Standings = store.read(STANDINGS_DOCUMENT).unwrap();
        assert_eq!(stored, rebuild_standings(&players(), &season(), &Scoring::default()));
    }

    #[tokio::test]
    async fn storage_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join("standings.json"), b"not json").unwrap();
        let (submitter, mut events, _handle) = ResultProcessor::spawn(store, Scoring::default());
        submitter.submit(season().remove(0)).unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event.processing, Processing::Failed(LeagueError::Storage(_))));
        assert!(event.standings.is_empty());
    }

    #[test]
    fn reconcile_detects_drift() {
        use crate::match_conductor::MatchState;

        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).unwrap();
        let scoring = Scoring::default();
        let results = season();
        for r in &results {
            store
                .write(
                    &crate::store::match_document(&r.match_id),
                    &MatchRecord::from_result(r, "ref", MatchState::Finished),
                )
                .unwrap();
        }
        store
            .write(STANDINGS_DOCUMENT, &rebuild_standings(&players(), &results, &scoring))
            .unwrap();
        assert!(reconcile(&store, &scoring).unwrap().is_consistent());

        let mut drifted = rebuild_standings(&players(), &results, &scoring);
        drifted.entries.get_mut("p4").unwrap().points += 3;
        store.write(STANDINGS_DOCUMENT, &drifted).unwrap();
        assert_eq!(reconcile(&store, &scoring).unwrap().mismatches(), ["p4"]);
    }
}
