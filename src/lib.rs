//! # Parity League
//!
//! A round-robin league engine for networked agents playing the even/odd game.
//!
//! Three kinds of agents take part, each reachable only through an endpoint:
//! - a league manager ([`orchestrator`]) registering agents, scheduling rounds, collecting
//!   results and broadcasting standings,
//! - referees ([`referee`]) running one [`MatchConductor`](crate::match_conductor::MatchConductor)
//!   per assigned match,
//! - players ([`player`]) answering invitations and choosing a parity.
//!
//! In every match the referee draws a number in `1..=10`; the player whose parity matches wins.
//! A player who does not answer in time loses by technical loss.
//!
//! # Documentation Overview
//!
//! - Wire format and validation: [`message`]. Transports: [`network`].
//! - Retries, backoff and per-destination circuit breakers: [`resilience`].
//! - Pairing: [`scheduler`]. Standings: [`result_processor`].
//! - Persistence: [`store`], one JSON document per match plus the rounds and standings.
//! - Timeouts, scoring and retry settings: [`Configuration`](crate::configuration::Configuration).
//!
//! # Usage Example
//!
//! A complete league inside one process, over the in-memory network:
//!
//! ```no_run
//! use std::sync::Arc;
//! use parity_league::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Configuration::from_env();
//!     config.validate()?;
//!     let store = DocumentStore::open(config.data_dir())?;
//!     let network = LocalNetwork::new();
//!     let transport: Arc<dyn Transport> = Arc::new(network.clone());
//!
//!     let league = LeagueManager::spawn(&config, transport.clone(), store.clone());
//!     network.bind("league", Arc::new(LeagueEndpoint::new(league.clone())));
//!
//!     let referee = Arc::new(Referee::new(
//!         "REF1",
//!         "ref1",
//!         "league",
//!         transport.clone(),
//!         store,
//!         &config,
//!     ));
//!     network.bind("ref1", referee.clone());
//!     referee.register().await?;
//!
//!     for id in ["P1", "P2", "P3", "P4"] {
//!         let player = Arc::new(Player::new(id, id, "league", transport.clone(), &config));
//!         network.bind(id, player.clone());
//!         player.register().await?;
//!     }
//!
//!     league.start_league().await?;
//!     league.wait_until_completed().await?;
//!     for entry in league.snapshot().await?.standings {
//!         println!("{}: {} pts", entry.player_id, entry.points);
//!     }
//!     Ok(())
//! }
//! ```
#![warn(missing_docs)]

pub use anyhow;
pub mod agent;
pub mod configuration;
pub mod error;
pub mod logger;
pub mod match_conductor;
pub mod message;
pub mod network;
pub mod orchestrator;
pub mod player;
pub mod referee;
pub mod resilience;
pub mod result_processor;
pub mod scheduler;
pub mod store;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use parity_league::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::error::{ErrorCode, LeagueError};
    pub use crate::match_conductor::{FixedDraw, NumberDrawer, RandomDraw};
    pub use crate::message::{Message, Parity, Payload, StandingsEntry};
    pub use crate::network::{serve_tcp, LocalNetwork, MessageHandler, TcpTransport, Transport};
    pub use crate::orchestrator::{LeagueEndpoint, LeagueHandle, LeagueManager, LeagueStatus};
    pub use crate::player::{FixedParity, ParityStrategy, Player, RandomParity};
    pub use crate::referee::Referee;
    pub use crate::resilience::{BreakerPolicy, RetryPolicy};
    pub use crate::result_processor::Scoring;
    pub use crate::store::DocumentStore;
}
