//! Run a complete league on localhost, every agent behind its own TCP listener.
//!
//! Usage: `local_league [players] [referees]` (default: 4 players, 2 referees). Settings are read
//! from the `LEAGUE_*` environment variables.

use std::env;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::net::TcpListener;
use tracing::{error, info};

use parity_league::logger::{init_console_logger, init_logger};
use parity_league::prelude::*;

async fn bind() -> anyhow::Result<(TcpListener, String)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("Could not bind a local port")?;
    let endpoint = listener.local_addr()?.to_string();
    Ok((listener, endpoint))
}

fn serve(listener: TcpListener, handler: Arc<dyn MessageHandler>) {
    tokio::spawn(async move {
        let agent = handler.agent_id().to_string();
        if let Err(e) = serve_tcp(listener, handler).await {
            error!(%agent, "listener stopped: {e}");
        }
    });
}

fn count_arg(args: &mut env::Args, default: usize) -> anyhow::Result<usize> {
    match args.next() {
        Some(value) => value
            .parse()
            .with_context(|| format!("'{value}' is not a count")),
        None => Ok(default),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = env::args();
    let _ = args.next(); // Skip binary name
    let players = count_arg(&mut args, 4)?;
    let referees = count_arg(&mut args, 2)?;
    if referees == 0 {
        bail!("at least one referee is required");
    }

    let config = Configuration::from_env().with_min_players(players);
    config.validate()?;
    if config.log() {
        init_logger(&config.data_dir().join("logs"))?;
    } else {
        init_console_logger()?;
    }

    let store = DocumentStore::open(config.data_dir())?;
    let transport: Arc<dyn Transport> = Arc::new(TcpTransport);

    let league = LeagueManager::spawn(&config, transport.clone(), store.clone());
    let (listener, league_endpoint) = bind().await?;
    serve(listener, Arc::new(LeagueEndpoint::new(league.clone())));
    info!(%league_endpoint, "league manager listening");

    for i in 1..=referees {
        let (listener, endpoint) = bind().await?;
        let referee = Arc::new(Referee::new(
            format!("REF{i}"),
            endpoint,
            league_endpoint.clone(),
            transport.clone(),
            store.clone(),
            &config,
        ));
        serve(listener, referee.clone());
        referee
            .register()
            .await
            .with_context(|| format!("REF{i} could not register"))?;
    }

    for i in 1..=players {
        let (listener, endpoint) = bind().await?;
        let player = Arc::new(Player::new(
            format!("P{i}"),
            endpoint,
            league_endpoint.clone(),
            transport.clone(),
            &config,
        ));
        serve(listener, player.clone());
        player
            .register()
            .await
            .with_context(|| format!("P{i} could not register"))?;
    }

    let rounds = league.start_league().await?;
    info!(rounds, players, referees, "league started");
    league.wait_until_completed().await?;

    let snapshot = league.snapshot().await?;
    println!("{:<8} {:>6} {:>4} {:>4} {:>4} {:>6}", "player", "played", "W", "D", "L", "points");
    for entry in &snapshot.standings {
        println!(
            "{:<8} {:>6} {:>4} {:>4} {:>4} {:>6}",
            entry.player_id, entry.played, entry.wins, entry.draws, entry.losses, entry.points
        );
    }
    match snapshot.standings.first().filter(|e| e.points > 0) {
        Some(champion) => println!("champion: {}", champion.player_id),
        None => println!("no champion"),
    }
    Ok(())
}
