//! WatchSync - Console Client
//!
//! Joins (or creates) a room and keeps a player in step with it, taking
//! transport and queue commands from stdin.
//!
//! Usage:
//!   watchsync-node --create --item 1440818839 --peers 2    # in-process demo
//!   watchsync-node --store https://example.firebaseio.com --room ABCD-EFGH --player cider

mod commands;
mod stats;

use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use watchsync_core::clock::{SharedClock, SystemClock};
use watchsync_core::player::{HttpPlayer, MemoryPlayer, PlayerAdapter, DEFAULT_PORT};
use watchsync_core::room_code::{new_client_id, RoomCode};
use watchsync_core::session::{self, NullObserver, SessionConfig, SessionHandle};
use watchsync_core::store::{MemoryStore, RestStore, SharedStore};

use commands::{format_position, ConsoleCommand, HELP};
use stats::StatsObserver;

const MEMORY_STORE: &str = "memory";

#[derive(Parser, Debug)]
#[command(name = "watchsync-node", version, about = "Watch together from the command line")]
struct Args {
    /// Store base URL, or `memory` for an in-process store
    #[arg(long, env = "WATCHSYNC_STORE", default_value = MEMORY_STORE)]
    store: String,

    /// Auth token appended to store requests
    #[arg(long, env = "WATCHSYNC_AUTH_TOKEN")]
    auth_token: Option<String>,

    /// Create a new room instead of joining one
    #[arg(long, conflicts_with = "room")]
    create: bool,

    /// Initial item of a created room
    #[arg(long, default_value = "demo")]
    item: String,

    /// Room code to join
    #[arg(long, required_unless_present = "create")]
    room: Option<String>,

    #[arg(long, value_enum, default_value_t = PlayerKind::Simulated)]
    player: PlayerKind,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    cider_port: u16,

    #[arg(long, env = "CIDER_API_TOKEN")]
    cider_token: Option<String>,

    /// Extra simulated clients joined to the same room
    #[arg(long, default_value_t = 0)]
    peers: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum PlayerKind {
    /// In-process player driven by the wall clock
    Simulated,
    /// Local Cider instance over its HTTP API
    Cider,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("watchsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let clock: SharedClock = Arc::new(SystemClock);
    let store = open_store(&args, &clock)?;

    let client_id = new_client_id();
    let code = match &args.room {
        Some(room) => RoomCode::parse(room).ok_or_else(|| format!("invalid room code '{}'", room))?,
        None => {
            let code = RoomCode::random();
            session::create_room(store.as_ref(), code.as_str(), &args.item, &client_id, &clock).await?;
            code
        }
    };

    let player = open_player(&args, &clock).await?;
    let observer = Arc::new(StatsObserver::new());
    let handle = session::start(
        SessionConfig::new(code.as_str()).with_client_id(client_id),
        store.clone(),
        player,
        clock.clone(),
        observer.clone(),
    )
    .await?;

    let mut peers = Vec::with_capacity(args.peers);
    for _ in 0..args.peers {
        let peer = session::start(
            SessionConfig::new(code.as_str()),
            store.clone(),
            Arc::new(MemoryPlayer::new(clock.clone())),
            clock.clone(),
            Arc::new(NullObserver),
        )
        .await?;
        info!("Simulated peer {} joined", peer.client_id());
        peers.push(peer);
    }

    println!("Room {} (client {}). Type 'help' for commands.", code, handle.client_id());
    run_console(&handle, &observer).await?;

    for peer in peers {
        peer.leave().await;
    }
    handle.leave().await;
    println!("{}", observer.summary());
    Ok(())
}

fn open_store(args: &Args, clock: &SharedClock) -> Result<Arc<dyn SharedStore>, Box<dyn std::error::Error>> {
    if args.store == MEMORY_STORE {
        if !args.create {
            return Err("the in-process store only knows rooms created with --create".into());
        }
        return Ok(Arc::new(MemoryStore::new(clock.clone())));
    }

    let mut store = RestStore::new(&args.store)?;
    if let Some(token) = &args.auth_token {
        store = store.with_token(token);
    }
    info!("Using store at {}", store.base_url());
    Ok(Arc::new(store))
}

async fn open_player(
    args: &Args,
    clock: &SharedClock,
) -> Result<Arc<dyn PlayerAdapter>, Box<dyn std::error::Error>> {
    match args.player {
        PlayerKind::Simulated => Ok(Arc::new(MemoryPlayer::new(clock.clone()))),
        PlayerKind::Cider => {
            let mut player = HttpPlayer::with_port(args.cider_port)?;
            if let Some(token) = &args.cider_token {
                player = player.with_token(token);
            }
            if let Err(e) = player.is_active().await {
                warn!("Player on port {} is not responding yet: {}", args.cider_port, e);
            }
            Ok(Arc::new(player))
        }
    }
}

/// Read commands until `quit`, EOF or Ctrl-C
async fn run_console(
    handle: &SessionHandle,
    observer: &StatsObserver,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        let result = match command {
            ConsoleCommand::Play => handle.play(),
            ConsoleCommand::Pause => handle.pause(),
            ConsoleCommand::Seek(position) => handle.seek(position),
            ConsoleCommand::Load(item) => handle.load_item(item, true),
            ConsoleCommand::Queue(item) => handle.enqueue(item),
            ConsoleCommand::Unqueue(entry) => handle.remove_entry(entry),
            ConsoleCommand::Next => handle.play_next(),
            ConsoleCommand::Clear => handle.clear_queue(),
            ConsoleCommand::Status => {
                print_status(handle, observer);
                Ok(())
            }
            ConsoleCommand::Help => {
                println!("{}", HELP);
                Ok(())
            }
            ConsoleCommand::Quit => break,
        };

        if let Err(e) = result {
            println!("error: {}", e);
            if !handle.is_running() {
                break;
            }
        }
    }
    Ok(())
}

fn print_status(handle: &SessionHandle, observer: &StatsObserver) {
    match handle.room_state() {
        Some(room) => {
            let now = watchsync_core::clock::current_time_ms();
            println!(
                "{} {} at {} (updated by {}, seq {})",
                if room.is_playing { "playing" } else { "paused" },
                room.item_id,
                format_position(room.expected_position(now)),
                room.updated_by,
                room.update_seq,
            );
        }
        None => println!("no room state yet"),
    }

    let queue = handle.queue();
    if queue.is_empty() {
        println!("queue empty");
    } else {
        for (i, entry) in queue.iter().enumerate() {
            println!("  {}. {} ({}, added by {})", i + 1, entry.item_id, entry.id, entry.added_by);
        }
    }

    println!("{}", observer.summary());
    for event in observer.recent_events(5) {
        println!("  {}", event);
    }
}
