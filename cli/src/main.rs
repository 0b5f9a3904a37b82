//! voicesync — terminal entry point.
//!
//! This binary is the boundary the core signaling/session crates are built
//! to support, not itself part of the specified core: it parses arguments,
//! prints plain-text progress, and otherwise gets out of the way. A real
//! terminal UI (waveforms, key bindings, a redraw loop) is out of scope here
//! the same way it's out of scope for the system this is grounded on.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use voicesync_client::{CpalAudioAdapter, NullAudioAdapter, Session, SessionEvent};
use voicesync_protocol::RoomKey;
use voicesync_server::{create_router, Config as ServerConfig, ServerState};

/// Default signaling URL when neither `-s` nor `VOICESYNC_SERVER` is set.
const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:3000/ws";

#[derive(Parser)]
#[command(name = "voicesync", about = "Terminal-based real-time voice chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the signaling rendezvous server.
    Server {
        #[arg(short = 'p', long)]
        port: Option<u16>,
        #[arg(short = 'H', long)]
        host: Option<String>,
    },
    /// Create a room and print its key.
    Start {
        #[arg(short = 's', long)]
        server: Option<String>,
        #[arg(short = 'u', long)]
        username: String,
        /// Skip opening a real microphone; exercise signaling/negotiation only.
        #[arg(long)]
        no_audio: bool,
    },
    /// Join an existing room by key.
    Join {
        room_key: String,
        #[arg(short = 's', long)]
        server: Option<String>,
        #[arg(short = 'u', long)]
        username: String,
        #[arg(long)]
        no_audio: bool,
    },
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voicesync_cli=info,voicesync_client=info".into()),
        )
        .init();
}

fn signaling_url(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var("VOICESYNC_SERVER").ok())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Command::Server { port, host } => run_server(port, host).await,
        Command::Start { server, username, no_audio } => run_start(signaling_url(server), username, no_audio).await,
        Command::Join { room_key, server, username, no_audio } => {
            run_join(signaling_url(server), room_key, username, no_audio).await
        }
    };
    std::process::exit(exit_code);
}

async fn run_server(port: Option<u16>, host: Option<String>) -> i32 {
    let config = match ServerConfig::from_env() {
        Ok(config) => config.with_overrides(host, port),
        Err(error) => {
            eprintln!("failed to load configuration: {error:?}");
            return 1;
        }
    };

    let bind_address = match config.bind_address() {
        Ok(addr) => addr,
        Err(error) => {
            eprintln!("invalid bind address: {error}");
            return 1;
        }
    };

    let listener = match tokio::net::TcpListener::bind(bind_address).await {
        Ok(listener) => listener,
        Err(error) => {
            eprintln!("failed to bind {bind_address}: {error}");
            return 1;
        }
    };

    info!(address = %bind_address, "voicesync signaling server listening");
    let app = create_router(ServerState::new());

    let shutdown = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
        info!("received shutdown signal");
    };

    if let Err(error) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        eprintln!("server error: {error}");
        return 1;
    }
    0
}

async fn run_start(url: String, username: String, no_audio: bool) -> i32 {
    match run_session(url, username, no_audio, SessionGoal::Create).await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("{error:#}");
            1
        }
    }
}

async fn run_join(url: String, room_key: String, username: String, no_audio: bool) -> i32 {
    let room_key = match RoomKey::parse(&room_key) {
        Ok(key) => key,
        Err(error) => {
            eprintln!("invalid room key {room_key:?}: {error}");
            return 1;
        }
    };
    match run_session(url, username, no_audio, SessionGoal::Join(room_key)).await {
        Ok(()) => 0,
        Err(error) => {
            eprintln!("{error:#}");
            1
        }
    }
}

enum SessionGoal {
    Create,
    Join(RoomKey),
}

/// Drive one call end to end: connect, create-or-join, print participant and
/// invite activity, and block until the call ends or the user hits Ctrl-C.
async fn run_session(url: String, username: String, no_audio: bool, goal: SessionGoal) -> Result<()> {
    let audio: Arc<dyn voicesync_client::AudioAdapter> = if no_audio {
        Arc::new(NullAudioAdapter::new())
    } else {
        match CpalAudioAdapter::new() {
            Ok(adapter) => Arc::new(adapter),
            Err(error) => {
                eprintln!("warning: microphone unavailable ({error}), continuing without audio");
                Arc::new(NullAudioAdapter::new())
            }
        }
    };

    let (session, mut events) = Session::new(url, username, audio);
    session.connect().await.context("failed to connect to signaling server")?;

    match goal {
        SessionGoal::Create => {
            let key = session.create_room().await.context("failed to create room")?;
            println!("room created: {key}");
        }
        SessionGoal::Join(key) => {
            session.join_room(&key).await.context("failed to join room")?;
            println!("joined room: {key}");
        }
    }

    let session_for_signal = session.clone();
    let events_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::ParticipantUpdate(participants)) => {
                    let names: Vec<String> = participants.iter().map(|p| p.display_name.clone()).collect();
                    println!("participants: {}", names.join(", "));
                }
                Ok(SessionEvent::Invite { from_username, room_key }) => {
                    println!("invite from {from_username} to room {room_key}");
                }
                Ok(SessionEvent::InviteSent { to_username }) => {
                    println!("invite sent to {to_username}");
                }
                Ok(SessionEvent::InviteError { message }) => {
                    println!("invite failed: {message}");
                }
                Ok(SessionEvent::AudioSamples) => {}
                Ok(SessionEvent::Error(error)) => {
                    error!(code = error.code, "{}", error.message);
                }
                Ok(SessionEvent::Ended) => {
                    println!("call ended");
                    return;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to install ctrl-c handler")?;
            session_for_signal.leave().await;
        }
        _ = events_task => {}
    }
    Ok(())
}
