//! Netcube Session Binary
//!
//! One process, one role per lifetime: the operator picks host, client,
//! or server from the command panel, and the simulation ticks at a fixed
//! rate underneath. Input devices live outside this layer, so the local
//! intent stays neutral; the `demo` command runs the full movement path
//! against a scripted participant instead.

use std::time::Duration;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use netcube::game::tick::tick;
use netcube::panel::{status_line, PanelCommand};
use netcube::{
    ClientMessage, EntityTemplate, IntentFrame, KeyIntent, MovementChannel, ParticipantId,
    SessionError, SessionEvent, SessionManager, SpawnBinder, TransportConfig, TransportEvent,
    TICK_RATE, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Netcube v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);

    let config = config_from_args();
    info!(address = %config.address, port = config.port, "transport target");

    let mut session = SessionManager::new();
    session.configure(config, Some(EntityTemplate::default()))?;
    let mut binder = SpawnBinder::new();

    let dt = 1.0 / TICK_RATE as f32;
    let intent = IntentFrame::idle();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut ticker = interval(Duration::from_secs_f32(dt));

    println!("{}", PanelCommand::help());

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match PanelCommand::parse(&line) {
                    Some(command) => {
                        if handle_command(command, &mut session, &mut binder).await {
                            break;
                        }
                    }
                    None => println!("Unknown command. {}", PanelCommand::help()),
                }
            }
            _ = ticker.tick() => {
                let result = tick(&mut session, &mut binder, &intent, dt);
                if result
                    .events
                    .iter()
                    .any(|event| matches!(event, SessionEvent::ConnectionLost))
                {
                    warn!("connection lost; shutting down");
                    session.shutdown();
                    binder.clear();
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    session.shutdown();
    Ok(())
}

/// Positional arguments: `[address] [port]`, defaulting to 127.0.0.1:7777.
fn config_from_args() -> TransportConfig {
    let mut args = std::env::args().skip(1);
    let mut config = TransportConfig::default();

    if let Some(address) = args.next() {
        config.address = address;
    }
    if let Some(port) = args.next() {
        match port.parse() {
            Ok(port) => config.port = port,
            Err(_) => warn!(%port, "ignoring invalid port argument"),
        }
    }
    config
}

/// Dispatch one panel command. Returns `true` when the process should
/// exit. Role-transition failures are printed, never fatal.
async fn handle_command(
    command: PanelCommand,
    session: &mut SessionManager,
    binder: &mut SpawnBinder,
) -> bool {
    match command {
        PanelCommand::StartHost => report(session.start_host().await),
        PanelCommand::StartClient => report(session.start_client().await),
        PanelCommand::StartServer => report(session.start_server().await),
        PanelCommand::Shutdown => {
            session.shutdown();
            binder.clear();
            println!("Session shut down.");
        }
        PanelCommand::Status => println!("{}", status_line(session)),
        PanelCommand::Demo => {
            if let Err(e) = run_demo().await {
                println!("Demo failed: {e}");
            }
        }
        PanelCommand::Quit => return true,
    }
    false
}

fn report(result: Result<(), SessionError>) {
    match result {
        Ok(()) => println!("OK."),
        Err(e) => println!("{e}"),
    }
}

/// Scripted offline exercise of the full path, in the spirit of a smoke
/// test: host on an ephemeral port, join a synthetic participant through
/// the regular event path, drive its entity with scripted intent, and log
/// the authority-side positions.
async fn run_demo() -> anyhow::Result<()> {
    info!("=== Starting Demo Session ===");

    let mut session = SessionManager::new();
    session.configure(
        TransportConfig {
            address: "127.0.0.1".to_string(),
            port: 0,
        },
        Some(EntityTemplate::default()),
    )?;
    session.start_host().await?;
    let mut binder = SpawnBinder::new();

    let dt = 0.1_f32;
    tick(&mut session, &mut binder, &IntentFrame::idle(), dt);

    let guest = ParticipantId::new(7);
    let sender = session
        .event_sender()
        .ok_or_else(|| anyhow!("session has no event queue"))?;
    let _ = sender.send(TransportEvent::PeerConnected(guest));
    tick(&mut session, &mut binder, &IntentFrame::idle(), dt);

    let entity = binder
        .entity_owned_by(guest)
        .ok_or_else(|| anyhow!("guest entity was not spawned"))?;
    let entity_id = entity.id;
    info!(entity = %entity_id, owner = %guest, "guest entity spawned");

    // Stand in for the guest's owning process: sample scripted intent and
    // submit the resulting move requests.
    let channel = MovementChannel::owning(entity_id);
    let forward = IntentFrame::from_keys(KeyIntent {
        up: true,
        ..KeyIntent::none()
    });

    for step in 0..10 {
        if let Some(request) = channel.sample_step(&forward, dt) {
            let _ = sender.send(TransportEvent::PeerMessage {
                from: guest,
                message: ClientMessage::Move(request),
            });
        }
        tick(&mut session, &mut binder, &IntentFrame::idle(), dt);

        if let Some(entity) = binder.entity(entity_id) {
            info!(step, position = ?entity.transform.position, "authority applied movement");
        }
    }

    let final_position = binder
        .entity(entity_id)
        .map(|entity| entity.transform.position)
        .unwrap_or_default();
    info!(?final_position, "demo finished; expected z = 3.0");

    session.shutdown();
    info!(role = %session.role(), "demo session shut down");
    Ok(())
}
