use clap::Parser;
use dropcall_lib::{CallClient, CallConfig, CallEvent};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

const HELP: &str = "commands: call <id> | accept | end | mute | play | state | quit";

#[derive(Parser)]
#[command(name = "dropcall")]
#[command(about = "Peer-to-peer audio calls negotiated through a relay", long_about = None)]
struct Cli {
    /// Identity to register on the relay
    #[arg(short, long)]
    id: String,
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Override the relay websocket url
    #[arg(long)]
    relay: Option<String>,
    /// Call this party right after connecting
    #[arg(long)]
    call: Option<String>,
}

fn print_event(event: &CallEvent) {
    match event {
        CallEvent::StateChanged(state) => println!("* state: {state}"),
        CallEvent::IncomingCall(from) => println!("* incoming call from {from} (type 'accept')"),
        CallEvent::RemoteStreamAvailable(stream) => {
            println!("* remote audio on stream {}", stream.stream_id)
        }
        CallEvent::MuteChanged(muted) => println!("* muted: {muted}"),
        CallEvent::Error { kind, message } => println!("! {kind}: {message}"),
        CallEvent::SignalingStatus(status) => println!("* relay: {status:?}"),
        CallEvent::ConnectionChanged(state) => println!("* connection: {state:?}"),
        CallEvent::ConnectionLost => println!("! connection lost, type 'end' to hang up"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CallConfig::load(path)?,
        None => CallConfig::default(),
    };
    if let Some(relay) = cli.relay {
        config.relay.url = relay;
    }

    let client = CallClient::connect(config, cli.id.as_str())?;
    let handle = client.handle().clone();

    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(RecvError::Lagged(missed)) => eprintln!("(missed {missed} events)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    if let Some(remote) = cli.call {
        if let Err(e) = handle.start_call(remote).await {
            eprintln!("{}: {e}", e.kind());
        }
    }

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mut words = line.split_whitespace();
        let result = match (words.next(), words.next()) {
            (None, _) => continue,
            (Some("call"), Some(remote)) => handle.start_call(remote).await,
            (Some("accept"), _) => handle.accept_call().await,
            (Some("end"), _) => handle.end_call().await,
            (Some("mute"), _) => handle.toggle_mute().await.map(|_| ()),
            (Some("play"), _) => handle.play_remote_audio().await,
            (Some("state"), _) => {
                println!(
                    "{} (received {} rtp packets)",
                    handle.state(),
                    client.packets_received()
                );
                Ok(())
            }
            (Some("quit"), _) => break,
            _ => {
                println!("{HELP}");
                continue;
            }
        };
        // reported failures already arrive as error events
        match result {
            Err(e) if !e.is_reported() => eprintln!("{}: {e}", e.kind()),
            _ => {}
        }
    }

    client.shutdown().await;
    Ok(())
}
