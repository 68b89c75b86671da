use roomlink::config::{self, AppConfig};
use roomlink::common::{assistant_history, transcript};
use roomlink::{DisplayMessage, Identity, LocalBus, SessionManager};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Say(String),
    Peers,
    Join(String),
    Bootstrap(String),
    Transcript,
    History,
    Quit,
    Help,
    Unknown(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Say(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("peers", _) => Command::Peers,
        ("quit" | "exit", _) => Command::Quit,
        ("help", _) => Command::Help,
        ("transcript", _) => Command::Transcript,
        ("history", _) => Command::History,
        ("join", room) if !room.is_empty() => Command::Join(room.to_string()),
        ("bootstrap", addr) if !addr.is_empty() => Command::Bootstrap(addr.to_string()),
        _ => Command::Unknown(line.to_string()),
    };
    Some(command)
}

enum Inbound {
    Message(DisplayMessage),
    PeerCount(usize),
}

fn join(
    manager: &mut SessionManager,
    room: &str,
    identity: &Identity,
    events: &mpsc::UnboundedSender<Inbound>,
) {
    let messages = events.clone();
    let counts = events.clone();
    manager.join(
        room,
        identity.clone(),
        move |message| {
            let _ = messages.send(Inbound::Message(message));
        },
        move |count| {
            let _ = counts.send(Inbound::PeerCount(count));
        },
    );
    println!("* joined {room} as {}", identity.display_name);
}

/// Line-oriented chat on stdin/stdout until `/quit` or end of input.
pub async fn run(
    config_path: String,
    config: AppConfig,
    room: String,
    name: String,
) -> std::io::Result<()> {
    let bus = LocalBus::new(config.local_capacity);
    let mut config = config;
    let mut manager = SessionManager::from_config(&config, Some(bus.clone()));
    let identity = Identity::generate(name);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();

    join(&mut manager, &room, &identity, &events_tx);
    let mut last_count = None;
    let mut stale_manager = false;
    let mut history: Vec<DisplayMessage> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match parse_command(&line) {
                    None => {}
                    Some(Command::Say(text)) => match manager.send(&text) {
                        Some(payload) => history.push(DisplayMessage::from_self(payload)),
                        None => println!("* not in a room"),
                    },
                    Some(Command::Peers) => println!("* {} peers", manager.peer_count()),
                    Some(Command::Join(next_room)) => {
                        if stale_manager {
                            manager.teardown();
                            manager = SessionManager::from_config(&config, Some(bus.clone()));
                            stale_manager = false;
                        }
                        last_count = None;
                        history.clear();
                        join(&mut manager, &next_room, &identity, &events_tx);
                    }
                    Some(Command::Bootstrap(entry)) => {
                        match config::add_bootstrap_node(&config_path, &entry) {
                            Ok(updated) => {
                                config = updated;
                                stale_manager = true;
                                println!("* bootstrap node saved; used from the next /join");
                            }
                            Err(err) => println!("* bootstrap node rejected: {err}"),
                        }
                    }
                    Some(Command::Transcript) => println!("{}", transcript(&history)),
                    Some(Command::History) => {
                        for turn in assistant_history(&history) {
                            match serde_json::to_string(&turn) {
                                Ok(line) => println!("{line}"),
                                Err(err) => log::warn!("Cannot encode history turn: {err}"),
                            }
                        }
                    }
                    Some(Command::Quit) => break,
                    Some(Command::Help) => {
                        println!(
                            "* /peers  /join <room>  /bootstrap <multiaddr>  /transcript  /history  /quit"
                        );
                    }
                    Some(Command::Unknown(input)) => println!("* unknown command: {input}"),
                }
            }
            Some(event) = events_rx.recv() => match event {
                Inbound::Message(message) => {
                    println!("[{}] {}", message.sender_name, message.text);
                    history.push(message);
                }
                Inbound::PeerCount(count) => {
                    if last_count.is_some_and(|last| last != count) {
                        println!("* {count} peers connected");
                    }
                    last_count = Some(count);
                }
            },
        }
    }

    manager.teardown();
    log::info!("Headless session finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines_are_messages() {
        assert_eq!(parse_command("  hello there "), Some(Command::Say("hello there".into())));
        assert_eq!(parse_command("   "), None);
    }

    #[test]
    fn slash_commands() {
        assert_eq!(parse_command("/peers"), Some(Command::Peers));
        assert_eq!(parse_command("/quit"), Some(Command::Quit));
        assert_eq!(parse_command("/transcript"), Some(Command::Transcript));
        assert_eq!(parse_command("/history"), Some(Command::History));
        assert_eq!(parse_command("/join  room-42 "), Some(Command::Join("room-42".into())));
        assert_eq!(
            parse_command("/bootstrap /ip4/1.2.3.4/tcp/4001/p2p/abc"),
            Some(Command::Bootstrap("/ip4/1.2.3.4/tcp/4001/p2p/abc".into()))
        );
    }

    #[test]
    fn commands_missing_arguments_are_unknown() {
        assert_eq!(parse_command("/join"), Some(Command::Unknown("/join".into())));
        assert_eq!(parse_command("/dance"), Some(Command::Unknown("/dance".into())));
    }
}
