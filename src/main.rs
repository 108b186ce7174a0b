//! Command-line front end for PokeProtocol peers.
//!
//! Binds a UDP socket, starts a peer in the requested role, and drives it
//! from a small interactive prompt. Exit code 0 on a clean game over or
//! `quit`, 1 on a fatal connection failure, 2 on a configuration error.

use std::io::BufRead;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing::warn;

use poke_protocol::battle::{BattleEvent, TurnOwner};
use poke_protocol::catalog::Catalog;
use poke_protocol::{Peer, PeerBuilder, PeerEvent, PeerRole, PokeError, UdpNonBlockingSocket};

const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const RED: &str = "\x1b[91m";
const RESET: &str = "\x1b[0m";

#[derive(Parser, Debug)]
#[command(name = "poke-protocol", about = "Peer-to-peer UDP battle protocol")]
struct Opt {
    /// Display name.
    #[arg(long)]
    name: String,
    /// Act as host: wait for a handshake, generate the seed, attack first.
    #[arg(long)]
    host: bool,
    /// Local UDP port to bind.
    #[arg(long, default_value_t = 8888)]
    port: u16,
    /// Act as joiner; send the handshake request to this address.
    #[arg(long)]
    connect: Option<SocketAddr>,
    /// Combatant name (ignored for spectators).
    #[arg(long)]
    pokemon: Option<String>,
    /// Act as read-only spectator.
    #[arg(long)]
    spectator: bool,
    /// Log every sent and received frame with its sequence number.
    #[arg(long)]
    verbose: bool,
    /// Load the combatant catalog from a CSV file instead of the built-in
    /// roster.
    #[arg(long)]
    data: Option<PathBuf>,
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {}", err);
            2
        },
    };
    std::process::exit(code);
}

fn run() -> Result<i32, PokeError> {
    let opt = Opt::parse();

    let level = if opt.verbose {
        tracing::Level::TRACE
    } else {
        tracing::Level::INFO
    };
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish(),
    )
    .map_err(|e| PokeError::Setup {
        reason: format!("failed to install tracing subscriber: {}", e),
    })?;

    let role = if opt.spectator {
        PeerRole::Spectator
    } else if opt.host {
        PeerRole::Host
    } else if opt.connect.is_some() {
        PeerRole::Joiner
    } else {
        return Err(PokeError::Setup {
            reason: "pick a role: --host, --connect <ip:port>, or --spectator".into(),
        });
    };

    let catalog = match &opt.data {
        Some(path) => Catalog::from_csv_path(path)?,
        None => Catalog::builtin(),
    };

    let mut builder = PeerBuilder::new()
        .with_name(&opt.name)
        .with_role(role)
        .with_catalog(catalog);
    if role != PeerRole::Spectator {
        let pokemon = opt.pokemon.as_deref().ok_or_else(|| PokeError::Setup {
            reason: "pick a combatant with --pokemon <name>".into(),
        })?;
        builder = builder.with_combatant(pokemon)?;
    }
    if let Some(addr) = opt.connect {
        builder = builder.with_remote(addr);
    }

    let socket = UdpNonBlockingSocket::bind_to_port(opt.port)?;
    let mut peer = builder.start(socket, Instant::now())?;
    println!(
        "[{}] listening on port {} as {}",
        peer.name(),
        opt.port,
        peer.role()
    );
    print_help();

    // stdin reader thread; the main loop stays free to poll the socket
    let (tx, rx) = mpsc::channel::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                },
                Err(_) => break,
            }
        }
    });

    loop {
        let now = Instant::now();
        peer.poll(now);

        let events: Vec<PeerEvent> = peer.events().collect();
        for event in events {
            render_event(&peer, event);
        }

        match rx.try_recv() {
            Ok(line) => {
                if !handle_command(&mut peer, line.trim()) {
                    return Ok(0);
                }
            },
            Err(mpsc::TryRecvError::Empty) => {},
            Err(mpsc::TryRecvError::Disconnected) => return Ok(0),
        }

        if peer.is_finished(Instant::now()) {
            return Ok(if peer.has_failed() { 1 } else { 0 });
        }

        std::thread::sleep(Duration::from_millis(10));
    }
}

fn print_help() {
    println!("commands:");
    println!("  attack <move> [boost]   announce an attack (boost spends a Sp.Atk use)");
    println!("  guard on|off            spend Sp.Def boost uses when defending");
    println!("  chat <text>             send a chat line");
    println!("  sticker <path>          send an image as a sticker");
    println!("  moves                   list your combatant's moves");
    println!("  status                  show the HP bars");
    println!("  quit                    leave the battle");
}

/// Returns false when the user asked to quit.
fn handle_command(peer: &mut Peer<UdpNonBlockingSocket>, line: &str) -> bool {
    let now = Instant::now();
    let (command, rest) = match line.split_once(' ') {
        Some((c, r)) => (c, r.trim()),
        None => (line, ""),
    };
    match command {
        "" => {},
        "quit" | "exit" => return false,
        "help" => print_help(),
        "attack" => {
            let (move_name, boost) = match rest.strip_suffix(" boost") {
                Some(name) => (name.trim(), true),
                None => (rest, false),
            };
            if move_name.is_empty() {
                println!("usage: attack <move> [boost]");
            } else if let Err(err) = peer.attack(move_name, boost, now) {
                println!("{}", err);
            }
        },
        "guard" => match rest {
            "on" => {
                peer.set_defend_with_boost(true);
                println!("defense boost: on");
            },
            "off" => {
                peer.set_defend_with_boost(false);
                println!("defense boost: off");
            },
            _ => println!("usage: guard on|off"),
        },
        "chat" => {
            if let Err(err) = peer.send_chat_text(rest, now) {
                println!("{}", err);
            }
        },
        "sticker" => match std::fs::read(rest) {
            Ok(bytes) => {
                if let Err(err) = peer.send_sticker(&bytes, now) {
                    println!("{}", err);
                }
            },
            Err(err) => println!("cannot read {}: {}", rest, err),
        },
        "moves" => match peer.battle() {
            Some(battle) => {
                for m in &battle.me().combatant.moves {
                    println!("  {}", m);
                }
            },
            None => println!("no battle in progress"),
        },
        "status" => print_status(peer),
        other => println!("unknown command {:?} (try help)", other),
    }
    true
}

fn hp_bar(current: u32, maximum: u32, name: &str, mine: bool) -> String {
    let percentage = if maximum > 0 {
        current as f64 / maximum as f64 * 100.0
    } else {
        0.0
    };
    let bar_length = 30usize;
    let filled = if maximum > 0 {
        (bar_length as u32 * current / maximum) as usize
    } else {
        0
    };
    let bar: String = "\u{2588}".repeat(filled) + &"\u{2591}".repeat(bar_length - filled);
    let color = if percentage >= 65.0 {
        GREEN
    } else if percentage >= 25.0 {
        YELLOW
    } else {
        RED
    };
    let prefix = if mine { "YOU:      " } else { "OPPONENT: " };
    format!(
        "{}{:15} [{}{}{}] {:3}/{:3} ({:5.1}%)",
        prefix, name, color, bar, RESET, current, maximum, percentage
    )
}

fn print_status(peer: &Peer<UdpNonBlockingSocket>) {
    let Some(battle) = peer.battle() else {
        println!("no battle in progress");
        return;
    };
    let me = battle.me();
    println!("{}", hp_bar(me.hp, me.max_hp, &me.combatant.name, true));
    if let Some(opp) = battle.opponent() {
        println!("{}", hp_bar(opp.hp, opp.max_hp, &opp.combatant.name, false));
    }
    println!(
        "phase: {} | sp.atk uses: {} | sp.def uses: {}",
        battle.phase(),
        me.sp_atk_uses_left,
        me.sp_def_uses_left
    );
}

fn render_event(peer: &Peer<UdpNonBlockingSocket>, event: PeerEvent) {
    match event {
        PeerEvent::HandshakeComplete { peer_name, seed } => {
            println!("connected to {} (seed {})", peer_name, seed);
        },
        PeerEvent::PeerConnected { name, addr } => {
            println!("{} joined from {}", name, addr);
        },
        PeerEvent::SpectatorJoined { name, addr } => {
            println!("{} is now spectating from {}", name, addr);
        },
        PeerEvent::Battle(battle_event) => render_battle_event(peer, battle_event),
        PeerEvent::ChatText { from, text } => {
            println!("[{}] {}", from, text);
        },
        PeerEvent::StickerReceived { from, bytes } => match save_sticker(&from, &bytes) {
            Ok(path) => println!("[{}] sent a sticker -> {}", from, path.display()),
            Err(err) => warn!(%from, %err, "could not save sticker"),
        },
        PeerEvent::Spectated(body) => {
            println!("* {:?}", body);
        },
        PeerEvent::SetupFailed { reason } => {
            println!("setup failed: {}", reason);
        },
        PeerEvent::ConnectionFailed {
            sequence_number,
            kind,
        } => {
            println!(
                "connection failed: {} (seq {}) went unanswered",
                kind, sequence_number
            );
        },
    }
}

fn render_battle_event(peer: &Peer<UdpNonBlockingSocket>, event: BattleEvent) {
    match event {
        BattleEvent::Started {
            me,
            opponent,
            my_hp,
            opp_hp,
            first,
        } => {
            println!("{}", "=".repeat(60));
            println!("BATTLE STARTED!");
            println!("{}", hp_bar(my_hp, my_hp, &me, true));
            println!("{}", hp_bar(opp_hp, opp_hp, &opponent, false));
            println!("{}", "=".repeat(60));
            if first == TurnOwner::Me {
                println!("you go first");
            } else {
                println!("opponent goes first");
            }
        },
        BattleEvent::AttackAnnounced { by_me, move_name } => {
            if by_me {
                println!("attacking with {}...", move_name);
            } else {
                println!("opponent is attacking with {}...", move_name);
            }
        },
        BattleEvent::TurnResolved {
            attacker_was_me,
            move_name,
            damage,
            effectiveness,
            ..
        } => {
            let attacker = if attacker_was_me { "You" } else { "Opponent" };
            println!("{} used {}! {} damage.", attacker, move_name, damage);
            if let Some(text) = effectiveness {
                println!("{}", text);
            }
            print_status(peer);
            if let Some(battle) = peer.battle() {
                if !battle.is_over() {
                    if battle.turn() == TurnOwner::Me {
                        println!("your turn!");
                    } else {
                        println!("waiting for the opponent...");
                    }
                }
            }
        },
        BattleEvent::DiscrepancyDetected {
            local_damage,
            remote_damage,
        } => {
            println!(
                "calculation mismatch (ours {}, theirs {}), resolving...",
                local_damage, remote_damage
            );
        },
        BattleEvent::DiscrepancyResolved { damage } => {
            println!("resolved with the attacker's value: {} damage", damage);
        },
        BattleEvent::Finished {
            winner,
            loser,
            we_won,
        } => {
            println!("{}", "=".repeat(60));
            println!("{} has fainted! {} wins the battle!", loser, winner);
            if we_won {
                println!("you win!");
            } else {
                println!("you lose...");
            }
            println!("{}", "=".repeat(60));
        },
    }
}

fn save_sticker(sender: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all("stickers")?;
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let path = PathBuf::from(format!("stickers/sticker_{}_{}.png", sender, millis));
    std::fs::write(&path, bytes)?;
    Ok(path)
}
