//! The peer orchestrator: owns the socket, binds the codec, reliability
//! layer, and battle state machine together, and dispatches inbound frames.
//!
//! A peer is driven by calling [`Peer::poll`] on a steady tick (~100 ms or
//! faster). One tick drains the socket, feeds datagrams through decode and
//! the reliability layer, dispatches delivered messages by kind and role,
//! flushes the battle outbox back through the reliability layer, and finally
//! writes everything queued onto the socket. All timed decisions take the
//! caller's `now`, which keeps every flow reproducible in tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

use base64::Engine as _;
use tracing::{debug, info, trace, warn};

use crate::battle::{BattleEvent, BattleState};
use crate::catalog::Catalog;
use crate::error::{DecodeError, PokeError};
use crate::reliability::{ReliabilityEvent, ReliabilityLayer};
use crate::wire::{self, ChatContent, Message, MessageBody, MessageKind};
use crate::{
    NonBlockingSocket, PeerRole, PokeResult, ProtocolConfig, SequenceNumber, DEFAULT_BOOST_USES,
};

/// Notifications drained from [`Peer::events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The handshake completed; the shared seed is known.
    HandshakeComplete {
        /// The remote display name, when the handshake carried one.
        peer_name: String,
        /// The negotiated seed.
        seed: u32,
    },
    /// A joiner reached us (host side).
    PeerConnected {
        /// The joiner's display name.
        name: String,
        /// The joiner's address.
        addr: SocketAddr,
    },
    /// A spectator subscribed to the feed (host side).
    SpectatorJoined {
        /// The spectator's display name.
        name: String,
        /// The spectator's address.
        addr: SocketAddr,
    },
    /// A battle state machine notification.
    Battle(BattleEvent),
    /// A text chat line arrived.
    ChatText {
        /// Sender's display name.
        from: String,
        /// The text.
        text: String,
    },
    /// A sticker arrived and decoded; the front end persists it.
    StickerReceived {
        /// Sender's display name.
        from: String,
        /// Decoded image bytes.
        bytes: Vec<u8>,
    },
    /// Spectator side: a battle-flow message to display.
    Spectated(MessageBody),
    /// The opponent's setup failed to resolve against our catalog; the
    /// session cannot continue.
    SetupFailed {
        /// Why.
        reason: String,
    },
    /// A message to the battle peer exhausted its retries; the session is
    /// over.
    ConnectionFailed {
        /// Sequence number of the abandoned message.
        sequence_number: SequenceNumber,
        /// Kind of the abandoned message.
        kind: MessageKind,
    },
}

/// Configures and starts a [`Peer`]. Mirrors the builder idiom used across
/// the crate's ancestors: chain `with_*` calls, then [`start`](Self::start).
#[derive(Debug, Clone)]
pub struct PeerBuilder {
    name: String,
    role: PeerRole,
    catalog: Catalog,
    combatant: Option<String>,
    sp_atk_uses: u8,
    sp_def_uses: u8,
    remote: Option<SocketAddr>,
    config: ProtocolConfig,
}

impl Default for PeerBuilder {
    fn default() -> Self {
        Self {
            name: String::from("anonymous"),
            role: PeerRole::Host,
            catalog: Catalog::builtin(),
            combatant: None,
            sp_atk_uses: DEFAULT_BOOST_USES,
            sp_def_uses: DEFAULT_BOOST_USES,
            remote: None,
            config: ProtocolConfig::default(),
        }
    }
}

impl PeerBuilder {
    /// Starts a builder with the built-in catalog, host role, and default
    /// timings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the display name carried in handshakes and chat.
    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Sets the role. Defaults to host.
    #[must_use]
    pub fn with_role(mut self, role: PeerRole) -> Self {
        self.role = role;
        self
    }

    /// Replaces the built-in catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: Catalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Picks our combatant by name (case-insensitive). Errors on a catalog
    /// miss so bad names die before any traffic.
    pub fn with_combatant(mut self, name: &str) -> PokeResult<Self> {
        let resolved = self.catalog.resolve(name)?.name.clone();
        self.combatant = Some(resolved);
        Ok(self)
    }

    /// Overrides the boost budgets exchanged at setup (default 5 and 5).
    #[must_use]
    pub fn with_boost_uses(mut self, sp_atk: u8, sp_def: u8) -> Self {
        self.sp_atk_uses = sp_atk;
        self.sp_def_uses = sp_def;
        self
    }

    /// Sets the remote endpoint. Required for joiners and spectators.
    #[must_use]
    pub fn with_remote(mut self, addr: SocketAddr) -> Self {
        self.remote = Some(addr);
        self
    }

    /// Overrides the protocol timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and starts the peer, queueing the opening
    /// handshake when the role calls for one.
    pub fn start<S>(self, socket: S, now: Instant) -> PokeResult<Peer<S>>
    where
        S: NonBlockingSocket<SocketAddr>,
    {
        if self.role != PeerRole::Spectator && self.combatant.is_none() {
            return Err(PokeError::Setup {
                reason: format!("a {} needs a combatant", self.role),
            });
        }
        if self.role != PeerRole::Host && self.remote.is_none() {
            return Err(PokeError::Setup {
                reason: format!("a {} needs a remote address to connect to", self.role),
            });
        }

        let mut peer = Peer {
            socket,
            name: self.name,
            role: self.role,
            catalog: self.catalog,
            combatant: self.combatant,
            sp_atk_uses: self.sp_atk_uses,
            sp_def_uses: self.sp_def_uses,
            reliability: ReliabilityLayer::new(self.config.clone()),
            config: self.config,
            battle: None,
            pending_setup: None,
            seed: None,
            peer_addr: self.remote,
            spectators: Vec::new(),
            events: VecDeque::new(),
            game_over_deadline: None,
            failed: false,
            defend_with_boost: false,
        };

        match peer.role {
            PeerRole::Host => {
                info!(name = %peer.name, "waiting for a handshake");
            },
            PeerRole::Joiner => {
                let dest = peer.peer_addr.ok_or_else(|| PokeError::Setup {
                    reason: "joiner remote address missing".into(),
                })?;
                peer.reliability.send(
                    MessageBody::HandshakeRequest {
                        name: peer.name.clone(),
                    },
                    dest,
                    now,
                );
                info!(name = %peer.name, %dest, "sent handshake request");
            },
            PeerRole::Spectator => {
                let dest = peer.peer_addr.ok_or_else(|| PokeError::Setup {
                    reason: "spectator remote address missing".into(),
                })?;
                peer.reliability.send(
                    MessageBody::SpectatorRequest {
                        name: peer.name.clone(),
                    },
                    dest,
                    now,
                );
                info!(name = %peer.name, %dest, "sent spectator request");
            },
        }
        peer.flush(now);
        Ok(peer)
    }
}

/// One endpoint of a battle session.
pub struct Peer<S> {
    socket: S,
    name: String,
    role: PeerRole,
    catalog: Catalog,
    combatant: Option<String>,
    sp_atk_uses: u8,
    sp_def_uses: u8,
    config: ProtocolConfig,
    reliability: ReliabilityLayer<SocketAddr>,
    battle: Option<BattleState>,
    /// A `BATTLE_SETUP` that outran the handshake response. The reliability
    /// layer has already ACKed it, so it will never be retransmitted; buffer
    /// it here and replay it once the battle exists.
    pending_setup: Option<(String, u32, u8, u8)>,
    seed: Option<u32>,
    peer_addr: Option<SocketAddr>,
    spectators: Vec<SocketAddr>,
    events: VecDeque<PeerEvent>,
    game_over_deadline: Option<Instant>,
    failed: bool,
    defend_with_boost: bool,
}

impl<S> Peer<S>
where
    S: NonBlockingSocket<SocketAddr>,
{
    /// Runs one tick: socket in, protocol, socket out.
    pub fn poll(&mut self, now: Instant) {
        for (addr, bytes) in self.socket.receive_all() {
            match wire::decode(&bytes) {
                Ok(datagram) => {
                    trace!(from = %addr, kind = %datagram.kind(), "received datagram");
                    self.reliability.handle_datagram(addr, datagram);
                },
                Err(DecodeError::UnknownType {
                    type_name,
                    sequence_number: Some(seq),
                }) => {
                    debug!(from = %addr, %type_name, "acking unknown message type");
                    self.reliability.acknowledge_only(addr, seq);
                },
                Err(err) => {
                    // malformed datagrams are dropped silently
                    trace!(from = %addr, %err, "dropping undecodable datagram");
                },
            }
        }

        let events: Vec<ReliabilityEvent<SocketAddr>> = self.reliability.poll(now).collect();
        for event in events {
            match event {
                ReliabilityEvent::Delivered { from, message } => self.dispatch(from, message, now),
                ReliabilityEvent::ConnectionFailed {
                    sequence_number,
                    kind,
                    dest,
                } => self.on_connection_failed(sequence_number, kind, dest),
            }
        }

        self.flush(now);
    }

    fn dispatch(&mut self, from: SocketAddr, message: Message, now: Instant) {
        let Message {
            sequence_number,
            body,
            ..
        } = message;
        trace!(from = %from, seq = %sequence_number, kind = %body.kind(), "dispatching");
        match body {
            MessageBody::HandshakeRequest { name } => self.on_handshake_request(name, from, now),
            MessageBody::HandshakeResponse { name, seed } => {
                self.on_handshake_response(name, seed)
            },
            MessageBody::SpectatorRequest { name } => self.on_spectator_request(name, from, now),
            MessageBody::BattleSetup {
                pokemon,
                hp,
                sp_atk_uses,
                sp_def_uses,
            } => self.on_battle_setup(pokemon, hp, sp_atk_uses, sp_def_uses, now),
            MessageBody::Chat {
                content_type,
                from: sender,
                payload,
            } => self.on_chat(content_type, sender, payload, now),
            battle_body => {
                if self.role == PeerRole::Spectator {
                    self.events.push_back(PeerEvent::Spectated(battle_body));
                    return;
                }
                self.mirror_to_spectators(&battle_body, now);
                if let Some(battle) = self.battle.as_mut() {
                    battle.handle_message(battle_body);
                } else {
                    debug!(kind = %battle_body.kind(), "battle message before setup, ignoring");
                }
            },
        }
    }

    fn on_handshake_request(&mut self, name: String, from: SocketAddr, now: Instant) {
        if self.role != PeerRole::Host {
            debug!(%from, "ignoring handshake request, we are not hosting");
            return;
        }
        self.peer_addr = Some(from);
        let seed = *self.seed.get_or_insert_with(crate::rng::entropy_seed);
        self.reliability.send(
            MessageBody::HandshakeResponse {
                name: self.name.clone(),
                seed,
            },
            from,
            now,
        );
        info!(joiner = %name, %from, seed, "joiner connected");
        self.events.push_back(PeerEvent::PeerConnected { name, addr: from });
        self.init_battle(seed, true);
    }

    fn on_handshake_response(&mut self, name: String, seed: u32) {
        if self.role == PeerRole::Host {
            debug!("ignoring handshake response, we are the host");
            return;
        }
        if self.seed.is_some() {
            // duplicate response beyond the dedup window; handshake is done
            return;
        }
        self.seed = Some(seed);
        info!(host = %name, seed, "handshake complete");
        self.events.push_back(PeerEvent::HandshakeComplete {
            peer_name: name,
            seed,
        });
        if self.role == PeerRole::Joiner {
            self.init_battle(seed, false);
        }
    }

    fn on_spectator_request(&mut self, name: String, from: SocketAddr, now: Instant) {
        if self.role != PeerRole::Host {
            debug!(%from, "ignoring spectator request, we are not hosting");
            return;
        }
        if !self.spectators.contains(&from) {
            self.spectators.push(from);
        }
        let seed = *self.seed.get_or_insert_with(crate::rng::entropy_seed);
        self.reliability.send(
            MessageBody::HandshakeResponse {
                name: self.name.clone(),
                seed,
            },
            from,
            now,
        );
        info!(spectator = %name, %from, "spectator joined");
        self.events
            .push_back(PeerEvent::SpectatorJoined { name, addr: from });
    }

    fn on_battle_setup(
        &mut self,
        pokemon: String,
        hp: u32,
        sp_atk_uses: u8,
        sp_def_uses: u8,
        now: Instant,
    ) {
        let body = MessageBody::BattleSetup {
            pokemon: pokemon.clone(),
            hp,
            sp_atk_uses,
            sp_def_uses,
        };
        if self.role == PeerRole::Spectator {
            self.events.push_back(PeerEvent::Spectated(body));
            return;
        }
        self.mirror_to_spectators(&body, now);

        let combatant = match self.catalog.lookup(&pokemon) {
            Ok(c) => c.clone(),
            Err(err) => {
                // a peer fighting with a combatant we cannot resolve is fatal
                warn!(%pokemon, "opponent setup failed: {}", err);
                self.failed = true;
                self.events.push_back(PeerEvent::SetupFailed {
                    reason: err.to_string(),
                });
                return;
            },
        };
        if let Some(battle) = self.battle.as_mut() {
            battle.handle_setup(combatant, hp, sp_atk_uses, sp_def_uses);
        } else {
            debug!("BATTLE_SETUP outran the handshake, buffering");
            self.pending_setup = Some((pokemon, hp, sp_atk_uses, sp_def_uses));
        }
    }

    fn on_chat(&mut self, content_type: ChatContent, sender: String, payload: String, now: Instant) {
        if self.role == PeerRole::Host {
            self.mirror_to_spectators(
                &MessageBody::Chat {
                    content_type,
                    from: sender.clone(),
                    payload: payload.clone(),
                },
                now,
            );
        }
        match content_type {
            ChatContent::Text => {
                self.events.push_back(PeerEvent::ChatText {
                    from: sender,
                    text: payload,
                });
            },
            ChatContent::Sticker => {
                match base64::engine::general_purpose::STANDARD.decode(payload.as_bytes()) {
                    Ok(bytes) => {
                        self.events
                            .push_back(PeerEvent::StickerReceived { from: sender, bytes });
                    },
                    Err(err) => {
                        debug!(%sender, %err, "dropping sticker with invalid base64");
                    },
                }
            },
        }
    }

    fn init_battle(&mut self, seed: u32, host_is_me: bool) {
        if self.battle.is_some() {
            return;
        }
        let Some(name) = self.combatant.as_deref() else {
            return;
        };
        let combatant = match self.catalog.lookup(name) {
            Ok(c) => c.clone(),
            Err(err) => {
                self.failed = true;
                self.events.push_back(PeerEvent::SetupFailed {
                    reason: err.to_string(),
                });
                return;
            },
        };
        let mut battle = BattleState::new(
            seed,
            host_is_me,
            combatant,
            self.sp_atk_uses,
            self.sp_def_uses,
        );
        battle.set_defend_with_boost(self.defend_with_boost);
        battle.start_setup();
        if let Some((pokemon, hp, sp_atk, sp_def)) = self.pending_setup.take() {
            match self.catalog.lookup(&pokemon) {
                Ok(c) => battle.handle_setup(c.clone(), hp, sp_atk, sp_def),
                Err(err) => {
                    self.failed = true;
                    self.events.push_back(PeerEvent::SetupFailed {
                        reason: err.to_string(),
                    });
                    return;
                },
            }
        }
        self.battle = Some(battle);
    }

    /// Moves battle outbox entries into the reliability layer, surfaces
    /// battle events, and writes every queued datagram onto the socket.
    fn flush(&mut self, now: Instant) {
        if let Some(battle) = self.battle.as_mut() {
            let bodies: Vec<MessageBody> = battle.drain_outbox().collect();
            let events: Vec<BattleEvent> = battle.drain_events().collect();
            if let Some(dest) = self.peer_addr {
                for body in bodies {
                    self.mirror_to_spectators(&body, now);
                    self.reliability.send(body, dest, now);
                }
            } else if !bodies.is_empty() {
                warn!("dropping battle output, no peer address yet");
            }
            for event in events {
                if matches!(event, BattleEvent::Finished { .. })
                    && self.game_over_deadline.is_none()
                {
                    self.game_over_deadline = Some(now + self.config.game_over_grace);
                }
                self.events.push_back(PeerEvent::Battle(event));
            }
        }

        let outbound: Vec<_> = self.reliability.drain_outbound().collect();
        for (addr, datagram) in outbound {
            trace!(to = %addr, kind = %datagram.kind(), "sending datagram");
            self.socket.send_to(&wire::encode(&datagram), &addr);
        }
    }

    fn mirror_to_spectators(&mut self, body: &MessageBody, now: Instant) {
        if self.role != PeerRole::Host || self.spectators.is_empty() {
            return;
        }
        if !matches!(
            body,
            MessageBody::BattleSetup { .. }
                | MessageBody::AttackAnnounce { .. }
                | MessageBody::DefenseAnnounce { .. }
                | MessageBody::CalculationReport { .. }
                | MessageBody::CalculationConfirm
                | MessageBody::ResolutionRequest { .. }
                | MessageBody::GameOver { .. }
                | MessageBody::Chat { .. }
        ) {
            return;
        }
        for addr in self.spectators.clone() {
            self.reliability.send(body.clone(), addr, now);
        }
    }

    fn on_connection_failed(
        &mut self,
        sequence_number: SequenceNumber,
        kind: MessageKind,
        dest: SocketAddr,
    ) {
        if let Some(index) = self.spectators.iter().position(|s| *s == dest) {
            // a silent spectator is dropped, not fatal to the battle
            warn!(%dest, "spectator stopped responding, dropping it");
            self.spectators.swap_remove(index);
            self.reliability.forget_destination(&dest);
            return;
        }
        warn!(%dest, seq = %sequence_number, %kind, "peer stopped responding");
        self.failed = true;
        if let Some(battle) = self.battle.as_mut() {
            battle.abandon();
        }
        self.events.push_back(PeerEvent::ConnectionFailed {
            sequence_number,
            kind,
        });
    }

    /// User action: announce an attack.
    pub fn attack(&mut self, move_name: &str, use_boost: bool, now: Instant) -> PokeResult<()> {
        let battle = self.battle.as_mut().ok_or(PokeError::InvalidCommand {
            reason: "no battle in progress".into(),
        })?;
        battle.attack(move_name, use_boost)?;
        self.flush(now);
        Ok(())
    }

    /// User action: send a text chat line. Newlines are forbidden because the
    /// wire format is line-oriented.
    pub fn send_chat_text(&mut self, text: &str, now: Instant) -> PokeResult<()> {
        if text.contains('\n') {
            return Err(PokeError::InvalidCommand {
                reason: "chat text must not contain newlines".into(),
            });
        }
        let body = MessageBody::Chat {
            content_type: ChatContent::Text,
            from: self.name.clone(),
            payload: text.to_owned(),
        };
        self.send_chat(body, now)
    }

    /// User action: send a sticker. Bytes travel base64-encoded.
    pub fn send_sticker(&mut self, bytes: &[u8], now: Instant) -> PokeResult<()> {
        let body = MessageBody::Chat {
            content_type: ChatContent::Sticker,
            from: self.name.clone(),
            payload: base64::engine::general_purpose::STANDARD.encode(bytes),
        };
        self.send_chat(body, now)
    }

    fn send_chat(&mut self, body: MessageBody, now: Instant) -> PokeResult<()> {
        let dest = self.peer_addr.ok_or(PokeError::InvalidCommand {
            reason: "not connected to a peer yet".into(),
        })?;
        self.mirror_to_spectators(&body, now);
        self.reliability.send(body, dest, now);
        self.flush(now);
        Ok(())
    }

    /// Sets the standing policy for defense boosts announced on our
    /// `DEFENSE_ANNOUNCE`s.
    pub fn set_defend_with_boost(&mut self, on: bool) {
        self.defend_with_boost = on;
        if let Some(battle) = self.battle.as_mut() {
            battle.set_defend_with_boost(on);
        }
    }

    /// Drains pending notifications.
    pub fn events(&mut self) -> std::collections::vec_deque::Drain<'_, PeerEvent> {
        self.events.drain(..)
    }

    /// Whether the session has reached its end: a fatal failure, or a
    /// finished battle whose final ACKs have been observed (or whose grace
    /// window has elapsed).
    #[must_use]
    pub fn is_finished(&self, now: Instant) -> bool {
        if self.failed {
            return true;
        }
        match (&self.battle, self.game_over_deadline) {
            (Some(battle), Some(deadline)) if battle.is_over() => {
                !self.reliability.has_pending() || now >= deadline
            },
            _ => false,
        }
    }

    /// Whether the session ended in a fatal failure.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Our display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Our role.
    #[must_use]
    pub fn role(&self) -> PeerRole {
        self.role
    }

    /// The negotiated seed, once known.
    #[must_use]
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// The battle peer's address, once known.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Read access to the battle state, once setup begins.
    #[must_use]
    pub fn battle(&self) -> Option<&BattleState> {
        self.battle.as_ref()
    }
}
