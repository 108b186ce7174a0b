//! The wire codec: one message per UDP datagram, encoded as UTF-8 text with
//! `key:value` pairs separated by `\n`, the first pair always being
//! `type:<MESSAGE_TYPE>`.
//!
//! Every message except `ACK` carries a `sequence_number:<u32>` pair. Field
//! order on encode is stable (`type` first, then `sequence_number`, then the
//! kind's documented fields) so verbose logs stay readable. Unknown keys
//! survive decoding as extra fields and are re-emitted on encode, so
//! `decode(encode(m)) == m` holds even for messages from newer peers.
//!
//! Values must not contain `\n`; the peer enforces this for user-supplied
//! chat text, and binary sticker payloads travel base64-encoded.

use crate::error::DecodeError;
use crate::SequenceNumber;

/// Payload discriminator for `CHAT_MESSAGE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChatContent {
    /// Plain text payload.
    Text,
    /// Base64-encoded PNG payload.
    Sticker,
}

impl ChatContent {
    /// Wire spelling of this content type.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Sticker => "STICKER",
        }
    }
}

/// The application payload of a sequenced message: a tagged sum over the
/// message kinds of the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Joiner → host: open the session.
    HandshakeRequest {
        /// Joiner's display name.
        name: String,
    },
    /// Host → joiner/spectator: session accepted, here is the shared seed.
    HandshakeResponse {
        /// Host's display name.
        name: String,
        /// The 32-bit seed both peers feed their PRNG.
        seed: u32,
    },
    /// Spectator → host: request the read-only feed.
    SpectatorRequest {
        /// Spectator's display name.
        name: String,
    },
    /// Declares the sender's combatant and per-battle resources.
    BattleSetup {
        /// Combatant name, resolved against the receiver's catalog.
        pokemon: String,
        /// The sender's starting HP.
        hp: u32,
        /// The sender's special-attack boost uses.
        sp_atk_uses: u8,
        /// The sender's special-defense boost uses.
        sp_def_uses: u8,
    },
    /// Attacker: announce the move for this turn.
    AttackAnnounce {
        /// The move's name.
        move_name: String,
        /// Whether the attacker spends a special-attack boost use (advisory;
        /// honored only while uses remain).
        use_sp_atk_boost: bool,
    },
    /// Defender: acknowledge the attack and declare the defense boost.
    DefenseAnnounce {
        /// Whether the defender spends a special-defense boost use.
        use_sp_def_boost: bool,
    },
    /// Either side's independently computed result for the turn.
    CalculationReport {
        /// Damage dealt.
        damage: u32,
        /// Defender's HP after applying the damage (clamped at zero).
        defender_hp_after: u32,
    },
    /// Confirms the turn result; the receiver applies damage and flips turn.
    CalculationConfirm,
    /// Defender → attacker: our numbers disagree, here are mine. The
    /// attacker's values win.
    ResolutionRequest {
        /// The defender's computed damage.
        damage: u32,
        /// The defender's computed post-damage HP.
        defender_hp_after: u32,
    },
    /// Terminal announcement by the winning attacker.
    GameOver {
        /// Name of the winning combatant.
        winner: String,
        /// Name of the fainted combatant.
        loser: String,
    },
    /// Free-form chat, processed in every phase and never touching battle
    /// state.
    Chat {
        /// Payload discriminator.
        content_type: ChatContent,
        /// Sender's display name.
        from: String,
        /// Text, or base64 sticker bytes.
        payload: String,
    },
}

impl MessageBody {
    /// The kind tag of this body.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::HandshakeRequest { .. } => MessageKind::HandshakeRequest,
            Self::HandshakeResponse { .. } => MessageKind::HandshakeResponse,
            Self::SpectatorRequest { .. } => MessageKind::SpectatorRequest,
            Self::BattleSetup { .. } => MessageKind::BattleSetup,
            Self::AttackAnnounce { .. } => MessageKind::AttackAnnounce,
            Self::DefenseAnnounce { .. } => MessageKind::DefenseAnnounce,
            Self::CalculationReport { .. } => MessageKind::CalculationReport,
            Self::CalculationConfirm => MessageKind::CalculationConfirm,
            Self::ResolutionRequest { .. } => MessageKind::ResolutionRequest,
            Self::GameOver { .. } => MessageKind::GameOver,
            Self::Chat { .. } => MessageKind::Chat,
        }
    }
}

/// Message kind tags, one per wire `type` value plus `ACK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MessageKind {
    HandshakeRequest,
    HandshakeResponse,
    SpectatorRequest,
    BattleSetup,
    AttackAnnounce,
    DefenseAnnounce,
    CalculationReport,
    CalculationConfirm,
    ResolutionRequest,
    GameOver,
    Chat,
    Ack,
}

impl MessageKind {
    /// The wire spelling of this kind.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::HandshakeRequest => "HANDSHAKE_REQUEST",
            Self::HandshakeResponse => "HANDSHAKE_RESPONSE",
            Self::SpectatorRequest => "SPECTATOR_REQUEST",
            Self::BattleSetup => "BATTLE_SETUP",
            Self::AttackAnnounce => "ATTACK_ANNOUNCE",
            Self::DefenseAnnounce => "DEFENSE_ANNOUNCE",
            Self::CalculationReport => "CALCULATION_REPORT",
            Self::CalculationConfirm => "CALCULATION_CONFIRM",
            Self::ResolutionRequest => "RESOLUTION_REQUEST",
            Self::GameOver => "GAME_OVER",
            Self::Chat => "CHAT_MESSAGE",
            Self::Ack => "ACK",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// A sequenced application message.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// The sender-assigned sequence number.
    pub sequence_number: SequenceNumber,
    /// The typed payload.
    pub body: MessageBody,
    /// Unknown keys encountered on decode, preserved in order of appearance.
    pub extras: Vec<(String, String)>,
}

impl Message {
    /// Builds a message with no extra fields.
    #[must_use]
    pub fn new(sequence_number: SequenceNumber, body: MessageBody) -> Self {
        Self {
            sequence_number,
            body,
            extras: Vec::new(),
        }
    }
}

/// Everything a single datagram can carry: either a bare `ACK` or a sequenced
/// message.
#[derive(Debug, Clone, PartialEq)]
pub enum Datagram {
    /// Acknowledges the referenced sequence number. Never itself ACKed.
    Ack {
        /// The sequence number being acknowledged.
        ack: SequenceNumber,
    },
    /// A sequenced application message.
    Message(Message),
}

impl Datagram {
    /// The kind tag of this datagram.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Ack { .. } => MessageKind::Ack,
            Self::Message(msg) => msg.body.kind(),
        }
    }
}

/// Encodes a datagram as `key:value` lines with a trailing newline.
#[must_use]
pub fn encode(datagram: &Datagram) -> Vec<u8> {
    let mut out = String::new();
    push_pair(&mut out, "type", datagram.kind().wire_name());
    match datagram {
        Datagram::Ack { ack } => {
            push_pair(&mut out, "ack", &ack.to_string());
        },
        Datagram::Message(msg) => {
            push_pair(&mut out, "sequence_number", &msg.sequence_number.to_string());
            encode_body(&mut out, &msg.body);
            for (key, value) in &msg.extras {
                push_pair(&mut out, key, value);
            }
        },
    }
    out.into_bytes()
}

fn encode_body(out: &mut String, body: &MessageBody) {
    match body {
        MessageBody::HandshakeRequest { name } | MessageBody::SpectatorRequest { name } => {
            push_pair(out, "name", name);
        },
        MessageBody::HandshakeResponse { name, seed } => {
            push_pair(out, "name", name);
            push_pair(out, "seed", &seed.to_string());
        },
        MessageBody::BattleSetup {
            pokemon,
            hp,
            sp_atk_uses,
            sp_def_uses,
        } => {
            push_pair(out, "pokemon", pokemon);
            push_pair(out, "hp", &hp.to_string());
            push_pair(out, "sp_atk_uses", &sp_atk_uses.to_string());
            push_pair(out, "sp_def_uses", &sp_def_uses.to_string());
        },
        MessageBody::AttackAnnounce {
            move_name,
            use_sp_atk_boost,
        } => {
            push_pair(out, "move", move_name);
            push_pair(out, "use_sp_atk_boost", bool_str(*use_sp_atk_boost));
        },
        MessageBody::DefenseAnnounce { use_sp_def_boost } => {
            push_pair(out, "use_sp_def_boost", bool_str(*use_sp_def_boost));
        },
        MessageBody::CalculationReport {
            damage,
            defender_hp_after,
        }
        | MessageBody::ResolutionRequest {
            damage,
            defender_hp_after,
        } => {
            push_pair(out, "damage", &damage.to_string());
            push_pair(out, "defender_hp_after", &defender_hp_after.to_string());
        },
        MessageBody::CalculationConfirm => {},
        MessageBody::GameOver { winner, loser } => {
            push_pair(out, "winner", winner);
            push_pair(out, "loser", loser);
        },
        MessageBody::Chat {
            content_type,
            from,
            payload,
        } => {
            push_pair(out, "content_type", content_type.wire_name());
            push_pair(out, "from", from);
            push_pair(out, "payload", payload);
        },
    }
}

fn push_pair(out: &mut String, key: &str, value: &str) {
    debug_assert!(!value.contains('\n'), "values must not contain newlines");
    out.push_str(key);
    out.push(':');
    out.push_str(value);
    out.push('\n');
}

const fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Decodes one datagram.
///
/// Unknown keys are preserved as extra fields. An unrecognized `type` yields
/// [`DecodeError::UnknownType`] carrying the parsed sequence number, if any,
/// so the reliability layer can still acknowledge the datagram without
/// delivering it upward.
pub fn decode(bytes: &[u8]) -> Result<Datagram, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::Malformed {
        reason: "not valid UTF-8",
    })?;

    let mut pairs: Vec<(&str, &str)> = Vec::new();
    for line in text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = line.split_once(':').ok_or(DecodeError::Malformed {
            reason: "line without a colon",
        })?;
        pairs.push((key.trim(), value.trim()));
    }

    let fields = Fields { pairs: &pairs };
    let type_name = fields.get("type").ok_or(DecodeError::Malformed {
        reason: "missing type field",
    })?;

    if type_name == MessageKind::Ack.wire_name() {
        let ack = fields.require_u32("ack")?;
        return Ok(Datagram::Ack {
            ack: SequenceNumber::new(ack),
        });
    }

    let sequence_number = match fields.get("sequence_number") {
        Some(raw) => Some(SequenceNumber::new(parse_u32("sequence_number", raw)?)),
        None => None,
    };

    let (body, consumed): (MessageBody, &[&str]) = match type_name {
        "HANDSHAKE_REQUEST" => (
            MessageBody::HandshakeRequest {
                name: fields.require("name")?.to_owned(),
            },
            &["name"],
        ),
        "HANDSHAKE_RESPONSE" => (
            MessageBody::HandshakeResponse {
                name: fields.require("name")?.to_owned(),
                seed: fields.require_u32("seed")?,
            },
            &["name", "seed"],
        ),
        "SPECTATOR_REQUEST" => (
            MessageBody::SpectatorRequest {
                name: fields.require("name")?.to_owned(),
            },
            &["name"],
        ),
        "BATTLE_SETUP" => (
            MessageBody::BattleSetup {
                pokemon: fields.require("pokemon")?.to_owned(),
                hp: fields.require_u32("hp")?,
                sp_atk_uses: fields.require_u8("sp_atk_uses")?,
                sp_def_uses: fields.require_u8("sp_def_uses")?,
            },
            &["pokemon", "hp", "sp_atk_uses", "sp_def_uses"],
        ),
        "ATTACK_ANNOUNCE" => (
            MessageBody::AttackAnnounce {
                move_name: fields.require("move")?.to_owned(),
                use_sp_atk_boost: fields.require_bool("use_sp_atk_boost")?,
            },
            &["move", "use_sp_atk_boost"],
        ),
        "DEFENSE_ANNOUNCE" => (
            MessageBody::DefenseAnnounce {
                use_sp_def_boost: fields.require_bool("use_sp_def_boost")?,
            },
            &["use_sp_def_boost"],
        ),
        "CALCULATION_REPORT" => (
            MessageBody::CalculationReport {
                damage: fields.require_u32("damage")?,
                defender_hp_after: fields.require_u32("defender_hp_after")?,
            },
            &["damage", "defender_hp_after"],
        ),
        "CALCULATION_CONFIRM" => (MessageBody::CalculationConfirm, &[]),
        "RESOLUTION_REQUEST" => (
            MessageBody::ResolutionRequest {
                damage: fields.require_u32("damage")?,
                defender_hp_after: fields.require_u32("defender_hp_after")?,
            },
            &["damage", "defender_hp_after"],
        ),
        "GAME_OVER" => (
            MessageBody::GameOver {
                winner: fields.require("winner")?.to_owned(),
                loser: fields.require("loser")?.to_owned(),
            },
            &["winner", "loser"],
        ),
        "CHAT_MESSAGE" => {
            let content_type = match fields.require("content_type")? {
                "TEXT" => ChatContent::Text,
                "STICKER" => ChatContent::Sticker,
                _ => {
                    return Err(DecodeError::InvalidValue {
                        field: "content_type",
                    })
                },
            };
            (
                MessageBody::Chat {
                    content_type,
                    from: fields.require("from")?.to_owned(),
                    payload: fields.require("payload")?.to_owned(),
                },
                &["content_type", "from", "payload"],
            )
        },
        other => {
            return Err(DecodeError::UnknownType {
                type_name: other.to_owned(),
                sequence_number,
            })
        },
    };

    let sequence_number = sequence_number.ok_or(DecodeError::MissingField {
        field: "sequence_number",
    })?;

    // Everything not consumed by the typed body rides along as extras.
    let mut extras = Vec::new();
    let mut seen_type = false;
    let mut seen_seq = false;
    for &(key, value) in &pairs {
        if key == "type" && !seen_type {
            seen_type = true;
            continue;
        }
        if key == "sequence_number" && !seen_seq {
            seen_seq = true;
            continue;
        }
        if consumed.contains(&key) {
            continue;
        }
        extras.push((key.to_owned(), value.to_owned()));
    }

    Ok(Datagram::Message(Message {
        sequence_number,
        body,
        extras,
    }))
}

/// First-wins view over the parsed pairs.
struct Fields<'a> {
    pairs: &'a [(&'a str, &'a str)],
}

impl<'a> Fields<'a> {
    fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    fn require(&self, key: &'static str) -> Result<&'a str, DecodeError> {
        self.get(key).ok_or(DecodeError::MissingField { field: key })
    }

    fn require_u32(&self, key: &'static str) -> Result<u32, DecodeError> {
        parse_u32(key, self.require(key)?)
    }

    fn require_u8(&self, key: &'static str) -> Result<u8, DecodeError> {
        self.require(key)?
            .parse::<u8>()
            .map_err(|_| DecodeError::InvalidValue { field: key })
    }

    fn require_bool(&self, key: &'static str) -> Result<bool, DecodeError> {
        match self.require(key)?.to_ascii_lowercase().as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(DecodeError::InvalidValue { field: key }),
        }
    }
}

fn parse_u32(key: &'static str, raw: &str) -> Result<u32, DecodeError> {
    raw.parse::<u32>()
        .map_err(|_| DecodeError::InvalidValue { field: key })
}
