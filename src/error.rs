//! Error types for the protocol core.
//!
//! Follows a structured-enum discipline: variants carry the debugging context
//! as fields and format lazily in `Display`, so error construction on hot
//! paths allocates nothing beyond what the context itself requires.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::wire::MessageKind;
use crate::SequenceNumber;

/// All errors this library can return.
///
/// # Forward Compatibility
///
/// Marked `#[non_exhaustive]`: new variants may be added in future versions,
/// so downstream matches should include a wildcard arm.
#[derive(Debug)]
#[non_exhaustive]
pub enum PokeError {
    /// A pending message exhausted its retransmissions. Fatal to the session.
    ConnectionFailed {
        /// Sequence number of the abandoned message.
        sequence_number: SequenceNumber,
        /// Kind of the abandoned message.
        kind: MessageKind,
    },
    /// A combatant name was not found in the catalog.
    UnknownCombatant {
        /// The name that missed.
        name: String,
        /// A small sample of valid names for user feedback.
        sample: Vec<String>,
    },
    /// The requested move is not in the move table, or the local combatant
    /// does not know it.
    UnknownMove {
        /// The offending move name.
        name: String,
    },
    /// The user tried to attack when it is the opponent's turn.
    NotYourTurn,
    /// A user action does not match the battle's current phase.
    WrongPhase {
        /// What the user tried to do.
        action: &'static str,
        /// The phase the battle was in.
        phase: crate::battle::Phase,
    },
    /// The user typed something the front end could not act on. State is
    /// unchanged.
    InvalidCommand {
        /// Human-readable explanation.
        reason: String,
    },
    /// Bad CLI arguments or other unrecoverable configuration problems,
    /// detected before the battle starts.
    Setup {
        /// Human-readable explanation.
        reason: String,
    },
    /// An I/O error from the socket or the catalog source.
    Io(std::io::Error),
}

impl Display for PokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed {
                sequence_number,
                kind,
            } => write!(
                f,
                "connection failed: {} (seq {}) exhausted its retries",
                kind, sequence_number
            ),
            Self::UnknownCombatant { name, sample } => {
                write!(f, "no combatant named {:?}", name)?;
                if !sample.is_empty() {
                    write!(f, " (try one of: {})", sample.join(", "))?;
                }
                Ok(())
            },
            Self::UnknownMove { name } => write!(f, "unknown move {:?}", name),
            Self::NotYourTurn => write!(f, "it is not your turn to attack"),
            Self::WrongPhase { action, phase } => {
                write!(f, "cannot {} while in phase {}", action, phase)
            },
            Self::InvalidCommand { reason } => write!(f, "invalid command: {}", reason),
            Self::Setup { reason } => write!(f, "setup error: {}", reason),
            Self::Io(err) => write!(f, "i/o error: {}", err),
        }
    }
}

impl Error for PokeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PokeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// A datagram that could not be decoded into a message.
///
/// Malformed datagrams are dropped silently by the peer; the only variant
/// with protocol-visible behavior is [`DecodeError::UnknownType`], which is
/// ACKed (the sender saw a valid datagram) but never delivered upward.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    /// Not UTF-8, empty, or missing the leading `type` pair.
    Malformed {
        /// What was wrong with the datagram.
        reason: &'static str,
    },
    /// A required field for the message's type was absent.
    MissingField {
        /// The missing key.
        field: &'static str,
    },
    /// A field was present but its value did not parse.
    InvalidValue {
        /// The offending key.
        field: &'static str,
    },
    /// The `type` value is not one this implementation recognizes.
    UnknownType {
        /// The unrecognized type tag.
        type_name: String,
        /// The sequence number, if one was carried, so the reliability layer
        /// can still acknowledge the datagram.
        sequence_number: Option<SequenceNumber>,
    },
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { reason } => write!(f, "malformed datagram: {}", reason),
            Self::MissingField { field } => write!(f, "missing required field {:?}", field),
            Self::InvalidValue { field } => write!(f, "invalid value for field {:?}", field),
            Self::UnknownType { type_name, .. } => {
                write!(f, "unknown message type {:?}", type_name)
            },
        }
    }
}

impl Error for DecodeError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failed_display_names_the_message() {
        let err = PokeError::ConnectionFailed {
            sequence_number: SequenceNumber::new(3),
            kind: MessageKind::AttackAnnounce,
        };
        let text = err.to_string();
        assert!(text.contains("seq 3"));
        assert!(text.contains("ATTACK_ANNOUNCE"));
    }

    #[test]
    fn unknown_combatant_lists_sample() {
        let err = PokeError::UnknownCombatant {
            name: "Missingno".into(),
            sample: vec!["Pikachu".into(), "Charmander".into()],
        };
        let text = err.to_string();
        assert!(text.contains("Missingno"));
        assert!(text.contains("Pikachu"));
    }

    #[test]
    fn io_error_has_source() {
        let err = PokeError::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(err.source().is_some());
    }

    #[test]
    fn decode_error_display() {
        let err = DecodeError::UnknownType {
            type_name: "FROBNICATE".into(),
            sequence_number: Some(SequenceNumber::new(9)),
        };
        assert!(err.to_string().contains("FROBNICATE"));
    }
}
