//! Codec round-trip coverage: every message kind survives
//! `decode(encode(m))` unchanged, including extra fields.

use poke_protocol::wire::{decode, encode, ChatContent, Datagram, Message, MessageBody};
use poke_protocol::SequenceNumber;
use proptest::prelude::*;

fn roundtrip(datagram: Datagram) {
    let bytes = encode(&datagram);
    let parsed = decode(&bytes).expect("encoded datagram must decode");
    assert_eq!(parsed, datagram);
}

fn msg(seq: u32, body: MessageBody) -> Datagram {
    Datagram::Message(Message::new(SequenceNumber::new(seq), body))
}

#[test]
fn every_message_kind_round_trips() {
    roundtrip(Datagram::Ack {
        ack: SequenceNumber::new(7),
    });
    roundtrip(msg(1, MessageBody::HandshakeRequest { name: "Bob".into() }));
    roundtrip(msg(
        1,
        MessageBody::HandshakeResponse {
            name: "Alice".into(),
            seed: 12345,
        },
    ));
    roundtrip(msg(2, MessageBody::SpectatorRequest { name: "Cara".into() }));
    roundtrip(msg(
        2,
        MessageBody::BattleSetup {
            pokemon: "Pikachu".into(),
            hp: 35,
            sp_atk_uses: 5,
            sp_def_uses: 5,
        },
    ));
    roundtrip(msg(
        3,
        MessageBody::AttackAnnounce {
            move_name: "Thunderbolt".into(),
            use_sp_atk_boost: true,
        },
    ));
    roundtrip(msg(3, MessageBody::DefenseAnnounce { use_sp_def_boost: false }));
    roundtrip(msg(
        4,
        MessageBody::CalculationReport {
            damage: 40,
            defender_hp_after: 0,
        },
    ));
    roundtrip(msg(5, MessageBody::CalculationConfirm));
    roundtrip(msg(
        5,
        MessageBody::ResolutionRequest {
            damage: 41,
            defender_hp_after: 1,
        },
    ));
    roundtrip(msg(
        6,
        MessageBody::GameOver {
            winner: "Pikachu".into(),
            loser: "Charmander".into(),
        },
    ));
    roundtrip(msg(
        7,
        MessageBody::Chat {
            content_type: ChatContent::Text,
            from: "Bob".into(),
            payload: "nice roll".into(),
        },
    ));
    roundtrip(msg(
        8,
        MessageBody::Chat {
            content_type: ChatContent::Sticker,
            from: "Bob".into(),
            payload: "aGVsbG8=".into(),
        },
    ));
}

#[test]
fn extras_from_future_peers_round_trip() {
    let mut message = Message::new(
        SequenceNumber::new(9),
        MessageBody::AttackAnnounce {
            move_name: "Ember".into(),
            use_sp_atk_boost: false,
        },
    );
    message.extras = vec![
        ("x_animation".into(), "fancy".into()),
        ("x_latency_hint".into(), "12".into()),
    ];
    roundtrip(Datagram::Message(message));
}

#[test]
fn interop_with_spaced_pairs() {
    // other implementations may put a space after the colon
    let bytes = b"type: HANDSHAKE_RESPONSE\nsequence_number: 1\nname: Alice\nseed: 12345\n";
    let parsed = decode(bytes).unwrap();
    assert_eq!(
        parsed,
        msg(
            1,
            MessageBody::HandshakeResponse {
                name: "Alice".into(),
                seed: 12345
            }
        )
    );
}

prop_compose! {
    fn safe_string()(s in "[A-Za-z0-9 ._-]{1,24}") -> String {
        // no leading/trailing whitespace: the codec trims on decode
        s.trim().to_string()
    }
}

fn arb_body() -> impl Strategy<Value = MessageBody> {
    prop_oneof![
        safe_string().prop_map(|name| MessageBody::HandshakeRequest { name }),
        (safe_string(), any::<u32>())
            .prop_map(|(name, seed)| MessageBody::HandshakeResponse { name, seed }),
        safe_string().prop_map(|name| MessageBody::SpectatorRequest { name }),
        (safe_string(), any::<u32>(), any::<u8>(), any::<u8>()).prop_map(
            |(pokemon, hp, sp_atk_uses, sp_def_uses)| MessageBody::BattleSetup {
                pokemon,
                hp,
                sp_atk_uses,
                sp_def_uses,
            }
        ),
        (safe_string(), any::<bool>()).prop_map(|(move_name, use_sp_atk_boost)| {
            MessageBody::AttackAnnounce {
                move_name,
                use_sp_atk_boost,
            }
        }),
        any::<bool>().prop_map(|use_sp_def_boost| MessageBody::DefenseAnnounce {
            use_sp_def_boost
        }),
        (any::<u32>(), any::<u32>()).prop_map(|(damage, defender_hp_after)| {
            MessageBody::CalculationReport {
                damage,
                defender_hp_after,
            }
        }),
        Just(MessageBody::CalculationConfirm),
        (any::<u32>(), any::<u32>()).prop_map(|(damage, defender_hp_after)| {
            MessageBody::ResolutionRequest {
                damage,
                defender_hp_after,
            }
        }),
        (safe_string(), safe_string())
            .prop_map(|(winner, loser)| MessageBody::GameOver { winner, loser }),
        (any::<bool>(), safe_string(), safe_string()).prop_map(|(sticker, from, payload)| {
            MessageBody::Chat {
                content_type: if sticker {
                    ChatContent::Sticker
                } else {
                    ChatContent::Text
                },
                from,
                payload,
            }
        }),
    ]
}

proptest! {
    #[test]
    fn arbitrary_messages_round_trip(seq in any::<u32>(), body in arb_body()) {
        // empty strings after trimming still hold: "a" minimum length avoids them
        prop_assume!(match &body {
            MessageBody::HandshakeRequest { name }
            | MessageBody::SpectatorRequest { name } => !name.is_empty(),
            MessageBody::HandshakeResponse { name, .. } => !name.is_empty(),
            MessageBody::BattleSetup { pokemon, .. } => !pokemon.is_empty(),
            MessageBody::AttackAnnounce { move_name, .. } => !move_name.is_empty(),
            MessageBody::GameOver { winner, loser } => !winner.is_empty() && !loser.is_empty(),
            MessageBody::Chat { from, payload, .. } => !from.is_empty() && !payload.is_empty(),
            _ => true,
        });
        roundtrip(msg(seq, body));
    }

    #[test]
    fn garbage_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode(&bytes);
    }
}
