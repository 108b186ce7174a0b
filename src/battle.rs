//! The battle state machine: phases, turn ownership, and discrepancy
//! resolution.
//!
//! This is a pure state machine. It consumes decoded message bodies and user
//! actions, and pushes outbound bodies to an outbox and user-facing
//! [`BattleEvent`]s to an event queue; the peer drains both. No sockets, no
//! clocks, no randomness beyond the shared damage stream, which makes the
//! whole turn cycle testable by shuttling bodies between two instances.
//!
//! A turn is a four-step synchronized exchange:
//!
//! 1. the attacker announces its move (`ATTACK_ANNOUNCE`),
//! 2. the defender acknowledges and declares its defense boost
//!    (`DEFENSE_ANNOUNCE`),
//! 3. both sides independently compute damage and exchange
//!    `CALCULATION_REPORT`s,
//! 4. the result is confirmed (`CALCULATION_CONFIRM`), applied, and the turn
//!    flips.
//!
//! If the reports disagree, the defender asks for resolution and the
//! attacker's values win: only the attacker's roll is the true randomness
//! source, so it is the authority on its own turn.
//!
//! Messages that do not match the current phase are ignored here (the
//! reliability layer has already ACKed them); phase checks are what give the
//! battle its ordering, since the transport promises none.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::catalog::{self, Combatant};
use crate::damage::{DamageEngine, DamageOutcome};
use crate::error::PokeError;
use crate::wire::{MessageBody, MessageKind};
use crate::PokeResult;

/// The battle phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Exchanging `BATTLE_SETUP`; leaves once both sides are accounted for.
    Setup,
    /// Waiting for an attack: ours if `turn == Me`, the peer's otherwise.
    AwaitAttack,
    /// Attacker side: announced, waiting for `DEFENSE_ANNOUNCE`.
    AwaitDefenseAck,
    /// Defender side: acknowledged, waiting for the attacker's report.
    AwaitCalcReports,
    /// Waiting for the turn to be confirmed.
    AwaitConfirm,
    /// Defender side: reports disagreed, waiting for the attacker's
    /// authoritative re-send.
    Resolving,
    /// Terminal. No transitions leave this phase.
    GameOver,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Setup => "SETUP",
            Self::AwaitAttack => "AWAIT_ATTACK",
            Self::AwaitDefenseAck => "AWAIT_DEFENSE_ACK",
            Self::AwaitCalcReports => "AWAIT_CALC_REPORTS",
            Self::AwaitConfirm => "AWAIT_CONFIRM",
            Self::Resolving => "RESOLVING",
            Self::GameOver => "GAME_OVER",
        };
        f.write_str(name)
    }
}

/// Whose attack is expected next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnOwner {
    /// We attack next.
    Me,
    /// The opponent attacks next.
    Opp,
}

impl TurnOwner {
    /// The other owner.
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Me => Self::Opp,
            Self::Opp => Self::Me,
        }
    }
}

/// One side of the battle: the immutable combatant plus its battle-scoped
/// mutable state.
#[derive(Debug, Clone)]
pub struct SideState {
    /// The combatant fighting on this side.
    pub combatant: Combatant,
    /// Current HP; decrements only.
    pub hp: u32,
    /// Starting HP.
    pub max_hp: u32,
    /// Special-attack boost uses remaining; never increases.
    pub sp_atk_uses_left: u8,
    /// Special-defense boost uses remaining; never increases.
    pub sp_def_uses_left: u8,
}

impl SideState {
    fn new(combatant: Combatant, hp: u32, sp_atk_uses: u8, sp_def_uses: u8) -> Self {
        Self {
            combatant,
            hp,
            max_hp: hp,
            sp_atk_uses_left: sp_atk_uses,
            sp_def_uses_left: sp_def_uses,
        }
    }
}

/// The turn currently in flight, from announcement to confirmation.
#[derive(Debug, Clone)]
struct PendingTurn {
    move_name: String,
    attacker_is_me: bool,
    use_sp_atk_boost: bool,
    use_sp_def_boost: Option<bool>,
    defender_hp_before: u32,
    local_report: Option<(u32, u32)>,
    outcome: Option<DamageOutcome>,
}

/// User-facing notifications drained from the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum BattleEvent {
    /// Both setups are accounted for; the battle is live.
    Started {
        /// Our combatant's name.
        me: String,
        /// The opponent's combatant name.
        opponent: String,
        /// Our starting HP.
        my_hp: u32,
        /// The opponent's starting HP.
        opp_hp: u32,
        /// Who attacks first.
        first: TurnOwner,
    },
    /// An attack was announced (ours or theirs).
    AttackAnnounced {
        /// Whether we are the attacker.
        by_me: bool,
        /// The announced move.
        move_name: String,
    },
    /// A turn was confirmed and applied.
    TurnResolved {
        /// Whether we were the attacker.
        attacker_was_me: bool,
        /// The move used.
        move_name: String,
        /// Damage dealt.
        damage: u32,
        /// Defender's HP after the hit.
        defender_hp_after: u32,
        /// Flavor line, when the multiplier was notable.
        effectiveness: Option<&'static str>,
        /// Our HP after the turn.
        my_hp: u32,
        /// The opponent's HP after the turn.
        opp_hp: u32,
    },
    /// The two sides computed different results for this turn.
    DiscrepancyDetected {
        /// The damage we computed.
        local_damage: u32,
        /// The damage the peer reported.
        remote_damage: u32,
    },
    /// The discrepancy was settled with the attacker's values.
    DiscrepancyResolved {
        /// The damage that won.
        damage: u32,
    },
    /// Terminal result.
    Finished {
        /// Name of the winning combatant.
        winner: String,
        /// Name of the fainted combatant.
        loser: String,
        /// Whether our side won.
        we_won: bool,
    },
}

/// The battle state machine for one peer.
pub struct BattleState {
    phase: Phase,
    turn: TurnOwner,
    engine: DamageEngine,
    me: SideState,
    opp: Option<SideState>,
    setup_sent: bool,
    setup_received: bool,
    defend_with_boost: bool,
    pending: Option<PendingTurn>,
    outbox: VecDeque<MessageBody>,
    events: VecDeque<BattleEvent>,
}

impl BattleState {
    /// Creates a battle for one side. The host attacks first on both peers'
    /// books, which is what keeps exactly one side on `turn == Me`.
    #[must_use]
    pub fn new(
        seed: u32,
        host_is_me: bool,
        combatant: Combatant,
        sp_atk_uses: u8,
        sp_def_uses: u8,
    ) -> Self {
        let hp = combatant.stats.hp;
        Self {
            phase: Phase::Setup,
            turn: if host_is_me { TurnOwner::Me } else { TurnOwner::Opp },
            engine: DamageEngine::new(seed),
            me: SideState::new(combatant, hp, sp_atk_uses, sp_def_uses),
            opp: None,
            setup_sent: false,
            setup_received: false,
            defend_with_boost: false,
            pending: None,
            outbox: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whose attack is expected next.
    #[must_use]
    pub fn turn(&self) -> TurnOwner {
        self.turn
    }

    /// Our side.
    #[must_use]
    pub fn me(&self) -> &SideState {
        &self.me
    }

    /// The opponent's side, once its setup arrived.
    #[must_use]
    pub fn opponent(&self) -> Option<&SideState> {
        self.opp.as_ref()
    }

    /// Whether the battle has reached its terminal phase.
    #[must_use]
    pub fn is_over(&self) -> bool {
        self.phase == Phase::GameOver
    }

    /// Sets the standing policy for `use_sp_def_boost` on future
    /// `DEFENSE_ANNOUNCE`s.
    pub fn set_defend_with_boost(&mut self, on: bool) {
        self.defend_with_boost = on;
    }

    /// Queues our `BATTLE_SETUP`. Idempotent; only meaningful during setup.
    pub fn start_setup(&mut self) {
        if self.phase != Phase::Setup || self.setup_sent {
            return;
        }
        self.setup_sent = true;
        self.outbox.push_back(MessageBody::BattleSetup {
            pokemon: self.me.combatant.name.clone(),
            hp: self.me.max_hp,
            sp_atk_uses: self.me.sp_atk_uses_left,
            sp_def_uses: self.me.sp_def_uses_left,
        });
        self.maybe_begin();
    }

    /// Installs the opponent's setup (already resolved against the catalog by
    /// the caller). The HP and boost counters are the peer's declared values,
    /// which is what keeps the counter semantics shared.
    pub fn handle_setup(
        &mut self,
        combatant: Combatant,
        hp: u32,
        sp_atk_uses: u8,
        sp_def_uses: u8,
    ) {
        if self.phase != Phase::Setup {
            debug!(phase = %self.phase, "ignoring BATTLE_SETUP outside setup");
            return;
        }
        self.opp = Some(SideState::new(combatant, hp, sp_atk_uses, sp_def_uses));
        self.setup_received = true;
        self.maybe_begin();
    }

    fn maybe_begin(&mut self) {
        if self.phase != Phase::Setup || !self.setup_sent || !self.setup_received {
            return;
        }
        let Some(opp) = self.opp.as_ref() else { return };
        self.phase = Phase::AwaitAttack;
        info!(me = %self.me.combatant.name, opponent = %opp.combatant.name, "battle started");
        self.events.push_back(BattleEvent::Started {
            me: self.me.combatant.name.clone(),
            opponent: opp.combatant.name.clone(),
            my_hp: self.me.hp,
            opp_hp: opp.hp,
            first: self.turn,
        });
    }

    /// User action: announce an attack with the given move, optionally
    /// spending a special-attack boost use.
    pub fn attack(&mut self, move_name: &str, use_boost: bool) -> PokeResult<()> {
        if self.phase != Phase::AwaitAttack {
            return Err(PokeError::WrongPhase {
                action: "attack",
                phase: self.phase,
            });
        }
        if self.turn != TurnOwner::Me {
            return Err(PokeError::NotYourTurn);
        }
        if !self.me.combatant.knows_move(move_name) || catalog::move_info(move_name).is_none() {
            return Err(PokeError::UnknownMove {
                name: move_name.to_owned(),
            });
        }
        let opp_hp = self.opp.as_ref().map_or(0, |o| o.hp);
        self.pending = Some(PendingTurn {
            move_name: move_name.to_owned(),
            attacker_is_me: true,
            use_sp_atk_boost: use_boost,
            use_sp_def_boost: None,
            defender_hp_before: opp_hp,
            local_report: None,
            outcome: None,
        });
        self.outbox.push_back(MessageBody::AttackAnnounce {
            move_name: move_name.to_owned(),
            use_sp_atk_boost: use_boost,
        });
        self.phase = Phase::AwaitDefenseAck;
        self.events.push_back(BattleEvent::AttackAnnounced {
            by_me: true,
            move_name: move_name.to_owned(),
        });
        Ok(())
    }

    /// Feeds one battle-relevant message body through the phase machine.
    pub fn handle_message(&mut self, body: MessageBody) {
        if self.phase == Phase::GameOver {
            // terminal state is absorbing
            debug!(kind = %body.kind(), "ignoring message after game over");
            return;
        }
        match body {
            MessageBody::AttackAnnounce {
                move_name,
                use_sp_atk_boost,
            } => self.on_attack_announce(move_name, use_sp_atk_boost),
            MessageBody::DefenseAnnounce { use_sp_def_boost } => {
                self.on_defense_announce(use_sp_def_boost)
            },
            MessageBody::CalculationReport {
                damage,
                defender_hp_after,
            } => self.on_calculation_report(damage, defender_hp_after),
            MessageBody::CalculationConfirm => self.on_calculation_confirm(),
            MessageBody::ResolutionRequest { damage, .. } => self.on_resolution_request(damage),
            MessageBody::GameOver { winner, loser } => self.on_game_over(winner, loser),
            other => {
                debug!(kind = %other.kind(), "message is not for the battle layer");
            },
        }
    }

    /// Abandons the battle after a fatal transport failure. Enters the
    /// terminal phase without a winner.
    pub fn abandon(&mut self) {
        if self.phase != Phase::GameOver {
            self.phase = Phase::GameOver;
            self.pending = None;
        }
    }

    fn ignore(&self, kind: MessageKind) {
        debug!(kind = %kind, phase = %self.phase, "ignoring out-of-phase message");
    }

    fn on_attack_announce(&mut self, move_name: String, use_sp_atk_boost: bool) {
        if self.phase != Phase::AwaitAttack || self.turn != TurnOwner::Opp {
            // Includes the tie-break: if both sides believe it is their turn,
            // the side with turn == Me keeps it and drops the peer's claim.
            self.ignore(MessageKind::AttackAnnounce);
            return;
        }
        let defend = self.defend_with_boost;
        self.pending = Some(PendingTurn {
            move_name: move_name.clone(),
            attacker_is_me: false,
            use_sp_atk_boost,
            use_sp_def_boost: Some(defend),
            defender_hp_before: self.me.hp,
            local_report: None,
            outcome: None,
        });
        self.outbox.push_back(MessageBody::DefenseAnnounce {
            use_sp_def_boost: defend,
        });
        self.phase = Phase::AwaitCalcReports;
        self.events.push_back(BattleEvent::AttackAnnounced {
            by_me: false,
            move_name,
        });
    }

    fn on_defense_announce(&mut self, use_sp_def_boost: bool) {
        if self.phase != Phase::AwaitDefenseAck {
            self.ignore(MessageKind::DefenseAnnounce);
            return;
        }
        if let Some(pending) = self.pending.as_mut() {
            pending.use_sp_def_boost = Some(use_sp_def_boost);
        }
        let Some((damage, hp_after)) = self.compute_local_report() else {
            self.ignore(MessageKind::DefenseAnnounce);
            return;
        };
        self.outbox.push_back(MessageBody::CalculationReport {
            damage,
            defender_hp_after: hp_after,
        });
        self.phase = Phase::AwaitConfirm;
    }

    fn on_calculation_report(&mut self, damage: u32, defender_hp_after: u32) {
        match self.phase {
            Phase::AwaitCalcReports => {
                // Defender: compute our own result and compare.
                let Some((local_damage, local_hp)) = self.compute_local_report() else {
                    self.ignore(MessageKind::CalculationReport);
                    return;
                };
                if local_damage == damage && local_hp == defender_hp_after {
                    self.outbox.push_back(MessageBody::CalculationReport {
                        damage: local_damage,
                        defender_hp_after: local_hp,
                    });
                    self.phase = Phase::AwaitConfirm;
                } else {
                    debug!(
                        local_damage,
                        remote_damage = damage,
                        "calculation mismatch, requesting resolution"
                    );
                    self.events.push_back(BattleEvent::DiscrepancyDetected {
                        local_damage,
                        remote_damage: damage,
                    });
                    self.outbox.push_back(MessageBody::ResolutionRequest {
                        damage: local_damage,
                        defender_hp_after: local_hp,
                    });
                    self.phase = Phase::Resolving;
                }
            },
            Phase::AwaitConfirm => {
                // Attacker: the defender's report arrived.
                let Some(pending) = self.pending.as_ref() else {
                    self.ignore(MessageKind::CalculationReport);
                    return;
                };
                if !pending.attacker_is_me {
                    self.ignore(MessageKind::CalculationReport);
                    return;
                }
                match pending.local_report {
                    Some((local_damage, local_hp))
                        if local_damage == damage && local_hp == defender_hp_after =>
                    {
                        self.outbox.push_back(MessageBody::CalculationConfirm);
                        self.apply_and_advance();
                    },
                    Some((local_damage, local_hp)) => {
                        // The defender should have asked for resolution; hold
                        // our ground and re-send the authoritative values.
                        self.events.push_back(BattleEvent::DiscrepancyDetected {
                            local_damage,
                            remote_damage: damage,
                        });
                        self.outbox.push_back(MessageBody::CalculationReport {
                            damage: local_damage,
                            defender_hp_after: local_hp,
                        });
                    },
                    None => self.ignore(MessageKind::CalculationReport),
                }
            },
            Phase::Resolving => {
                // Defender: the attacker's authoritative re-send. Adopt it.
                let Some(pending) = self.pending.as_mut() else {
                    self.ignore(MessageKind::CalculationReport);
                    return;
                };
                pending.local_report = Some((damage, defender_hp_after));
                self.events
                    .push_back(BattleEvent::DiscrepancyResolved { damage });
                self.outbox.push_back(MessageBody::CalculationReport {
                    damage,
                    defender_hp_after,
                });
                self.phase = Phase::AwaitConfirm;
            },
            _ => self.ignore(MessageKind::CalculationReport),
        }
    }

    fn on_calculation_confirm(&mut self) {
        if self.phase != Phase::AwaitConfirm {
            self.ignore(MessageKind::CalculationConfirm);
            return;
        }
        self.outbox.push_back(MessageBody::CalculationConfirm);
        self.apply_and_advance();
    }

    fn on_resolution_request(&mut self, damage: u32) {
        // Only the attacker receives these; its own values win.
        let attacker_report = self
            .pending
            .as_ref()
            .filter(|p| p.attacker_is_me)
            .and_then(|p| p.local_report);
        match (self.phase, attacker_report) {
            (Phase::AwaitConfirm, Some((local_damage, local_hp))) => {
                self.events.push_back(BattleEvent::DiscrepancyDetected {
                    local_damage,
                    remote_damage: damage,
                });
                self.outbox.push_back(MessageBody::CalculationReport {
                    damage: local_damage,
                    defender_hp_after: local_hp,
                });
            },
            _ => self.ignore(MessageKind::ResolutionRequest),
        }
    }

    fn on_game_over(&mut self, winner: String, loser: String) {
        // Normally we already applied the final turn and sit in GameOver (in
        // which case handle_message dropped this). Accept the terminal state
        // regardless, applying the pending turn if one is still in flight.
        if let Some(pending) = self.pending.take() {
            if let Some((_, hp_after)) = pending.local_report {
                if pending.attacker_is_me {
                    if let Some(opp) = self.opp.as_mut() {
                        opp.hp = hp_after;
                    }
                } else {
                    self.me.hp = hp_after;
                }
            }
        }
        self.phase = Phase::GameOver;
        let we_won = winner == self.me.combatant.name;
        info!(%winner, %loser, "game over");
        self.events.push_back(BattleEvent::Finished {
            winner,
            loser,
            we_won,
        });
    }

    /// Resolves the honored boost flags, decrements the shared counters,
    /// draws the roll, and records the local report for the pending turn.
    fn compute_local_report(&mut self) -> Option<(u32, u32)> {
        let (attacker_is_me, atk_flag, def_flag, move_name, hp_before) = {
            let pending = self.pending.as_ref()?;
            (
                pending.attacker_is_me,
                pending.use_sp_atk_boost,
                pending.use_sp_def_boost.unwrap_or(false),
                pending.move_name.clone(),
                pending.defender_hp_before,
            )
        };
        let me = &mut self.me;
        let opp = self.opp.as_mut()?;
        let (atk_side, def_side) = if attacker_is_me { (me, opp) } else { (opp, me) };

        // Boost accounting comes before the PRNG draw, and an exhausted
        // counter silently demotes the flag to false on both peers.
        let atk_honored = atk_flag && atk_side.sp_atk_uses_left > 0;
        if atk_honored {
            atk_side.sp_atk_uses_left -= 1;
        }
        let def_honored = def_flag && def_side.sp_def_uses_left > 0;
        if def_honored {
            def_side.sp_def_uses_left -= 1;
        }

        let info = catalog::move_info_or_default(&move_name);
        let outcome = self.engine.compute(
            info,
            &atk_side.combatant,
            &def_side.combatant,
            atk_honored,
            def_honored,
        );
        let hp_after = hp_before.saturating_sub(outcome.damage);

        let pending = self.pending.as_mut()?;
        pending.outcome = Some(outcome);
        pending.local_report = Some((outcome.damage, hp_after));
        Some((outcome.damage, hp_after))
    }

    /// Applies the confirmed turn, flips ownership, and checks for a win.
    fn apply_and_advance(&mut self) {
        let Some(pending) = self.pending.take() else { return };
        let Some((damage, hp_after)) = pending.local_report else { return };

        if pending.attacker_is_me {
            if let Some(opp) = self.opp.as_mut() {
                opp.hp = hp_after;
            }
        } else {
            self.me.hp = hp_after;
        }

        let opp_hp = self.opp.as_ref().map_or(0, |o| o.hp);
        self.events.push_back(BattleEvent::TurnResolved {
            attacker_was_me: pending.attacker_is_me,
            move_name: pending.move_name.clone(),
            damage,
            defender_hp_after: hp_after,
            effectiveness: pending.outcome.as_ref().and_then(DamageOutcome::effectiveness_text),
            my_hp: self.me.hp,
            opp_hp,
        });

        if hp_after == 0 {
            self.phase = Phase::GameOver;
            let (winner, loser) = if pending.attacker_is_me {
                (
                    self.me.combatant.name.clone(),
                    self.opp
                        .as_ref()
                        .map_or_else(String::new, |o| o.combatant.name.clone()),
                )
            } else {
                (
                    self.opp
                        .as_ref()
                        .map_or_else(String::new, |o| o.combatant.name.clone()),
                    self.me.combatant.name.clone(),
                )
            };
            // the winning attacker announces the result
            if pending.attacker_is_me {
                self.outbox.push_back(MessageBody::GameOver {
                    winner: winner.clone(),
                    loser: loser.clone(),
                });
            }
            let we_won = pending.attacker_is_me;
            info!(%winner, %loser, "battle finished");
            self.events.push_back(BattleEvent::Finished {
                winner,
                loser,
                we_won,
            });
        } else {
            self.turn = self.turn.flipped();
            self.phase = Phase::AwaitAttack;
        }
    }

    /// Drains outbound bodies queued by the state machine.
    pub fn drain_outbox(&mut self) -> std::collections::vec_deque::Drain<'_, MessageBody> {
        self.outbox.drain(..)
    }

    /// Drains user-facing events.
    pub fn drain_events(&mut self) -> std::collections::vec_deque::Drain<'_, BattleEvent> {
        self.events.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    fn combatant(name: &str) -> Combatant {
        Catalog::builtin().lookup(name).unwrap().clone()
    }

    fn started_pair(seed: u32) -> (BattleState, BattleState) {
        let mut host = BattleState::new(seed, true, combatant("Pikachu"), 5, 5);
        let mut joiner = BattleState::new(seed, false, combatant("Charmander"), 5, 5);
        host.start_setup();
        joiner.start_setup();
        host.handle_setup(combatant("Charmander"), 39, 5, 5);
        joiner.handle_setup(combatant("Pikachu"), 35, 5, 5);
        host.drain_outbox().for_each(drop);
        joiner.drain_outbox().for_each(drop);
        host.drain_events().for_each(drop);
        joiner.drain_events().for_each(drop);
        (host, joiner)
    }

    /// Delivers every queued body from `from` to `to`, returning how many
    /// were moved.
    fn shuttle(from: &mut BattleState, to: &mut BattleState) -> usize {
        let bodies: Vec<_> = from.drain_outbox().collect();
        let count = bodies.len();
        for body in bodies {
            to.handle_message(body);
        }
        count
    }

    /// Runs message shuttling in both directions until neither side has
    /// anything queued.
    fn settle(a: &mut BattleState, b: &mut BattleState) {
        loop {
            let moved = shuttle(a, b) + shuttle(b, a);
            if moved == 0 {
                break;
            }
        }
    }

    #[test]
    fn setup_requires_both_sides() {
        let mut host = BattleState::new(1, true, combatant("Pikachu"), 5, 5);
        host.start_setup();
        assert_eq!(host.phase(), Phase::Setup);
        host.handle_setup(combatant("Charmander"), 39, 5, 5);
        assert_eq!(host.phase(), Phase::AwaitAttack);
        assert_eq!(host.turn(), TurnOwner::Me);
    }

    #[test]
    fn setup_order_does_not_matter() {
        let mut joiner = BattleState::new(1, false, combatant("Charmander"), 5, 5);
        joiner.handle_setup(combatant("Pikachu"), 35, 5, 5);
        assert_eq!(joiner.phase(), Phase::Setup);
        joiner.start_setup();
        assert_eq!(joiner.phase(), Phase::AwaitAttack);
        assert_eq!(joiner.turn(), TurnOwner::Opp);
    }

    #[test]
    fn full_turn_resolves_identically_on_both_sides() {
        let (mut host, mut joiner) = started_pair(12345);
        host.attack("Quick Attack", false).unwrap();
        settle(&mut host, &mut joiner);

        assert_eq!(host.phase(), Phase::AwaitAttack);
        assert_eq!(joiner.phase(), Phase::AwaitAttack);
        // P4: turn flipped exactly once on each side
        assert_eq!(host.turn(), TurnOwner::Opp);
        assert_eq!(joiner.turn(), TurnOwner::Me);
        // P3: identical HP trajectories
        assert_eq!(host.opponent().unwrap().hp, joiner.me().hp);
        assert!(joiner.me().hp < joiner.me().max_hp);

        let host_events: Vec<_> = host.drain_events().collect();
        assert!(host_events.iter().any(|e| matches!(
            e,
            BattleEvent::TurnResolved { attacker_was_me: true, damage, .. } if *damage > 0
        )));
    }

    #[test]
    fn attack_rejected_out_of_turn_and_phase() {
        let (mut host, mut joiner) = started_pair(5);
        assert!(matches!(
            joiner.attack("Ember", false),
            Err(PokeError::NotYourTurn)
        ));
        assert!(matches!(
            host.attack("Splash", false),
            Err(PokeError::UnknownMove { .. })
        ));
        // Hydro Pump is a known table move but Pikachu does not know it
        assert!(matches!(
            host.attack("Hydro Pump", false),
            Err(PokeError::UnknownMove { .. })
        ));
        host.attack("Thunderbolt", false).unwrap();
        assert!(matches!(
            host.attack("Thunderbolt", false),
            Err(PokeError::WrongPhase { .. })
        ));
    }

    #[test]
    fn attacker_keeps_the_turn_on_simultaneous_claims() {
        let (mut host, _joiner) = started_pair(5);
        // a confused peer claims the first turn; the side with turn == Me
        // drops the announcement
        host.handle_message(MessageBody::AttackAnnounce {
            move_name: "Ember".into(),
            use_sp_atk_boost: false,
        });
        assert_eq!(host.phase(), Phase::AwaitAttack);
        assert_eq!(host.turn(), TurnOwner::Me);
    }

    #[test]
    fn multi_turn_battle_stays_deterministic() {
        let (mut host, mut joiner) = started_pair(777);
        let mut turns = 0;
        for _ in 0..3 {
            if host.is_over() || joiner.is_over() {
                break;
            }
            if host.turn() == TurnOwner::Me {
                host.attack("Quick Attack", false).unwrap();
            } else {
                joiner.attack("Scratch", true).unwrap();
            }
            settle(&mut host, &mut joiner);
            turns += 1;
            assert_eq!(host.me().hp, joiner.opponent().unwrap().hp);
            assert_eq!(host.opponent().unwrap().hp, joiner.me().hp);
        }
        assert_eq!(turns, 3, "weak physical moves never one-shot");
    }

    #[test]
    fn boost_counters_shared_and_monotonic() {
        let (mut host, mut joiner) = started_pair(9);
        joiner.set_defend_with_boost(true);
        host.attack("Thunderbolt", true).unwrap();
        settle(&mut host, &mut joiner);

        // P5: decremented once, never negative, and mirrored on both books
        assert_eq!(host.me().sp_atk_uses_left, 4);
        assert_eq!(joiner.opponent().unwrap().sp_atk_uses_left, 4);
        assert_eq!(joiner.me().sp_def_uses_left, 4);
        assert_eq!(host.opponent().unwrap().sp_def_uses_left, 4);
        assert_eq!(host.me().sp_def_uses_left, 5);
    }

    #[test]
    fn exhausted_boost_flag_is_silently_false() {
        let mut host = BattleState::new(11, true, combatant("Pikachu"), 0, 0);
        let mut joiner = BattleState::new(11, false, combatant("Charmander"), 0, 0);
        host.start_setup();
        joiner.start_setup();
        host.handle_setup(combatant("Charmander"), 39, 0, 0);
        joiner.handle_setup(combatant("Pikachu"), 35, 0, 0);
        host.drain_outbox().for_each(drop);
        joiner.drain_outbox().for_each(drop);

        host.attack("Quick Attack", true).unwrap();
        settle(&mut host, &mut joiner);
        // both sides agreed (no discrepancy events) despite the stale flag
        assert_eq!(host.me().sp_atk_uses_left, 0);
        assert!(!host
            .drain_events()
            .any(|e| matches!(e, BattleEvent::DiscrepancyDetected { .. })));
        assert_eq!(host.phase(), Phase::AwaitAttack);
    }

    #[test]
    fn discrepancy_resolves_with_attacker_values() {
        let (mut host, mut joiner) = started_pair(12345);
        host.attack("Quick Attack", false).unwrap();
        // deliver ATTACK_ANNOUNCE, get DEFENSE_ANNOUNCE back
        shuttle(&mut host, &mut joiner);
        shuttle(&mut joiner, &mut host);

        // intercept the attacker's report and inject a defender-side bug
        let reports: Vec<_> = host.drain_outbox().collect();
        let [MessageBody::CalculationReport { damage, defender_hp_after }] = reports.as_slice()
        else {
            panic!("expected exactly one report, got {:?}", reports);
        };
        let attacker_damage = *damage;
        joiner.handle_message(MessageBody::CalculationReport {
            damage: damage + 1,
            defender_hp_after: defender_hp_after.saturating_sub(1),
        });
        assert_eq!(joiner.phase(), Phase::Resolving);
        let resolution: Vec<_> = joiner.drain_outbox().collect();
        assert!(matches!(
            resolution.as_slice(),
            [MessageBody::ResolutionRequest { .. }]
        ));

        // attacker answers the resolution request by re-sending its report
        for body in resolution {
            host.handle_message(body);
        }
        settle(&mut host, &mut joiner);

        // both converged on the attacker's values, turn flipped
        assert_eq!(host.phase(), Phase::AwaitAttack);
        assert_eq!(joiner.phase(), Phase::AwaitAttack);
        assert_eq!(host.turn(), TurnOwner::Opp);
        assert_eq!(joiner.turn(), TurnOwner::Me);
        assert_eq!(joiner.me().hp, 39 - attacker_damage);
        assert_eq!(host.opponent().unwrap().hp, joiner.me().hp);
        assert!(joiner
            .drain_events()
            .any(|e| matches!(e, BattleEvent::DiscrepancyResolved { .. })));
    }

    #[test]
    fn win_clamps_hp_and_is_absorbing() {
        let (mut host, mut joiner) = started_pair(12345);
        // wear the defender down to guarantee a lethal hit
        loop {
            if host.turn() == TurnOwner::Me {
                host.attack("Thunderbolt", false).unwrap();
            } else {
                joiner.attack("Ember", false).unwrap();
            }
            settle(&mut host, &mut joiner);
            if host.is_over() || joiner.is_over() {
                break;
            }
        }

        assert!(host.is_over() && joiner.is_over());
        let loser_hp = std::cmp::min(host.me().hp, joiner.me().hp);
        assert_eq!(loser_hp, 0, "loser HP clamps to zero");

        // P6: nothing transitions out of GameOver
        let phase_before = host.phase();
        host.handle_message(MessageBody::AttackAnnounce {
            move_name: "Ember".into(),
            use_sp_atk_boost: false,
        });
        host.handle_message(MessageBody::CalculationConfirm);
        assert_eq!(host.phase(), phase_before);
        assert!(matches!(
            host.attack("Thunderbolt", false),
            Err(PokeError::WrongPhase { .. })
        ));
        assert_eq!(host.drain_outbox().count(), 0);
    }

    #[test]
    fn hp_conservation_invariant() {
        let (mut host, mut joiner) = started_pair(31337);
        let mut joiner_hp_lost = 0;
        for _ in 0..4 {
            if host.is_over() {
                break;
            }
            let before = joiner.me().hp;
            if host.turn() == TurnOwner::Me {
                host.attack("Quick Attack", false).unwrap();
            } else {
                joiner.attack("Scratch", false).unwrap();
            }
            settle(&mut host, &mut joiner);
            joiner_hp_lost += before - joiner.me().hp;
            assert_eq!(joiner.me().hp + joiner_hp_lost, joiner.me().max_hp);
        }
    }

    #[test]
    fn chat_does_not_touch_battle_state() {
        let (mut host, _joiner) = started_pair(2);
        let phase = host.phase();
        let turn = host.turn();
        host.handle_message(MessageBody::Chat {
            content_type: crate::wire::ChatContent::Text,
            from: "Bob".into(),
            payload: "gl hf".into(),
        });
        assert_eq!(host.phase(), phase);
        assert_eq!(host.turn(), turn);
        assert_eq!(host.drain_outbox().count(), 0);
    }

    #[test]
    fn abandon_is_terminal() {
        let (mut host, _joiner) = started_pair(2);
        host.abandon();
        assert!(host.is_over());
        assert!(matches!(
            host.attack("Thunderbolt", false),
            Err(PokeError::WrongPhase { .. })
        ));
    }
}
