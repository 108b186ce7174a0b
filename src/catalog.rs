//! Combatant catalog, move table, and type effectiveness chart.
//!
//! The catalog resolves a combatant name to an immutable stat block and
//! typing. Lookup is case-sensitive in the core; callers may normalize (the
//! CLI front end does). A built-in roster is embedded so the crate works
//! without any files on disk; a CSV source in the same tabular shape can be
//! loaded instead.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::PokeError;
use crate::PokeResult;

/// Elemental types (18 as of the modern chart).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Elemental {
    Normal = 0,
    Fire = 1,
    Water = 2,
    Electric = 3,
    Grass = 4,
    Ice = 5,
    Fighting = 6,
    Poison = 7,
    Ground = 8,
    Flying = 9,
    Psychic = 10,
    Bug = 11,
    Rock = 12,
    Ghost = 13,
    Dragon = 14,
    Dark = 15,
    Steel = 16,
    Fairy = 17,
}

impl Elemental {
    /// All 18 elemental types, in chart order.
    pub const ALL: [Elemental; 18] = [
        Elemental::Normal,
        Elemental::Fire,
        Elemental::Water,
        Elemental::Electric,
        Elemental::Grass,
        Elemental::Ice,
        Elemental::Fighting,
        Elemental::Poison,
        Elemental::Ground,
        Elemental::Flying,
        Elemental::Psychic,
        Elemental::Bug,
        Elemental::Rock,
        Elemental::Ghost,
        Elemental::Dragon,
        Elemental::Dark,
        Elemental::Steel,
        Elemental::Fairy,
    ];

    /// Parses a type name, case-insensitively. `"fight"` is accepted as an
    /// alias for Fighting because some tabular sources abbreviate it.
    #[must_use]
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "fire" => Some(Self::Fire),
            "water" => Some(Self::Water),
            "electric" => Some(Self::Electric),
            "grass" => Some(Self::Grass),
            "ice" => Some(Self::Ice),
            "fighting" | "fight" => Some(Self::Fighting),
            "poison" => Some(Self::Poison),
            "ground" => Some(Self::Ground),
            "flying" => Some(Self::Flying),
            "psychic" => Some(Self::Psychic),
            "bug" => Some(Self::Bug),
            "rock" => Some(Self::Rock),
            "ghost" => Some(Self::Ghost),
            "dragon" => Some(Self::Dragon),
            "dark" => Some(Self::Dark),
            "steel" => Some(Self::Steel),
            "fairy" => Some(Self::Fairy),
            _ => None,
        }
    }

    /// Canonical display name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::Fire => "Fire",
            Self::Water => "Water",
            Self::Electric => "Electric",
            Self::Grass => "Grass",
            Self::Ice => "Ice",
            Self::Fighting => "Fighting",
            Self::Poison => "Poison",
            Self::Ground => "Ground",
            Self::Flying => "Flying",
            Self::Psychic => "Psychic",
            Self::Bug => "Bug",
            Self::Rock => "Rock",
            Self::Ghost => "Ghost",
            Self::Dragon => "Dragon",
            Self::Dark => "Dark",
            Self::Steel => "Steel",
            Self::Fairy => "Fairy",
        }
    }

    /// Multiplier of this type attacking a single defending type.
    #[inline]
    #[must_use]
    pub fn effectiveness(self, defender: Elemental) -> f64 {
        TYPE_CHART[self as usize][defender as usize]
    }
}

impl std::fmt::Display for Elemental {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Attacker-type x defender-type multipliers, each in {0, 0.5, 1, 2}.
///
/// Rows are the attacking type, columns the defending type, both in
/// [`Elemental::ALL`] order. Dual-typed defenders multiply two lookups,
/// producing values in {0, 0.25, 0.5, 1, 2, 4}.
#[rustfmt::skip]
pub static TYPE_CHART: [[f64; 18]; 18] = [
    // Normal attacking
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5, 0.0, 1.0, 1.0, 0.5, 1.0],
    // Fire attacking
    [1.0, 0.5, 0.5, 1.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 0.5, 1.0, 0.5, 1.0, 2.0, 1.0],
    // Water attacking
    [1.0, 2.0, 0.5, 1.0, 0.5, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.5, 1.0, 1.0, 1.0],
    // Electric attacking
    [1.0, 1.0, 2.0, 0.5, 0.5, 1.0, 1.0, 1.0, 0.0, 2.0, 1.0, 1.0, 1.0, 1.0, 0.5, 1.0, 1.0, 1.0],
    // Grass attacking
    [1.0, 0.5, 2.0, 1.0, 0.5, 1.0, 1.0, 0.5, 2.0, 0.5, 1.0, 0.5, 2.0, 1.0, 0.5, 1.0, 0.5, 1.0],
    // Ice attacking
    [1.0, 0.5, 0.5, 1.0, 2.0, 0.5, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.5, 1.0],
    // Fighting attacking
    [2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.5, 1.0, 0.5, 0.5, 0.5, 2.0, 0.0, 1.0, 2.0, 2.0, 0.5],
    // Poison attacking
    [1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 0.5, 0.5, 1.0, 1.0, 1.0, 0.5, 0.5, 1.0, 1.0, 0.0, 2.0],
    // Ground attacking
    [1.0, 2.0, 1.0, 2.0, 0.5, 1.0, 1.0, 2.0, 1.0, 0.0, 1.0, 0.5, 2.0, 1.0, 1.0, 1.0, 2.0, 1.0],
    // Flying attacking
    [1.0, 1.0, 1.0, 0.5, 2.0, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0, 2.0, 0.5, 1.0, 1.0, 1.0, 0.5, 1.0],
    // Psychic attacking
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 0.5, 1.0, 1.0, 1.0, 1.0, 0.0, 0.5, 1.0],
    // Bug attacking
    [1.0, 0.5, 1.0, 1.0, 2.0, 1.0, 0.5, 0.5, 1.0, 0.5, 2.0, 1.0, 1.0, 0.5, 1.0, 2.0, 0.5, 0.5],
    // Rock attacking
    [1.0, 2.0, 1.0, 1.0, 1.0, 2.0, 0.5, 1.0, 0.5, 2.0, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0, 0.5, 1.0],
    // Ghost attacking
    [0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 0.5, 1.0, 1.0],
    // Dragon attacking
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 0.5, 0.0],
    // Dark attacking
    [1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 2.0, 1.0, 0.5, 1.0, 0.5],
    // Steel attacking
    [1.0, 0.5, 0.5, 0.5, 1.0, 2.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 1.0, 1.0, 1.0, 0.5, 2.0],
    // Fairy attacking
    [1.0, 0.5, 1.0, 1.0, 1.0, 1.0, 2.0, 0.5, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 0.5, 1.0],
];

/// Whether a move scales off Attack/Defense or Sp.Attack/Sp.Defense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveCategory {
    /// Uses the attacker's Attack against the defender's Defense.
    Physical,
    /// Uses the attacker's Sp.Attack against the defender's Sp.Defense.
    Special,
}

impl std::fmt::Display for MoveCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Physical => write!(f, "PHYSICAL"),
            Self::Special => write!(f, "SPECIAL"),
        }
    }
}

/// One entry of the fixed move table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveInfo {
    /// Canonical move name as it appears on the wire.
    pub name: &'static str,
    /// The move's elemental type (drives STAB and the chart lookup).
    pub elemental: Elemental,
    /// Base power.
    pub power: f64,
    /// Damage category.
    pub category: MoveCategory,
}

/// The move table, fixed at startup.
pub static MOVES: &[MoveInfo] = &[
    MoveInfo { name: "Thunderbolt", elemental: Elemental::Electric, power: 90.0, category: MoveCategory::Special },
    MoveInfo { name: "Thunder", elemental: Elemental::Electric, power: 110.0, category: MoveCategory::Special },
    MoveInfo { name: "Quick Attack", elemental: Elemental::Normal, power: 40.0, category: MoveCategory::Physical },
    MoveInfo { name: "Tackle", elemental: Elemental::Normal, power: 40.0, category: MoveCategory::Physical },
    MoveInfo { name: "Scratch", elemental: Elemental::Normal, power: 40.0, category: MoveCategory::Physical },
    MoveInfo { name: "Ember", elemental: Elemental::Fire, power: 40.0, category: MoveCategory::Special },
    MoveInfo { name: "Flamethrower", elemental: Elemental::Fire, power: 90.0, category: MoveCategory::Special },
    MoveInfo { name: "Water Gun", elemental: Elemental::Water, power: 40.0, category: MoveCategory::Special },
    MoveInfo { name: "Water Shuriken", elemental: Elemental::Water, power: 75.0, category: MoveCategory::Special },
    MoveInfo { name: "Hydro Pump", elemental: Elemental::Water, power: 110.0, category: MoveCategory::Special },
    MoveInfo { name: "Vine Whip", elemental: Elemental::Grass, power: 45.0, category: MoveCategory::Physical },
    MoveInfo { name: "Solar Beam", elemental: Elemental::Grass, power: 120.0, category: MoveCategory::Special },
    MoveInfo { name: "Bite", elemental: Elemental::Dark, power: 60.0, category: MoveCategory::Physical },
];

/// Fallback when a peer announces a move we do not know: a plain 40-power
/// physical Normal hit. Both peers share the same fallback, so damage still
/// agrees.
pub static DEFAULT_MOVE: MoveInfo = MoveInfo {
    name: "Struggle",
    elemental: Elemental::Normal,
    power: 40.0,
    category: MoveCategory::Physical,
};

/// Looks up a move by name, case-insensitively.
#[must_use]
pub fn move_info(name: &str) -> Option<&'static MoveInfo> {
    MOVES.iter().find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Looks up a move by name, falling back to [`static@DEFAULT_MOVE`] so a turn
/// announced by the peer always computes.
#[must_use]
pub fn move_info_or_default(name: &str) -> &'static MoveInfo {
    move_info(name).unwrap_or(&DEFAULT_MOVE)
}

/// The six base stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Stats {
    /// Hit points.
    pub hp: u32,
    /// Physical attack.
    pub attack: u32,
    /// Physical defense.
    pub defense: u32,
    /// Special attack.
    pub sp_attack: u32,
    /// Special defense.
    pub sp_defense: u32,
    /// Speed.
    pub speed: u32,
}

/// A combatant: name, typing, stat block, and known moves. Immutable after
/// setup; per-battle state (current HP, boost uses) lives in the battle state
/// machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Combatant {
    /// Display name, also used on the wire in `BATTLE_SETUP` and `GAME_OVER`.
    pub name: String,
    /// Primary type.
    pub primary: Elemental,
    /// Optional secondary type.
    pub secondary: Option<Elemental>,
    /// Base stats.
    pub stats: Stats,
    /// Moves this combatant can announce.
    pub moves: Vec<String>,
}

impl Combatant {
    /// Whether the combatant has the given type (STAB check).
    #[must_use]
    pub fn has_type(&self, elemental: Elemental) -> bool {
        self.primary == elemental || self.secondary == Some(elemental)
    }

    /// Whether the combatant knows the move, case-insensitively.
    #[must_use]
    pub fn knows_move(&self, name: &str) -> bool {
        self.moves.iter().any(|m| m.eq_ignore_ascii_case(name))
    }

    /// Combined type multiplier of an attack of the given type against this
    /// combatant. Dual typing multiplies the two chart lookups.
    #[must_use]
    pub fn type_multiplier(&self, attack_type: Elemental) -> f64 {
        let primary = attack_type.effectiveness(self.primary);
        let secondary = self
            .secondary
            .map_or(1.0, |t| attack_type.effectiveness(t));
        primary * secondary
    }
}

/// How many names a lookup miss suggests.
const SAMPLE_SIZE: usize = 5;

#[derive(Debug, Deserialize)]
struct CsvRow {
    name: String,
    type1: String,
    #[serde(default)]
    type2: String,
    hp: u32,
    attack: u32,
    defense: u32,
    sp_attack: u32,
    sp_defense: u32,
    speed: u32,
    /// Pipe-separated list, e.g. `Thunderbolt|Quick Attack`.
    moves: String,
}

/// Resolves combatant names to stat blocks.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    by_name: BTreeMap<String, Combatant>,
}

impl Catalog {
    /// The embedded roster. Stats are the classic base stats; every entry
    /// only knows moves present in [`MOVES`].
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::default();
        let roster: &[(&str, Elemental, Option<Elemental>, [u32; 6], &[&str])] = &[
            ("Pikachu", Elemental::Electric, None, [35, 55, 40, 50, 50, 90],
             &["Thunderbolt", "Thunder", "Quick Attack", "Tackle"]),
            ("Raichu", Elemental::Electric, None, [60, 90, 55, 90, 80, 110],
             &["Thunderbolt", "Thunder", "Quick Attack"]),
            ("Charmander", Elemental::Fire, None, [39, 52, 43, 60, 50, 65],
             &["Ember", "Flamethrower", "Scratch", "Bite"]),
            ("Charizard", Elemental::Fire, Some(Elemental::Flying), [78, 84, 78, 109, 85, 100],
             &["Flamethrower", "Ember", "Scratch"]),
            ("Squirtle", Elemental::Water, None, [44, 48, 65, 50, 64, 43],
             &["Water Gun", "Hydro Pump", "Tackle", "Bite"]),
            ("Gyarados", Elemental::Water, Some(Elemental::Flying), [95, 125, 79, 60, 100, 81],
             &["Hydro Pump", "Bite", "Tackle"]),
            ("Greninja", Elemental::Water, Some(Elemental::Dark), [72, 95, 67, 103, 71, 122],
             &["Water Shuriken", "Hydro Pump", "Quick Attack"]),
            ("Bulbasaur", Elemental::Grass, Some(Elemental::Poison), [45, 49, 49, 65, 65, 45],
             &["Vine Whip", "Solar Beam", "Tackle"]),
            ("Venusaur", Elemental::Grass, Some(Elemental::Poison), [80, 82, 83, 100, 100, 80],
             &["Solar Beam", "Vine Whip", "Tackle"]),
            ("Eevee", Elemental::Normal, None, [55, 55, 50, 45, 65, 55],
             &["Tackle", "Quick Attack", "Bite"]),
        ];
        for &(name, primary, secondary, stats, moves) in roster {
            catalog.insert(Combatant {
                name: name.to_owned(),
                primary,
                secondary,
                stats: Stats {
                    hp: stats[0],
                    attack: stats[1],
                    defense: stats[2],
                    sp_attack: stats[3],
                    sp_defense: stats[4],
                    speed: stats[5],
                },
                moves: moves.iter().map(|&m| m.to_owned()).collect(),
            });
        }
        catalog
    }

    /// Loads a catalog from a CSV file with the columns
    /// `name,type1,type2,hp,attack,defense,sp_attack,sp_defense,speed,moves`
    /// (`moves` pipe-separated, `type2` may be empty).
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> PokeResult<Self> {
        let mut reader = csv::Reader::from_path(path.as_ref()).map_err(|e| PokeError::Setup {
            reason: format!("cannot open catalog {}: {}", path.as_ref().display(), e),
        })?;
        let mut catalog = Self::default();
        for row in reader.deserialize::<CsvRow>() {
            let row = row.map_err(|e| PokeError::Setup {
                reason: format!("bad catalog row: {}", e),
            })?;
            let primary = Elemental::from_name(&row.type1).ok_or_else(|| PokeError::Setup {
                reason: format!("unknown type {:?} for {}", row.type1, row.name),
            })?;
            let secondary = if row.type2.trim().is_empty() {
                None
            } else {
                Some(
                    Elemental::from_name(&row.type2).ok_or_else(|| PokeError::Setup {
                        reason: format!("unknown type {:?} for {}", row.type2, row.name),
                    })?,
                )
            };
            catalog.insert(Combatant {
                name: row.name,
                primary,
                secondary,
                stats: Stats {
                    hp: row.hp,
                    attack: row.attack,
                    defense: row.defense,
                    sp_attack: row.sp_attack,
                    sp_defense: row.sp_defense,
                    speed: row.speed,
                },
                moves: row
                    .moves
                    .split('|')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned)
                    .collect(),
            });
        }
        if catalog.by_name.is_empty() {
            return Err(PokeError::Setup {
                reason: "catalog source contains no combatants".into(),
            });
        }
        Ok(catalog)
    }

    fn insert(&mut self, combatant: Combatant) {
        self.by_name.insert(combatant.name.clone(), combatant);
    }

    /// Case-sensitive lookup. Misses return [`PokeError::UnknownCombatant`]
    /// with a small sample of valid names.
    pub fn lookup(&self, name: &str) -> PokeResult<&Combatant> {
        self.by_name.get(name).ok_or_else(|| self.miss(name))
    }

    /// Case-insensitive lookup, for front ends that normalize user input.
    pub fn resolve(&self, name: &str) -> PokeResult<&Combatant> {
        self.by_name
            .values()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| self.miss(name))
    }

    fn miss(&self, name: &str) -> PokeError {
        PokeError::UnknownCombatant {
            name: name.to_owned(),
            sample: self
                .by_name
                .keys()
                .take(SAMPLE_SIZE)
                .cloned()
                .collect(),
        }
    }

    /// All combatant names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }

    /// Number of combatants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
