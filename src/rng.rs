//! Deterministic random number generation, based on PCG32.
//!
//! Both peers seed an identical [`Pcg32`] stream from the 32-bit seed the host
//! chooses during the handshake, and advance it exactly once per computed
//! attack. Since the algorithm and its constants are fully specified here,
//! implementations in any language can reproduce the stream turn by turn:
//!
//! - PCG-XSH-RR with 64-bit state and 32-bit output
//! - multiplier `6364136223846793005`
//! - stream selector `1442695040888963407` (made odd by `(s << 1) | 1`)
//! - standard PCG seeding: zero the state, step, add the seed, step
//!
//! Reference: <https://www.pcg-random.org/>
//!
//! The platform RNG is never used for anything the peers must agree on.

/// Multiplier constant for the LCG step (standard for 64-bit state PCG).
const PCG_MULTIPLIER: u64 = 6364136223846793005;

/// Default stream selector, from the PCG reference implementation.
const PCG_DEFAULT_STREAM: u64 = 1442695040888963407;

/// Lower bound of the damage roll.
const ROLL_MIN: f64 = 0.85;

/// Width of the damage roll interval (`[0.85, 1.0)`).
const ROLL_SPAN: f64 = 0.15;

/// PCG32 random number generator (PCG-XSH-RR variant).
///
/// Statistically good and fast, but NOT cryptographically secure, which is
/// fine: the stream only decides damage rolls that both peers can compute
/// anyway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    /// Creates a generator from a 64-bit seed on the default stream, using
    /// the standard PCG seeding procedure.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        // the increment must be odd
        let inc = (PCG_DEFAULT_STREAM << 1) | 1;
        let mut state: u64 = 0;
        state = state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(inc);
        state = state.wrapping_add(seed);
        state = state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(inc);
        Self { state, inc }
    }

    /// Creates a generator from the 32-bit shared battle seed.
    #[must_use]
    pub const fn from_battle_seed(seed: u32) -> Self {
        Self::new(seed as u64)
    }

    /// Advances the state and returns the next 32-bit value (XSH-RR output).
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        let old_state = self.state;
        self.state = old_state
            .wrapping_mul(PCG_MULTIPLIER)
            .wrapping_add(self.inc);
        let xorshifted = (((old_state >> 18) ^ old_state) >> 27) as u32;
        let rot = (old_state >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Returns the next damage roll in `[0.85, 1.0)`.
    ///
    /// Maps `next_u32 / 2^32` into the interval. Consumes exactly one draw;
    /// the turn cycle calls this once per computed attack on both peers.
    #[inline]
    pub fn damage_roll(&mut self) -> f64 {
        let unit = f64::from(self.next_u32()) / 4294967296.0;
        ROLL_MIN + unit * ROLL_SPAN
    }

    /// Returns `true` with the given probability. Used by the chaos socket
    /// for reproducible fault injection; never by the battle itself.
    #[inline]
    pub fn chance(&mut self, probability: f64) -> bool {
        let p = probability.clamp(0.0, 1.0);
        let threshold = (p * f64::from(u32::MAX)) as u32;
        self.next_u32() < threshold
    }
}

/// Derives a session seed from wall-clock timing.
///
/// Only the host calls this, once, to pick the shared seed it then announces
/// in `HANDSHAKE_RESPONSE`. Never returns zero so a seed of 0 can mean
/// "unset" in logs.
#[must_use]
pub fn entropy_seed() -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0x5eed);
    let mut rng = Pcg32::new(nanos);
    loop {
        let seed = rng.next_u32();
        if seed != 0 {
            return seed;
        }
    }
}
