use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Game modifier bitmask as submitted with a score. Matches the upstream
/// game service's integer encoding, so values round-trip through the
/// database and the calculator RPC unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mods(pub u32);

impl Mods {
    pub const NONE: Mods = Mods(0);
    pub const NO_FAIL: Mods = Mods(1);
    pub const EASY: Mods = Mods(2);
    pub const HIDDEN: Mods = Mods(8);
    pub const HARD_ROCK: Mods = Mods(16);
    pub const SUDDEN_DEATH: Mods = Mods(32);
    pub const DOUBLE_TIME: Mods = Mods(64);
    pub const HALF_TIME: Mods = Mods(256);
    pub const NIGHTCORE: Mods = Mods(512);
    pub const FLASHLIGHT: Mods = Mods(1024);
    pub const PERFECT: Mods = Mods(16384);

    pub fn contains(self, other: Mods) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Mods) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Mods {
    type Output = Mods;

    fn bitor(self, rhs: Mods) -> Mods {
        Mods(self.0 | rhs.0)
    }
}

impl BitAnd for Mods {
    type Output = Mods;

    fn bitand(self, rhs: Mods) -> Mods {
        Mods(self.0 & rhs.0)
    }
}

impl From<u32> for Mods {
    fn from(bits: u32) -> Mods {
        Mods(bits)
    }
}

impl fmt::Display for Mods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_requires_all_bits() {
        let mods = Mods::HIDDEN | Mods::HARD_ROCK;

        assert!(mods.contains(Mods::HIDDEN));
        assert!(mods.contains(Mods::HIDDEN | Mods::HARD_ROCK));
        assert!(!mods.contains(Mods::HIDDEN | Mods::DOUBLE_TIME));
    }

    #[test]
    fn test_intersects_requires_any_bit() {
        let mods = Mods::HIDDEN | Mods::DOUBLE_TIME;

        assert!(mods.intersects(Mods::DOUBLE_TIME | Mods::FLASHLIGHT));
        assert!(!mods.intersects(Mods::EASY | Mods::HALF_TIME));
    }

    #[test]
    fn test_none_contains_none() {
        assert!(Mods::NONE.contains(Mods::NONE));
        assert!(Mods::HIDDEN.contains(Mods::NONE));
        assert!(Mods::NONE.is_empty());
    }
}
