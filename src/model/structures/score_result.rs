use serde_repr::{Deserialize_repr, Serialize_repr};

/// Classification of how a play ended, derived from miss count and combo
/// percentage against the beatmap's max combo. Used to decide whether a
/// no-choke mutation is worth generating.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScoreResult {
    Clear = 0,
    SliderBreak = 1,
    OneMiss = 2,
    EndChoke = 3,
    NoBreak = 4,
    Perfect = 5
}

impl ScoreResult {
    /// A choke is a broken perfect run rather than a deliberate skill
    /// ceiling: the player missed once, slider-broke, or dropped combo at
    /// the very end.
    pub fn is_choke(self) -> bool {
        matches!(
            self,
            ScoreResult::SliderBreak | ScoreResult::OneMiss | ScoreResult::EndChoke
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ScoreResult;

    #[test]
    fn test_choke_classes() {
        assert!(ScoreResult::SliderBreak.is_choke());
        assert!(ScoreResult::OneMiss.is_choke());
        assert!(ScoreResult::EndChoke.is_choke());

        assert!(!ScoreResult::Clear.is_choke());
        assert!(!ScoreResult::NoBreak.is_choke());
        assert!(!ScoreResult::Perfect.is_choke());
    }
}
