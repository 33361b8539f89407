use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::EnumIter;

/// Aggregation policy for a leaderboard: which performance value each score
/// contributes before deduplication and decay weighting.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u8)]
pub enum ScoreSet {
    /// Each score counts with its own performance total.
    Normal = 0,
    /// Choked scores count with their no-choke mutation's total.
    NeverChoke = 1,
    /// Every score counts with its best-case total.
    AlwaysFullCombo = 2
}

impl TryFrom<i32> for ScoreSet {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ScoreSet::Normal),
            1 => Ok(ScoreSet::NeverChoke),
            2 => Ok(ScoreSet::AlwaysFullCombo),
            _ => Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::structures::score_set::ScoreSet;

    #[test]
    fn test_convert() {
        assert_eq!(ScoreSet::try_from(0), Ok(ScoreSet::Normal));
        assert_eq!(ScoreSet::try_from(1), Ok(ScoreSet::NeverChoke));
        assert_eq!(ScoreSet::try_from(2), Ok(ScoreSet::AlwaysFullCombo));
        assert_eq!(ScoreSet::try_from(3), Err(()));
    }
}
