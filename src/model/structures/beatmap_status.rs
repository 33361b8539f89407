use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;
use strum_macros::EnumIter;

/// Ranked state of a beatmap as reported by the upstream game service.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[repr(u8)]
pub enum BeatmapStatus {
    Graveyard = 0,
    Pending = 1,
    Ranked = 2,
    Approved = 3,
    Qualified = 4,
    Loved = 5
}

impl TryFrom<i32> for BeatmapStatus {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(BeatmapStatus::Graveyard),
            1 => Ok(BeatmapStatus::Pending),
            2 => Ok(BeatmapStatus::Ranked),
            3 => Ok(BeatmapStatus::Approved),
            4 => Ok(BeatmapStatus::Qualified),
            5 => Ok(BeatmapStatus::Loved),
            _ => Err(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::model::structures::beatmap_status::BeatmapStatus;
    use strum::IntoEnumIterator;

    #[test]
    fn test_convert_invalid() {
        assert_eq!(BeatmapStatus::try_from(6), Err(()));
    }

    #[test]
    fn test_enumerate() {
        assert_eq!(BeatmapStatus::iter().count(), 6);
    }
}
