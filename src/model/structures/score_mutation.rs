use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;

/// Tag distinguishing real submitted plays from hypothetical variants
/// derived by the mutation engine.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum ScoreMutation {
    #[default]
    None = 0,
    NoChoke = 1
}

impl TryFrom<i32> for ScoreMutation {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ScoreMutation::None),
            1 => Ok(ScoreMutation::NoChoke),
            _ => Err(())
        }
    }
}
