use serde_repr::{Deserialize_repr, Serialize_repr};
use std::convert::TryFrom;

/// Who may join a community leaderboard.
#[derive(Deserialize_repr, Serialize_repr, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LeaderboardAccess {
    Public = 0,
    PublicInviteOnly = 1,
    Private = 2
}

impl LeaderboardAccess {
    /// Restricted leaderboards require an invite before a non-owner can
    /// create a membership.
    pub fn is_restricted(self) -> bool {
        matches!(
            self,
            LeaderboardAccess::PublicInviteOnly | LeaderboardAccess::Private
        )
    }
}

impl TryFrom<i32> for LeaderboardAccess {
    type Error = ();

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(LeaderboardAccess::Public),
            1 => Ok(LeaderboardAccess::PublicInviteOnly),
            2 => Ok(LeaderboardAccess::Private),
            _ => Err(())
        }
    }
}
