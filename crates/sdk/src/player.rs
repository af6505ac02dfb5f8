//! Player slot types

/// Maximum number of player slots (index 0 is the world)
pub const MAX_PLAYERS: usize = 65;

/// Connection lifecycle stage of a player slot
///
/// Ordered: listeners use `status >= filter` to decide whether they run.
#[repr(i32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotStatus {
    /// Slot is empty
    #[default]
    Invalid = 0,
    /// Player is being kicked
    Kicked = 1,
    /// Slot is used by a bot
    Bot = 2,
    /// Player is connecting
    PlayerConnecting = 3,
    /// Player is connected (spectating or dead)
    PlayerConnected = 4,
    /// Player is playing and subject to tests
    PlayerInTests = 5,
}

/// How the active weapon fires
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WeaponShotType {
    /// Knife, grenades, anything held in hand
    #[default]
    Hand,
    /// Semi-automatic weapons
    Pistol,
    /// Automatic weapons
    Auto,
}

/// Stable player slot index, decoupled from the entity address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerIndex(u8);

impl PlayerIndex {
    /// Create an index, `None` if it is out of the slot range
    pub fn new(index: usize) -> Option<Self> {
        if index < MAX_PLAYERS {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for PlayerIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
