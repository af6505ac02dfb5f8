//! Tracked players
//!
//! Hooks receive raw entity pointers from the engine; testers work with
//! stable slot indices. [`PlayerResolver`] is the seam between the two.
//! [`PlayerTable`] is the in-process implementation: the host glue feeds it
//! connection and weapon state, the hooks read it every tick.
//!
//! # Example
//!
//! ```ignore
//! use ncz_core::players::PlayerTable;
//!
//! let players = PlayerTable::new();
//! let index = PlayerIndex::new(3).unwrap();
//!
//! players.connect(index, base_player, "alice");
//! players.set_status(index, SlotStatus::PlayerInTests);
//!
//! if let Some(player) = players.resolve(base_player) {
//!     tracing::info!("{} is in slot {}", player.name, player.index);
//! }
//! ```

mod data;

use std::ffi::c_void;
use std::sync::Arc;

use dashmap::DashMap;
use ncz_sdk::{PlayerIndex, SlotStatus, WeaponShotType, MAX_PLAYERS};
use parking_lot::RwLock;

pub use data::PlayerDataStore;

/// Snapshot of a tracked player, as seen by listeners
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlayer {
    pub index: PlayerIndex,
    pub status: SlotStatus,
    pub name: Arc<str>,
    /// Fire mode of the active weapon
    pub weapon: WeaponShotType,
    /// Whether the crosshair is on another player
    pub aiming_at_target: bool,
}

/// Maps engine objects to tracked players
pub trait PlayerResolver: Send + Sync {
    /// Look up the player owning `base_player` (a `CBasePlayer*`)
    fn resolve(&self, base_player: *const c_void) -> Option<TrackedPlayer>;
}

struct Slot {
    player: TrackedPlayer,
    entity: usize,
}

/// Slot table of connected players
pub struct PlayerTable {
    /// Entity address to slot
    by_entity: DashMap<usize, PlayerIndex>,
    slots: Vec<RwLock<Option<Slot>>>,
}

impl Default for PlayerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerTable {
    pub fn new() -> Self {
        Self {
            by_entity: DashMap::new(),
            slots: (0..MAX_PLAYERS).map(|_| RwLock::new(None)).collect(),
        }
    }

    /// Occupy a slot with a connecting player
    ///
    /// Replaces whatever the slot held before. If another slot still holds
    /// the same entity address, that slot is stale and gets freed.
    pub fn connect(&self, index: PlayerIndex, base_player: *const c_void, name: &str) {
        let entity = base_player as usize;

        if let Some((_, previous)) = self.by_entity.remove_if(&entity, |_, owner| *owner != index) {
            let mut stale = self.slots[previous.get()].write();
            if stale.as_ref().is_some_and(|slot| slot.entity == entity) {
                if let Some(old) = stale.take() {
                    tracing::debug!(
                        "Freed slot {} ('{}'), its entity {:x} moved to slot {}",
                        previous,
                        old.player.name,
                        entity,
                        index
                    );
                }
            }
        }

        let mut slot = self.slots[index.get()].write();
        if let Some(old) = slot.take() {
            self.by_entity.remove_if(&old.entity, |_, owner| *owner == index);
        }

        self.by_entity.insert(entity, index);
        *slot = Some(Slot {
            player: TrackedPlayer {
                index,
                status: SlotStatus::PlayerConnecting,
                name: Arc::from(name),
                weapon: WeaponShotType::default(),
                aiming_at_target: false,
            },
            entity,
        });

        tracing::debug!("Player '{}' connected in slot {} ({:x})", name, index, entity);
    }

    /// Free a slot
    ///
    /// # Returns
    /// `true` if the slot was occupied.
    pub fn disconnect(&self, index: PlayerIndex) -> bool {
        let Some(old) = self.slots[index.get()].write().take() else {
            return false;
        };
        self.by_entity.remove_if(&old.entity, |_, owner| *owner == index);
        tracing::debug!("Player '{}' left slot {}", old.player.name, index);
        true
    }

    pub fn set_status(&self, index: PlayerIndex, status: SlotStatus) {
        self.update(index, |player| player.status = status);
    }

    pub fn set_weapon(&self, index: PlayerIndex, weapon: WeaponShotType) {
        self.update(index, |player| player.weapon = weapon);
    }

    pub fn set_aiming_at_target(&self, index: PlayerIndex, aiming: bool) {
        self.update(index, |player| player.aiming_at_target = aiming);
    }

    fn update(&self, index: PlayerIndex, f: impl FnOnce(&mut TrackedPlayer)) {
        if let Some(slot) = self.slots[index.get()].write().as_mut() {
            f(&mut slot.player);
        }
    }

    /// Get a player by slot
    pub fn get(&self, index: PlayerIndex) -> Option<TrackedPlayer> {
        self.slots[index.get()]
            .read()
            .as_ref()
            .map(|slot| slot.player.clone())
    }

    /// Entity address registered for a slot
    pub fn base_player(&self, index: PlayerIndex) -> Option<*const c_void> {
        self.slots[index.get()]
            .read()
            .as_ref()
            .map(|slot| slot.entity as *const c_void)
    }

    /// Slots currently occupied, in index order
    pub fn connected(&self) -> Vec<PlayerIndex> {
        self.slots
            .iter()
            .filter_map(|slot| slot.read().as_ref().map(|slot| slot.player.index))
            .collect()
    }
}

impl PlayerResolver for PlayerTable {
    fn resolve(&self, base_player: *const c_void) -> Option<TrackedPlayer> {
        let index = *self.by_entity.get(&(base_player as usize))?;
        self.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(i: usize) -> PlayerIndex {
        PlayerIndex::new(i).unwrap()
    }

    fn entity(addr: usize) -> *const c_void {
        addr as *const c_void
    }

    #[test]
    fn test_connect_and_resolve() {
        let players = PlayerTable::new();
        players.connect(index(2), entity(0x1000), "alice");

        let player = players.resolve(entity(0x1000)).unwrap();
        assert_eq!(player.index, index(2));
        assert_eq!(player.status, SlotStatus::PlayerConnecting);
        assert_eq!(&*player.name, "alice");
        assert!(players.resolve(entity(0x2000)).is_none());
    }

    #[test]
    fn test_state_updates() {
        let players = PlayerTable::new();
        players.connect(index(1), entity(0x1000), "bob");
        players.set_status(index(1), SlotStatus::PlayerInTests);
        players.set_weapon(index(1), WeaponShotType::Pistol);
        players.set_aiming_at_target(index(1), true);

        let player = players.get(index(1)).unwrap();
        assert_eq!(player.status, SlotStatus::PlayerInTests);
        assert_eq!(player.weapon, WeaponShotType::Pistol);
        assert!(player.aiming_at_target);

        // Updates on empty slots are ignored
        players.set_status(index(9), SlotStatus::PlayerInTests);
        assert!(players.get(index(9)).is_none());
    }

    #[test]
    fn test_reconnect_replaces_slot() {
        let players = PlayerTable::new();
        players.connect(index(4), entity(0x1000), "old");
        players.set_status(index(4), SlotStatus::PlayerInTests);
        players.connect(index(4), entity(0x3000), "new");

        assert!(players.resolve(entity(0x1000)).is_none());
        let player = players.resolve(entity(0x3000)).unwrap();
        assert_eq!(&*player.name, "new");
        assert_eq!(player.status, SlotStatus::PlayerConnecting);
    }

    #[test]
    fn test_disconnect() {
        let players = PlayerTable::new();
        players.connect(index(5), entity(0x1000), "carol");
        players.connect(index(6), entity(0x2000), "dave");

        assert!(players.disconnect(index(5)));
        assert!(!players.disconnect(index(5)));
        assert!(players.resolve(entity(0x1000)).is_none());
        assert_eq!(players.connected(), vec![index(6)]);
        assert_eq!(players.base_player(index(6)), Some(entity(0x2000)));
    }

    #[test]
    fn test_entity_reused_before_stale_disconnect() {
        let players = PlayerTable::new();
        players.connect(index(1), entity(0x1000), "erin");
        players.connect(index(2), entity(0x1000), "frank");

        // The old slot gave its entity away
        assert!(players.get(index(1)).is_none());

        // Late disconnect for the old slot must not unmap the new player
        assert!(!players.disconnect(index(1)));
        let player = players.resolve(entity(0x1000)).unwrap();
        assert_eq!(player.index, index(2));
        assert_eq!(&*player.name, "frank");
        assert_eq!(players.connected(), vec![index(2)]);
    }

    #[test]
    fn test_reconnect_to_new_entity_keeps_other_mappings() {
        let players = PlayerTable::new();
        players.connect(index(3), entity(0x1000), "gina");
        players.connect(index(4), entity(0x2000), "hank");

        // Slot 3 moves to an address that was never slot 4's
        players.connect(index(3), entity(0x3000), "gina");
        assert!(players.resolve(entity(0x1000)).is_none());
        assert_eq!(players.resolve(entity(0x3000)).unwrap().index, index(3));
        assert_eq!(players.resolve(entity(0x2000)).unwrap().index, index(4));

        assert!(players.disconnect(index(4)));
        assert_eq!(players.resolve(entity(0x3000)).unwrap().index, index(3));
    }
}
