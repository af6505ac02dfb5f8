//! PlayerRunCommand hook
//!
//! Every tick the engine runs one `CUserCmd` per player through
//! `CBasePlayer::PlayerRunCommand`. The hook replays each command through
//! the registered [`RunCommandListener`]s before deciding what reaches the
//! engine:
//!
//! - players below [`SlotStatus::PlayerConnected`] skip the listeners
//! - listeners run in priority order, each only if the player's status is
//!   at least the listener's filter
//! - the walk stops at the first verdict above [`Verdict::Continue`]; that
//!   verdict is the result
//! - the command is stored as the player's "last command" whatever the verdict
//! - `Block` drops the command, `Neutralize` strips aim and buttons, anything
//!   not blocked gets a fresh random seed and goes to the original function

use std::collections::HashMap;
use std::ffi::c_void;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ncz_sdk::{
    vtable_of, CBasePlayer, IMoveHelper, PlayerIndex, PlayerRunCommandFn, SlotStatus, UserCmd,
};
use parking_lot::{Mutex, RwLock};
use rand::Rng;

use super::vtable::{HookError, VTableHookKey, VTableHookManager};
use crate::gamedata::Gamedata;
use crate::listeners::{ListenerKey, PriorityListenerRegistry, Verdict};
use crate::players::{PlayerDataStore, PlayerResolver, TrackedPlayer};

/// Gamedata name of the vtable index
pub const PLAYER_RUN_COMMAND: &str = "playerruncommand";

/// Lowest status for which listeners run at all
pub const MIN_TRACKED_STATUS: SlotStatus = SlotStatus::PlayerConnected;

/// Something that wants to see every player command
pub trait RunCommandListener: Send + Sync {
    /// Called once per command
    ///
    /// # Arguments
    /// * `player` - The player running the command
    /// * `cmd` - This tick's command
    /// * `last_cmd` - The previous command received from this player
    fn player_run_command(&self, player: &TrackedPlayer, cmd: &UserCmd, last_cmd: &UserCmd)
        -> Verdict;
}

struct HookedTable {
    key: VTableHookKey,
    original: PlayerRunCommandFn,
}

/// Hook currently reachable from the detour
static ACTIVE: RwLock<Option<Arc<RunCommandHook>>> = RwLock::new(None);

/// Interception of `PlayerRunCommand`
pub struct RunCommandHook {
    listeners: PriorityListenerRegistry<dyn RunCommandListener>,
    players: Arc<dyn PlayerResolver>,
    history: PlayerDataStore<UserCmd>,
    /// Hooked vtables, keyed by vtable address
    tables: Mutex<HashMap<usize, HookedTable>>,
}

impl RunCommandHook {
    pub fn new(players: Arc<dyn PlayerResolver>) -> Self {
        Self {
            listeners: PriorityListenerRegistry::new(),
            players,
            history: PlayerDataStore::new(),
            tables: Mutex::new(HashMap::new()),
        }
    }

    /// Register a listener
    ///
    /// # Arguments
    /// * `priority` - Lower runs first
    /// * `filter` - Minimum player status for the listener to be called
    pub fn register_listener(
        &self,
        listener: &Arc<dyn RunCommandListener>,
        priority: usize,
        filter: SlotStatus,
    ) -> ListenerKey {
        self.listeners.add(listener, priority, filter)
    }

    /// Remove a listener, `false` if it wasn't registered
    pub fn remove_listener(&self, listener: &Arc<dyn RunCommandListener>) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listeners(&self) -> &PriorityListenerRegistry<dyn RunCommandListener> {
        &self.listeners
    }

    /// The last command received from a player
    pub fn last_user_cmd(&self, index: PlayerIndex) -> UserCmd {
        self.history.get(index)
    }

    /// Forget a player's last command (slot reuse)
    pub fn reset_history(&self, index: PlayerIndex) {
        self.history.reset(index);
    }

    /// Hook `PlayerRunCommand` in the vtable of `base_player`
    ///
    /// Installs once per distinct vtable; later calls with an object of an
    /// already hooked class do nothing.
    ///
    /// # Returns
    /// `true` if a new vtable was hooked.
    ///
    /// # Safety
    /// `base_player` must point to a live `CBasePlayer`.
    pub unsafe fn hook_player(
        self: &Arc<Self>,
        manager: &VTableHookManager,
        gamedata: &Gamedata,
        base_player: *mut CBasePlayer,
    ) -> Result<bool, HookError> {
        if base_player.is_null() {
            return Err(HookError::InvalidTarget("null player"));
        }

        let table = vtable_of(base_player as *const c_void);
        let mut tables = self.tables.lock();
        if tables.contains_key(&(table as usize)) {
            return Ok(false);
        }

        let index = gamedata.vfunc_index(PLAYER_RUN_COMMAND)?;
        let (key, original) = manager.install(
            "CBasePlayer::PlayerRunCommand",
            base_player as *mut c_void,
            index,
            player_run_command_detour as *const (),
        )?;

        tables.insert(
            table as usize,
            HookedTable {
                key,
                original: std::mem::transmute::<*const (), PlayerRunCommandFn>(original),
            },
        );
        *ACTIVE.write() = Some(Arc::clone(self));

        tracing::info!(
            "Hooked PlayerRunCommand in vtable {:x} ({} hooked)",
            table as usize,
            tables.len()
        );

        Ok(true)
    }

    /// Restore every hooked vtable and forget the saved originals
    pub fn unhook(&self, manager: &VTableHookManager) {
        let mut tables = self.tables.lock();
        for (table, hooked) in tables.drain() {
            if let Err(e) = manager.uninstall(hooked.key) {
                tracing::warn!("Failed to unhook PlayerRunCommand in vtable {:x}: {}", table, e);
            }
        }
        drop(tables);

        let mut active = ACTIVE.write();
        if active.as_ref().is_some_and(|hook| std::ptr::eq(Arc::as_ptr(hook), self)) {
            *active = None;
        }
    }

    /// Number of hooked vtables
    pub fn hooked_tables(&self) -> usize {
        self.tables.lock().len()
    }

    /// Saved original for the class of `base_player`
    fn original_for(&self, base_player: *mut CBasePlayer) -> Option<PlayerRunCommandFn> {
        let table = unsafe { vtable_of(base_player as *const c_void) };
        self.tables
            .lock()
            .get(&(table as usize))
            .map(|hooked| hooked.original)
    }

    /// Run the listener chain for one command and apply the verdict
    ///
    /// `cmd` is modified in place. The caller forwards it to the engine
    /// unless the result is [`Verdict::Block`].
    pub fn process(&self, base_player: *const c_void, cmd: &mut UserCmd) -> Verdict {
        let verdict = match self.players.resolve(base_player) {
            Some(player) if player.status >= MIN_TRACKED_STATUS => {
                let last_cmd = self.history.get(player.index);
                let verdict = self.dispatch(&player, cmd, &last_cmd);
                self.history.set(player.index, *cmd);
                verdict
            }
            _ => Verdict::Continue,
        };

        match verdict {
            Verdict::Block => return Verdict::Block,
            Verdict::Neutralize => cmd.make_inert(),
            Verdict::Continue => {}
        }

        cmd.random_seed = rand::thread_rng().gen::<i32>() & i32::MAX;
        verdict
    }

    fn dispatch(&self, player: &TrackedPlayer, cmd: &UserCmd, last_cmd: &UserCmd) -> Verdict {
        let mut verdict = Verdict::Continue;

        for (node, listener) in self.listeners.snapshot() {
            if player.status < node.filter() {
                continue;
            }

            verdict = listener.player_run_command(player, cmd, last_cmd);
            if verdict > Verdict::Continue {
                break;
            }
        }

        verdict
    }

    /// Detour body: process, then forward unless blocked
    unsafe fn run(&self, this: *mut CBasePlayer, cmd: *mut UserCmd, move_helper: *mut IMoveHelper) {
        let Some(original) = self.original_for(this) else {
            tracing::error!("PlayerRunCommand original is missing for {:x}", this as usize);
            return;
        };

        if let Some(cmd) = cmd.as_mut() {
            let verdict = std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.process(this as *const c_void, cmd)
            }))
            .unwrap_or_else(|_| {
                tracing::error!("PlayerRunCommand listener panicked, letting the command through");
                Verdict::Continue
            });

            if verdict == Verdict::Block {
                return;
            }
        }

        original(this, cmd, move_helper);
    }
}

/// Our PlayerRunCommand detour
extern "C" fn player_run_command_detour(
    this: *mut CBasePlayer,
    cmd: *mut UserCmd,
    move_helper: *mut IMoveHelper,
) {
    let Some(hook) = ACTIVE.read().clone() else {
        tracing::error!("PlayerRunCommand called with no active hook!");
        return;
    };

    unsafe { hook.run(this, cmd, move_helper) };
}
