//! Plugin context
//!
//! Owns every piece of runtime state: configuration, gamedata, the vtable
//! hook manager, the player table, both hooks and the shot tester. The host
//! glue creates one on load, forwards client events to it and drops it on
//! unload; dropping restores every hooked vtable.

use std::ffi::c_void;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ncz_sdk::{CBasePlayer, IVEngineServer, PlayerIndex, SlotStatus};
use thiserror::Error;

use crate::config::{core_config_path, gamedata_path, ConfigError, CoreConfig};
use crate::detections::{DetectionSink, LogSink};
use crate::gamedata::{Gamedata, GamedataError};
use crate::hooks::user_message::{MESSAGE_END, SEND_USER_MESSAGE, USER_MESSAGE_BEGIN};
use crate::hooks::{HookError, MessageMode, RunCommandHook, UserMessageHook, VTableHookManager, PLAYER_RUN_COMMAND};
use crate::players::PlayerTable;
use crate::testers::ShotTester;
use crate::time::{Clock, EngineClock};

/// Errors that can occur while loading or hooking
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gamedata error: {0}")]
    Gamedata(#[from] GamedataError),

    #[error("Hook error: {0}")]
    Hook(#[from] HookError),
}

pub struct Context {
    config: CoreConfig,
    gamedata: Gamedata,
    hooks: VTableHookManager,
    players: Arc<PlayerTable>,
    run_command: Arc<RunCommandHook>,
    user_messages: Arc<UserMessageHook>,
    shot_tester: Arc<ShotTester>,
    shut_down: AtomicBool,
}

impl Context {
    /// Build a context and load the shot tester
    ///
    /// Fails if `gamedata` lacks an index one of the hooks will need, so a
    /// mismatched gamedata file is caught at load rather than on the first
    /// player.
    pub fn new(
        config: CoreConfig,
        gamedata: Gamedata,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn DetectionSink>,
    ) -> Result<Self, ContextError> {
        gamedata.vfunc_index(PLAYER_RUN_COMMAND)?;
        gamedata.vfunc_index(MESSAGE_END)?;
        match config.message_mode {
            MessageMode::Legacy => gamedata.vfunc_index(USER_MESSAGE_BEGIN)?,
            MessageMode::Protobuf => gamedata.vfunc_index(SEND_USER_MESSAGE)?,
        };

        let players = Arc::new(PlayerTable::new());
        let run_command = Arc::new(RunCommandHook::new(players.clone()));
        let shot_tester = Arc::new(ShotTester::new(config.shot_tester.clone(), clock, sink));
        shot_tester.load(&run_command);

        Ok(Self {
            config,
            gamedata,
            hooks: VTableHookManager::new(),
            players,
            run_command,
            user_messages: Arc::new(UserMessageHook::new()),
            shot_tester,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Load config and gamedata from `base_dir` and build the context
    ///
    /// Also initializes logging at the level the config asks for.
    pub fn load(base_dir: &Path) -> Result<Self, ContextError> {
        let config = CoreConfig::load_from_path(&core_config_path(base_dir))?;
        crate::init_logging(config.debug);

        let gamedata = Gamedata::load_from_file(gamedata_path(base_dir))?;

        tracing::info!("ncz loading ({:?} user messages)", config.message_mode);
        Self::new(config, gamedata, Arc::new(EngineClock::new()), Arc::new(LogSink))
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn gamedata(&self) -> &Gamedata {
        &self.gamedata
    }

    pub fn hooks(&self) -> &VTableHookManager {
        &self.hooks
    }

    pub fn players(&self) -> &Arc<PlayerTable> {
        &self.players
    }

    pub fn run_command(&self) -> &Arc<RunCommandHook> {
        &self.run_command
    }

    pub fn user_messages(&self) -> &Arc<UserMessageHook> {
        &self.user_messages
    }

    pub fn shot_tester(&self) -> &Arc<ShotTester> {
        &self.shot_tester
    }

    /// Hook the engine's user message entries
    ///
    /// # Safety
    /// `engine_server` must point to the live `IVEngineServer`.
    pub unsafe fn hook_engine(&self, engine_server: *mut IVEngineServer) -> Result<(), ContextError> {
        self.user_messages
            .install(&self.hooks, &self.gamedata, engine_server, self.config.message_mode)?;
        Ok(())
    }

    /// Hook `PlayerRunCommand` for the class of `base_player`
    ///
    /// # Safety
    /// `base_player` must point to a live `CBasePlayer`.
    pub unsafe fn hook_player(&self, base_player: *mut CBasePlayer) -> Result<(), ContextError> {
        self.run_command
            .hook_player(&self.hooks, &self.gamedata, base_player)?;
        Ok(())
    }

    /// A client took a slot
    pub fn on_client_connect(&self, index: PlayerIndex, base_player: *const c_void, name: &str) {
        self.players.connect(index, base_player, name);
        self.run_command.reset_history(index);
        self.shot_tester.on_client_connect(index);
        tracing::debug!("Client {} connected in slot {}", name, index);
    }

    /// A client finished connecting
    ///
    /// Humans are tested, bots are not.
    pub fn on_client_put_in_server(&self, index: PlayerIndex, is_bot: bool) {
        let status = if is_bot {
            SlotStatus::Bot
        } else {
            SlotStatus::PlayerInTests
        };
        self.players.set_status(index, status);
    }

    /// A client left its slot
    pub fn on_client_disconnect(&self, index: PlayerIndex) {
        if self.players.disconnect(index) {
            self.run_command.reset_history(index);
            self.shot_tester.on_client_connect(index);
            tracing::debug!("Client in slot {} disconnected", index);
        }
    }

    /// Unload the tester and restore every hooked vtable
    ///
    /// Safe to call more than once; also run on drop.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        tracing::info!("ncz shutting down...");

        self.shot_tester.unload(&self.run_command);
        self.user_messages.uninstall(&self.hooks);
        self.run_command.unhook(&self.hooks);
        self.hooks.uninstall_all();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ncz_sdk::{Buttons, UserCmd, WeaponShotType};

    use crate::detections::MemorySink;
    use crate::listeners::Verdict;
    use crate::time::ManualClock;

    const GAMEDATA: &str = r#"{
        "PlayerRunCommand": { "offsets": { "windows": 1, "linux": 1 } },
        "UserMessageBegin": { "offsets": { "windows": 0, "linux": 0 } },
        "MessageEnd": { "offsets": { "windows": 1, "linux": 1 } }
    }"#;

    fn context() -> (Context, Arc<ManualClock>, Arc<MemorySink>) {
        let clock = Arc::new(ManualClock::new(5.0));
        let sink = Arc::new(MemorySink::default());
        let ctx = Context::new(
            CoreConfig::default(),
            Gamedata::load_from_str(GAMEDATA).unwrap(),
            clock.clone(),
            sink.clone(),
        )
        .unwrap();
        (ctx, clock, sink)
    }

    #[test]
    fn test_missing_index_fails_load() {
        let gamedata = Gamedata::load_from_str(GAMEDATA).unwrap();
        let config = CoreConfig {
            message_mode: MessageMode::Protobuf,
            ..Default::default()
        };

        let result = Context::new(config, gamedata, Arc::new(ManualClock::default()), Arc::new(LogSink));
        assert!(matches!(
            result,
            Err(ContextError::Gamedata(GamedataError::OffsetNotFound(_)))
        ));
    }

    #[test]
    fn test_shot_tester_is_loaded() {
        let (ctx, _, _) = context();
        assert_eq!(ctx.run_command().listeners().len(), 1);

        ctx.shutdown();
        assert!(ctx.run_command().listeners().is_empty());
        // Second call is a no-op
        ctx.shutdown();
    }

    #[test]
    fn test_commands_reach_the_tester() {
        let (ctx, clock, _) = context();
        let index = PlayerIndex::new(4).unwrap();
        let entity = 0x7000 as *const c_void;

        ctx.on_client_connect(index, entity, "carol");
        ctx.players().set_weapon(index, WeaponShotType::Auto);

        let mut press = UserCmd {
            buttons: Buttons::ATTACK,
            ..Default::default()
        };
        let mut release = UserCmd::default();

        // Not in server yet, nothing is tested
        assert_eq!(ctx.run_command().process(entity, &mut press), Verdict::Continue);
        assert_eq!(ctx.shot_tester().stats(index).clicks.count, 0);

        ctx.on_client_put_in_server(index, false);
        assert_eq!(ctx.run_command().process(entity, &mut press), Verdict::Continue);
        clock.advance(0.01);
        assert_eq!(ctx.run_command().process(entity, &mut release), Verdict::Neutralize);

        let stats = ctx.shot_tester().stats(index);
        assert_eq!(stats.clicks.count, 1);
        assert_eq!(stats.with_auto.count, 1);

        ctx.on_client_disconnect(index);
        assert_eq!(ctx.shot_tester().stats(index).clicks.count, 0);
        assert_eq!(ctx.run_command().last_user_cmd(index), UserCmd::default());
    }

    #[test]
    fn test_bots_are_not_tested() {
        let (ctx, clock, _) = context();
        let index = PlayerIndex::new(9).unwrap();
        let entity = 0x7100 as *const c_void;

        ctx.on_client_connect(index, entity, "BOT Dave");
        ctx.on_client_put_in_server(index, true);

        let mut press = UserCmd {
            buttons: Buttons::ATTACK,
            ..Default::default()
        };
        ctx.run_command().process(entity, &mut press);
        clock.advance(0.01);
        let mut release = UserCmd::default();
        assert_eq!(ctx.run_command().process(entity, &mut release), Verdict::Continue);
        assert_eq!(ctx.shot_tester().stats(index).clicks.count, 0);
    }

    #[test]
    fn test_load_from_base_dir() {
        let dir = tempfile::tempdir().unwrap();

        // No gamedata yet
        assert!(matches!(
            Context::load(dir.path()),
            Err(ContextError::Gamedata(GamedataError::IoError(_)))
        ));
        // The config was still created
        assert!(core_config_path(dir.path()).exists());

        let path = gamedata_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, GAMEDATA).unwrap();

        let ctx = Context::load(dir.path()).unwrap();
        assert_eq!(ctx.config(), &CoreConfig::default());
        assert_eq!(ctx.gamedata().vfunc_index(PLAYER_RUN_COMMAND).unwrap(), 1);
        assert!(ctx.hooks().is_empty());
    }
}
