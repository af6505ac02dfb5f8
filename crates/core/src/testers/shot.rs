//! Shot timing tester
//!
//! Watches the attack button of every command and measures how long each
//! click is held. Very short clicks are what aim assistance and fire macros
//! produce, so each one is neutralized and folded into the player's
//! [`ShotStats`]. Two rules run on short clicks:
//!
//! - **sustained assist**: after a quiet period, too many of the player's
//!   short clicks so far happened while aiming at another player
//! - **macro burst**: an unbroken run of short clicks, each within the
//!   cooldown of the previous one, with short clicks making up too much of
//!   the player's clicking overall
//!
//! Both rules only fire once the player has clicked more than
//! [`ShotTesterConfig::min_clicks`] times.

use std::sync::Arc;

use ncz_sdk::{PlayerIndex, SlotStatus, UserCmd, WeaponShotType};
use serde::{Deserialize, Serialize};

use super::ShotStats;
use crate::detections::{DetectionRecord, DetectionSink, ShotDetectionKind};
use crate::hooks::{RunCommandHook, RunCommandListener};
use crate::listeners::Verdict;
use crate::players::{PlayerDataStore, TrackedPlayer};
use crate::time::Clock;

/// Name used in detection reports
pub const SHOT_TESTER: &str = "ShotTester";

/// Shot tester settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShotTesterConfig {
    /// Longest hold time counted as a short click, in seconds
    pub short_click_time: f64,

    /// Quiet time after which the consecutive count starts over, in seconds
    pub cooldown: f64,

    /// On-target percentage above which sustained assist fires
    pub on_target_ratio: f64,

    /// Short click percentage above which macro burst fires
    pub short_ratio: f64,

    /// Clicks required before any rule fires
    pub min_clicks: u64,

    /// Consecutive short clicks required for macro burst
    pub burst_row: u64,

    /// Listener priority
    pub priority: usize,

    /// Trace every click with the full statistics
    pub verbose: bool,
}

impl Default for ShotTesterConfig {
    fn default() -> Self {
        Self {
            short_click_time: 0.04,
            cooldown: 1.0,
            on_target_ratio: 25.0,
            short_ratio: 40.0,
            min_clicks: 50,
            burst_row: 10,
            priority: 4,
            verbose: false,
        }
    }
}

pub struct ShotTester {
    config: ShotTesterConfig,
    stats: PlayerDataStore<ShotStats>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn DetectionSink>,
}

impl ShotTester {
    pub fn new(config: ShotTesterConfig, clock: Arc<dyn Clock>, sink: Arc<dyn DetectionSink>) -> Self {
        Self {
            config,
            stats: PlayerDataStore::new(),
            clock,
            sink,
        }
    }

    pub fn config(&self) -> &ShotTesterConfig {
        &self.config
    }

    /// Start listening to player commands
    pub fn load(self: &Arc<Self>, hook: &RunCommandHook) {
        let listener: Arc<dyn RunCommandListener> = self.clone();
        hook.register_listener(&listener, self.config.priority, SlotStatus::PlayerInTests);
        tracing::info!("{} loaded (priority {})", SHOT_TESTER, self.config.priority);
    }

    /// Stop listening and forget every player's statistics
    pub fn unload(self: &Arc<Self>, hook: &RunCommandHook) {
        let listener: Arc<dyn RunCommandListener> = self.clone();
        if !hook.remove_listener(&listener) {
            tracing::debug!("{} was not registered", SHOT_TESTER);
        }
        self.stats.reset_all();
        tracing::info!("{} unloaded", SHOT_TESTER);
    }

    /// A new client took the slot
    pub fn on_client_connect(&self, index: PlayerIndex) {
        self.stats.reset(index);
    }

    /// Copy of a player's statistics
    pub fn stats(&self, index: PlayerIndex) -> ShotStats {
        self.stats.get(index)
    }

    /// Run `f` on a player's live statistics
    pub fn with_stats<R>(&self, index: PlayerIndex, f: impl FnOnce(&mut ShotStats) -> R) -> R {
        self.stats.with(index, f)
    }

    fn detection(&self, player: &TrackedPlayer, kind: ShotDetectionKind, now: f64, stats: &ShotStats) -> DetectionRecord {
        DetectionRecord {
            tester: SHOT_TESTER,
            player_index: player.index,
            player_name: player.name.clone(),
            kind,
            time: now,
            stats: stats.clone(),
        }
    }

    /// Fold a released click into `stats`, collecting fired rules
    fn on_release(
        &self,
        player: &TrackedPlayer,
        stats: &mut ShotStats,
        now: f64,
        fired: &mut Vec<DetectionRecord>,
    ) -> Verdict {
        let config = &self.config;

        stats.up_time = now;
        let hold = stats.up_time - stats.down_time;
        let total = stats.clicks.count + 1;
        stats.clicks.record(hold, total);

        if hold > config.short_click_time {
            return Verdict::Continue;
        }

        if now - stats.last_detection > config.cooldown {
            if stats.on_target.ratio > config.on_target_ratio && stats.clicks.count > config.min_clicks {
                fired.push(self.detection(player, ShotDetectionKind::SustainedAssist, now, stats));
            }
            stats.row = 0;
        }

        if stats.row > config.burst_row
            && stats.short_clicks.ratio > config.short_ratio
            && stats.clicks.count > config.min_clicks
        {
            fired.push(self.detection(player, ShotDetectionKind::MacroBurst, now, stats));
        }

        stats.last_detection = now;
        stats.row += 1;

        let total = stats.clicks.count;
        stats.short_clicks.record(hold, total);
        match player.weapon {
            WeaponShotType::Hand => stats.with_hand.record(hold, total),
            WeaponShotType::Pistol => stats.with_pistol.record(hold, total),
            WeaponShotType::Auto => stats.with_auto.record(hold, total),
        }
        if player.aiming_at_target {
            stats.on_target.record(hold, total);
        }

        Verdict::Neutralize
    }
}

impl RunCommandListener for ShotTester {
    fn player_run_command(&self, player: &TrackedPlayer, cmd: &UserCmd, last_cmd: &UserCmd) -> Verdict {
        let pressed = cmd.is_attacking();
        let was_pressed = last_cmd.is_attacking();
        if pressed == was_pressed {
            return Verdict::Continue;
        }

        let now = self.clock.now();
        let mut fired = Vec::new();

        let verdict = self.stats.with(player.index, |stats| {
            let verdict = if pressed {
                stats.down_time = now;
                Verdict::Continue
            } else {
                self.on_release(player, stats, now, &mut fired)
            };

            if self.config.verbose {
                tracing::trace!("{} {} ({}): {}", SHOT_TESTER, player.name, player.index, stats);
            }

            verdict
        });

        for record in &fired {
            self.sink.report(record);
        }

        verdict
    }
}
