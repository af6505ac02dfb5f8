//! ncz - Core Logic
//!
//! In-process interception of player commands and user messages, with
//! testers that look for suspicious input timing.
//!
//! The host glue builds a [`Context`], hooks the engine through it and
//! forwards client events. Everything else hangs off the context.
//!
//! # Re-exports
//!
//! - [`sdk`] - Engine interface types, `UserCmd`, player slot types

pub use ncz_sdk as sdk;

pub mod config;
pub mod context;
pub mod detections;
pub mod gamedata;
pub mod hooks;
pub mod listeners;
pub mod players;
pub mod testers;
pub mod time;

pub use config::{ConfigError, ConfigResult, CoreConfig};
pub use context::{Context, ContextError};
pub use detections::{DetectionRecord, DetectionSink, LogSink, MemorySink, ShotDetectionKind};
pub use gamedata::{Gamedata, GamedataError};
pub use hooks::{
    HookError, MessageMode, RunCommandHook, RunCommandListener, UserMessageHook, UserMessageListener,
    VTableHookKey, VTableHookManager,
};
pub use listeners::{ListenerKey, PriorityListenerRegistry, Verdict};
pub use players::{PlayerResolver, PlayerTable, TrackedPlayer};
pub use testers::{ShotStats, ShotTester, ShotTesterConfig};
pub use time::{Clock, EngineClock, ManualClock};

/// Initialize the tracing subscriber
///
/// `RUST_LOG` wins when set. Repeated calls are ignored.
pub fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_sdk_types_exist() {
        use crate::sdk::IVEngineServer;
        let _: *const IVEngineServer = std::ptr::null();
    }

    #[test]
    fn test_init_logging_twice() {
        super::init_logging(true);
        super::init_logging(false);
        tracing::debug!("still alive");
    }
}
