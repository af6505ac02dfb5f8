//! Hook system
//!
//! - [`vtable`]: virtual function pointer replacement, owned by a
//!   [`VTableHookManager`]
//! - [`run_command`]: `PlayerRunCommand` interception with prioritized
//!   listeners and verdicts
//! - [`user_message`]: user message suppression
//!
//! The engine calls detours as plain `extern "C"` functions, so each hook
//! keeps the instance it serves in a static "active" slot.

pub mod run_command;
pub mod user_message;
pub mod vtable;

pub use run_command::{RunCommandHook, RunCommandListener, PLAYER_RUN_COMMAND};
pub use user_message::{MessageMode, UserMessageHook, UserMessageListener};
pub use vtable::{HookError, HookRecord, VTableHookKey, VTableHookManager};
