//! ncz SDK - Source Engine Type Definitions
//!
//! This crate contains the engine-side types the interception layer touches:
//! opaque interface handles, the per-tick input command, the message write
//! buffer and the player slot enums shared by every tester.
//!
//! # Modules
//!
//! - [`interfaces`] - Opaque C++ interface types
//! - [`usercmd`] - `CUserCmd` layout and button flags
//! - [`bitbuf`] - `bf_write` layout used by user messages
//! - [`player`] - Slot status, player index and weapon classes

pub mod bitbuf;
pub mod interfaces;
pub mod player;
pub mod usercmd;

pub use bitbuf::*;
pub use interfaces::*;
pub use player::*;
pub use usercmd::*;
