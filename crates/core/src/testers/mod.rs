//! Testers
//!
//! A tester is a [`RunCommandListener`](crate::hooks::RunCommandListener)
//! that keeps per-player statistics and reports suspicious patterns to a
//! [`DetectionSink`](crate::detections::DetectionSink).

pub mod shot;
mod stats;

pub use shot::{ShotTester, ShotTesterConfig};
pub use stats::{ClickCounter, ShotStats};
