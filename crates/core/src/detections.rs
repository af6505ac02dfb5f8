//! Detection reports
//!
//! Testers hand every detection to a [`DetectionSink`] exactly once and
//! forget about it; storing, printing or forwarding is up to the sink.

use std::fmt;
use std::sync::Arc;

use ncz_sdk::PlayerIndex;
use parking_lot::Mutex;

use crate::testers::ShotStats;

/// Which shot pattern fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShotDetectionKind {
    /// High ratio of short clicks while on target
    SustainedAssist,

    /// Long unbroken run of short clicks
    MacroBurst,
}

impl ShotDetectionKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::SustainedAssist => "Sustained Assist",
            Self::MacroBurst => "Macro Burst",
        }
    }
}

impl fmt::Display for ShotDetectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One detection, with the statistics it was based on
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRecord {
    /// Name of the tester that fired
    pub tester: &'static str,
    pub player_index: PlayerIndex,
    pub player_name: Arc<str>,
    pub kind: ShotDetectionKind,
    /// Tester clock time of the detection
    pub time: f64,
    /// Statistics at the moment the rule fired
    pub stats: ShotStats,
}

impl DetectionRecord {
    /// Full text report: header line followed by the statistics dump
    pub fn report(&self) -> String {
        format!(
            "{} detected {} on player '{}' (slot {}) at {:.3}\n{}",
            self.tester, self.kind, self.player_name, self.player_index, self.time, self.stats
        )
    }
}

/// Receiver of detections
pub trait DetectionSink: Send + Sync {
    fn report(&self, record: &DetectionRecord);
}

/// Writes detections to the log
#[derive(Debug, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn report(&self, record: &DetectionRecord) {
        tracing::warn!(
            tester = record.tester,
            player = %record.player_name,
            slot = record.player_index.get(),
            kind = %record.kind,
            "{}",
            record.report()
        );
    }
}

/// Keeps detections in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<DetectionRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything reported so far
    pub fn records(&self) -> Vec<DetectionRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Take everything reported so far
    pub fn drain(&self) -> Vec<DetectionRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl DetectionSink for MemorySink {
    fn report(&self, record: &DetectionRecord) {
        self.records.lock().push(record.clone());
    }
}
