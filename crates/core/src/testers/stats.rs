//! Rolling click statistics

use std::fmt;

/// Running statistics over one class of clicks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClickCounter {
    /// Number of clicks recorded
    pub count: u64,

    /// `count` as a percentage of all clicks, as of the last sample
    pub ratio: f64,

    /// Mean time the button was held down, in seconds
    pub avg_hold: f64,
}

impl ClickCounter {
    /// Fold one click into the counter
    ///
    /// `total` is the number of clicks of any kind, this one included.
    pub fn record(&mut self, hold: f64, total: u64) {
        self.count += 1;
        self.avg_hold += (hold - self.avg_hold) / self.count as f64;
        self.ratio = self.count as f64 / total.max(self.count) as f64 * 100.0;
    }
}

/// Per-player state of the shot tester
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShotStats {
    /// When the attack button was last pressed
    pub down_time: f64,

    /// When the attack button was last released
    pub up_time: f64,

    /// Every click
    pub clicks: ClickCounter,

    /// Clicks held for less than the short click time
    pub short_clicks: ClickCounter,

    /// Short clicks with a hand weapon
    pub with_hand: ClickCounter,

    /// Short clicks with a pistol
    pub with_pistol: ClickCounter,

    /// Short clicks with an automatic weapon
    pub with_auto: ClickCounter,

    /// Short clicks while aiming at another player
    pub on_target: ClickCounter,

    /// Consecutive short clicks since the last cooldown reset
    pub row: u64,

    /// When the last short click was seen
    pub last_detection: f64,
}

struct CounterDump<'a>(&'a str, &'a ClickCounter);

impl fmt::Display for CounterDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let CounterDump(name, counter) = self;
        writeln!(f, "    {} {{", name)?;
        writeln!(f, "        Clicks Count : {},", counter.count)?;
        writeln!(f, "        Detection Ratio : {:.6},", counter.ratio)?;
        writeln!(f, "        Average Button Down Hold Time : {:.6} s", counter.avg_hold)?;
        writeln!(f, "    }},")
    }
}

/// Flat text dump, fields always in the same order
impl fmt::Display for ShotStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ShotStats {{")?;
        writeln!(f, "    Attack1 Button Up At (Time) : {:.6},", self.up_time)?;
        writeln!(f, "    Attack1 Button Down At (Time) : {:.6},", self.down_time)?;
        write!(f, "{}", CounterDump("Clicks", &self.clicks))?;
        write!(f, "{}", CounterDump("ShortClicks", &self.short_clicks))?;
        write!(f, "{}", CounterDump("WithHand", &self.with_hand))?;
        write!(f, "{}", CounterDump("WithPistol", &self.with_pistol))?;
        write!(f, "{}", CounterDump("WithAuto", &self.with_auto))?;
        write!(f, "{}", CounterDump("OnTarget", &self.on_target))?;
        writeln!(f, "    Consecutive Detections Count : {},", self.row)?;
        writeln!(f, "    Last Detection Time : {:.6}", self.last_detection)?;
        write!(f, "}}")
    }
}
