//! Per-tick player input command

use bitflags::bitflags;

bitflags! {
    /// `IN_*` button bits of `CUserCmd::buttons`
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Buttons: i32 {
        const ATTACK = 1 << 0;
        const JUMP = 1 << 1;
        const DUCK = 1 << 2;
        const FORWARD = 1 << 3;
        const BACK = 1 << 4;
        const USE = 1 << 5;
        const CANCEL = 1 << 6;
        const LEFT = 1 << 7;
        const RIGHT = 1 << 8;
        const MOVELEFT = 1 << 9;
        const MOVERIGHT = 1 << 10;
        const ATTACK2 = 1 << 11;
        const RUN = 1 << 12;
        const RELOAD = 1 << 13;
        const ALT1 = 1 << 14;
        const ALT2 = 1 << 15;
        const SCORE = 1 << 16;
        const SPEED = 1 << 17;
        const WALK = 1 << 18;
        const ZOOM = 1 << 19;
        const WEAPON1 = 1 << 20;
        const WEAPON2 = 1 << 21;
        const BULLRUSH = 1 << 22;
        const GRENADE1 = 1 << 23;
        const GRENADE2 = 1 << 24;
        const LOOKSPIN = 1 << 25;

        // The client may send bits we don't name
        const _ = !0;
    }
}

impl Default for Buttons {
    fn default() -> Self {
        Self::empty()
    }
}

/// Euler angles (pitch, yaw, roll) in degrees
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QAngle {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl QAngle {
    pub const ZERO: QAngle = QAngle {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// 3D vector
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Vector {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// `CUserCmd` as received by `PlayerRunCommand`
///
/// The layout follows the CS:GO command (the larger of the supported
/// variants), so a copy of it always covers the whole command the engine
/// hands us. Only `viewangles`, `buttons` and `random_seed` are ever written.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UserCmd {
    /// `CUserCmd` is polymorphic; first word is its vtable
    pub vtable: usize,
    pub command_number: i32,
    pub tick_count: i32,
    pub viewangles: QAngle,
    pub aimdirection: Vector,
    pub forwardmove: f32,
    pub sidemove: f32,
    pub upmove: f32,
    pub buttons: Buttons,
    pub impulse: u8,
    pub weaponselect: i32,
    pub weaponsubtype: i32,
    pub random_seed: i32,
    pub mousedx: i16,
    pub mousedy: i16,
    pub hasbeenpredicted: bool,
    pub headangles: QAngle,
    pub headoffset: Vector,
}

impl UserCmd {
    /// Whether the primary attack button is held in this command
    #[inline]
    pub fn is_attacking(&self) -> bool {
        self.buttons.contains(Buttons::ATTACK)
    }

    /// Strip aim and buttons so the command has no effect when run
    pub fn make_inert(&mut self) {
        self.viewangles = QAngle::ZERO;
        self.buttons = Buttons::empty();
    }
}
