//! System-state translation table (spec §4.2).

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::fmt;

/// The raw state codes as reported by the device-state manager over the
/// wire. A handful of these (`Test`/`Malf`/`Local`/`NotSet`) do not have a
/// canonical counterpart and are translated to `SystemState::Undef` with a
/// warning rather than rejected outright.
#[derive(FromPrimitive, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RawSystemState {
    Shutdown = 0,
    User = 1,
    ActDead = 2,
    Reboot = 3,
    Boot = 4,
    Test = 5,
    Malf = 6,
    Local = 7,
    NotSet = 8,
}

impl RawSystemState {
    pub fn from_wire(code: u32) -> Option<Self> {
        Self::from_u32(code)
    }
}

/// The canonical system state (spec §3). Authoritative owner: the lifecycle
/// socket client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SystemState {
    #[default]
    Undef,
    Boot,
    User,
    ActDead,
    Shutdown,
    Reboot,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undef => "UNDEF",
            Self::Boot => "BOOT",
            Self::User => "USER",
            Self::ActDead => "ACTDEAD",
            Self::Shutdown => "SHUTDOWN",
            Self::Reboot => "REBOOT",
        };
        write!(f, "{s}")
    }
}

impl From<RawSystemState> for SystemState {
    fn from(raw: RawSystemState) -> Self {
        match raw {
            RawSystemState::Shutdown => Self::Shutdown,
            RawSystemState::User => Self::User,
            RawSystemState::ActDead => Self::ActDead,
            RawSystemState::Reboot => Self::Reboot,
            RawSystemState::Boot => Self::Boot,
            RawSystemState::Test | RawSystemState::Malf | RawSystemState::Local | RawSystemState::NotSet => {
                Self::Undef
            }
        }
    }
}

/// Parse a raw wire code straight into a canonical `SystemState`, returning
/// `None` only when the code is not a recognised DSME state at all (in which
/// case the caller logs and ignores the frame, per spec §4.2 step 6).
pub fn translate(code: u32) -> Option<SystemState> {
    RawSystemState::from_wire(code).map(SystemState::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_codes() {
        assert_eq!(translate(0), Some(SystemState::Shutdown));
        assert_eq!(translate(1), Some(SystemState::User));
        assert_eq!(translate(2), Some(SystemState::ActDead));
        assert_eq!(translate(3), Some(SystemState::Reboot));
        assert_eq!(translate(4), Some(SystemState::Boot));
    }

    #[test]
    fn maps_unspecified_states_to_undef() {
        for code in [5, 6, 7, 8] {
            assert_eq!(translate(code), Some(SystemState::Undef));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(translate(42), None);
    }
}
