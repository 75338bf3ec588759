//! Requested power action.

use std::fmt;
use std::str::FromStr;

use crate::error::PowerError;

/// Action applied to every host in a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Action {
    /// Ensure the chassis is powered on.
    On,
    /// Ensure the chassis is powered off.
    Off,
    /// Report the current power state only.
    #[default]
    Status,
}

impl Action {
    /// Desired power state given the state currently observed.
    #[must_use]
    pub const fn desired(self, current: bool) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Status => current,
        }
    }
}

impl FromStr for Action {
    type Err = PowerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "status" => Ok(Self::Status),
            other => Err(PowerError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => write!(f, "on"),
            Self::Off => write!(f, "off"),
            Self::Status => write!(f, "status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_actions() {
        assert_eq!("on".parse::<Action>().unwrap(), Action::On);
        assert_eq!("off".parse::<Action>().unwrap(), Action::Off);
        assert_eq!("status".parse::<Action>().unwrap(), Action::Status);
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        for name in ["up", "down", "ON", "reboot", ""] {
            let err = name.parse::<Action>().unwrap_err();
            assert!(matches!(err, PowerError::InvalidAction(ref a) if a == name));
        }
    }

    #[test]
    fn test_desired_state() {
        for current in [true, false] {
            assert!(Action::On.desired(current));
            assert!(!Action::Off.desired(current));
            assert_eq!(Action::Status.desired(current), current);
        }
    }
}
