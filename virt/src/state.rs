use std::fmt::{self, Display};

use crate::VirtError;

/// Lifecycle state of a domain, as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainState {
    NoState,
    Running,
    Blocked,
    Paused,
    ShuttingDown,
    ShutOff,
    Crashed,
    Suspended,
}

impl DomainState {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => DomainState::NoState,
            1 => DomainState::Running,
            2 => DomainState::Blocked,
            3 => DomainState::Paused,
            4 => DomainState::ShuttingDown,
            5 => DomainState::ShutOff,
            6 => DomainState::Crashed,
            7 => DomainState::Suspended,
            _ => return None,
        })
    }

    pub fn code(&self) -> u32 {
        match self {
            DomainState::NoState => 0,
            DomainState::Running => 1,
            DomainState::Blocked => 2,
            DomainState::Paused => 3,
            DomainState::ShuttingDown => 4,
            DomainState::ShutOff => 5,
            DomainState::Crashed => 6,
            DomainState::Suspended => 7,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DomainState::NoState => "no state",
            DomainState::Running => "running",
            DomainState::Blocked => "blocked",
            DomainState::Paused => "paused",
            DomainState::ShuttingDown => "shutting down",
            DomainState::ShutOff => "shut off",
            DomainState::Crashed => "crashed",
            DomainState::Suspended => "suspended",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DomainState::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, DomainState::ShutOff)
    }
}

impl Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Parse the `state.state=<code>` line out of `virsh domstats --state`.
pub(crate) fn parse_domstats(output: &str) -> Result<DomainState, VirtError> {
    let code = output
        .lines()
        .find_map(|line| line.trim().strip_prefix("state.state="))
        .ok_or_else(|| VirtError::ParseState {
            output: output.to_owned(),
        })?;
    let code: u32 = code.trim().parse().map_err(|_| VirtError::ParseState {
        output: output.to_owned(),
    })?;
    DomainState::from_code(code).ok_or(VirtError::UnknownState { code })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=7 {
            assert_eq!(DomainState::from_code(code).unwrap().code(), code);
        }
        assert_eq!(DomainState::from_code(8), None);
    }

    #[test]
    fn labels() {
        assert_eq!(DomainState::Running.to_string(), "running");
        assert_eq!(DomainState::ShuttingDown.to_string(), "shutting down");
        assert_eq!(DomainState::ShutOff.to_string(), "shut off");
    }

    #[test]
    fn parses_domstats() {
        let output = "Domain: 'lab-0123456789ab-db1'\n  state.state=5\n  state.reason=1\n\n";
        assert_eq!(parse_domstats(output).unwrap(), DomainState::ShutOff);
    }

    #[test]
    fn rejects_missing_state() {
        assert!(matches!(
            parse_domstats("Domain: 'x'\n"),
            Err(VirtError::ParseState { .. })
        ));
        assert!(matches!(
            parse_domstats("  state.state=42\n"),
            Err(VirtError::UnknownState { code: 42 })
        ));
    }
}
