//! Artifact lifecycle states
//!
//! The transition table below is the only source of truth for which moves the state
//! monitor may make.

use std::fmt;

/// Lifecycle state of an install artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ArtifactState {
    /// Created, not yet installing
    Initial,
    Installing,
    Installed,
    InstallFailed,
    Resolving,
    Resolved,
    ResolveFailed,
    Starting,
    Active,
    StartFailed,
    Stopping,
    /// Stop completed; held while listeners are told, then back to RESOLVED
    Stopped,
    StopFailed,
    Uninstalling,
    Uninstalled,
    UninstallFailed,
}

impl ArtifactState {
    /// Every state, in declaration order
    pub const ALL: [ArtifactState; 16] = [
        ArtifactState::Initial,
        ArtifactState::Installing,
        ArtifactState::Installed,
        ArtifactState::InstallFailed,
        ArtifactState::Resolving,
        ArtifactState::Resolved,
        ArtifactState::ResolveFailed,
        ArtifactState::Starting,
        ArtifactState::Active,
        ArtifactState::StartFailed,
        ArtifactState::Stopping,
        ArtifactState::Stopped,
        ArtifactState::StopFailed,
        ArtifactState::Uninstalling,
        ArtifactState::Uninstalled,
        ArtifactState::UninstallFailed,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactState::Initial => "INITIAL",
            ArtifactState::Installing => "INSTALLING",
            ArtifactState::Installed => "INSTALLED",
            ArtifactState::InstallFailed => "INSTALL_FAILED",
            ArtifactState::Resolving => "RESOLVING",
            ArtifactState::Resolved => "RESOLVED",
            ArtifactState::ResolveFailed => "RESOLVE_FAILED",
            ArtifactState::Starting => "STARTING",
            ArtifactState::Active => "ACTIVE",
            ArtifactState::StartFailed => "START_FAILED",
            ArtifactState::Stopping => "STOPPING",
            ArtifactState::Stopped => "STOPPED",
            ArtifactState::StopFailed => "STOP_FAILED",
            ArtifactState::Uninstalling => "UNINSTALLING",
            ArtifactState::Uninstalled => "UNINSTALLED",
            ArtifactState::UninstallFailed => "UNINSTALL_FAILED",
        }
    }

    /// States an operation is in progress in
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ArtifactState::Installing
                | ArtifactState::Resolving
                | ArtifactState::Starting
                | ArtifactState::Stopping
                | ArtifactState::Uninstalling
        )
    }

    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(
            self,
            ArtifactState::InstallFailed
                | ArtifactState::ResolveFailed
                | ArtifactState::StartFailed
                | ArtifactState::StopFailed
                | ArtifactState::UninstallFailed
        )
    }

    /// Whether an artifact in this state is subject to `uninstall()`
    #[must_use]
    pub fn is_uninstallable(self) -> bool {
        matches!(
            self,
            ArtifactState::Starting | ArtifactState::Active | ArtifactState::Resolved | ArtifactState::Installed
        )
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A move outside the transition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal state transition {from} -> {to}")]
pub struct IllegalStateTransition {
    pub from: ArtifactState,
    pub to: ArtifactState,
}

/// Check a transition against the table
///
/// # Errors
/// Returns error if `to` is not reachable from `from` in one step
pub fn validate_transition(from: ArtifactState, to: ArtifactState) -> Result<(), IllegalStateTransition> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(IllegalStateTransition { from, to })
    }
}

/// States reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ArtifactState) -> Vec<ArtifactState> {
    use ArtifactState::*;
    match from {
        Initial => vec![Installing, InstallFailed],
        Installing => vec![Installed, InstallFailed],
        InstallFailed => vec![Installing],
        Installed => vec![Resolving, Starting, Uninstalling],
        Resolving => vec![Resolved, ResolveFailed],
        Resolved => vec![Starting, Uninstalling],
        ResolveFailed => vec![Resolving, Uninstalling],
        Starting => vec![Active, StartFailed, Uninstalling],
        Active => vec![Stopping],
        StartFailed => vec![Starting, Uninstalling],
        Stopping => vec![Stopped, StopFailed],
        Stopped => vec![Resolved],
        StopFailed => vec![Starting, Uninstalling],
        Uninstalling => vec![Uninstalled, UninstallFailed],
        Uninstalled | UninstallFailed => vec![],
    }
}

#[must_use]
pub fn transition_allowed(from: ArtifactState, to: ArtifactState) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = ArtifactState> {
        proptest::sample::select(ArtifactState::ALL.to_vec())
    }

    #[test]
    fn happy_path_is_allowed() {
        use ArtifactState::*;
        let path = [
            Initial, Installing, Installed, Resolving, Resolved, Starting, Active, Stopping, Stopped,
            Resolved, Uninstalling, Uninstalled,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn stopped_is_not_uninstallable() {
        assert!(!ArtifactState::Stopped.is_uninstallable());
        assert_eq!(allowed_transitions(ArtifactState::Stopped), vec![ArtifactState::Resolved]);
    }

    #[test]
    fn terminal_states() {
        assert!(allowed_transitions(ArtifactState::Uninstalled).is_empty());
        assert!(allowed_transitions(ArtifactState::UninstallFailed).is_empty());
    }

    #[test]
    fn active_must_stop_before_uninstall() {
        let err = validate_transition(ArtifactState::Active, ArtifactState::Uninstalling).unwrap_err();
        assert_eq!(err.to_string(), "illegal state transition ACTIVE -> UNINSTALLING");
    }

    proptest! {
        #[test]
        fn prop_validate_agrees_with_table(from in any_state(), to in any_state()) {
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed_transitions(from).contains(&to));
        }

        #[test]
        fn prop_no_self_transitions(state in any_state()) {
            prop_assert!(!transition_allowed(state, state));
        }

        #[test]
        fn prop_failed_states_only_reached_from_transient(from in any_state(), to in any_state()) {
            if to.is_failed() && transition_allowed(from, to) {
                prop_assert!(from.is_transient() || from == ArtifactState::Initial);
            }
        }

        #[test]
        fn prop_uninstallable_states_reach_uninstalling(state in any_state()) {
            if state.is_uninstallable() && state != ArtifactState::Active {
                prop_assert!(transition_allowed(state, ArtifactState::Uninstalling));
            }
        }
    }
}
