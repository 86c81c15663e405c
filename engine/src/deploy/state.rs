//! Deploy pipeline state machine

use serde::{Deserialize, Serialize};

/// Pipeline state within one deploy's critical section.
///
/// The happy path is strictly ordered: configuration must be written
/// before any reload, reloads before the process restart, the restart
/// before the final commit. Rollback is reachable from every state
/// after the lock is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployState {
    /// Lock acquired, nothing touched yet
    Locked,

    /// Config files rendered and staged
    ConfigWritten,

    /// Proxy picked up the new vhost fragment
    ProxyReloaded,

    /// Supervisor reread its configuration
    SupervisorReloaded,

    /// Project process group restarted
    ProcessRestarted,

    /// Changes committed, deployment recorded
    Committed,

    /// Working tree reset to the last commit
    RolledBack,
}

impl DeployState {
    /// Move to `next`, rejecting transitions that would reorder the
    /// critical section.
    pub fn advance(&mut self, next: DeployState) -> Result<(), String> {
        use DeployState::*;

        let ok = match (*self, next) {
            // Rollback is always reachable once the lock is held.
            (Committed, RolledBack) => false,
            (_, RolledBack) => true,

            (Locked, ConfigWritten) => true,

            // Proxy and supervisor reloads are each optional.
            (ConfigWritten, ProxyReloaded) => true,
            (ConfigWritten, SupervisorReloaded) => true,
            (ConfigWritten, ProcessRestarted) => true,
            (ConfigWritten, Committed) => true,

            (ProxyReloaded, SupervisorReloaded) => true,
            (ProxyReloaded, ProcessRestarted) => true,
            (ProxyReloaded, Committed) => true,

            (SupervisorReloaded, ProcessRestarted) => true,
            (SupervisorReloaded, Committed) => true,

            (ProcessRestarted, Committed) => true,

            _ => false,
        };

        if ok {
            *self = next;
            Ok(())
        } else {
            Err(format!("invalid transition: {:?} -> {:?}", self, next))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployState::Committed | DeployState::RolledBack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mut state = DeployState::Locked;
        state.advance(DeployState::ConfigWritten).unwrap();
        state.advance(DeployState::ProxyReloaded).unwrap();
        state.advance(DeployState::SupervisorReloaded).unwrap();
        state.advance(DeployState::ProcessRestarted).unwrap();
        state.advance(DeployState::Committed).unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn reloads_are_optional() {
        let mut state = DeployState::Locked;
        state.advance(DeployState::ConfigWritten).unwrap();
        state.advance(DeployState::Committed).unwrap();
    }

    #[test]
    fn cannot_reorder_the_critical_section() {
        let mut state = DeployState::Locked;
        assert!(state.advance(DeployState::ProcessRestarted).is_err());

        let mut state = DeployState::ProcessRestarted;
        assert!(state.advance(DeployState::ProxyReloaded).is_err());
    }

    #[test]
    fn rollback_reachable_until_committed() {
        let mut state = DeployState::ConfigWritten;
        state.advance(DeployState::RolledBack).unwrap();
        assert!(state.is_terminal());

        let mut state = DeployState::Committed;
        assert!(state.advance(DeployState::RolledBack).is_err());
    }
}
