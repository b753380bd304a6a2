// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The task lifecycle state machine (spec §3, §4.4, §4.5).

/// A task's externally observable lifecycle state.
///
/// Transitions are constrained; see [`TaskState::can_transition`]. There is
/// deliberately no `None` variant: task creation is a transition *into* one
/// of the reachable states, tracked by passing `None` as the "previous state"
/// when recording the `task_state` event, not by representing absence as a
/// member of this enum.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Ready,
    Running,
    WaitMailbox,
    Sleeping,
    Paused,
    Returned,
    Terminated,
    Killed,
}

impl TaskState {
    /// Whether `self` is a terminal, absorbing state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Terminated | TaskState::Killed)
    }

    /// Whether a freshly created task may start in this state.
    pub fn valid_initial(self) -> bool {
        true // every variant is reachable directly from task creation/restore
    }

    /// Whether the transition `self -> next` is permitted by the table in
    /// spec §3. `Terminated`/`Killed` are absorbing: no transition leaves
    /// them.
    pub fn can_transition(self, next: TaskState) -> bool {
        use TaskState::*;
        if self.is_terminal() {
            return false;
        }
        match self {
            Running => matches!(
                next,
                Ready | WaitMailbox | Sleeping | Paused | Returned | Terminated | Killed
            ),
            Ready => matches!(
                next,
                Running | WaitMailbox | Sleeping | Paused | Terminated | Killed
            ),
            WaitMailbox => matches!(next, Ready | Running | Paused | Terminated | Killed),
            Sleeping => matches!(next, Ready | Running | Paused | Terminated | Killed),
            Paused => matches!(next, Ready | Running | Terminated | Killed),
            Returned => matches!(next, Terminated | Killed),
            Terminated | Killed => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskState::*;

    #[test]
    fn terminal_states_absorb() {
        assert!(!Terminated.can_transition(Ready));
        assert!(!Killed.can_transition(Running));
    }

    #[test]
    fn running_ready_is_bidirectional() {
        assert!(Running.can_transition(Ready));
        assert!(Ready.can_transition(Running));
    }

    #[test]
    fn wait_mailbox_never_goes_directly_to_sleeping() {
        assert!(!WaitMailbox.can_transition(Sleeping));
    }

    #[test]
    fn returned_only_goes_to_terminal_states() {
        assert!(Returned.can_transition(Terminated));
        assert!(Returned.can_transition(Killed));
        assert!(!Returned.can_transition(Ready));
        assert!(!Returned.can_transition(Running));
    }

    #[test]
    fn paused_cannot_sleep_or_wait_mailbox() {
        assert!(!Paused.can_transition(Sleeping));
        assert!(!Paused.can_transition(WaitMailbox));
        assert!(Paused.can_transition(Running));
    }
}
