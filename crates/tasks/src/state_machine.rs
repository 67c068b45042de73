//! The task status state machine.
//!
//! `pending → assigned → in_progress → (completed | failed | cancelled)`,
//! with `assigned → delegated → assigned` bounded by the delegation budget,
//! and cancellation allowed from any non-terminal state.

use crate::types::TaskStatus;

/// Whether `from → to` is a legal edge.
#[must_use]
pub fn transition_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::{Assigned, Cancelled, Completed, Delegated, Failed, InProgress, Pending};
    matches!(
        (from, to),
        (Pending, Assigned)
            | (Assigned, InProgress)
            | (Assigned, Delegated)
            | (Delegated, Assigned)
            | (InProgress, Completed)
            | (InProgress, Failed)
            | (InProgress, Delegated)
            | (Pending, Cancelled)
            | (Assigned, Cancelled)
            | (InProgress, Cancelled)
            | (Delegated, Cancelled)
    )
}

#[cfg(test)]
mod tests {
    use {super::*, crate::types::TaskStatus::*, rstest::rstest};

    #[rstest]
    #[case(Pending, Assigned)]
    #[case(Assigned, InProgress)]
    #[case(InProgress, Completed)]
    #[case(InProgress, Failed)]
    #[case(Assigned, Delegated)]
    #[case(Delegated, Assigned)]
    #[case(InProgress, Delegated)]
    fn legal_edges(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(transition_allowed(from, to));
    }

    #[rstest]
    fn cancellation_from_non_terminal_states(
        #[values(Pending, Assigned, InProgress, Delegated)] from: TaskStatus,
    ) {
        assert!(transition_allowed(from, Cancelled));
    }

    #[rstest]
    fn terminal_states_have_no_exits(
        #[values(Completed, Failed, Cancelled)] from: TaskStatus,
        #[values(Pending, Assigned, InProgress, Completed, Failed, Cancelled, Delegated)]
        to: TaskStatus,
    ) {
        assert!(!transition_allowed(from, to));
    }

    #[rstest]
    #[case(Pending, InProgress)]
    #[case(Pending, Completed)]
    #[case(Assigned, Completed)]
    #[case(Delegated, InProgress)]
    fn shortcut_edges_are_rejected(#[case] from: TaskStatus, #[case] to: TaskStatus) {
        assert!(!transition_allowed(from, to));
    }
}
