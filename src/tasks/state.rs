use super::types::State;

/// States reachable from `src` in one step, not counting `src` itself.
pub fn allowed_transitions(src: State) -> &'static [State] {
    match src {
        State::Pending => &[State::Scheduled],
        State::Scheduled => &[State::Running, State::Failed],
        State::Running => &[State::Completed, State::Failed],
        State::Completed | State::Failed => &[],
    }
}

/// Whether a task in `src` may be moved to `dst`.
///
/// Re-asserting the current state is always allowed. Must be consulted before
/// a task's state is overwritten.
pub fn valid_state_transition(src: State, dst: State) -> bool {
    src == dst || allowed_transitions(src).contains(&dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const ALL_STATES: [State; 5] = [
        State::Pending,
        State::Scheduled,
        State::Running,
        State::Completed,
        State::Failed,
    ];

    #[rstest]
    #[case(State::Pending, State::Pending, true)]
    #[case(State::Pending, State::Scheduled, true)]
    #[case(State::Pending, State::Running, false)]
    #[case(State::Pending, State::Completed, false)]
    #[case(State::Pending, State::Failed, false)]
    #[case(State::Scheduled, State::Pending, false)]
    #[case(State::Scheduled, State::Scheduled, true)]
    #[case(State::Scheduled, State::Running, true)]
    #[case(State::Scheduled, State::Completed, false)]
    #[case(State::Scheduled, State::Failed, true)]
    #[case(State::Running, State::Pending, false)]
    #[case(State::Running, State::Scheduled, false)]
    #[case(State::Running, State::Running, true)]
    #[case(State::Running, State::Completed, true)]
    #[case(State::Running, State::Failed, true)]
    #[case(State::Completed, State::Pending, false)]
    #[case(State::Completed, State::Scheduled, false)]
    #[case(State::Completed, State::Running, false)]
    #[case(State::Completed, State::Completed, true)]
    #[case(State::Completed, State::Failed, false)]
    #[case(State::Failed, State::Pending, false)]
    #[case(State::Failed, State::Scheduled, false)]
    #[case(State::Failed, State::Running, false)]
    #[case(State::Failed, State::Completed, false)]
    #[case(State::Failed, State::Failed, true)]
    fn transition_matrix(#[case] src: State, #[case] dst: State, #[case] expected: bool) {
        assert_eq!(valid_state_transition(src, dst), expected);
    }

    #[rstest]
    #[case(State::Completed)]
    #[case(State::Failed)]
    fn terminal_states_have_no_way_out(#[case] terminal: State) {
        assert!(allowed_transitions(terminal).is_empty());
        for dst in ALL_STATES.into_iter().filter(|dst| *dst != terminal) {
            assert!(
                !valid_state_transition(terminal, dst),
                "{terminal:?} -> {dst:?} must be rejected"
            );
        }
    }

    #[test]
    fn allowed_targets_never_include_the_source() {
        for src in ALL_STATES {
            assert!(!allowed_transitions(src).contains(&src));
        }
    }
}
