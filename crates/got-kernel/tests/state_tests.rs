use got_kernel::state_machine::{allowed_transitions, validate_transition};
use got_kernel::types::{StageId, StageStatus};
use proptest::prelude::*;

fn any_status() -> impl Strategy<Value = StageStatus> {
    prop_oneof![
        Just(StageStatus::Pending),
        Just(StageStatus::Running),
        Just(StageStatus::Completed),
        Just(StageStatus::Failed),
        Just(StageStatus::Blocked),
        Just(StageStatus::Cancelled),
    ]
}

#[test]
fn test_pending_transitions() {
    let id = StageId::from("N1");
    assert!(validate_transition(&id, StageStatus::Pending, StageStatus::Running).is_ok());
    assert!(validate_transition(&id, StageStatus::Pending, StageStatus::Blocked).is_ok());
    assert!(validate_transition(&id, StageStatus::Pending, StageStatus::Cancelled).is_ok());

    // Must run before it can finish
    assert!(validate_transition(&id, StageStatus::Pending, StageStatus::Completed).is_err());
    assert!(validate_transition(&id, StageStatus::Pending, StageStatus::Failed).is_err());
}

#[test]
fn test_running_transitions() {
    let id = StageId::from("N1");
    assert!(validate_transition(&id, StageStatus::Running, StageStatus::Completed).is_ok());
    assert!(validate_transition(&id, StageStatus::Running, StageStatus::Failed).is_ok());
    assert!(validate_transition(&id, StageStatus::Running, StageStatus::Cancelled).is_ok());

    assert!(validate_transition(&id, StageStatus::Running, StageStatus::Blocked).is_err());
    assert!(validate_transition(&id, StageStatus::Running, StageStatus::Pending).is_err());
}

#[cfg(not(feature = "strict-debug"))]
#[test]
fn test_illegal_transition_names_stage() {
    let err = validate_transition(&"N7".into(), StageStatus::Completed, StageStatus::Running)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "illegal transition for stage N7: completed -> running"
    );
}

proptest! {
    #[test]
    fn prop_validation_matches_allowed_table(from in any_status(), to in any_status()) {
        let res = validate_transition(&"S".into(), from, to);
        let allowed = allowed_transitions(from);

        prop_assert_eq!(res.is_ok(), allowed.contains(&to));
    }

    #[test]
    fn prop_terminal_states_are_final(from in any_status()) {
        if from.is_terminal() {
            prop_assert!(allowed_transitions(from).is_empty());
        } else {
            prop_assert!(!allowed_transitions(from).is_empty());
        }
    }
}
